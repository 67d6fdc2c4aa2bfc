//! Background writer that moves batch serialization off the indexing path.
//!
//! Jobs are drained in submission order by one thread. `finish` sends the shutdown
//! sentinel and joins, so every job queued before it is on disk when it returns.

use crate::error::{IndexError, Result};
use crate::persist::{save_batch, save_docs, IndexPaths};
use crate::{DocTable, PartialIndex};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub enum WriteJob {
    Batch { seq: u32, index: PartialIndex },
    DocTable(DocTable),
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct WriterReport {
    pub batches_written: Vec<PathBuf>,
    pub doc_table_written: bool,
    pub errors: Vec<String>,
}

pub struct DiskWriter {
    sender: SyncSender<WriteJob>,
    handle: Option<JoinHandle<()>>,
    report: Arc<Mutex<WriterReport>>,
}

impl DiskWriter {
    /// Start the writer thread. At most `queue` jobs wait in the channel; producers block beyond that.
    pub fn spawn(paths: IndexPaths, queue: usize) -> Result<Self> {
        let (sender, receiver) = sync_channel::<WriteJob>(queue.max(1));
        let report = Arc::new(Mutex::new(WriterReport::default()));
        let thread_report = Arc::clone(&report);

        let handle = thread::Builder::new()
            .name("disk-writer".into())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    match job {
                        WriteJob::Batch { seq, index } => {
                            let path = paths.batch_file(seq);
                            match save_batch(&path, &index) {
                                Ok(()) => {
                                    tracing::info!(batch = seq, terms = index.len(), path = %path.display(), "batch written");
                                    thread_report.lock().batches_written.push(path);
                                }
                                Err(e) => {
                                    tracing::error!(batch = seq, error = %e, "failed to write batch");
                                    thread_report.lock().errors.push(format!("batch {seq}: {e}"));
                                }
                            }
                        }
                        WriteJob::DocTable(table) => match save_docs(&paths, &table) {
                            Ok(()) => {
                                tracing::info!(docs = table.len(), "document table written");
                                thread_report.lock().doc_table_written = true;
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "failed to write document table");
                                thread_report.lock().errors.push(format!("document table: {e}"));
                            }
                        },
                        WriteJob::Shutdown => break,
                    }
                }
            })?;

        Ok(Self { sender, handle: Some(handle), report })
    }

    pub fn submit(&self, job: WriteJob) -> Result<()> {
        self.sender
            .send(job)
            .map_err(|_| IndexError::Writer("writer thread is gone".into()))
    }

    /// Snapshot of what has been written so far.
    pub fn progress(&self) -> WriterReport {
        self.report.lock().clone()
    }

    /// Signal end of stream, wait for the queue to drain, and report.
    pub fn finish(mut self) -> Result<WriterReport> {
        self.shutdown()?;
        let report = self.report.lock().clone();
        if !report.errors.is_empty() {
            return Err(IndexError::Writer(report.errors.join("; ")));
        }
        Ok(report)
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else { return Ok(()) };
        // A closed channel means the thread already stopped; join still applies.
        let _ = self.sender.send(WriteJob::Shutdown);
        handle
            .join()
            .map_err(|_| IndexError::Writer("writer thread panicked".into()))
    }
}

impl Drop for DiskWriter {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "disk writer did not shut down cleanly");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{list_batches, load_batch, load_docs};
    use crate::Posting;

    #[test]
    fn drains_everything_before_finish_returns() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let writer = DiskWriter::spawn(paths.clone(), 1).unwrap();
        assert!(writer.progress().batches_written.is_empty());
        for seq in 1..=5 {
            let mut index = PartialIndex::new();
            index.insert(format!("term{seq}"), vec![Posting { doc_id: seq, tf_raw: 1, score: 1.0 }]);
            writer.submit(WriteJob::Batch { seq, index }).unwrap();
        }
        let mut table = DocTable::new();
        table.insert(1, "http://a".into());
        writer.submit(WriteJob::DocTable(table.clone())).unwrap();
        assert!(writer.progress().batches_written.len() <= 5);
        let report = writer.finish().unwrap();

        assert_eq!(report.batches_written.len(), 5);
        assert!(report.doc_table_written);
        let files = list_batches(&paths).unwrap();
        assert_eq!(files, report.batches_written);
        assert!(load_batch(&files[4]).unwrap().contains_key("term5"));
        assert_eq!(load_docs(&paths).unwrap(), table);
    }
}
