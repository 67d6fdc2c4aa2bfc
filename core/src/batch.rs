//! Build phase: id assignment, parallel per-document indexing, batch accumulation.

use crate::error::{IndexError, Result};
use crate::extract::{extract_text, SkipReason};
use crate::partial::{build_partial, DocumentIndex};
use crate::persist::{self, list_batches, load_docs, load_meta, save_meta, IndexPaths, MetaFile, FORMAT_VERSION};
use crate::writer::{DiskWriter, WriteJob};
use crate::{sort_postings, DocId, DocTable, PartialIndex, RawDocument};
use rayon::prelude::*;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Documents per batch file.
    pub batch_size: usize,
    /// Batches allowed to wait for the disk writer.
    pub writer_queue: usize,
    /// Keep existing batches and the document table, continuing both sequences.
    pub append: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { batch_size: 10_000, writer_queue: 4, append: false }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub indexed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub batches: u32,
    pub next_doc_id: DocId,
    pub batch_files: Vec<PathBuf>,
}

/// Result of indexing one document on a worker.
#[derive(Debug)]
pub enum Outcome {
    Indexed(DocumentIndex),
    Skipped(DocId, SkipReason),
    Failed(DocId, IndexError),
}

/// Extraction plus partial indexing of one document. No shared state.
pub fn index_document(doc_id: DocId, doc: &RawDocument) -> Outcome {
    let extracted = match extract_text(&doc.content) {
        Ok(ex) => ex,
        Err(reason) => return Outcome::Skipped(doc_id, reason),
    };
    match build_partial(doc_id, &doc.url, &extracted) {
        Ok(index) => Outcome::Indexed(index),
        Err(e) => Outcome::Failed(doc_id, e),
    }
}

/// Run `indexer` on one document, turning a panic into a dropped document.
pub fn index_guarded(indexer: IndexFn, doc_id: DocId, doc: &RawDocument) -> Outcome {
    panic::catch_unwind(AssertUnwindSafe(|| indexer(doc_id, doc))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".into());
        Outcome::Failed(doc_id, IndexError::WorkerPanic(message))
    })
}

pub type IndexFn = fn(DocId, &RawDocument) -> Outcome;

/// Single owner of the id counter, the batch accumulator and the document table.
pub struct BatchOrchestrator {
    batch_size: usize,
    indexer: IndexFn,
    writer: DiskWriter,
    next_doc_id: DocId,
    next_batch: u32,
    pending: Vec<(DocId, RawDocument)>,
    doc_table: DocTable,
    report: BuildReport,
}

impl BatchOrchestrator {
    pub fn new(paths: &IndexPaths, config: &BuildConfig) -> Result<Self> {
        let writer = DiskWriter::spawn(paths.clone(), config.writer_queue)?;
        Ok(Self {
            batch_size: config.batch_size.max(1),
            indexer: index_document,
            writer,
            next_doc_id: 1,
            next_batch: 1,
            pending: Vec::new(),
            doc_table: DocTable::new(),
            report: BuildReport::default(),
        })
    }

    /// Continue after a previous run: batches after `last_batch`, ids from `next_doc_id` or past
    /// the table's largest id, whichever is later. Ids burned by skipped documents stay unused.
    pub fn resume(mut self, doc_table: DocTable, last_batch: u32, next_doc_id: DocId) -> Self {
        let after_table = doc_table.keys().next_back().map_or(1, |id| id + 1);
        self.next_doc_id = next_doc_id.max(after_table);
        self.next_batch = last_batch + 1;
        self.doc_table = doc_table;
        self
    }

    /// Replace the per-document indexing step.
    pub fn with_indexer(mut self, indexer: IndexFn) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn next_doc_id(&self) -> DocId {
        self.next_doc_id
    }

    /// Assign the next id to `doc` and queue it; a full batch is flushed immediately.
    pub fn add(&mut self, doc: RawDocument) -> Result<DocId> {
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;
        self.pending.push((doc_id, doc));
        if self.pending.len() >= self.batch_size {
            self.flush_batch()?;
        }
        Ok(doc_id)
    }

    fn flush_batch(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let docs = std::mem::take(&mut self.pending);
        let count = docs.len();
        let indexer = self.indexer;
        let outcomes: Vec<Outcome> = docs
            .into_par_iter()
            .map(|(doc_id, doc)| index_guarded(indexer, doc_id, &doc))
            .collect();

        let mut batch = PartialIndex::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Indexed(index) => {
                    self.report.indexed += 1;
                    self.doc_table.insert(index.doc_id, index.url);
                    for (term, posting) in index.terms {
                        batch.entry(term).or_default().push(posting);
                    }
                }
                Outcome::Skipped(doc_id, reason) => {
                    self.report.skipped += 1;
                    tracing::warn!(doc_id, %reason, "document skipped");
                }
                Outcome::Failed(doc_id, e) => {
                    self.report.failed += 1;
                    tracing::warn!(doc_id, error = %e, "document dropped");
                }
            }
        }
        for postings in batch.values_mut() {
            sort_postings(postings);
        }

        if batch.is_empty() {
            tracing::warn!(docs = count, "batch produced no postings; nothing written");
            return Ok(());
        }
        let seq = self.next_batch;
        self.next_batch += 1;
        self.report.batches += 1;
        tracing::info!(batch = seq, docs = count, terms = batch.len(), "batch queued");
        self.writer.submit(WriteJob::Batch { seq, index: batch })?;
        let progress = self.writer.progress();
        tracing::debug!(written = progress.batches_written.len(), queued = self.report.batches, "writer progress");
        Ok(())
    }

    /// Flush the last partial batch, write the document table and wait for the writer to drain.
    pub fn finish(mut self) -> Result<(BuildReport, DocTable)> {
        self.flush_batch()?;
        self.writer.submit(WriteJob::DocTable(self.doc_table.clone()))?;
        let written = self.writer.finish()?;
        let mut report = self.report;
        report.next_doc_id = self.next_doc_id;
        report.batch_files = written.batches_written;
        Ok((report, self.doc_table))
    }
}

/// Run the whole build phase over `docs` and record it in `meta.json`.
pub fn build_index<I>(paths: &IndexPaths, config: &BuildConfig, docs: I) -> Result<BuildReport>
where
    I: IntoIterator<Item = RawDocument>,
{
    fs::create_dir_all(&paths.root)?;
    let mut orchestrator = BatchOrchestrator::new(paths, config)?;
    let mut prior_skipped = 0;

    if config.append && paths.docs().exists() {
        let table = load_docs(paths)?;
        let last_batch = list_batches(paths)?
            .iter()
            .filter_map(|p| persist::batch_seq(p))
            .max()
            .unwrap_or(0);
        let (prior_next, skipped) = match load_meta(paths) {
            Ok(meta) => (meta.next_doc_id, meta.skipped_docs),
            Err(e) => {
                tracing::warn!(error = %e, "no readable build metadata; continuing after the document table");
                (1, 0)
            }
        };
        prior_skipped = skipped;
        orchestrator = orchestrator.resume(table, last_batch, prior_next);
        tracing::info!(next_doc_id = orchestrator.next_doc_id(), last_batch, "appending to existing build");
    } else if paths.batches_dir().exists() {
        fs::remove_dir_all(paths.batches_dir())?;
    }

    for doc in docs {
        orchestrator.add(doc)?;
    }
    let (report, table) = orchestrator.finish()?;

    let meta = MetaFile {
        num_docs: table.len() as u64,
        skipped_docs: prior_skipped + report.skipped + report.failed,
        next_doc_id: report.next_doc_id,
        batches: list_batches(paths)?.len() as u32,
        created_at: persist::now_rfc3339(),
        version: FORMAT_VERSION,
    };
    save_meta(paths, &meta)?;
    tracing::info!(
        indexed = report.indexed,
        skipped = report.skipped,
        failed = report.failed,
        batches = report.batches,
        "build complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::load_batch;

    fn doc(url: &str, content: &str) -> RawDocument {
        RawDocument { url: url.into(), content: content.into() }
    }

    #[test]
    fn batches_fill_to_size_and_flush_remainder() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let config = BuildConfig { batch_size: 2, ..Default::default() };
        let docs = (0..5).map(|i| doc(&format!("http://d/{i}"), "<p>shared words here</p>"));
        let report = build_index(&paths, &config, docs).unwrap();

        assert_eq!(report.indexed, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(report.next_doc_id, 6);
        let files = list_batches(&paths).unwrap();
        assert_eq!(files.len(), 3);
        let last = load_batch(&files[2]).unwrap();
        assert_eq!(last["share"].len(), 1);
        assert_eq!(last["share"][0].doc_id, 5);
        assert_eq!(load_docs(&paths).unwrap().len(), 5);
        assert_eq!(load_meta(&paths).unwrap().num_docs, 5);
    }

    #[test]
    fn skipped_document_burns_its_id() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let docs = vec![
            doc("http://a", "<p>alpha</p>"),
            doc("http://broken", "not markup at all"),
            doc("http://c", "<p>alpha gamma</p>"),
        ];
        let report = build_index(&paths, &BuildConfig::default(), docs).unwrap();
        assert_eq!(report.skipped, 1);
        let table = load_docs(&paths).unwrap();
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        let batch = load_batch(&list_batches(&paths).unwrap()[0]).unwrap();
        assert!(batch.values().flatten().all(|p| p.doc_id != 2));
    }

    #[test]
    fn postings_sorted_by_pre_idf_score_then_doc_id() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let docs = vec![
            doc("http://1", "<p>reef</p>"),
            doc("http://2", "<p>reef reef</p>"),
            doc("http://3", "<p>reef</p>"),
        ];
        build_index(&paths, &BuildConfig::default(), docs).unwrap();
        let batch = load_batch(&list_batches(&paths).unwrap()[0]).unwrap();
        let ids: Vec<DocId> = batch["reef"].iter().map(|p| p.doc_id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn append_continues_ids_and_batches() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        build_index(&paths, &BuildConfig::default(), vec![doc("http://a", "<p>alpha</p>")]).unwrap();
        let config = BuildConfig { append: true, ..Default::default() };
        let report = build_index(&paths, &config, vec![doc("http://b", "<p>beta</p>")]).unwrap();

        assert_eq!(report.next_doc_id, 3);
        let table = load_docs(&paths).unwrap();
        assert_eq!(table.get(&1).map(String::as_str), Some("http://a"));
        assert_eq!(table.get(&2).map(String::as_str), Some("http://b"));
        let files = list_batches(&paths).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(persist::batch_seq(&files[1]), Some(2));
    }

    #[test]
    fn append_never_reuses_a_skipped_id() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let first = vec![doc("http://a", "<p>alpha</p>"), doc("http://broken", "not markup at all")];
        build_index(&paths, &BuildConfig::default(), first).unwrap();
        assert_eq!(load_meta(&paths).unwrap().next_doc_id, 3);

        let config = BuildConfig { append: true, ..Default::default() };
        let report = build_index(&paths, &config, vec![doc("http://c", "<p>gamma</p>")]).unwrap();
        let table = load_docs(&paths).unwrap();
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(table.get(&3).map(String::as_str), Some("http://c"));
        assert_eq!(report.next_doc_id, 4);
        assert_eq!(load_meta(&paths).unwrap().skipped_docs, 1);
    }

    #[test]
    fn resume_takes_the_later_of_meta_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut table = DocTable::new();
        table.insert(7, "http://g".into());

        let orchestrator = BatchOrchestrator::new(&paths, &BuildConfig::default()).unwrap();
        assert_eq!(orchestrator.next_doc_id(), 1);
        let orchestrator = orchestrator.resume(table.clone(), 2, 12);
        assert_eq!(orchestrator.next_doc_id(), 12);

        let orchestrator = BatchOrchestrator::new(&paths, &BuildConfig::default()).unwrap().resume(table, 2, 3);
        assert_eq!(orchestrator.next_doc_id(), 8);
    }

    fn panics_on_poison(doc_id: DocId, doc: &RawDocument) -> Outcome {
        if doc.content.contains("poison") {
            panic!("cannot index doc {doc_id}");
        }
        index_document(doc_id, doc)
    }

    #[test]
    fn panicking_worker_drops_only_its_document() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut orchestrator = BatchOrchestrator::new(&paths, &BuildConfig::default())
            .unwrap()
            .with_indexer(panics_on_poison);
        orchestrator.add(doc("http://a", "<p>alpha</p>")).unwrap();
        orchestrator.add(doc("http://p", "<p>poison</p>")).unwrap();
        orchestrator.add(doc("http://c", "<p>alpha gamma</p>")).unwrap();
        let (report, table) = orchestrator.finish().unwrap();

        assert_eq!(report.indexed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        let batch = load_batch(&list_batches(&paths).unwrap()[0]).unwrap();
        assert!(!batch.contains_key("poison"));
        assert!(batch.values().flatten().all(|p| p.doc_id != 2));
    }

    #[test]
    fn guarded_indexing_reports_panic_message() {
        let outcome = index_guarded(panics_on_poison, 9, &doc("http://p", "<p>poison</p>"));
        match outcome {
            Outcome::Failed(9, IndexError::WorkerPanic(msg)) => assert!(msg.contains("doc 9")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn rebuild_clears_old_batches() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let config = BuildConfig { batch_size: 1, ..Default::default() };
        build_index(&paths, &config, vec![doc("http://a", "<p>alpha</p>"), doc("http://b", "<p>beta</p>")]).unwrap();
        build_index(&paths, &config, vec![doc("http://c", "<p>gamma</p>")]).unwrap();
        assert_eq!(list_batches(&paths).unwrap().len(), 1);
        assert_eq!(load_docs(&paths).unwrap().len(), 1);
    }
}
