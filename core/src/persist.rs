use crate::bookkeeper::OffsetDirectory;
use crate::error::{IndexError, Result};
use crate::{DocTable, PartialIndex, ShardIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u64,
    pub skipped_docs: u64,
    pub next_doc_id: u32,
    pub batches: u32,
    pub created_at: String,
    pub version: u32,
}

/// Layout of an index directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn batches_dir(&self) -> PathBuf { self.root.join("batches") }
    pub fn shards_dir(&self) -> PathBuf { self.root.join("shards") }
    pub fn docs(&self) -> PathBuf { self.root.join("docs.json") }
    pub fn bookkeeper(&self) -> PathBuf { self.root.join("bookkeeper.json") }
    pub fn doc_frequencies(&self) -> PathBuf { self.root.join("df.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }

    pub fn batch_file(&self, seq: u32) -> PathBuf {
        self.batches_dir().join(format!("batch_{seq:06}.json"))
    }

    pub fn shard_file(&self, name: &str) -> PathBuf {
        self.shards_dir().join(name)
    }
}

/// Write through a temp file and rename, so readers never observe a half-written file.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        write(&mut w)?;
        w.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let f = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}

pub fn save_batch(path: &Path, batch: &PartialIndex) -> Result<()> {
    write_atomic(path, |w| Ok(serde_json::to_writer_pretty(w, batch)?))
}

pub fn load_batch(path: &Path) -> Result<PartialIndex> {
    read_json(path).map_err(|e| IndexError::CorruptBatch { path: path.to_path_buf(), reason: e.to_string() })
}

/// Batch files in sequence order.
pub fn list_batches(paths: &IndexPaths) -> Result<Vec<PathBuf>> {
    let dir = paths.batches_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| batch_seq(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

/// Sequence number encoded in a batch file name.
pub fn batch_seq(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix("batch_")?.strip_suffix(".json")?.parse().ok()
}

/// Shards are written compactly; the offset directory indexes these exact bytes.
pub fn save_shard(path: &Path, shard: &ShardIndex) -> Result<()> {
    write_atomic(path, |w| Ok(serde_json::to_writer(w, shard)?))
}

pub fn load_shard(path: &Path) -> Result<ShardIndex> {
    read_json(path)
}

pub fn save_docs(paths: &IndexPaths, docs: &DocTable) -> Result<()> {
    write_atomic(&paths.docs(), |w| Ok(serde_json::to_writer_pretty(w, docs)?))
}

pub fn load_docs(paths: &IndexPaths) -> Result<DocTable> {
    read_json(&paths.docs())
}

pub fn save_bookkeeper(paths: &IndexPaths, dir: &OffsetDirectory) -> Result<()> {
    write_atomic(&paths.bookkeeper(), |w| Ok(serde_json::to_writer_pretty(w, dir)?))
}

pub fn load_bookkeeper(paths: &IndexPaths) -> Result<OffsetDirectory> {
    read_json(&paths.bookkeeper())
}

pub fn save_doc_frequencies(paths: &IndexPaths, df: &HashMap<String, u64>) -> Result<()> {
    write_atomic(&paths.doc_frequencies(), |w| Ok(bincode::serialize_into(w, df)?))
}

pub fn load_doc_frequencies(paths: &IndexPaths) -> Result<HashMap<String, u64>> {
    let f = File::open(paths.doc_frequencies())?;
    Ok(bincode::deserialize_from(BufReader::new(f))?)
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    write_atomic(&paths.meta(), |w| Ok(serde_json::to_writer_pretty(w, meta)?))
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    read_json(&paths.meta())
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Posting;

    #[test]
    fn batch_names_sort_by_sequence() {
        let paths = IndexPaths::new("/idx");
        assert_eq!(batch_seq(&paths.batch_file(12)), Some(12));
        assert!(paths.batch_file(9) < paths.batch_file(10));
        assert_eq!(batch_seq(Path::new("/idx/batches/notes.txt")), None);
    }

    #[test]
    fn doc_table_uses_string_keys() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(dir.path());
        let mut docs = DocTable::new();
        docs.insert(2, "http://b".into());
        docs.insert(10, "http://j".into());
        save_docs(&paths, &docs).unwrap();
        let raw = fs::read_to_string(paths.docs()).unwrap();
        assert!(raw.contains("\"10\": \"http://j\""));
        assert_eq!(load_docs(&paths).unwrap(), docs);
    }

    #[test]
    fn corrupt_batch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_000001.json");
        fs::write(&path, "{\"ocean\": [[1, 1").unwrap();
        assert!(matches!(load_batch(&path), Err(IndexError::CorruptBatch { .. })));

        let mut batch = PartialIndex::new();
        batch.insert("ocean".into(), vec![Posting { doc_id: 1, tf_raw: 1, score: 1.0 }]);
        save_batch(&path, &batch).unwrap();
        assert_eq!(load_batch(&path).unwrap(), batch);
    }
}
