use crate::DocId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("raw term frequency must be at least 1, got {0}")]
    InvalidFrequency(u32),

    #[error("document frequency {doc_frequency} is outside 1..={total_docs}")]
    InvalidDocumentFrequency { total_docs: u64, doc_frequency: u64 },

    #[error("batch file {path:?} is unreadable: {reason}")]
    CorruptBatch { path: PathBuf, reason: String },

    #[error("shard file {path:?} is malformed: {reason}")]
    CorruptShard { path: PathBuf, reason: String },

    /// The offset directory points at content that does not belong to the term.
    #[error("stale offset for '{term}' in {shard}: {reason}")]
    StaleOffset { shard: String, term: String, reason: String },

    /// A shard posting names a doc id that the document table does not know.
    #[error("doc id {0} has no entry in the document table")]
    MissingDocument(DocId),

    #[error("indexing worker panicked: {0}")]
    WorkerPanic(String),

    #[error("disk writer failed: {0}")]
    Writer(String),

    #[error("inconsistent corpus: {0}")]
    InconsistentCorpus(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
