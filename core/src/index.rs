use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub type DocId = u32;

/// Maximum number of postings kept per term after a merge.
pub const DEFAULT_TOP_K: usize = 50;

/// One document's occurrence record for a term.
///
/// Stored on disk as a `[doc_id, tf_raw, score]` triple. Inside batch files `score` is the
/// provisional pre-IDF weight; inside shard files it is the final corpus-level score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(DocId, u32, f64)", into = "(DocId, u32, f64)")]
pub struct Posting {
    pub doc_id: DocId,
    pub tf_raw: u32,
    pub score: f64,
}

impl From<(DocId, u32, f64)> for Posting {
    fn from((doc_id, tf_raw, score): (DocId, u32, f64)) -> Self {
        Self { doc_id, tf_raw, score }
    }
}

impl From<Posting> for (DocId, u32, f64) {
    fn from(p: Posting) -> Self {
        (p.doc_id, p.tf_raw, p.score)
    }
}

/// Orders by score descending, then doc id descending.
pub fn rank_order(a: &Posting, b: &Posting) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| b.doc_id.cmp(&a.doc_id))
}

pub fn sort_postings(postings: &mut [Posting]) {
    postings.sort_by(rank_order);
}

/// term -> postings for one batch of documents; scores are pre-IDF.
pub type PartialIndex = BTreeMap<String, Vec<Posting>>;

/// term -> final postings for one shard.
pub type ShardIndex = BTreeMap<String, Vec<Posting>>;

/// doc id -> URL. Serialized with the id as a string key.
pub type DocTable = BTreeMap<DocId, String>;

/// A document as handed over by the corpus source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDocument {
    pub url: String,
    pub content: String,
}

/// Storage partition key of a term: its first character, lowercased.
/// Characters that are not alphanumeric share the `_` shard.
pub fn shard_key(term: &str) -> Option<char> {
    let first = term.chars().next()?;
    let lower = first.to_lowercase().next().unwrap_or(first);
    if lower.is_alphanumeric() {
        Some(lower)
    } else {
        Some('_')
    }
}

pub fn shard_file_name(key: char) -> String {
    format!("{key}.json")
}
