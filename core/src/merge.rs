//! Merge & score: fold every batch file into term-sharded storage.
//!
//! Phase 1 computes document frequencies over all batches. Phase 2 rescores each batch's
//! postings with the corpus IDF and folds them into one in-memory map per shard key,
//! keeping the top-k per term. Phase 3 writes every shard and rebuilds its offsets.

use crate::bookkeeper::{scan_shards, OffsetDirectory};
use crate::error::{IndexError, Result};
use crate::persist::{
    list_batches, load_batch, load_docs, load_shard, save_bookkeeper, save_doc_frequencies, save_shard, IndexPaths,
};
use crate::scoring::{combined_score, inverse_document_frequency, term_weight};
use crate::{shard_file_name, shard_key, sort_postings, DocId, PartialIndex, Posting, ShardIndex, DEFAULT_TOP_K};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Bonuses below this are float noise from `pre_idf - term_weight`.
const BONUS_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub top_k: usize,
    /// Corpus size used for IDF; measured when absent.
    pub total_docs: Option<u64>,
    /// Start from the shards already on disk instead of an empty cache.
    pub keep_existing: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K, total_docs: None, keep_existing: false }
    }
}

/// Output of Phase 1.
#[derive(Debug, Clone, Default)]
pub struct CorpusStats {
    /// Term -> number of postings across all readable batches.
    pub doc_frequencies: HashMap<String, u64>,
    pub distinct_docs: u64,
    pub readable: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub total_docs: u64,
    pub batches_merged: usize,
    pub batches_skipped: Vec<PathBuf>,
    pub terms: usize,
    pub shards: Vec<String>,
}

impl MergeReport {
    pub fn is_complete(&self) -> bool {
        self.batches_skipped.is_empty()
    }
}

/// Shard key -> term -> final postings.
pub type ShardCache = BTreeMap<char, ShardIndex>;

/// Phase 1. Unreadable or invalid batches are logged and excluded from everything that follows.
pub fn document_frequencies(batch_files: &[PathBuf]) -> CorpusStats {
    let mut stats = CorpusStats::default();
    let mut docs: HashSet<DocId> = HashSet::new();
    for path in batch_files {
        match load_batch(path).and_then(|batch| validate_batch(path, &batch).map(|()| batch)) {
            Ok(batch) => {
                for (term, postings) in batch {
                    docs.extend(postings.iter().map(|p| p.doc_id));
                    *stats.doc_frequencies.entry(term).or_insert(0) += postings.len() as u64;
                }
                stats.readable.push(path.clone());
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable batch");
                stats.skipped.push(path.clone());
            }
        }
    }
    stats.distinct_docs = docs.len() as u64;
    stats
}

/// A batch that parses can still carry postings no builder would write.
pub fn validate_batch(path: &Path, batch: &PartialIndex) -> Result<()> {
    for (term, postings) in batch {
        if let Some(bad) = postings.iter().find(|p| p.tf_raw == 0 || !p.score.is_finite()) {
            return Err(IndexError::CorruptBatch {
                path: path.to_path_buf(),
                reason: format!("term '{term}' has posting {:?}", bad),
            });
        }
    }
    Ok(())
}

/// Fold a provisional posting's pre-IDF score into its final score.
/// The importance bonus stays additive; only the term weight is scaled by IDF.
pub fn rescore(posting: Posting, idf: f64) -> Result<Posting> {
    let weight = term_weight(posting.tf_raw)?;
    let mut bonus = posting.score - weight;
    if bonus < BONUS_EPSILON {
        bonus = 0.0;
    }
    Ok(Posting { score: combined_score(weight, idf, bonus), ..posting })
}

/// Final-scored postings of one batch, deduplicated by doc id, not yet folded into a cache.
struct Rescored {
    key: char,
    term: String,
    postings: Vec<Posting>,
    doc_ids: HashSet<DocId>,
}

fn rescore_batch(batch: PartialIndex, doc_frequencies: &HashMap<String, u64>, total_docs: u64) -> Result<Vec<Rescored>> {
    let mut out = Vec::with_capacity(batch.len());
    for (term, postings) in batch {
        let Some(key) = shard_key(&term) else {
            tracing::warn!("empty term in batch ignored");
            continue;
        };
        let df = doc_frequencies.get(&term).copied().ok_or_else(|| {
            IndexError::InconsistentCorpus(format!("term '{term}' has no document frequency"))
        })?;
        let idf = inverse_document_frequency(total_docs, df)?;

        let mut doc_ids: HashSet<DocId> = HashSet::new();
        let mut fresh = Vec::with_capacity(postings.len());
        for posting in postings {
            if doc_ids.insert(posting.doc_id) {
                fresh.push(rescore(posting, idf)?);
            }
        }
        out.push(Rescored { key, term, postings: fresh, doc_ids });
    }
    Ok(out)
}

/// Phase 2 for one batch. The whole batch is rescored before the cache is touched, so an
/// error leaves `cache` exactly as it was.
pub fn merge_batch(
    cache: &mut ShardCache,
    batch: PartialIndex,
    doc_frequencies: &HashMap<String, u64>,
    total_docs: u64,
    top_k: usize,
) -> Result<()> {
    for Rescored { key, term, postings, doc_ids } in rescore_batch(batch, doc_frequencies, total_docs)? {
        let shard = cache.entry(key).or_default();
        let prior = shard.remove(&term).unwrap_or_default();
        let mut merged: Vec<Posting> = prior.into_iter().filter(|p| !doc_ids.contains(&p.doc_id)).collect();
        merged.extend(postings);
        sort_postings(&mut merged);
        merged.truncate(top_k);
        shard.insert(term, merged);
    }
    Ok(())
}

/// Existing shard files, keyed by shard key.
pub fn load_shard_cache(paths: &IndexPaths) -> Result<ShardCache> {
    let mut cache = ShardCache::new();
    let dir = paths.shards_dir();
    if !dir.exists() {
        return Ok(cache);
    }
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let mut chars = stem.chars();
        if let (Some(key), None) = (chars.next(), chars.next()) {
            cache.insert(key, load_shard(&path)?);
        }
    }
    Ok(cache)
}

/// Phase 3: replace every shard file with its cache entry, then rebuild and persist the
/// offset directory for the same files.
pub fn flush_shards(paths: &IndexPaths, cache: &ShardCache) -> Result<OffsetDirectory> {
    fs::create_dir_all(paths.shards_dir())?;
    let names: Vec<Result<String>> = cache
        .par_iter()
        .map(|(key, shard)| {
            let name = shard_file_name(*key);
            save_shard(&paths.shard_file(&name), shard)?;
            tracing::debug!(shard = %name, terms = shard.len(), "shard written");
            Ok(name)
        })
        .collect();
    let names: Vec<String> = names.into_iter().collect::<Result<_>>()?;
    let directory = scan_shards(paths, &names)?;
    save_bookkeeper(paths, &directory)?;
    Ok(directory)
}

/// Run all three phases over the batch files under `paths`.
pub fn merge_index(paths: &IndexPaths, config: &MergeConfig) -> Result<MergeReport> {
    let batch_files = list_batches(paths)?;
    let stats = document_frequencies(&batch_files);
    save_doc_frequencies(paths, &stats.doc_frequencies)?;

    let total_docs = match config.total_docs {
        Some(n) => n,
        None if paths.docs().exists() => load_docs(paths)?.len() as u64,
        None => stats.distinct_docs,
    };
    if let Some((term, df)) = stats.doc_frequencies.iter().max_by_key(|(_, df)| **df) {
        if *df > total_docs {
            return Err(IndexError::InconsistentCorpus(format!(
                "term '{term}' has document frequency {df} but the corpus has {total_docs} documents"
            )));
        }
    }
    tracing::info!(
        batches = stats.readable.len(),
        terms = stats.doc_frequencies.len(),
        total_docs,
        "document frequencies computed"
    );

    let mut cache = if config.keep_existing { load_shard_cache(paths)? } else { ShardCache::new() };
    let mut report = MergeReport { total_docs, batches_skipped: stats.skipped.clone(), ..Default::default() };
    for path in &stats.readable {
        let batch = match load_batch(path) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "batch became unreadable during merge");
                report.batches_skipped.push(path.clone());
                continue;
            }
        };
        if let Err(e) = merge_batch(&mut cache, batch, &stats.doc_frequencies, total_docs, config.top_k.max(1)) {
            tracing::warn!(path = %path.display(), error = %e, "skipping batch that failed to rescore");
            report.batches_skipped.push(path.clone());
            continue;
        }
        report.batches_merged += 1;
    }

    if !config.keep_existing && paths.shards_dir().exists() {
        fs::remove_dir_all(paths.shards_dir())?;
    }
    let directory = flush_shards(paths, &cache)?;
    report.terms = cache.values().map(|s| s.len()).sum();
    report.shards = directory.keys().cloned().collect();

    if !report.is_complete() {
        tracing::warn!(
            skipped = report.batches_skipped.len(),
            merged = report.batches_merged,
            "merge is incomplete: some batch files could not be merged"
        );
    }
    tracing::info!(shards = report.shards.len(), terms = report.terms, "merge complete");
    Ok(report)
}
