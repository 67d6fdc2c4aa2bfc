//! Query engine: offset-directed posting lookups plus intersection-then-fallback ranking.

use crate::bookkeeper::{read_postings, OffsetDirectory};
use crate::error::{IndexError, Result};
use crate::persist::{load_bookkeeper, load_docs, IndexPaths};
use crate::tokenizer::tokenize_and_stem;
use crate::{shard_file_name, shard_key, DocId, DocTable, Posting};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub url: String,
    pub score: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResults {
    pub terms: Vec<String>,
    pub hits: Vec<SearchHit>,
    /// Terms with no postings in the index. Informational, not a failure.
    pub missing_terms: Vec<String>,
    /// Terms whose directory entry no longer matches the shard file.
    pub stale_terms: Vec<String>,
}

/// Read-only view over finalized shards. Safe to share across threads.
pub struct QueryEngine {
    paths: IndexPaths,
    directory: OffsetDirectory,
    docs: DocTable,
    config: SearchConfig,
}

impl QueryEngine {
    /// Load the offset directory and document table once.
    pub fn open(paths: IndexPaths) -> Result<Self> {
        let directory = load_bookkeeper(&paths)?;
        let docs = load_docs(&paths)?;
        tracing::info!(shards = directory.len(), docs = docs.len(), "query engine ready");
        Ok(Self::from_parts(paths, directory, docs))
    }

    pub fn from_parts(paths: IndexPaths, directory: OffsetDirectory, docs: DocTable) -> Self {
        Self { paths, directory, docs, config: SearchConfig::default() }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn num_docs(&self) -> usize {
        self.docs.len()
    }

    pub fn search(&self, query: &str) -> Result<SearchResults> {
        self.search_terms(&tokenize_and_stem(query), self.config.limit)
    }

    pub fn search_with_limit(&self, query: &str, limit: usize) -> Result<SearchResults> {
        self.search_terms(&tokenize_and_stem(query), limit)
    }

    /// Rank already-stemmed terms. Duplicate terms count once.
    pub fn search_terms(&self, terms: &[String], limit: usize) -> Result<SearchResults> {
        let mut unique: Vec<String> = Vec::new();
        for term in terms {
            if !term.is_empty() && !unique.contains(term) {
                unique.push(term.clone());
            }
        }

        let mut results = SearchResults { terms: unique.clone(), ..Default::default() };
        let found = self.lookup(&unique, &mut results);
        let per_term: Vec<Vec<Posting>> = unique.iter().filter_map(|t| found.get(t).cloned()).collect();

        for (doc_id, score) in rank(&per_term, limit) {
            let url = self.docs.get(&doc_id).ok_or(IndexError::MissingDocument(doc_id))?;
            results.hits.push(SearchHit { doc_id, url: url.clone(), score });
        }
        Ok(results)
    }

    /// Fetch postings for `terms`, opening each shard once.
    fn lookup(&self, terms: &[String], results: &mut SearchResults) -> HashMap<String, Vec<Posting>> {
        let mut groups: BTreeMap<char, Vec<&String>> = BTreeMap::new();
        for term in terms {
            if let Some(key) = shard_key(term) {
                groups.entry(key).or_default().push(term);
            }
        }

        let mut found = HashMap::new();
        for (key, group) in groups {
            let name = shard_file_name(key);
            let Some(offsets) = self.directory.get(&name) else {
                for term in group {
                    tracing::info!(term = %term, "term not in index");
                    results.missing_terms.push(term.clone());
                }
                continue;
            };
            let mut file = match File::open(self.paths.shard_file(&name)) {
                Ok(f) => Some(f),
                Err(e) => {
                    tracing::error!(shard = %name, error = %e, "shard listed in the offset directory cannot be opened");
                    None
                }
            };

            for term in group {
                let Some(&offset) = offsets.get(term) else {
                    tracing::info!(term = %term, "term not in index");
                    results.missing_terms.push(term.clone());
                    continue;
                };
                let Some(file) = file.as_mut() else {
                    results.stale_terms.push(term.clone());
                    continue;
                };
                match read_postings(file, offset, &name, term) {
                    Ok(postings) => {
                        found.insert(term.clone(), postings);
                    }
                    Err(e) => {
                        tracing::error!(term = %term, shard = %name, error = %e, "offset directory is out of date for this shard; rebuild it");
                        results.stale_terms.push(term.clone());
                    }
                }
            }
        }
        found
    }
}

fn by_score(a: &(DocId, f64), b: &(DocId, f64)) -> std::cmp::Ordering {
    b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0))
}

/// Intersection-then-fallback ranking over each found term's postings, in query order.
///
/// A document's score is the maximum over the terms it matched; within one term's list
/// the first posting for a doc id wins. Documents matching every term come first, then the
/// remaining slots are filled from all matched documents.
pub fn rank(per_term: &[Vec<Posting>], limit: usize) -> Vec<(DocId, f64)> {
    let mut best: HashMap<DocId, f64> = HashMap::new();
    let mut intersection: Option<HashSet<DocId>> = None;

    for postings in per_term {
        let mut term_scores: HashMap<DocId, f64> = HashMap::new();
        for p in postings {
            term_scores.entry(p.doc_id).or_insert(p.score);
        }
        for (&doc_id, &score) in &term_scores {
            let slot = best.entry(doc_id).or_insert(score);
            if score > *slot {
                *slot = score;
            }
        }
        let ids: HashSet<DocId> = term_scores.into_keys().collect();
        intersection = Some(match intersection {
            None => ids,
            Some(acc) => acc.intersection(&ids).copied().collect(),
        });
    }

    let mut everything: Vec<(DocId, f64)> = best.into_iter().collect();
    everything.sort_by(by_score);
    let intersection = intersection.unwrap_or_default();

    let mut out: Vec<(DocId, f64)> = everything
        .iter()
        .filter(|(id, _)| intersection.contains(id))
        .take(limit)
        .copied()
        .collect();
    let emitted: HashSet<DocId> = out.iter().map(|(id, _)| *id).collect();
    for hit in &everything {
        if out.len() >= limit {
            break;
        }
        if !emitted.contains(&hit.0) {
            out.push(*hit);
        }
    }
    out
}
