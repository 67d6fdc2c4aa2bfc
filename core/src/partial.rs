//! Per-document partial index construction. Pure; runs on the worker pool.

use crate::error::Result;
use crate::extract::Extracted;
use crate::scoring::term_weight;
use crate::tokenizer::{stem, words};
use crate::{DocId, Posting};
use std::collections::{BTreeMap, HashMap};

/// Postings of a single document, keyed by stemmed term. Scores are pre-IDF.
#[derive(Debug, Clone)]
pub struct DocumentIndex {
    pub doc_id: DocId,
    pub url: String,
    pub terms: BTreeMap<String, Posting>,
}

/// Count surface words, fold them onto their stems and compute the provisional
/// `term_weight(tf) + importance_bonus` score of every term.
///
/// Importance is looked up by the unstemmed word; when several words share a stem
/// their counts add up and the strongest bonus is kept.
pub fn build_partial(doc_id: DocId, url: &str, extracted: &Extracted) -> Result<DocumentIndex> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for word in words(&extracted.text) {
        *counts.entry(word).or_insert(0) += 1;
    }

    let mut folded: BTreeMap<String, (u32, f64)> = BTreeMap::new();
    for (word, count) in counts {
        let bonus = extracted.importance.get(&word).copied().unwrap_or(0.0);
        let slot = folded.entry(stem(&word)).or_insert((0, 0.0));
        slot.0 += count;
        if bonus > slot.1 {
            slot.1 = bonus;
        }
    }

    let mut terms = BTreeMap::new();
    for (term, (tf_raw, bonus)) in folded {
        let score = term_weight(tf_raw)? + bonus;
        terms.insert(term, Posting { doc_id, tf_raw, score });
    }
    Ok(DocumentIndex { doc_id, url: url.to_string(), terms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_text;

    #[test]
    fn counts_and_bonus() {
        let ex = extract_text("<title>Ocean</title><p>ocean ocean ocean river</p>").unwrap();
        let idx = build_partial(3, "http://x/3", &ex).unwrap();
        let ocean = idx.terms["ocean"];
        assert_eq!(ocean.doc_id, 3);
        assert_eq!(ocean.tf_raw, 3);
        assert!((ocean.score - (1.0 + 3f64.log10() + 1.0)).abs() < 1e-12);
        let river = idx.terms["river"];
        assert_eq!(river.tf_raw, 1);
        assert_eq!(river.score, 1.0);
        assert_eq!(idx.url, "http://x/3");
    }

    #[test]
    fn surface_forms_fold_onto_one_posting() {
        let ex = extract_text("<p>running runs <b>run</b></p>").unwrap();
        let idx = build_partial(1, "u", &ex).unwrap();
        let run = idx.terms["run"];
        assert_eq!(run.tf_raw, 3);
        assert!((run.score - (1.0 + 3f64.log10() + 0.5)).abs() < 1e-12);
        assert_eq!(idx.terms.len(), 1);
    }
}
