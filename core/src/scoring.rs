//! TF-IDF scoring primitives.

use crate::error::{IndexError, Result};

/// Structural roles that earn an additive bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Importance {
    Bold,
    Heading,
    Title,
}

impl Importance {
    pub fn bonus(self) -> f64 {
        match self {
            Importance::Title => 1.0,
            Importance::Heading => 0.75,
            Importance::Bold => 0.5,
        }
    }

    pub fn for_tag(tag: &str) -> Option<Self> {
        match tag {
            "title" => Some(Importance::Title),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some(Importance::Heading),
            "b" | "strong" => Some(Importance::Bold),
            _ => None,
        }
    }
}

/// `1 + log10(raw_frequency)`.
pub fn term_weight(raw_frequency: u32) -> Result<f64> {
    if raw_frequency == 0 {
        return Err(IndexError::InvalidFrequency(raw_frequency));
    }
    Ok(1.0 + (raw_frequency as f64).log10())
}

/// `log10(total_docs / doc_frequency)`; requires `1 <= doc_frequency <= total_docs`.
pub fn inverse_document_frequency(total_docs: u64, doc_frequency: u64) -> Result<f64> {
    if doc_frequency == 0 || doc_frequency > total_docs {
        return Err(IndexError::InvalidDocumentFrequency { total_docs, doc_frequency });
    }
    Ok((total_docs as f64 / doc_frequency as f64).log10())
}

pub fn combined_score(term_weight: f64, idf: f64, importance_bonus: f64) -> f64 {
    term_weight * idf + importance_bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_weight_rejects_zero() {
        assert!(matches!(term_weight(0), Err(IndexError::InvalidFrequency(0))));
        assert_eq!(term_weight(1).unwrap(), 1.0);
        assert!((term_weight(10).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn term_weight_is_monotonic() {
        let mut prev = term_weight(1).unwrap();
        for f in 2..2000 {
            let w = term_weight(f).unwrap();
            assert!(w > prev, "weight must grow at f={f}");
            prev = w;
        }
    }

    #[test]
    fn idf_is_non_negative_and_zero_only_when_ubiquitous() {
        for n in 1..60u64 {
            for df in 1..=n {
                let idf = inverse_document_frequency(n, df).unwrap();
                assert!(idf >= 0.0);
                assert_eq!(idf == 0.0, df == n, "n={n} df={df}");
            }
        }
    }

    #[test]
    fn idf_rejects_out_of_range_df() {
        assert!(inverse_document_frequency(10, 0).is_err());
        assert!(inverse_document_frequency(3, 4).is_err());
    }

    #[test]
    fn bonus_survives_zero_idf() {
        let s = combined_score(term_weight(5).unwrap(), 0.0, Importance::Title.bonus());
        assert_eq!(s, 1.0);
        assert!(Importance::Title > Importance::Heading);
        assert!(Importance::Heading > Importance::Bold);
    }
}
