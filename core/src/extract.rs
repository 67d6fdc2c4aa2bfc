//! Markup extraction: plain text plus a word -> importance bonus map.

use crate::scoring::Importance;
use crate::tokenizer::words;
use scraper::node::Node;
use scraper::Html;
use std::collections::HashMap;
use std::fmt;

/// Subtrees that never contribute text.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template"];

#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub text: String,
    /// Unstemmed word -> highest structural bonus it received.
    pub importance: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    NotMarkup,
    NoText,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Empty => "empty content",
            SkipReason::NotMarkup => "content is not markup",
            SkipReason::NoText => "no extractable text",
        };
        f.write_str(s)
    }
}

/// Strip scripts, styles, comments and the title from `raw_markup`.
/// Title, heading and bold words are recorded in the importance map.
pub fn extract_text(raw_markup: &str) -> Result<Extracted, SkipReason> {
    let trimmed = raw_markup.trim();
    if trimmed.is_empty() {
        return Err(SkipReason::Empty);
    }
    if !trimmed.contains('<') {
        return Err(SkipReason::NotMarkup);
    }

    let doc = Html::parse_document(raw_markup);
    let mut pieces: Vec<&str> = Vec::new();
    let mut importance: HashMap<String, f64> = HashMap::new();

    for node in doc.tree.root().descendants() {
        let Node::Text(text) = node.value() else { continue };
        let content: &str = text;
        if content.trim().is_empty() {
            continue;
        }

        let mut skipped = false;
        let mut in_title = false;
        let mut role: Option<Importance> = None;
        for ancestor in node.ancestors() {
            if let Node::Element(el) = ancestor.value() {
                let name = el.name();
                if SKIPPED_TAGS.contains(&name) {
                    skipped = true;
                    break;
                }
                in_title |= name == "title";
                role = role.max(Importance::for_tag(name));
            }
        }
        if skipped {
            continue;
        }

        if let Some(role) = role {
            let bonus = role.bonus();
            for word in words(content) {
                let entry = importance.entry(word).or_insert(0.0);
                if bonus > *entry {
                    *entry = bonus;
                }
            }
        }
        if !in_title {
            pieces.push(content.trim());
        }
    }

    let text = pieces.join(" ");
    if text.trim().is_empty() {
        return Err(SkipReason::NoText);
    }
    Ok(Extracted { text, importance })
}
