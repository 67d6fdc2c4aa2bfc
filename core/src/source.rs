use crate::RawDocument;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Corpus laid out as a directory tree of `*.json` files, each holding
/// `{"url": ..., "content": ...}`. Files are visited in sorted path order.
pub struct JsonTreeSource {
    files: Vec<PathBuf>,
}

impl JsonTreeSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        let mut files: Vec<PathBuf> = Vec::new();
        if root.is_file() {
            files.push(root.to_path_buf());
        } else {
            for entry in WalkDir::new(root).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
                let p = entry.path();
                if p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("json") {
                    files.push(p.to_path_buf());
                }
            }
        }
        Self { files }
    }

    pub fn len(&self) -> usize { self.files.len() }

    pub fn is_empty(&self) -> bool { self.files.is_empty() }

    /// Unreadable or malformed files are logged and left out.
    pub fn documents(self) -> impl Iterator<Item = RawDocument> {
        self.files.into_iter().filter_map(|path| match read_document(&path) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable corpus file");
                None
            }
        })
    }
}

fn read_document(path: &Path) -> crate::Result<RawDocument> {
    let f = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(f))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_tree_in_sorted_order_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("www.example.com");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("b.json"), r#"{"url":"http://b","content":"<p>b</p>","encoding":"utf-8"}"#).unwrap();
        fs::write(sub.join("a.json"), r#"{"url":"http://a","content":"<p>a</p>"}"#).unwrap();
        fs::write(sub.join("broken.json"), "{not json").unwrap();
        fs::write(sub.join("notes.txt"), "ignored").unwrap();

        let source = JsonTreeSource::new(dir.path());
        assert_eq!(source.len(), 3);
        let urls: Vec<String> = source.documents().map(|d| d.url).collect();
        assert_eq!(urls, vec!["http://a".to_string(), "http://b".to_string()]);
    }
}
