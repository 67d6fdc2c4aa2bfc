//! Offset directory: term -> byte offset of its key inside a shard file.
//!
//! The scanner and the posting-list reader only understand the shape shard files have
//! (a top-level object whose values are arrays of numeric arrays), which lets a query
//! seek straight to one term instead of decoding the whole shard.

use crate::error::{IndexError, Result};
use crate::persist::{save_bookkeeper, IndexPaths};
use crate::Posting;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// shard file name -> term -> offset of the key's opening quote.
pub type OffsetDirectory = BTreeMap<String, BTreeMap<String, u64>>;

const SCAN_CHUNK: usize = 64 * 1024;

/// Incremental byte scanner that records the offset of every top-level key whose
/// value is an array. Input may arrive in chunks of any size.
#[derive(Debug, Default)]
pub struct KeyScanner {
    pos: u64,
    braces: u32,
    brackets: u32,
    in_string: bool,
    escaped: bool,
    capturing: bool,
    string_start: u64,
    raw: Vec<u8>,
    pending: Option<(u64, Vec<u8>)>,
    colon: bool,
    unbalanced: bool,
    offsets: BTreeMap<String, u64>,
}

impl KeyScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        for &b in chunk {
            self.step(b);
            self.pos += 1;
        }
    }

    fn step(&mut self, b: u8) {
        if self.in_string {
            if self.capturing {
                self.raw.push(b);
            }
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
                if self.capturing {
                    self.pending = Some((self.string_start, std::mem::take(&mut self.raw)));
                    self.colon = false;
                }
            }
            return;
        }
        match b {
            b'"' => {
                self.in_string = true;
                self.capturing = self.braces == 1 && self.brackets == 0;
                self.string_start = self.pos;
                self.raw.clear();
                if self.capturing {
                    self.raw.push(b);
                }
                self.pending = None;
            }
            b':' => {
                if self.pending.is_some() {
                    self.colon = true;
                }
            }
            b'[' => {
                if self.brackets == 0 && self.colon {
                    if let Some((start, raw)) = self.pending.take() {
                        match serde_json::from_slice::<String>(&raw) {
                            Ok(term) => {
                                self.offsets.insert(term, start);
                            }
                            Err(e) => tracing::warn!(offset = start, error = %e, "undecodable shard key"),
                        }
                    }
                }
                self.brackets += 1;
                self.reset_key();
            }
            b']' => {
                if self.brackets == 0 {
                    self.unbalanced = true;
                } else {
                    self.brackets -= 1;
                }
                self.reset_key();
            }
            b'{' => {
                self.braces += 1;
                self.reset_key();
            }
            b'}' => {
                if self.braces == 0 {
                    self.unbalanced = true;
                } else {
                    self.braces -= 1;
                }
                self.reset_key();
            }
            b' ' | b'\n' | b'\r' | b'\t' => {}
            _ => self.reset_key(),
        }
    }

    fn reset_key(&mut self) {
        self.pending = None;
        self.colon = false;
    }

    /// Offsets found so far; fails when the input ended inside a structure.
    pub fn finish(self) -> std::result::Result<BTreeMap<String, u64>, String> {
        if self.in_string || self.braces != 0 || self.brackets != 0 || self.unbalanced {
            return Err(format!("unbalanced structure near byte {}", self.pos));
        }
        Ok(self.offsets)
    }
}

fn scan_reader<R: Read>(mut reader: R, chunk: usize) -> std::io::Result<std::result::Result<BTreeMap<String, u64>, String>> {
    let mut scanner = KeyScanner::new();
    let mut buf = vec![0u8; chunk.max(1)];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        scanner.feed(&buf[..n]);
    }
    Ok(scanner.finish())
}

/// One linear pass over a shard file.
pub fn scan_shard(path: &Path) -> Result<BTreeMap<String, u64>> {
    let file = File::open(path)?;
    scan_reader(file, SCAN_CHUNK)?.map_err(|reason| IndexError::CorruptShard { path: path.to_path_buf(), reason })
}

/// Scan the given shard files in parallel.
pub fn scan_shards(paths: &IndexPaths, names: &[String]) -> Result<OffsetDirectory> {
    let entries: Vec<Result<(String, BTreeMap<String, u64>)>> = names
        .par_iter()
        .map(|name| {
            let offsets = scan_shard(&paths.shard_file(name))?;
            tracing::debug!(shard = %name, terms = offsets.len(), "shard scanned");
            Ok((name.clone(), offsets))
        })
        .collect();
    entries.into_iter().collect()
}

/// Rebuild the directory for every shard file on disk and persist it.
pub fn build_directory(paths: &IndexPaths) -> Result<OffsetDirectory> {
    let dir = paths.shards_dir();
    let mut names: Vec<String> = Vec::new();
    if dir.exists() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_shard = path.extension().and_then(|e| e.to_str()) == Some("json");
            if let (true, Some(name)) = (is_shard, path.file_name().and_then(|n| n.to_str())) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    let directory = scan_shards(paths, &names)?;
    save_bookkeeper(paths, &directory)?;
    let terms: usize = directory.values().map(|m| m.len()).sum();
    tracing::info!(shards = directory.len(), terms, "offset directory built");
    Ok(directory)
}

fn stale(shard: &str, term: &str, reason: impl Into<String>) -> IndexError {
    IndexError::StaleOffset { shard: shard.to_string(), term: term.to_string(), reason: reason.into() }
}

/// Given the offset of `term`'s opening quote in `shard`, return the exact text of
/// the posting list that follows it, brackets included.
///
/// The key found at the offset must equal `term`; anything else means the directory
/// no longer describes the file.
pub fn read_posting_list<R: Read + Seek>(reader: &mut R, offset: u64, shard: &str, term: &str) -> Result<String> {
    let end = reader.seek(SeekFrom::End(0))?;
    if offset >= end {
        return Err(stale(shard, term, format!("offset {offset} is past end of file ({end} bytes)")));
    }
    reader.seek(SeekFrom::Start(offset))?;
    let mut bytes = BufReader::new(reader).bytes();
    let mut next = |what: &str| -> Result<u8> {
        match bytes.next() {
            Some(b) => Ok(b?),
            None => Err(stale(shard, term, format!("end of file while reading {what}"))),
        }
    };

    if next("key")? != b'"' {
        return Err(stale(shard, term, "offset does not point at a key"));
    }
    let mut key = vec![b'"'];
    let mut escaped = false;
    loop {
        let b = next("key")?;
        key.push(b);
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            break;
        }
    }
    let found: String = serde_json::from_slice(&key).map_err(|e| stale(shard, term, e.to_string()))?;
    if found != term {
        return Err(stale(shard, term, format!("found key '{found}'")));
    }

    let mut seen_colon = false;
    loop {
        match next("separator")? {
            b' ' | b'\n' | b'\r' | b'\t' => {}
            b':' if !seen_colon => seen_colon = true,
            b'[' if seen_colon => break,
            other => {
                return Err(stale(shard, term, format!("unexpected byte {:?} after key", other as char)));
            }
        }
    }

    let mut out = vec![b'['];
    let mut depth = 1u32;
    while depth > 0 {
        let b = next("posting list")?;
        out.push(b);
        match b {
            b'[' => depth += 1,
            b']' => depth -= 1,
            _ => {}
        }
    }
    String::from_utf8(out).map_err(|e| stale(shard, term, e.to_string()))
}

/// Seek to `term` and decode its postings.
pub fn read_postings<R: Read + Seek>(reader: &mut R, offset: u64, shard: &str, term: &str) -> Result<Vec<Posting>> {
    let raw = read_posting_list(reader, offset, shard, term)?;
    serde_json::from_str(&raw).map_err(|e| stale(shard, term, e.to_string()))
}
