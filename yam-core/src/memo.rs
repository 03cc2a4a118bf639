//! Hash-gated memoization shared by the compression cache and favicon
//! generation.
//!
//! An entry is keyed by a caller-chosen string and records the hash of the
//! input it was produced from, the hash of the parameters in effect, and an
//! arbitrary JSON artifact descriptor. A lookup only hits when both hashes
//! match the current ones; any mismatch means "recompute".
//!
//! The store is one JSON document:
//!
//! ```json
//! { "version": 1, "entries": { "<key>": { "input_hash": "..", "params_hash": "..", "artifact": {} } } }
//! ```
//!
//! Files in any other shape (older cache layouts, corrupt JSON, another
//! version) load as an empty store.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::CacheError;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoEntry {
    pub input_hash: String,
    pub params_hash: String,
    #[serde(default)]
    pub artifact: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: BTreeMap<String, MemoEntry>,
}

#[derive(Debug, Clone)]
pub struct MemoStore {
    path: PathBuf,
    entries: BTreeMap<String, MemoEntry>,
}

impl MemoStore {
    pub fn empty<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::empty(path),
        };

        match serde_json::from_str::<StoreFile>(&content) {
            Ok(file) if file.version == STORE_VERSION => Self {
                path: path.to_path_buf(),
                entries: file.entries,
            },
            _ => {
                debug!(path = %path.display(), "discarding cache in an unknown shape");
                Self::empty(path)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MemoEntry> {
        self.entries.get(key)
    }

    /// The entry for `key`, only if it was produced from the same input
    /// under the same parameters.
    pub fn get_valid(&self, key: &str, input_hash: &str, params_hash: &str) -> Option<&MemoEntry> {
        self.entries
            .get(key)
            .filter(|e| e.input_hash == input_hash && e.params_hash == params_hash)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: MemoEntry) {
        self.entries.insert(key.into(), entry);
    }

    /// Write the whole store back to disk in one go.
    pub fn save(&self) -> Result<(), CacheError> {
        let file = StoreFile {
            version: STORE_VERSION,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let persist = |source: io::Error| CacheError::Persist {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(persist)?;
        }
        std::fs::write(&self.path, json).map_err(persist)
    }
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash of a parameter tree that ignores map key order: the value is
/// serialized with object keys sorted at every level before hashing.
pub fn hash_params<T: Serialize>(params: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    Ok(hash_bytes(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
