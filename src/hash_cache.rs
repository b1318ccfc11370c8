//! Persistent file-name → content-hash cache.
//!
//! Backs the change detection between runs: a file is downloaded again only
//! when its remote hash differs from the one recorded here. The cache is a
//! flat JSON object on disk so operators can inspect or reset single entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read hash cache at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write hash cache at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("hash cache at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// In-memory view of the cache document.
///
/// BTreeMap keeps the on-disk document stably ordered across runs, so the
/// file only changes when the hashes do.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashCache {
    #[serde(flatten)]
    entries: BTreeMap<String, String>,
}

impl HashCache {
    /// Load the cache from `path`. A missing file is an empty cache, not an
    /// error: first runs start from scratch.
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "hash cache absent, starting empty");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(CacheError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw).map_err(|source| CacheError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Persist the cache to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let raw = serde_json::to_string_pretty(&self.entries)
            .map_err(|source| CacheError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        std::fs::write(path, raw).map_err(|source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, hash: impl Into<String>) {
        self.entries.insert(name.into(), hash.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HashCache::load(&dir.path().join("absent.json")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn save_then_load_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hash_cache.json");

        let mut cache = HashCache::default();
        cache.insert("orders.csv", "aa11");
        cache.insert("actions.csv", "bb22");
        cache.save(&path).unwrap();

        let loaded = HashCache::load(&path).unwrap();
        assert_eq!(loaded, cache);
        assert_eq!(loaded.get("orders.csv"), Some("aa11"));
    }

    #[test]
    fn corrupt_document_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hash_cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = HashCache::load(&path).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
        assert!(err.to_string().contains("hash_cache.json"));
    }

    #[test]
    fn insert_overwrites_previous_hash() {
        let mut cache = HashCache::default();
        cache.insert("orders.csv", "old");
        cache.insert("orders.csv", "new");
        assert_eq!(cache.get("orders.csv"), Some("new"));
        assert_eq!(cache.len(), 1);
    }
}
