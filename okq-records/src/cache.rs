//! Key/value caches backing the latest-value cache.
//!
//! The store only needs string `get`/`set`. Two implementations ship with
//! the crate:
//!
//! - [`MemoryCache`]: process-local map, for tests and short-lived tools
//! - [`FileCache`]: JSON map persisted to a single file, rewritten on
//!   every `set`
//!
//! Neither offers transactions or ordering guarantees across writers:
//! concurrent `set` calls on the same key are last-write-wins.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::CacheError;

/// A string key/value cache.
pub trait KeyValueCache: Send + Sync + fmt::Debug {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] if the cache cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] if the cache cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys stored.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Cache persisted as one JSON object in a file.
///
/// The whole map is loaded on open and the file is rewritten on each `set`,
/// through a temporary file and a rename so readers never see a partial
/// write.
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileCache {
    /// Opens the cache file at `path`, or starts empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|e| CacheError::Io {
                path: path.clone(),
                source: e,
            })?;
            if data.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&data)?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Returns the path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), CacheError> {
        let data = serde_json::to_string(entries)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, data).map_err(|e| CacheError::Io {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| CacheError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

impl KeyValueCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // keep memory and disk in agreement
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_cache_get_set() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.get("k").unwrap(), None);

        cache.set("k", "v1").unwrap();
        cache.set("k", "v2").unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_file_cache_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("_cache");

        {
            let cache = FileCache::open(&path).unwrap();
            cache.set("okq:e1:latest", "{\"ts\":\"x\"}").unwrap();
        }

        let cache = FileCache::open(&path).unwrap();
        assert_eq!(
            cache.get("okq:e1:latest").unwrap().as_deref(),
            Some("{\"ts\":\"x\"}")
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_cache_rejects_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("_cache");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(FileCache::open(&path), Err(CacheError::Serialize(_))));
    }

    #[test]
    fn test_file_cache_failed_write_rolls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing_dir").join("_cache");

        let cache = FileCache::open(&path).unwrap();
        assert!(matches!(cache.set("k", "v"), Err(CacheError::Io { .. })));
        assert_eq!(cache.get("k").unwrap(), None);
    }
}
