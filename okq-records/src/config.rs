//! Settings and the store factory.
//!
//! Settings are a JSON document with upper-case keys:
//!
//! ```json
//! {
//!     "DATABASES": {
//!         "records": {
//!             "ENGINE": "openkongqi.records.sqlite3",
//!             "NAME": "openkongqi.db",
//!             "CACHE_KEY": "okq:{entity_id}:latest",
//!             "KEY_PREFIX": "pm25in"
//!         }
//!     },
//!     "CACHE": "_cache",
//!     "DEBUG": false
//! }
//! ```
//!
//! Every key is optional except `ENGINE` inside a `records` block.
//! [`create_store`] turns the `records` block into a ready [`RecordsStore`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{MemoryBackend, RecordsBackend, SqliteBackend};
use crate::cache::{FileCache, KeyValueCache};
use crate::context::KeyContext;
use crate::error::{CacheError, ConfigError, Result};
use crate::latest::LatestCache;
use crate::store::RecordsStore;

/// Default SQLite database path.
pub const DEFAULT_DATABASE_NAME: &str = "openkongqi.db";

/// Default path of the file-backed latest cache.
pub const DEFAULT_CACHE_PATH: &str = "_cache";

/// Database name selecting a private in-memory SQLite database.
pub const IN_MEMORY_NAME: &str = ":memory:";

fn default_database_name() -> String {
    DEFAULT_DATABASE_NAME.to_string()
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_PATH)
}

/// Settings of the records store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordsSettings {
    /// Backend engine name; see [`Engine::resolve`].
    #[serde(rename = "ENGINE")]
    pub engine: String,

    /// Database path for file-backed engines.
    #[serde(rename = "NAME", default = "default_database_name")]
    pub name: String,

    /// Latest cache key template, must contain `{entity_id}`.
    #[serde(rename = "CACHE_KEY", default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,

    /// Prefix namespacing entity ids in storage and cache keys.
    #[serde(rename = "KEY_PREFIX", default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

impl Default for RecordsSettings {
    fn default() -> Self {
        Self {
            engine: Engine::Sqlite.name().to_string(),
            name: default_database_name(),
            cache_key: None,
            key_prefix: None,
        }
    }
}

/// Named database configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Databases {
    /// The records store.
    #[serde(default)]
    pub records: RecordsSettings,
}

/// Top-level settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Database configurations.
    #[serde(rename = "DATABASES", default)]
    pub databases: Databases,

    /// Path of the file-backed latest cache.
    #[serde(rename = "CACHE", default = "default_cache_path")]
    pub cache: PathBuf,

    /// Enables debug logging.
    #[serde(rename = "DEBUG", default)]
    pub debug: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            databases: Databases::default(),
            cache: default_cache_path(),
            debug: false,
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not a valid settings document.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Opens the file-backed latest cache at [`Settings::cache`].
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] if an existing cache file cannot be read.
    pub fn open_cache(&self) -> std::result::Result<FileCache, CacheError> {
        FileCache::open(&self.cache)
    }
}

/// Storage engines known to the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// [`MemoryBackend`].
    Memory,
    /// [`SqliteBackend`].
    Sqlite,
}

impl Engine {
    /// Resolves a configured engine name.
    ///
    /// Dotted paths resolve by their last segment, so
    /// `openkongqi.records.sqlite3` selects SQLite. Matching ignores case.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEngine`] for any other name.
    pub fn resolve(name: &str) -> std::result::Result<Self, ConfigError> {
        let segment = name.trim().rsplit('.').next().unwrap_or_default();
        match segment.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            _ => Err(ConfigError::UnknownEngine {
                name: name.to_string(),
            }),
        }
    }

    /// Returns the canonical engine name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds a records store from settings.
///
/// The schema is not initialized; call
/// [`RecordsStore::initialize_schema`] before the first write.
///
/// # Errors
///
/// Returns [`ConfigError`] if the engine is unknown, the cache key template
/// is invalid, or the database cannot be opened.
pub fn create_store(
    settings: &RecordsSettings,
    cache: Arc<dyn KeyValueCache>,
) -> Result<RecordsStore> {
    let engine = Engine::resolve(&settings.engine)?;
    let latest = match &settings.cache_key {
        Some(template) => LatestCache::with_template(cache, template.clone())?,
        None => LatestCache::new(cache),
    };

    let backend: Box<dyn RecordsBackend> = match engine {
        Engine::Memory => Box::new(MemoryBackend::new()),
        Engine::Sqlite => {
            let opened = if settings.name == IN_MEMORY_NAME {
                SqliteBackend::open_in_memory()
            } else {
                SqliteBackend::open(&settings.name)
            };
            Box::new(opened.map_err(|source| ConfigError::Connect {
                engine: engine.name(),
                source,
            })?)
        }
    };

    let mut store = RecordsStore::with_latest_cache(backend, latest);
    if let Some(prefix) = &settings.key_prefix {
        store.set_key_context(KeyContext::with_prefix(prefix.clone()));
    }

    tracing::debug!(
        engine = %engine,
        name = %settings.name,
        key_prefix = ?settings.key_prefix,
        "records store created"
    );
    Ok(store)
}
