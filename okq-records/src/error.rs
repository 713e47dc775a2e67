//! Error types for the okq records store.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all records store operations.
///
/// Duplicate rows never show up here: a uniqueness conflict is absorbed by
/// the store and counted as "already stored". Latest-cache failures during
/// writes and lookups are absorbed too; see [`CacheError`].
#[derive(Error, Debug)]
pub enum RecordsError {
    /// A backend was asked for a capability it does not provide.
    #[error("engine '{engine}' does not implement {capability}")]
    NotImplemented {
        /// The engine name of the backend.
        engine: &'static str,
        /// The missing capability.
        capability: &'static str,
    },

    /// Schema definition or initialization failed.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// One or more entities of a write batch failed.
    #[error("write error: {0}")]
    Write(#[from] WriteError),

    /// A read-side backend operation failed.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Settings could not be loaded or resolved.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A cache could not be opened.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// A timestamp could not be parsed or cannot be stored.
    #[error("timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
}

/// Errors raised by a concrete storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The SQLite driver reported an error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored row could not be decoded.
    #[error("corrupted row: {reason}")]
    CorruptedRow {
        /// What was wrong with the row.
        reason: String,
    },

    /// The backend does not provide this capability.
    #[error("unsupported capability: {capability}")]
    Unsupported {
        /// The missing capability.
        capability: &'static str,
    },

    /// A row timestamp cannot be encoded for storage.
    #[error("unstorable row: {0}")]
    Timestamp(#[from] TimestampError),

    /// Any other backend-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur while validating or creating the durable schema.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The static table definition is not usable.
    #[error("invalid definition for table '{table}': {reason}")]
    InvalidDefinition {
        /// The table name.
        table: &'static str,
        /// Why the definition was rejected.
        reason: String,
    },

    /// The backend could not create the table.
    #[error("failed to create table '{table}' on engine '{engine}': {source}")]
    CreateFailed {
        /// The table name.
        table: &'static str,
        /// The engine name of the backend.
        engine: &'static str,
        /// The underlying backend error.
        #[source]
        source: BackendError,
    },
}

/// A single entity that could not be written.
#[derive(Error, Debug)]
#[error("entity '{entity_id}' (stored as '{storage_id}', {rows} rows): {source}")]
pub struct EntityWriteFailure {
    /// The entity id as submitted by the caller.
    pub entity_id: String,
    /// The (possibly contextualized) id the rows were stored under.
    pub storage_id: String,
    /// Number of rows queued for insertion when the failure happened.
    pub rows: usize,
    /// The underlying backend error.
    pub source: BackendError,
}

/// A write batch failed for one or more entities.
///
/// Entities that are not listed were committed; nothing is rolled back
/// globally. [`Error::source`](std::error::Error::source) is the first
/// failure, whose own source is its backend error.
#[derive(Debug)]
pub struct WriteError {
    /// Every entity that failed, in processing order.
    pub failures: Vec<EntityWriteFailure>,
}

impl WriteError {
    /// Returns the ids of the entities that failed.
    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.entity_id.as_str())
    }
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} entities failed: ", self.failures.len())?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|failure| failure as &(dyn std::error::Error + 'static))
    }
}

/// Errors that can occur on the read path.
#[derive(Error, Debug)]
pub enum QueryError {
    /// The backend failed while serving a read.
    #[error("{operation} failed for entity '{entity_id}': {source}")]
    Backend {
        /// The operation that failed (e.g. `query_range`).
        operation: &'static str,
        /// The entity the operation was about.
        entity_id: String,
        /// The underlying backend error.
        #[source]
        source: BackendError,
    },

    /// The backend failed to count rows.
    #[error("row count failed on engine '{engine}': {source}")]
    RowCount {
        /// The engine name of the backend.
        engine: &'static str,
        /// The underlying backend error.
        #[source]
        source: BackendError,
    },
}

/// Errors from loading settings and resolving a backend.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No backend is registered under this engine name.
    #[error("unknown engine '{name}'")]
    UnknownEngine {
        /// The engine name as configured.
        name: String,
    },

    /// The cache key template cannot address an entity.
    #[error("invalid cache key template '{template}': must contain {{entity_id}}")]
    InvalidCacheKey {
        /// The rejected template.
        template: String,
    },

    /// The settings file could not be read.
    #[error("failed to read settings '{}': {source}", path.display())]
    Read {
        /// The settings file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for the settings model.
    #[error("failed to parse settings '{}': {source}", path.display())]
    Parse {
        /// The settings file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The backend connection could not be opened.
    #[error("failed to open engine '{engine}': {source}")]
    Connect {
        /// The engine name.
        engine: &'static str,
        /// The underlying backend error.
        #[source]
        source: BackendError,
    },
}

/// Errors from a key/value cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache backend could not serve the request.
    #[error("cache unavailable for key '{key}': {reason}")]
    Unavailable {
        /// The key being read or written.
        key: String,
        /// Description of the failure.
        reason: String,
    },

    /// The cache file could not be read or written.
    #[error("cache file '{}' I/O failed: {source}", path.display())]
    Io {
        /// The cache file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The cache file or a cached entry is not valid JSON.
    #[error("cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors from the timestamp codec.
#[derive(Error, Debug)]
pub enum TimestampError {
    /// The string does not follow any accepted timestamp format.
    #[error("malformed timestamp '{input}': {source}")]
    Malformed {
        /// The rejected input.
        input: String,
        /// The underlying parse error.
        #[source]
        source: chrono::ParseError,
    },

    /// The instant has no four-digit-year canonical form.
    #[error("timestamp {ts} is outside the storable range 0000-01-01T00:00:00Z..=9999-12-31T23:59:59Z")]
    OutOfRange {
        /// The normalized instant.
        ts: chrono::DateTime<chrono::Utc>,
    },
}

/// Type alias for `Result<T, RecordsError>`.
pub type Result<T> = std::result::Result<T, RecordsError>;
