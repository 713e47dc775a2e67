//! Storage backends for the records store.
//!
//! A backend owns the durable `records` table and provides the primitive
//! operations the store builds its algorithms on. All shared behavior
//! (deduplication policy, latest-cache maintenance, grouping) lives in
//! [`crate::store::RecordsStore`], so a backend stays small.
//!
//! - [`MemoryBackend`]: ordered in-process map, unique by construction
//! - [`SqliteBackend`]: SQLite file or in-memory database
//!
//! # Uniqueness
//!
//! The store checks [`RecordsBackend::contains`] before inserting, but the
//! check is an optimization: two writers can both see "absent" and both
//! insert. Backends enforce the `(ts, entity_id, field_name)` key
//! themselves and report a conflicting row as a duplicate in
//! [`InsertOutcome`], never as an error. That enforcement is what gives
//! at-most-once storage.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::BackendError;
use crate::model::{RowKey, StoredRow};
use crate::schema::TableSchema;

/// Result of one atomic insert call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Rows that were newly stored.
    pub inserted: usize,
    /// Rows rejected by the backend's uniqueness enforcement.
    pub duplicates: usize,
}

/// Primitive operations a records backend provides.
///
/// Implementations must be safe to share between threads; they serialize
/// access to their connection or state internally.
pub trait RecordsBackend: Send + Sync + fmt::Debug {
    /// Short engine name, e.g. `sqlite`.
    fn engine(&self) -> &'static str;

    /// Creates `schema` if it does not exist. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the table cannot be created.
    fn initialize_schema(&self, schema: &TableSchema) -> Result<(), BackendError>;

    /// Returns whether a row with this identity is stored.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the lookup fails.
    fn contains(&self, key: &RowKey) -> Result<bool, BackendError>;

    /// Inserts `rows` in one atomic operation.
    ///
    /// A row whose identity already exists is counted in
    /// [`InsertOutcome::duplicates`] and does not fail the call. Any other
    /// failure leaves none of `rows` stored.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the insert fails for a reason other
    /// than a uniqueness conflict.
    fn insert_rows(&self, rows: &[StoredRow]) -> Result<InsertOutcome, BackendError>;

    /// Returns rows of `entity_id` with `start <= ts <= end`, restricted to
    /// `fields` when given, ordered by `(ts, field_name)`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the scan fails or a row cannot be decoded.
    fn select_range(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fields: Option<&BTreeSet<String>>,
    ) -> Result<Vec<StoredRow>, BackendError>;

    /// Returns the total number of stored rows.
    ///
    /// Optional; backends that cannot count cheaply may leave the default.
    ///
    /// # Errors
    ///
    /// The default returns [`BackendError::Unsupported`].
    fn row_count(&self) -> Result<u64, BackendError> {
        Err(BackendError::Unsupported {
            capability: "row_count",
        })
    }
}
