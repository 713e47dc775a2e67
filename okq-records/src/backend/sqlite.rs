//! SQLite backend.
//!
//! Timestamps are stored as canonical strings, so range predicates compare
//! text. That ordering only holds for four-digit years: inserts reject
//! anything outside [`timestamp::storable_range`] and query bounds are
//! clamped to it. Bounds are also rounded to whole seconds before encoding
//! (start up, end down), which keeps inclusive bounds exact against
//! whole-second rows.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, ffi, params, params_from_iter};

use super::{InsertOutcome, RecordsBackend};
use crate::error::BackendError;
use crate::model::{RowKey, StoredRow};
use crate::schema::{RECORDS_TABLE, TableSchema};
use crate::timestamp;

/// Table the row operations read and write.
const TABLE: &str = RECORDS_TABLE.name;

/// Busy timeout applied to every connection.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Backend storing rows in a SQLite database.
#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    location: String,
}

impl SqliteBackend {
    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        Self::from_connection(conn, path.display().to_string())
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, location: String) -> Result<Self, BackendError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    /// Returns the database path, or `:memory:`.
    pub fn location(&self) -> &str {
        &self.location
    }
}

/// Whether a driver error is a primary-key or unique conflict.
fn is_uniqueness_conflict(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
                )
        }
        _ => false,
    }
}

impl RecordsBackend for SqliteBackend {
    fn engine(&self) -> &'static str {
        "sqlite"
    }

    fn initialize_schema(&self, schema: &TableSchema) -> Result<(), BackendError> {
        let conn = self.conn.lock();
        conn.execute_batch(&schema.create_table_sql())?;
        if *schema == RECORDS_TABLE {
            conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{TABLE}_entity_ts ON {TABLE} (entity_id, ts)"
            ))?;
        }
        Ok(())
    }

    fn contains(&self, key: &RowKey) -> Result<bool, BackendError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT EXISTS(SELECT 1 FROM {TABLE} WHERE ts = ?1 AND entity_id = ?2 AND field_name = ?3)"
        ))?;
        let exists = stmt.query_row(
            params![timestamp::encode(&key.ts), key.entity_id, key.field_name],
            |row| row.get::<_, bool>(0),
        )?;
        Ok(exists)
    }

    fn insert_rows(&self, rows: &[StoredRow]) -> Result<InsertOutcome, BackendError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut outcome = InsertOutcome::default();

        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {TABLE} (ts, entity_id, field_name, value) VALUES (?1, ?2, ?3, ?4)"
            ))?;
            for row in rows {
                let ts = timestamp::check_storable(row.ts)?;
                match stmt.execute(params![
                    timestamp::encode(&ts),
                    row.entity_id,
                    row.field_name,
                    row.value
                ]) {
                    Ok(_) => outcome.inserted += 1,
                    Err(e) if is_uniqueness_conflict(&e) => {
                        tracing::debug!(
                            entity_id = %row.entity_id,
                            field = %row.field_name,
                            ts = %row.ts,
                            "row already stored by a concurrent writer"
                        );
                        outcome.duplicates += 1;
                    }
                    // dropping `tx` rolls back
                    Err(e) => return Err(e.into()),
                }
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn select_range(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fields: Option<&BTreeSet<String>>,
    ) -> Result<Vec<StoredRow>, BackendError> {
        let storable = timestamp::storable_range();
        let start = timestamp::ceil_second(start).max(*storable.start());
        let end = timestamp::truncate(end).min(*storable.end());
        if start > end || fields.is_some_and(BTreeSet::is_empty) {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT ts, field_name, value FROM {TABLE} WHERE entity_id = ?1 AND ts >= ?2 AND ts <= ?3"
        );
        let mut args = vec![
            entity_id.to_string(),
            timestamp::encode(&start),
            timestamp::encode(&end),
        ];
        if let Some(fields) = fields {
            let placeholders: Vec<String> =
                (0..fields.len()).map(|i| format!("?{}", i + 4)).collect();
            sql.push_str(&format!(" AND field_name IN ({})", placeholders.join(", ")));
            args.extend(fields.iter().cloned());
        }
        sql.push_str(" ORDER BY ts, field_name");

        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        raw.into_iter()
            .map(|(ts, field_name, value)| {
                let ts = timestamp::decode(&ts).map_err(|e| BackendError::CorruptedRow {
                    reason: e.to_string(),
                })?;
                Ok(StoredRow {
                    ts,
                    entity_id: entity_id.to_string(),
                    field_name,
                    value,
                })
            })
            .collect()
    }

    fn row_count(&self) -> Result<u64, BackendError> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |row| row.get(0))?;
        u64::try_from(count).map_err(|_| BackendError::CorruptedRow {
            reason: format!("negative row count {count}"),
        })
    }
}
