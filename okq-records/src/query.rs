//! Range query results.
//!
//! A range scan returns narrow rows ordered by `(ts, field_name)`.
//! [`RangeQuery`] turns them back into one [`GroupedRecord`] per distinct
//! timestamp, lazily, as the caller iterates:
//!
//! ```text
//! (00:00, a, 1.0) ┐
//! (00:00, b, 2.0) ┴─> GroupedRecord { ts: 00:00, fields: {a: 1.0, b: 2.0} }
//! (00:05, a, 3.0) ──> GroupedRecord { ts: 00:05, fields: {a: 3.0} }
//! ```
//!
//! Groups come out in ascending timestamp order. A `RangeQuery` is finite
//! and holds no cursor into the backend; calling
//! [`RecordsStore::query_range`](crate::store::RecordsStore::query_range)
//! again re-executes the scan.
//!
//! # Example Usage
//!
//! ```rust
//! # use std::sync::Arc;
//! # use chrono::{TimeZone, Utc};
//! # use okq_records::{Batch, MemoryBackend, MemoryCache, Reading, RecordsStore};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let store = RecordsStore::new(Box::new(MemoryBackend::new()), Arc::new(MemoryCache::new()));
//! # let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! # let mut batch = Batch::new();
//! # batch.insert("e1".to_string(), vec![Reading::new(t0, [("pm25", 12.0)])]);
//! # store.write_batch(&batch)?;
//! let result = store.query_range("e1", t0, t0, Some(&["pm25"]))?;
//! println!("{} rows scanned", result.rows_scanned());
//! for record in result {
//!     println!("{}: {:?}", record.ts, record.fields);
//! }
//! # Ok(())
//! # }
//! ```

use std::iter::Peekable;
use std::vec;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{Fields, StoredRow};

/// All matching field values of an entity at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedRecord {
    /// The shared timestamp, UTC.
    pub ts: DateTime<Utc>,
    /// Field values at `ts`.
    pub fields: Fields,
}

/// Lazily grouped result of a range query.
#[derive(Debug)]
pub struct RangeQuery {
    rows: Peekable<vec::IntoIter<StoredRow>>,
    storage_id: String,
    requested_range: (DateTime<Utc>, DateTime<Utc>),
    rows_scanned: usize,
}

impl RangeQuery {
    /// Wraps rows ordered by `(ts, field_name)`.
    pub fn new(
        rows: Vec<StoredRow>,
        storage_id: impl Into<String>,
        requested_range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Self {
        Self {
            rows_scanned: rows.len(),
            rows: rows.into_iter().peekable(),
            storage_id: storage_id.into(),
            requested_range,
        }
    }

    /// Returns the id the rows were read under.
    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    /// Returns the requested `(start, end)` bounds, normalized to UTC.
    pub fn requested_range(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        self.requested_range
    }

    /// Returns how many narrow rows the scan produced.
    pub fn rows_scanned(&self) -> usize {
        self.rows_scanned
    }

    /// Collects all remaining groups.
    pub fn collect_all(self) -> Vec<GroupedRecord> {
        self.collect()
    }
}

impl Iterator for RangeQuery {
    type Item = GroupedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rows.next()?;
        let ts = first.ts;
        let mut fields = Fields::new();
        fields.insert(first.field_name, first.value);

        while let Some(row) = self.rows.next_if(|row| row.ts == ts) {
            fields.insert(row.field_name, row.value);
        }

        Some(GroupedRecord { ts, fields })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lower, upper) = self.rows.size_hint();
        (usize::from(lower > 0), upper)
    }
}

impl std::iter::FusedIterator for RangeQuery {}
