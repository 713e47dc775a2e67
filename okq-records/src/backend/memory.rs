//! In-process backend.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{InsertOutcome, RecordsBackend};
use crate::error::BackendError;
use crate::model::{RowKey, StoredRow};
use crate::schema::TableSchema;
use crate::timestamp;

/// Rows of one entity keyed by `(ts, field_name)`.
type EntityRows = BTreeMap<(DateTime<Utc>, String), Option<f64>>;

/// Backend keeping rows in ordered maps, one per entity.
///
/// Map keys are the row identity, so uniqueness holds by construction.
/// Timestamps are truncated to whole seconds on the way in, and rows the
/// SQLite backend could not store are rejected too. Nothing survives the
/// process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: Mutex<BTreeMap<String, EntityRows>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordsBackend for MemoryBackend {
    fn engine(&self) -> &'static str {
        "memory"
    }

    fn initialize_schema(&self, _schema: &TableSchema) -> Result<(), BackendError> {
        Ok(())
    }

    fn contains(&self, key: &RowKey) -> Result<bool, BackendError> {
        let ts = timestamp::truncate(key.ts);
        let rows = self.rows.lock();
        Ok(rows
            .get(&key.entity_id)
            .is_some_and(|entity| entity.contains_key(&(ts, key.field_name.clone()))))
    }

    fn insert_rows(&self, rows: &[StoredRow]) -> Result<InsertOutcome, BackendError> {
        let stamps = rows
            .iter()
            .map(|row| timestamp::check_storable(row.ts))
            .collect::<Result<Vec<_>, _>>()?;

        let mut stored = self.rows.lock();
        let mut outcome = InsertOutcome::default();

        for (row, ts) in rows.iter().zip(stamps) {
            let entity = stored.entry(row.entity_id.clone()).or_default();
            let key = (ts, row.field_name.clone());
            if entity.contains_key(&key) {
                outcome.duplicates += 1;
            } else {
                entity.insert(key, row.value);
                outcome.inserted += 1;
            }
        }

        Ok(outcome)
    }

    fn select_range(
        &self,
        entity_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fields: Option<&BTreeSet<String>>,
    ) -> Result<Vec<StoredRow>, BackendError> {
        if start > end {
            return Ok(Vec::new());
        }

        let stored = self.rows.lock();
        let Some(entity) = stored.get(entity_id) else {
            return Ok(Vec::new());
        };

        let rows = entity
            .range((start, String::new())..)
            .take_while(|((ts, _), _)| *ts <= end)
            .filter(|((_, field), _)| fields.is_none_or(|f| f.contains(field)))
            .map(|((ts, field), value)| StoredRow {
                ts: *ts,
                entity_id: entity_id.to_string(),
                field_name: field.clone(),
                value: *value,
            })
            .collect();

        Ok(rows)
    }

    fn row_count(&self) -> Result<u64, BackendError> {
        let stored = self.rows.lock();
        Ok(stored.values().map(|entity| entity.len() as u64).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, min, 0).unwrap()
    }

    fn row(min: u32, entity: &str, field: &str, value: f64) -> StoredRow {
        StoredRow::new(t(min), entity, field, Some(value))
    }

    #[test]
    fn test_insert_counts_duplicates() {
        let backend = MemoryBackend::new();
        let first = backend
            .insert_rows(&[row(0, "e1", "a", 1.0), row(0, "e1", "b", 2.0)])
            .unwrap();
        assert_eq!(first, InsertOutcome { inserted: 2, duplicates: 0 });

        let second = backend
            .insert_rows(&[row(0, "e1", "a", 9.0), row(1, "e1", "a", 3.0)])
            .unwrap();
        assert_eq!(second, InsertOutcome { inserted: 1, duplicates: 1 });
        assert_eq!(backend.row_count().unwrap(), 3);

        // the original value is kept, not upserted
        let rows = backend.select_range("e1", t(0), t(0), None).unwrap();
        assert_eq!(rows[0].value, Some(1.0));
    }

    #[test]
    fn test_contains() {
        let backend = MemoryBackend::new();
        let r = row(0, "e1", "a", 1.0);
        assert!(!backend.contains(&r.key()).unwrap());
        backend.insert_rows(std::slice::from_ref(&r)).unwrap();
        assert!(backend.contains(&r.key()).unwrap());
        assert!(!backend.contains(&row(0, "e2", "a", 1.0).key()).unwrap());
    }

    #[test]
    fn test_subsecond_rows_are_truncated() {
        let backend = MemoryBackend::new();
        let late = StoredRow {
            ts: t(0) + TimeDelta::milliseconds(300),
            entity_id: "e1".to_string(),
            field_name: "a".to_string(),
            value: Some(1.0),
        };
        backend.insert_rows(std::slice::from_ref(&late)).unwrap();

        assert!(backend.contains(&late.key()).unwrap());
        assert!(backend.contains(&row(0, "e1", "a", 1.0).key()).unwrap());
        let again = backend.insert_rows(&[row(0, "e1", "a", 2.0)]).unwrap();
        assert_eq!(again, InsertOutcome { inserted: 0, duplicates: 1 });

        let rows = backend.select_range("e1", t(0), t(0), None).unwrap();
        assert_eq!(rows[0].ts, t(0));
    }

    #[test]
    fn test_unstorable_rows_are_rejected() {
        let backend = MemoryBackend::new();
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 1, 0, 0).unwrap();
        let err = backend
            .insert_rows(&[row(0, "e1", "a", 1.0), StoredRow::new(far, "e1", "a", Some(2.0))])
            .unwrap_err();
        assert!(matches!(err, BackendError::Timestamp(_)));
        // nothing from the call is kept
        assert_eq!(backend.row_count().unwrap(), 0);
    }

    #[test]
    fn test_select_range_bounds_and_order() {
        let backend = MemoryBackend::new();
        backend
            .insert_rows(&[
                row(10, "e1", "b", 4.0),
                row(0, "e1", "a", 1.0),
                row(5, "e1", "b", 3.0),
                row(5, "e1", "a", 2.0),
                row(5, "e2", "a", 7.0),
            ])
            .unwrap();

        let rows = backend.select_range("e1", t(0), t(5), None).unwrap();
        let keys: Vec<_> = rows
            .iter()
            .map(|r| (r.ts, r.field_name.as_str()))
            .collect();
        assert_eq!(keys, vec![(t(0), "a"), (t(5), "a"), (t(5), "b")]);

        let fields: BTreeSet<String> = ["b".to_string()].into();
        let rows = backend.select_range("e1", t(0), t(10), Some(&fields)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.field_name == "b"));

        assert!(backend.select_range("e1", t(6), t(5), None).unwrap().is_empty());
        assert!(backend.select_range("zz", t(0), t(10), None).unwrap().is_empty());
    }
}
