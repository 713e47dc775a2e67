//! Records store: deduplicated writes and grouped range reads.
//!
//! [`RecordsStore`] composes a [`RecordsBackend`] with the pieces every
//! backend shares: the timestamp codec, the latest-value cache and entity
//! id contextualization.
//!
//! # Write path
//!
//! For each entity of a [`Batch`], independently and in ascending id order:
//!
//! 1. Look up the cached latest entry; drop readings at or before its
//!    timestamp (re-delivered history).
//! 2. Remember the reading with the greatest timestamp.
//! 3. Explode readings into narrow rows keyed by
//!    `(ts, contextualized entity id, field)`.
//! 4. Skip rows already stored (existence check) or repeated in the batch.
//! 5. Insert the remaining rows in one atomic backend call, then update the
//!    latest cache with the remembered reading.
//!
//! Step 1 is an optimization and step 4's existence check too: the
//! backend's uniqueness enforcement is what guarantees a row is stored at
//! most once, and a conflict at insert time counts as a duplicate.
//!
//! Before any of this, every reading's timestamp is checked against
//! [`timestamp::storable_range`]. One bad timestamp rejects the whole batch
//! with [`TimestampError::OutOfRange`] and nothing is written.
//!
//! A batch is not atomic across entities. An entity that fails does not
//! stop the others, and committed entities stay committed; all failures are
//! reported together in one [`WriteError`]. Nothing is retried.
//!
//! # Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use chrono::{TimeZone, Utc};
//! use okq_records::{Batch, MemoryBackend, MemoryCache, Reading, RecordsStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RecordsStore::new(Box::new(MemoryBackend::new()), Arc::new(MemoryCache::new()));
//! store.initialize_schema()?;
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
//!
//! let mut batch = Batch::new();
//! batch.insert("e1".to_string(), vec![
//!     Reading::new(t0, [("a", 1.0), ("b", 2.0)]),
//!     Reading::new(t1, [("a", 3.0)]),
//! ]);
//!
//! let summary = store.write_batch(&batch)?;
//! assert_eq!(summary.inserted, 3);
//!
//! let groups = store.query_range("e1", t0, t1, None)?.collect_all();
//! assert_eq!(groups.len(), 2);
//! assert_eq!(store.latest("e1").unwrap().ts, t1);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::backend::RecordsBackend;
use crate::cache::KeyValueCache;
use crate::context::KeyContext;
use crate::error::{
    BackendError, EntityWriteFailure, QueryError, RecordsError, Result, SchemaError,
    TimestampError, WriteError,
};
use crate::latest::{LatestCache, LatestEntry};
use crate::model::{Batch, Reading, RowKey, StoredRow};
use crate::query::RangeQuery;
use crate::schema::RECORDS_TABLE;
use crate::timestamp::{self, IntoUtc};

/// Counters describing what a successful [`RecordsStore::write_batch`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Entities processed.
    pub entities: usize,
    /// Rows newly stored.
    pub inserted: usize,
    /// Rows skipped because they were already stored or repeated.
    pub duplicates: usize,
    /// Readings dropped for being no newer than the cached latest entry.
    pub filtered: usize,
}

/// Per-entity counters, folded into [`WriteSummary`].
#[derive(Debug, Default)]
struct EntityOutcome {
    inserted: usize,
    duplicates: usize,
    filtered: usize,
}

/// Top-level records store handle.
///
/// # Thread Safety
///
/// `RecordsStore` is `Send + Sync`; backends serialize access to their
/// connection. Writes of one batch run sequentially. Concurrent writers for
/// the same entity are safe for the durable rows, but the latest cache is
/// last-write-wins: callers needing a monotonic latest entry must serialize
/// writes per entity.
#[derive(Debug)]
pub struct RecordsStore {
    backend: Box<dyn RecordsBackend>,
    latest: LatestCache,
    context: KeyContext,
}

impl RecordsStore {
    /// Creates a store over `backend` with the default latest cache key.
    pub fn new(backend: Box<dyn RecordsBackend>, cache: Arc<dyn KeyValueCache>) -> Self {
        Self::with_latest_cache(backend, LatestCache::new(cache))
    }

    /// Creates a store over `backend` with a configured latest cache.
    pub fn with_latest_cache(backend: Box<dyn RecordsBackend>, latest: LatestCache) -> Self {
        Self {
            backend,
            latest,
            context: KeyContext::none(),
        }
    }

    /// Sets the key context, consuming and returning the store.
    #[must_use]
    pub fn with_key_context(mut self, context: KeyContext) -> Self {
        self.context = context;
        self
    }

    /// Replaces the key context.
    ///
    /// The namespace prefix is often known only once the data source is,
    /// after the store has been built.
    pub fn set_key_context(&mut self, context: KeyContext) {
        self.context = context;
    }

    /// Returns the key context.
    pub fn key_context(&self) -> &KeyContext {
        &self.context
    }

    /// Returns the engine name of the backend.
    pub fn engine(&self) -> &'static str {
        self.backend.engine()
    }

    /// Returns the latest-value cache adapter.
    pub fn latest_cache(&self) -> &LatestCache {
        &self.latest
    }

    /// Ensures the durable schema exists. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the definition is invalid or the backend
    /// cannot create it.
    pub fn initialize_schema(&self) -> Result<()> {
        RECORDS_TABLE.validate()?;
        self.backend
            .initialize_schema(&RECORDS_TABLE)
            .map_err(|source| SchemaError::CreateFailed {
                table: RECORDS_TABLE.name,
                engine: self.backend.engine(),
                source,
            })?;
        tracing::info!(
            engine = self.backend.engine(),
            table = RECORDS_TABLE.name,
            "records schema ready"
        );
        Ok(())
    }

    /// Returns whether a row with the same `(ts, entity_id, field_name)` is
    /// already stored. `row.ts` is normalized first; `row.entity_id` is used
    /// as stored, without contextualization.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Backend`] if the lookup fails.
    pub fn is_duplicate(&self, row: &StoredRow) -> Result<bool> {
        let key = RowKey {
            ts: timestamp::truncate(row.ts),
            ..row.key()
        };
        self.backend.contains(&key).map_err(|source| {
            QueryError::Backend {
                operation: "is_duplicate",
                entity_id: row.entity_id.clone(),
                source,
            }
            .into()
        })
    }

    /// Writes a batch of readings, skipping rows that are already stored.
    ///
    /// See the [module documentation](crate::store) for the algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError::OutOfRange`] if any reading cannot be
    /// stored, before writing anything. Otherwise returns [`WriteError`]
    /// listing every entity that failed; entities not listed were committed.
    pub fn write_batch(&self, batch: &Batch) -> Result<WriteSummary> {
        Self::check_timestamps(batch)?;

        let mut summary = WriteSummary::default();
        let mut failures = Vec::new();

        for (entity_id, readings) in batch {
            match self.write_entity(entity_id, readings) {
                Ok(outcome) => {
                    summary.entities += 1;
                    summary.inserted += outcome.inserted;
                    summary.duplicates += outcome.duplicates;
                    summary.filtered += outcome.filtered;
                }
                Err(failure) => {
                    tracing::warn!(
                        entity_id = %failure.entity_id,
                        storage_id = %failure.storage_id,
                        rows = failure.rows,
                        error = %failure.source,
                        "entity write failed"
                    );
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(WriteError { failures }.into())
        }
    }

    fn check_timestamps(batch: &Batch) -> std::result::Result<(), TimestampError> {
        for (entity_id, readings) in batch {
            for reading in readings {
                if let Err(e) = timestamp::check_storable(reading.ts) {
                    tracing::warn!(entity_id = %entity_id, error = %e, "batch rejected");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn write_entity(
        &self,
        entity_id: &str,
        readings: &[Reading],
    ) -> std::result::Result<EntityOutcome, EntityWriteFailure> {
        let storage_id = self.context.apply(entity_id);
        let failure = |rows: usize, source: BackendError| EntityWriteFailure {
            entity_id: entity_id.to_string(),
            storage_id: storage_id.clone(),
            rows,
            source,
        };

        let cached_ts = self.cached_latest(entity_id).map(|entry| entry.ts);
        let mut outcome = EntityOutcome::default();
        let mut last_reading: Option<(DateTime<Utc>, &Reading)> = None;
        let mut queue: Vec<StoredRow> = Vec::new();
        let mut queued = HashSet::new();

        for reading in readings {
            let ts = reading.normalized_ts();
            if cached_ts.is_some_and(|cached| ts <= cached) {
                outcome.filtered += 1;
                continue;
            }
            if last_reading.is_none_or(|(last_ts, _)| ts > last_ts) {
                last_reading = Some((ts, reading));
            }

            for (field_name, value) in &reading.fields {
                let row = StoredRow {
                    ts,
                    entity_id: storage_id.clone(),
                    field_name: field_name.clone(),
                    value: *value,
                };
                let key = row.key();
                if queued.contains(&key) {
                    outcome.duplicates += 1;
                    continue;
                }
                let exists = self
                    .backend
                    .contains(&key)
                    .map_err(|source| failure(queue.len(), source))?;
                if exists {
                    outcome.duplicates += 1;
                } else {
                    queued.insert(key);
                    queue.push(row);
                }
            }
        }

        if !queue.is_empty() {
            let inserted = self
                .backend
                .insert_rows(&queue)
                .map_err(|source| failure(queue.len(), source))?;
            outcome.inserted = inserted.inserted;
            outcome.duplicates += inserted.duplicates;
        }

        if let Some((_, reading)) = last_reading
            && let Err(e) = self.latest.set_latest(&self.context, entity_id, reading)
        {
            tracing::warn!(entity_id, error = %e, "latest cache update failed");
        }

        tracing::debug!(
            entity_id,
            storage_id = %storage_id,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            filtered = outcome.filtered,
            "entity written"
        );
        Ok(outcome)
    }

    /// Queries the readings of `entity_id` between `start` and `end`,
    /// inclusive, grouped by timestamp in ascending order.
    ///
    /// The entity id is contextualized like on writes. Naive bounds are
    /// taken as UTC. With `fields`, only those field names are returned.
    /// `start > end` gives an empty result.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Backend`] if the range scan fails.
    pub fn query_range(
        &self,
        entity_id: &str,
        start: impl IntoUtc,
        end: impl IntoUtc,
        fields: Option<&[&str]>,
    ) -> Result<RangeQuery> {
        let storage_id = self.context.apply(entity_id);
        self.scan(storage_id, start.into_utc(), end.into_utc(), fields)
    }

    /// Like [`RecordsStore::query_range`] for an id exactly as stored,
    /// without contextualization.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Backend`] if the range scan fails.
    pub fn query_range_raw(
        &self,
        storage_id: &str,
        start: impl IntoUtc,
        end: impl IntoUtc,
        fields: Option<&[&str]>,
    ) -> Result<RangeQuery> {
        self.scan(storage_id.to_string(), start.into_utc(), end.into_utc(), fields)
    }

    fn scan(
        &self,
        storage_id: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fields: Option<&[&str]>,
    ) -> Result<RangeQuery> {
        let fields: Option<BTreeSet<String>> =
            fields.map(|names| names.iter().map(|name| (*name).to_string()).collect());

        let rows = self
            .backend
            .select_range(&storage_id, start, end, fields.as_ref())
            .map_err(|source| QueryError::Backend {
                operation: "query_range",
                entity_id: storage_id.clone(),
                source,
            })?;

        tracing::debug!(
            storage_id = %storage_id,
            %start,
            %end,
            rows = rows.len(),
            "range scanned"
        );
        Ok(RangeQuery::new(rows, storage_id, (start, end)))
    }

    /// Returns the cached latest entry of `entity_id`, read under the
    /// contextualized key. Cache failures degrade to `None`.
    pub fn latest(&self, entity_id: &str) -> Option<LatestEntry> {
        self.cached_latest(entity_id)
    }

    /// Returns the cached latest entry stored under the raw key `entity_id`.
    /// Cache failures degrade to `None`.
    pub fn latest_raw(&self, entity_id: &str) -> Option<LatestEntry> {
        match self.latest.get_latest(entity_id) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(entity_id, error = %e, "latest cache unavailable");
                None
            }
        }
    }

    fn cached_latest(&self, entity_id: &str) -> Option<LatestEntry> {
        match self.latest.get_latest_contextualized(&self.context, entity_id) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(entity_id, error = %e, "latest cache unavailable");
                None
            }
        }
    }

    /// Returns the total number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns [`RecordsError::NotImplemented`] if the backend cannot count,
    /// or [`QueryError::RowCount`] if counting fails.
    pub fn row_count(&self) -> Result<u64> {
        self.backend.row_count().map_err(|source| match source {
            BackendError::Unsupported { capability } => RecordsError::NotImplemented {
                engine: self.backend.engine(),
                capability,
            },
            source => QueryError::RowCount {
                engine: self.backend.engine(),
                source,
            }
            .into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, SqliteBackend};
    use crate::cache::MemoryCache;
    use chrono::{FixedOffset, TimeDelta, TimeZone};

    fn t(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, min, 0).unwrap()
    }

    fn memory_store() -> (RecordsStore, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        let store = RecordsStore::new(Box::new(MemoryBackend::new()), cache.clone());
        store.initialize_schema().unwrap();
        (store, cache)
    }

    fn batch(entity: &str, readings: Vec<Reading>) -> Batch {
        let mut batch = Batch::new();
        batch.insert(entity.to_string(), readings);
        batch
    }

    #[test]
    fn test_write_then_query_scenario() {
        let (store, _) = memory_store();
        let data = batch(
            "e1",
            vec![
                Reading::new(t(0), [("a", 1.0), ("b", 2.0)]),
                Reading::new(t(5), [("a", 3.0)]),
            ],
        );

        let summary = store.write_batch(&data).unwrap();
        assert_eq!(
            summary,
            WriteSummary {
                entities: 1,
                inserted: 3,
                duplicates: 0,
                filtered: 0,
            }
        );
        assert_eq!(store.row_count().unwrap(), 3);

        let groups = store.query_range("e1", t(0), t(5), None).unwrap().collect_all();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].fields.len(), 1);
        assert_eq!(groups[1].fields["a"], Some(3.0));

        let latest = store.latest("e1").unwrap();
        assert_eq!(latest.ts, t(5));
        assert_eq!(latest.fields["a"], Some(3.0));
    }

    #[test]
    fn test_rewrite_is_filtered_by_latest_cache() {
        let (store, _) = memory_store();
        let data = batch(
            "e1",
            vec![
                Reading::new(t(0), [("a", 1.0)]),
                Reading::new(t(5), [("a", 3.0)]),
            ],
        );
        store.write_batch(&data).unwrap();

        let summary = store.write_batch(&data).unwrap();
        assert_eq!(summary.filtered, 2);
        assert_eq!(summary.inserted, 0);
        assert_eq!(store.row_count().unwrap(), 2);
    }

    #[test]
    fn test_rewrite_without_cache_entry_dedups_per_row() {
        let (store, cache) = memory_store();
        store
            .write_batch(&batch("e1", vec![Reading::new(t(0), [("a", 1.0)])]))
            .unwrap();

        // an unreadable entry counts as absent, leaving only the existence check
        cache.set("okq:e1:latest", "garbage").unwrap();
        let summary = store
            .write_batch(&batch("e1", vec![Reading::new(t(0), [("a", 9.0), ("b", 2.0)])]))
            .unwrap();
        assert_eq!(summary.filtered, 0);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(store.row_count().unwrap(), 2);

        let groups = store.query_range("e1", t(0), t(0), None).unwrap().collect_all();
        assert_eq!(groups[0].fields["a"], Some(1.0));
        assert_eq!(groups[0].fields["b"], Some(2.0));
    }

    #[test]
    fn test_dedup_is_per_field() {
        let (store, _) = memory_store();
        let stored = StoredRow::new(t(0), "e1", "a", Some(1.0));
        store.write_batch(&batch("e1", vec![Reading::new(t(0), [("a", 1.0)])])).unwrap();
        assert!(store.is_duplicate(&stored).unwrap());
        assert!(!store.is_duplicate(&StoredRow::new(t(0), "e1", "b", Some(1.0))).unwrap());
    }

    #[test]
    fn test_is_duplicate_ignores_subseconds() {
        let (store, _) = memory_store();
        store.write_batch(&batch("e1", vec![Reading::new(t(0), [("a", 1.0)])])).unwrap();

        let late = StoredRow {
            ts: t(0) + TimeDelta::milliseconds(300),
            entity_id: "e1".to_string(),
            field_name: "a".to_string(),
            value: Some(1.0),
        };
        assert!(store.is_duplicate(&late).unwrap());
    }

    #[test]
    fn test_unstorable_timestamp_rejects_whole_batch() {
        let (store, _) = memory_store();
        let far = Utc.with_ymd_and_hms(10000, 1, 1, 1, 0, 0).unwrap();
        let mut data = batch("e1", vec![Reading::new(t(0), [("a", 1.0)])]);
        data.insert("e2".to_string(), vec![Reading::new(far, [("a", 2.0)])]);

        let err = store.write_batch(&data).unwrap_err();
        assert!(matches!(
            err,
            RecordsError::Timestamp(TimestampError::OutOfRange { ts }) if ts == far
        ));
        assert_eq!(store.row_count().unwrap(), 0);
        assert!(store.latest("e1").is_none());
    }

    #[test]
    fn test_repeated_rows_in_one_batch_are_collapsed() {
        let (store, _) = memory_store();
        let data = batch(
            "e1",
            vec![
                Reading::new(t(0), [("a", 1.0)]),
                Reading::new(t(0) + TimeDelta::milliseconds(200), [("a", 2.0)]),
            ],
        );
        let summary = store.write_batch(&data).unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.duplicates, 1);

        let groups = store.query_range("e1", t(0), t(0), None).unwrap().collect_all();
        assert_eq!(groups[0].fields["a"], Some(1.0));
    }

    #[test]
    fn test_latest_is_max_timestamp_not_last_position() {
        let (store, _) = memory_store();
        let data = batch(
            "e1",
            vec![
                Reading::new(t(10), [("a", 10.0)]),
                Reading::new(t(0), [("a", 0.0)]),
                Reading::new(t(5), [("a", 5.0)]),
            ],
        );
        store.write_batch(&data).unwrap();
        assert_eq!(store.latest("e1").unwrap().ts, t(10));
    }

    #[test]
    fn test_offsets_are_normalized_before_storage() {
        let (store, _) = memory_store();
        let cst = FixedOffset::east_opt(8 * 3600).unwrap();
        let local = cst.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        store
            .write_batch(&batch("e1", vec![Reading::new(local, [("a", 1.0)])]))
            .unwrap();

        let groups = store.query_range("e1", t(0), t(0), None).unwrap().collect_all();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ts, t(0));

        // naive bounds are UTC
        let naive = t(0).naive_utc();
        assert_eq!(store.query_range("e1", naive, naive, None).unwrap().count(), 1);
    }

    #[test]
    fn test_key_context_applies_to_rows_and_cache() {
        let (store, cache) = memory_store();
        let ctx = KeyContext::with_prefix("pm25in");
        let storage_id = ctx.apply("1001A");
        let store = store.with_key_context(ctx);

        store
            .write_batch(&batch("1001A", vec![Reading::new(t(0), [("pm25", 12.0)])]))
            .unwrap();

        assert_eq!(store.query_range("1001A", t(0), t(0), None).unwrap().count(), 1);
        let raw = store.query_range_raw(&storage_id, t(0), t(0), None).unwrap();
        assert_eq!(raw.storage_id(), storage_id);
        assert_eq!(raw.count(), 1);
        assert_eq!(store.query_range_raw("1001A", t(0), t(0), None).unwrap().count(), 0);

        assert!(store.latest("1001A").is_some());
        assert!(store.latest_raw("1001A").is_none());
        assert!(store.latest_raw(&storage_id).is_some());
        assert!(cache.get(&format!("okq:{storage_id}:latest")).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_cache_entry_degrades() {
        let (store, cache) = memory_store();
        cache.set("okq:e1:latest", "garbage").unwrap();
        assert!(store.latest("e1").is_none());

        let summary = store
            .write_batch(&batch("e1", vec![Reading::new(t(0), [("a", 1.0)])]))
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(store.latest("e1").unwrap().ts, t(0));
    }

    #[test]
    fn test_sqlite_store_scenario() {
        let store = RecordsStore::new(
            Box::new(SqliteBackend::open_in_memory().unwrap()),
            Arc::new(MemoryCache::new()),
        );
        store.initialize_schema().unwrap();
        assert_eq!(store.engine(), "sqlite");

        let data = batch(
            "e1",
            vec![
                Reading::new(t(0), [("a", 1.0), ("b", 2.0)]),
                Reading::new(t(5), [("a", 3.0)]),
            ],
        );
        store.write_batch(&data).unwrap();
        store.write_batch(&data).unwrap();
        assert_eq!(store.row_count().unwrap(), 3);

        let groups = store
            .query_range("e1", t(0), t(5), Some(&["b"]))
            .unwrap()
            .collect_all();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].fields.keys().collect::<Vec<_>>(), vec!["b"]);
    }
}
