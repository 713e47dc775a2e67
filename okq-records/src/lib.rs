//! # okq-records
//!
//! Per-entity time-series records store.
//!
//! okq-records persists readings (a timestamp, an entity id and a set of
//! numeric fields) into a narrow `ts / entity_id / field_name / value`
//! table, skips data that was already stored, and keeps the most recent
//! reading of every entity in a key/value cache for fast access.
//!
//! ## Key Properties
//!
//! - At most one row per `(ts, entity_id, field_name)`, even with
//!   overlapping re-deliveries and concurrent writers
//! - Timestamps normalized to UTC and whole seconds everywhere
//! - Per-entity failure isolation within a batch
//! - Range reads grouped back into one record per timestamp
//! - Pluggable backends (in-memory, SQLite) behind one trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::{TimeZone, Utc};
//! use okq_records::{Batch, FileCache, Reading, RecordsSettings, create_store};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = RecordsSettings {
//!     engine: "sqlite3".to_string(),
//!     name: "openkongqi.db".to_string(),
//!     ..RecordsSettings::default()
//! };
//! let store = create_store(&settings, Arc::new(FileCache::open("_cache")?))?;
//! store.initialize_schema()?;
//!
//! let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let mut batch = Batch::new();
//! batch.insert("1001A".to_string(), vec![Reading::new(ts, [("pm25", 35.0), ("pm10", 60.0)])]);
//!
//! // Writing the same batch again stores nothing new
//! store.write_batch(&batch)?;
//! store.write_batch(&batch)?;
//!
//! for record in store.query_range("1001A", ts, ts, Some(&["pm25"]))? {
//!     println!("{}: {:?}", record.ts, record.fields);
//! }
//! println!("latest: {:?}", store.latest("1001A"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`RecordsStore`]: top-level handle; dedup writes, cache maintenance, reads
//! - [`RecordsBackend`]: primitive storage operations, one per engine
//! - [`LatestCache`]: latest-reading entries over any [`KeyValueCache`]
//! - [`RangeQuery`]: lazy iterator of [`GroupedRecord`]s
//! - [`create_store`]: builds a store from [`RecordsSettings`]
//!
//! ## Modules
//!
//! - [`store`]: write and read algorithms
//! - [`backend`]: backend trait and implementations
//! - [`query`]: range query results
//! - [`latest`]: latest-value cache adapter
//! - [`cache`]: key/value caches
//! - [`context`]: entity id namespacing
//! - [`schema`]: durable table definition
//! - [`timestamp`]: timestamp codec
//! - [`model`]: readings, batches, rows
//! - [`config`]: settings and the store factory
//! - [`error`]: error types

pub mod backend;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod latest;
pub mod model;
pub mod query;
pub mod schema;
pub mod store;
pub mod timestamp;

// Re-export primary API types at crate root for convenience.
pub use backend::{InsertOutcome, MemoryBackend, RecordsBackend, SqliteBackend};
pub use cache::{FileCache, KeyValueCache, MemoryCache};
pub use config::{Engine, RecordsSettings, Settings, create_store};
pub use context::{KeyContext, KeyDeriver, Sha256KeyDeriver};
pub use error::{RecordsError, Result};
pub use latest::{LatestCache, LatestEntry};
pub use model::{Batch, Fields, Observation, Reading, RowKey, StoredRow, group_observations};
pub use query::{GroupedRecord, RangeQuery};
pub use store::{RecordsStore, WriteSummary};
