//! Data model for readings and stored rows.
//!
//! Readings arrive grouped per entity ([`Batch`]) and are stored in narrow
//! (long) format: one [`StoredRow`] per `(ts, entity_id, field_name)`.
//!
//! ```text
//! Reading { ts: 00:00, fields: {a: 1.0, b: 2.0} }   for entity "e1"
//!     │
//!     ├── StoredRow (00:00, e1, a, 1.0)
//!     └── StoredRow (00:00, e1, b, 2.0)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp::{self, IntoUtc};

/// Field values of one reading, keyed by field name. A value may be null.
pub type Fields = BTreeMap<String, Option<f64>>;

/// A write batch: readings per raw entity id.
pub type Batch = BTreeMap<String, Vec<Reading>>;

/// One timestamped set of field values for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// When the reading was taken, in UTC.
    pub ts: DateTime<Utc>,
    /// Measured values by field name.
    pub fields: Fields,
}

impl Reading {
    /// Creates a reading, converting `ts` to UTC.
    ///
    /// Naive timestamps are taken as UTC. Sub-second precision is kept here
    /// and dropped when the reading is written.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use okq_records::Reading;
    ///
    /// let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    /// let reading = Reading::new(ts, [("pm25", 12.0), ("pm10", 40.0)]);
    /// assert_eq!(reading.fields["pm25"], Some(12.0));
    /// ```
    pub fn new<I, K, V>(ts: impl IntoUtc, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Option<f64>>,
    {
        Self {
            ts: ts.into_utc(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns the timestamp as stored: UTC, whole seconds.
    pub fn normalized_ts(&self) -> DateTime<Utc> {
        timestamp::truncate(self.ts)
    }
}

/// Identity of a stored row. Unique across the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    /// Normalized timestamp.
    pub ts: DateTime<Utc>,
    /// Storage (possibly contextualized) entity id.
    pub entity_id: String,
    /// Field name.
    pub field_name: String,
}

/// One durable row of the narrow `records` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    /// Normalized timestamp.
    pub ts: DateTime<Utc>,
    /// Storage (possibly contextualized) entity id.
    pub entity_id: String,
    /// Field name.
    pub field_name: String,
    /// Field value, possibly null.
    pub value: Option<f64>,
}

impl StoredRow {
    /// Creates a row, normalizing `ts`.
    pub fn new(
        ts: impl IntoUtc,
        entity_id: impl Into<String>,
        field_name: impl Into<String>,
        value: Option<f64>,
    ) -> Self {
        Self {
            ts: timestamp::normalize(ts),
            entity_id: entity_id.into(),
            field_name: field_name.into(),
            value,
        }
    }

    /// Returns the identity triple of this row.
    pub fn key(&self) -> RowKey {
        RowKey {
            ts: self.ts,
            entity_id: self.entity_id.clone(),
            field_name: self.field_name.clone(),
        }
    }
}

/// A single flat measurement as emitted by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// When the measurement was taken.
    pub ts: DateTime<Utc>,
    /// Raw entity id (e.g. a station id).
    pub entity_id: String,
    /// Field name (e.g. `pm25`).
    pub field: String,
    /// Measured value, null when the source reported none.
    pub value: Option<f64>,
}

/// Groups flat observations into a write batch.
///
/// Observations of the same entity at the same normalized timestamp are
/// merged into one reading; a repeated field keeps the last value seen.
/// Readings of each entity come out in ascending timestamp order.
pub fn group_observations<I>(observations: I) -> Batch
where
    I: IntoIterator<Item = Observation>,
{
    let mut grouped: BTreeMap<String, BTreeMap<DateTime<Utc>, Fields>> = BTreeMap::new();

    for obs in observations {
        grouped
            .entry(obs.entity_id)
            .or_default()
            .entry(timestamp::normalize(obs.ts))
            .or_default()
            .insert(obs.field, obs.value);
    }

    grouped
        .into_iter()
        .map(|(entity_id, by_ts)| {
            let readings = by_ts
                .into_iter()
                .map(|(ts, fields)| Reading { ts, fields })
                .collect();
            (entity_id, readings)
        })
        .collect()
}
