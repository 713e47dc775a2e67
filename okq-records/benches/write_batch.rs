//! Benchmarks for `write_batch()` and `query_range()`.
//!
//! Run with: `cargo bench -p okq-records -- write_batch`

#![allow(missing_docs)]

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use okq_records::{Batch, MemoryBackend, MemoryCache, Reading, RecordsStore, SqliteBackend};
use tempfile::{TempDir, tempdir};

const FIELDS: [&str; 6] = ["pm25", "pm10", "co", "no2", "o3", "so2"];

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A batch of one reading per entity at `ts`, every field set.
fn make_batch(entities: u32, ts: DateTime<Utc>) -> Batch {
    (0..entities)
        .map(|i| {
            let fields = FIELDS.iter().map(|f| (*f, f64::from(i)));
            (format!("{i:04}A"), vec![Reading::new(ts, fields)])
        })
        .collect()
}

fn sqlite_store() -> (RecordsStore, TempDir) {
    let dir = tempdir().unwrap();
    let backend = SqliteBackend::open(dir.path().join("bench.db")).unwrap();
    let store = RecordsStore::new(Box::new(backend), Arc::new(MemoryCache::new()));
    store.initialize_schema().unwrap();
    (store, dir)
}

fn memory_store() -> RecordsStore {
    let store = RecordsStore::new(Box::new(MemoryBackend::new()), Arc::new(MemoryCache::new()));
    store.initialize_schema().unwrap();
    store
}

fn bench_write_new_rows(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_batch/entities");

    for count in [1, 10, 100] {
        let store = memory_store();
        let mut ts = base_time();

        group.bench_with_input(BenchmarkId::new("memory", count), &count, |b, &count| {
            b.iter(|| {
                ts += TimeDelta::seconds(1);
                store.write_batch(black_box(&make_batch(count, ts))).unwrap();
            });
        });

        let (store, _dir) = sqlite_store();
        let mut ts = base_time();

        group.bench_with_input(BenchmarkId::new("sqlite", count), &count, |b, &count| {
            b.iter(|| {
                ts += TimeDelta::seconds(1);
                store.write_batch(black_box(&make_batch(count, ts))).unwrap();
            });
        });
    }

    group.finish();
}

fn bench_write_redelivery(c: &mut Criterion) {
    // Re-delivered batches are the common case for polling sources.
    let (store, _dir) = sqlite_store();
    let batch = make_batch(30, base_time());
    store.write_batch(&batch).unwrap();

    c.bench_function("write_batch/sqlite_redelivery_30", |b| {
        b.iter(|| {
            store.write_batch(black_box(&batch)).unwrap();
        });
    });
}

fn bench_query_range(c: &mut Criterion) {
    let (store, _dir) = sqlite_store();
    let mut ts = base_time();
    for _ in 0..1_440 {
        store.write_batch(&make_batch(1, ts)).unwrap();
        ts += TimeDelta::minutes(1);
    }
    let end = ts;

    c.bench_function("query_range/sqlite_one_day", |b| {
        b.iter(|| {
            let groups = store
                .query_range(black_box("0000A"), base_time(), end, None)
                .unwrap()
                .count();
            black_box(groups);
        });
    });
}

criterion_group!(
    benches,
    bench_write_new_rows,
    bench_write_redelivery,
    bench_query_range,
);
criterion_main!(benches);
