//! Criterion benchmarks for the record path.
//!
//! Measures the steady-state fold into an existing entry, the insert path
//! with eviction churn on a small table, text registration, and snapshot
//! copy-out of a populated table.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use stat_monitor_core::{Config, ManualClock};
use stat_monitor_store::{Phase, SampleKey, StatStore, StatementSample};

const OPS: u64 = 10_000;

fn store(config: Config) -> StatStore {
    StatStore::new(config, Arc::new(ManualClock::new(0))).expect("valid config")
}

/// Deterministic skewed query ids, biased toward low values.
const fn skewed_query_id(step: u64, n_unique: u64) -> u64 {
    let h = step.wrapping_mul(2_654_435_761) >> 16;
    let rank = h % n_unique;
    (rank * rank) % n_unique
}

fn bench_record_hot_entry(c: &mut Criterion) {
    let store = store(Config::default());
    let sample = StatementSample::new(SampleKey::new(1, 10, 1, 0), Phase::Exec, 0.75).with_rows(3);
    store.record_statement(&sample);
    c.bench_function("record_hot_entry", |b| {
        b.iter(|| black_box(store.record_statement(black_box(&sample))));
    });
}

fn bench_record_skewed_keys(c: &mut Criterion) {
    let store = store(Config::default());
    c.bench_function("record_skewed_10k", |b| {
        b.iter(|| {
            for i in 0..OPS {
                let key = SampleKey::new(skewed_query_id(i, 5_000), 10, 1, 0);
                black_box(store.record_statement(&StatementSample::new(key, Phase::Exec, 1.0)));
            }
        });
    });
}

fn bench_record_with_eviction(c: &mut Criterion) {
    let store = store(Config {
        max_entries_override: Some(1_000),
        ..Config::default()
    });
    let mut next = 0u64;
    c.bench_function("record_eviction_churn_10k", |b| {
        b.iter(|| {
            for _ in 0..OPS {
                next += 1;
                let key = SampleKey::new(next, 10, 1, 0);
                black_box(store.record_statement(&StatementSample::new(key, Phase::Exec, 1.0)));
            }
        });
    });
}

fn bench_register_text(c: &mut Criterion) {
    let store = store(Config::default());
    let text = "SELECT a, b, c FROM orders WHERE customer_id = $1 AND status = $2";
    c.bench_function("register_text_dedup", |b| {
        b.iter(|| black_box(store.get_or_register_text(black_box(42), text)));
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let store = store(Config::default());
    for q in 0..10_000 {
        let key = SampleKey::new(q, 10, 1, 0);
        store.record_statement(&StatementSample::new(key, Phase::Exec, 1.0));
    }
    c.bench_function("snapshot_10k_entries", |b| {
        b.iter(|| black_box(store.snapshot_iterate().len()));
    });
}

criterion_group!(
    benches,
    bench_record_hot_entry,
    bench_record_skewed_keys,
    bench_record_with_eviction,
    bench_register_text,
    bench_snapshot
);
criterion_main!(benches);
