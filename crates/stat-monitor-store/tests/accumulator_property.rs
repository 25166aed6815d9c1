//! Property tests for the accumulator, eviction and normalization.
//!
//! 1. **Online variance**: Welford mean/stddev match a two-pass computation
//!    over the same samples.
//! 2. **Histogram conservation**: the response histogram of an entry sums to
//!    its execution call count, whatever the durations, bounds and number of
//!    interleaved planning samples.
//! 3. **Eviction bound**: no sequence of fingerprints pushes the table past
//!    its capacity, and no sample goes unaccounted for.
//! 4. **Normalization safety**: arbitrary literal spans and placeholder
//!    offsets never panic and never produce more placeholders than spans.

use std::sync::Arc;

use proptest::prelude::*;
use stat_monitor_core::{Config, ManualClock};
use stat_monitor_store::{
    Counters, HistogramBounds, LiteralSpan, Phase, QueryFingerprint, RecordOutcome, SampleKey,
    StatStore, StatementSample, normalize_query,
};

fn exec(ms: f64) -> StatementSample {
    StatementSample::new(SampleKey::new(1, 1, 1, 0), Phase::Exec, ms)
}

#[allow(clippy::cast_precision_loss)]
fn two_pass(xs: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-7 * a.abs().max(b.abs()).max(1.0)
}

proptest! {
    #[test]
    fn welford_matches_two_pass(xs in prop::collection::vec(0.0f64..10_000.0, 1..300)) {
        let bounds = HistogramBounds { lower_bound_ms: 1.0, step_ms: 1.0 };
        let mut counters = Counters::fresh();
        for &x in &xs {
            counters.fold(&exec(x), &bounds);
        }
        let (calls, time) = counters.phase(Phase::Exec);
        let (mean, stddev) = two_pass(&xs);

        prop_assert_eq!(calls.calls, xs.len() as u64);
        prop_assert!(close(time.mean, mean), "mean {} vs {}", time.mean, mean);
        prop_assert!(close(time.stddev(calls.calls), stddev), "stddev {} vs {}", time.stddev(calls.calls), stddev);
        prop_assert!(close(time.total, xs.iter().sum()));
        let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
        let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert_eq!(time.min, min);
        prop_assert_eq!(time.max, max);
    }

    #[test]
    fn histogram_conserves_samples(
        xs in prop::collection::vec((-100.0f64..1e6, any::<bool>()), 0..500),
        lower in 0.0f64..1000.0,
        step in 0.001f64..1000.0,
    ) {
        let bounds = HistogramBounds { lower_bound_ms: lower, step_ms: step };
        let mut counters = Counters::fresh();
        for &(x, planning) in &xs {
            let phase = if planning { Phase::Plan } else { Phase::Exec };
            counters.fold(&StatementSample::new(SampleKey::new(1, 1, 1, 0), phase, x), &bounds);
        }
        let executed = xs.iter().filter(|(_, planning)| !planning).count() as u64;
        prop_assert_eq!(counters.resp_calls.total(), executed);
        prop_assert_eq!(counters.resp_calls.total(), counters.calls[Phase::Exec.index()].calls);
        prop_assert_eq!(
            counters.calls[Phase::Plan.index()].calls,
            xs.len() as u64 - executed
        );
    }

    #[test]
    fn table_never_exceeds_capacity(
        capacity in 1usize..24,
        query_ids in prop::collection::vec(0u64..64, 1..400),
    ) {
        let store = StatStore::new(
            Config { max_entries_override: Some(capacity), ..Config::default() },
            Arc::new(ManualClock::new(0)),
        ).expect("valid config");

        let mut recorded = 0u64;
        for &q in &query_ids {
            let sample = StatementSample::new(SampleKey::new(q, 1, 1, 0), Phase::Exec, 1.0);
            if let RecordOutcome::Recorded { .. } = store.record_statement(&sample) {
                recorded += 1;
            }
            prop_assert!(store.entry_count() <= capacity);
        }
        let metrics = store.metrics().snapshot();
        prop_assert_eq!(metrics.samples_recorded_total, recorded);
        prop_assert_eq!(recorded + metrics.samples_dropped_total, query_ids.len() as u64);
        prop_assert!(metrics.entries_peak <= capacity as u64);
    }

    #[test]
    fn normalization_is_total(
        raw in "[a-zA-Z0-9 ,'()=*é]{0,80}",
        spans in prop::collection::vec((0usize..100, prop::option::of(0usize..20)), 0..8),
        highest in prop_oneof![0u32..5, (u32::MAX - 3)..=u32::MAX],
    ) {
        let literals: Vec<LiteralSpan> = spans
            .iter()
            .map(|&(location, length)| LiteralSpan { location, length })
            .collect();
        let fingerprint = QueryFingerprint { query_id: 1, literals, highest_extern_param_id: highest };
        let out = normalize_query(&raw, &fingerprint);

        let emitted = (1..=8u32)
            .filter_map(|i| highest.checked_add(i))
            .filter(|n| out.contains(&format!("${n}")))
            .count();
        prop_assert!(emitted <= spans.len());
        if spans.iter().all(|(_, len)| len.is_none()) {
            prop_assert_eq!(out, raw);
        }
    }
}
