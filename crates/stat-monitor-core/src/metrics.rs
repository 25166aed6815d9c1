//! Lock-free metrics primitives + the store's self-observability surface.
//!
//! Design goals:
//! - Hot-path recording: O(1), no allocations, no locks.
//! - Snapshotting: lock-free loads + derived quantiles (approx) for histograms.
//!
//! Every signal the store emits under pressure (dropped samples, text
//! overflow, evictions) lands here so callers can alert on data loss without
//! the store ever failing a report.

#![forbid(unsafe_code)]

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Counter {
    v: AtomicU64,
}

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.v.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct GaugeI64 {
    v: AtomicI64,
}

impl GaugeI64 {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicI64::new(0),
        }
    }

    #[inline]
    pub fn add(&self, delta: i64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.v.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> i64 {
        self.v.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct GaugeU64 {
    v: AtomicU64,
}

impl GaugeU64 {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fetch_max(&self, value: u64) {
        let mut cur = self.v.load(Ordering::Relaxed);
        while value > cur {
            match self
                .v
                .compare_exchange_weak(cur, value, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(next) => cur = next,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Histogram (fixed-bucket log2)
// ---------------------------------------------------------------------------

const LOG2_BUCKETS: usize = 64;

#[derive(Debug)]
pub struct Log2Histogram {
    buckets: [AtomicU64; LOG2_BUCKETS],
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl Default for Log2Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Log2Histogram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record(&self, value: u64) {
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
        self.buckets[bucket_index(value)].fetch_add(1, Ordering::Relaxed);
        // count is written LAST with Release so that an Acquire load on count
        // in snapshot() establishes a happens-before edge for all prior writes.
        self.count.fetch_add(1, Ordering::Release);
    }

    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Acquire);
        if count == 0 {
            return HistogramSnapshot::default();
        }

        let buckets: [u64; LOG2_BUCKETS] =
            std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed));

        let max = self.max.load(Ordering::Relaxed);
        // Clamp min <= max to maintain invariant even under concurrent races.
        let min = self.min.load(Ordering::Relaxed).min(max);

        HistogramSnapshot {
            count,
            sum: self.sum.load(Ordering::Relaxed),
            min,
            max,
            p50: estimate_quantile_frac(&buckets, count, 1, 2, max),
            p95: estimate_quantile_frac(&buckets, count, 19, 20, max),
            p99: estimate_quantile_frac(&buckets, count, 99, 100, max),
        }
    }
}

#[inline]
const fn bucket_index(value: u64) -> usize {
    if value == 0 {
        return 0;
    }
    // floor(log2(value)) in range 0..=63
    63usize.saturating_sub(value.leading_zeros() as usize)
}

const fn bucket_upper_bound(idx: usize) -> u64 {
    if idx >= 63 {
        return u64::MAX;
    }
    (1u64 << (idx + 1)).saturating_sub(1)
}

fn estimate_quantile_frac(
    buckets: &[u64; LOG2_BUCKETS],
    count: u64,
    numerator: u64,
    denominator: u64,
    observed_max: u64,
) -> u64 {
    debug_assert!(denominator > 0);
    // Nearest-rank: smallest value x such that F(x) >= q, rank clamped to [1, count].
    let numerator = numerator.min(denominator);
    let rank = (count
        .saturating_mul(numerator)
        .saturating_add(denominator.saturating_sub(1))
        / denominator)
        .clamp(1, count);

    let mut cumulative = 0u64;
    for (idx, c) in buckets.iter().copied().enumerate() {
        cumulative = cumulative.saturating_add(c);
        if cumulative >= rank {
            return bucket_upper_bound(idx).min(observed_max);
        }
    }
    observed_max
}

// ---------------------------------------------------------------------------
// Store metrics surface
// ---------------------------------------------------------------------------

/// Self-observability counters for one statistics store.
///
/// Owned by the store context; there is no process-global instance.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    pub samples_recorded_total: Counter,
    /// Samples lost because eviction could not make room.
    pub samples_dropped_total: Counter,
    /// Samples ignored because collection (or their phase) is disabled.
    pub samples_ignored_total: Counter,
    pub entries_created_total: Counter,
    pub entries_live: GaugeI64,
    pub entries_peak: GaugeU64,
    pub eviction_passes_total: Counter,
    pub entries_evicted_total: Counter,
    pub eviction_scan_us: Log2Histogram,
    pub rotations_total: Counter,
    pub entries_reclaimed_total: Counter,
    pub rotation_us: Log2Histogram,
    pub text_registered_total: Counter,
    pub text_reused_total: Counter,
    pub text_overflow_total: Counter,
    pub arena_bytes_used: GaugeI64,
    pub resets_total: Counter,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreMetricsSnapshot {
    pub samples_recorded_total: u64,
    pub samples_dropped_total: u64,
    pub samples_ignored_total: u64,
    pub entries_created_total: u64,
    pub entries_live: i64,
    pub entries_peak: u64,
    pub eviction_passes_total: u64,
    pub entries_evicted_total: u64,
    pub eviction_scan_us: HistogramSnapshot,
    pub rotations_total: u64,
    pub entries_reclaimed_total: u64,
    pub rotation_us: HistogramSnapshot,
    pub text_registered_total: u64,
    pub text_reused_total: u64,
    pub text_overflow_total: u64,
    pub arena_bytes_used: i64,
    pub resets_total: u64,
}

impl StoreMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new entry and raise the peak if needed.
    #[inline]
    pub fn record_entry_created(&self) {
        self.entries_created_total.inc();
        self.entries_live.add(1);
        self.entries_peak
            .fetch_max(u64::try_from(self.entries_live.load()).unwrap_or(0));
    }

    /// Track entries leaving the table through eviction.
    #[inline]
    pub fn record_evicted(&self, n: u64, scan_us: u64) {
        self.eviction_passes_total.inc();
        self.entries_evicted_total.add(n);
        self.entries_live.add(-i64::try_from(n).unwrap_or(i64::MAX));
        self.eviction_scan_us.record(scan_us);
    }

    /// Track one bucket rotation and the entries it reclaimed.
    #[inline]
    pub fn record_rotation(&self, reclaimed: u64, elapsed_us: u64) {
        self.rotations_total.inc();
        self.entries_reclaimed_total.add(reclaimed);
        self.entries_live
            .add(-i64::try_from(reclaimed).unwrap_or(i64::MAX));
        self.rotation_us.record(elapsed_us);
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            samples_recorded_total: self.samples_recorded_total.load(),
            samples_dropped_total: self.samples_dropped_total.load(),
            samples_ignored_total: self.samples_ignored_total.load(),
            entries_created_total: self.entries_created_total.load(),
            entries_live: self.entries_live.load(),
            entries_peak: self.entries_peak.load(),
            eviction_passes_total: self.eviction_passes_total.load(),
            entries_evicted_total: self.entries_evicted_total.load(),
            eviction_scan_us: self.eviction_scan_us.snapshot(),
            rotations_total: self.rotations_total.load(),
            entries_reclaimed_total: self.entries_reclaimed_total.load(),
            rotation_us: self.rotation_us.snapshot(),
            text_registered_total: self.text_registered_total.load(),
            text_reused_total: self.text_reused_total.load(),
            text_overflow_total: self.text_overflow_total.load(),
            arena_bytes_used: self.arena_bytes_used.load(),
            resets_total: self.resets_total.load(),
        }
    }
}
