//! Bounded table of aggregate entries.
//!
//! The table itself lives behind the store's structural lock; every method
//! here that takes `&mut self` assumes the caller holds it for writing. Each
//! [`Entry`] carries its own counters lock so concurrent updates to different
//! entries never contend.
//!
//! # Eviction
//!
//! When the table is full, [`EntryStore::evict_batch`] with
//! [`EvictScope::Ranked`] decays every entry's usage, sorts ascending by
//! `(usage, key)` and removes the lowest `max(1, len * dealloc_percent / 100)`.
//! Entries that never executed ("sticky", holding only planning samples)
//! decay much faster.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use stat_monitor_core::{LockLevel, OrderedMutex, StoreMetrics};

use crate::counters::{Counters, HistogramBounds, USAGE_INIT_WEIGHT};
use crate::key::FingerprintKey;
use crate::sample::StatementSample;

/// Usage multiplier applied to every entry per eviction pass.
pub const USAGE_DECREASE_FACTOR: f64 = 0.99;
/// Usage multiplier for entries that never executed.
pub const STICKY_DECREASE_FACTOR: f64 = 0.50;
/// Median usage assumed before the first eviction pass.
pub const ASSUMED_MEDIAN_INIT: f64 = USAGE_INIT_WEIGHT;

/// One aggregate row.
#[derive(Debug)]
pub struct Entry {
    key: FingerprintKey,
    counters: OrderedMutex<Counters>,
}

impl Entry {
    #[must_use]
    pub fn new(key: FingerprintKey) -> Self {
        Self {
            key,
            counters: OrderedMutex::new(LockLevel::StoreEntryCounters, Counters::fresh()),
        }
    }

    #[must_use]
    pub const fn key(&self) -> &FingerprintKey {
        &self.key
    }

    /// Fold `sample` under this entry's lock.
    pub fn update(&self, sample: &StatementSample, bounds: &HistogramBounds) {
        self.counters.lock().fold(sample, bounds);
    }

    /// Consistent copy of the counters.
    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters.lock().clone()
    }
}

/// Which entries an eviction pass removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictScope {
    /// Lowest-usage entries across the whole table.
    Ranked,
    /// Every entry of one bucket.
    Bucket(usize),
}

#[derive(Debug)]
pub struct EntryStore {
    entries: HashMap<FingerprintKey, Arc<Entry>>,
    max_entries: usize,
    dealloc_percent: usize,
    cur_median_usage: f64,
}

impl EntryStore {
    #[must_use]
    pub fn new(max_entries: usize, dealloc_percent: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
            dealloc_percent: dealloc_percent.clamp(1, 100),
            cur_median_usage: ASSUMED_MEDIAN_INIT,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn max_entries(&self) -> usize {
        self.max_entries
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }

    /// Usage of the median entry as of the last ranked eviction.
    #[must_use]
    pub const fn cur_median_usage(&self) -> f64 {
        self.cur_median_usage
    }

    #[must_use]
    pub fn get(&self, key: &FingerprintKey) -> Option<Arc<Entry>> {
        self.entries.get(key).cloned()
    }

    /// Existing entry for `key`, or a new one if there is room.
    ///
    /// Returns `None` when the table is at capacity. The flag is `true` when
    /// the entry was created by this call.
    pub fn find_or_create(
        &mut self,
        key: FingerprintKey,
        metrics: &StoreMetrics,
    ) -> Option<(Arc<Entry>, bool)> {
        if let Some(entry) = self.entries.get(&key) {
            return Some((Arc::clone(entry), false));
        }
        if self.is_full() {
            return None;
        }
        let entry = Arc::new(Entry::new(key));
        self.entries.insert(key, Arc::clone(&entry));
        metrics.record_entry_created();
        Some((entry, true))
    }

    /// Remove entries per `scope`. Returns how many were removed.
    pub fn evict_batch(&mut self, scope: EvictScope, metrics: &StoreMetrics) -> usize {
        match scope {
            EvictScope::Ranked => self.evict_ranked(metrics),
            EvictScope::Bucket(bucket) => {
                let before = self.entries.len();
                self.entries.retain(|k, _| k.bucket_id != bucket);
                before - self.entries.len()
            }
        }
    }

    fn evict_ranked(&mut self, metrics: &StoreMetrics) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        let started = Instant::now();

        let mut ranked: Vec<(f64, FingerprintKey)> = self
            .entries
            .values()
            .map(|entry| {
                let mut counters = entry.counters.lock();
                let factor = if counters.is_sticky() {
                    STICKY_DECREASE_FACTOR
                } else {
                    USAGE_DECREASE_FACTOR
                };
                counters.decay_usage(factor);
                (counters.usage, entry.key)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        self.cur_median_usage = ranked[ranked.len() / 2].0;

        let victims = (ranked.len() * self.dealloc_percent / 100)
            .max(1)
            .min(ranked.len());
        for (_, key) in &ranked[..victims] {
            self.entries.remove(key);
        }

        let scan_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        metrics.record_evicted(u64::try_from(victims).unwrap_or(u64::MAX), scan_us);
        tracing::debug!(
            evicted = victims,
            remaining = self.entries.len(),
            median_usage = self.cur_median_usage,
            scan_us,
            "evicted low-usage entries"
        );
        victims
    }

    /// Drop every entry. Returns how many were removed.
    pub fn reset_all(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.cur_median_usage = ASSUMED_MEDIAN_INIT;
        removed
    }

    /// Shared handles to every entry, for copy-out under the structural lock.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<Entry>> {
        self.entries.values().cloned().collect()
    }
}
