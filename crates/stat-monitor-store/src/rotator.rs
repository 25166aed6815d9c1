//! Time-bucket rotation.
//!
//! Buckets form a ring of `bucket_count` slots. New samples always land in the
//! current bucket. Once the current bucket has been open for the configured
//! duration, the next slot in the ring is reclaimed (its entries evicted, its
//! text region rewound) and becomes current.
//!
//! [`ControlState`] holds the ring position in atomics so the hot path can
//! test for a due rotation without locking. The rotation itself must run
//! with the structural lock held for writing; [`BucketRotator::rotate`]
//! takes the already-locked table to make that explicit.
//!
//! A call advances the ring by exactly one slot, however much time has
//! elapsed. A long idle gap followed by traffic therefore rotates once and
//! the following samples start a fresh window.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use stat_monitor_core::{StoreMetrics, duration_to_micros};

use crate::arena::TextArena;
use crate::entry_store::{EntryStore, EvictScope};
use crate::error::StoreResult;

const UNSET: i64 = i64::MIN;

/// Ring position and per-bucket bookkeeping shared by every caller.
#[derive(Debug)]
pub struct ControlState {
    current: AtomicUsize,
    bucket_start_us: Vec<AtomicI64>,
    bucket_samples: Vec<AtomicU64>,
}

impl ControlState {
    #[must_use]
    pub fn new(bucket_count: usize, now_us: i64) -> Self {
        let bucket_count = bucket_count.max(1);
        let state = Self {
            current: AtomicUsize::new(0),
            bucket_start_us: (0..bucket_count).map(|_| AtomicI64::new(UNSET)).collect(),
            bucket_samples: (0..bucket_count).map(|_| AtomicU64::new(0)).collect(),
        };
        state.bucket_start_us[0].store(now_us, Ordering::Release);
        state
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.bucket_start_us.len()
    }

    /// Bucket receiving new samples.
    #[must_use]
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// When `bucket` was last opened, or `None` if it never was.
    #[must_use]
    pub fn bucket_start(&self, bucket: usize) -> Option<i64> {
        self.bucket_start_us
            .get(bucket)
            .map(|s| s.load(Ordering::Acquire))
            .filter(|&us| us != UNSET)
    }

    /// Samples recorded into `bucket` since it was opened.
    #[must_use]
    pub fn bucket_samples(&self, bucket: usize) -> u64 {
        self.bucket_samples
            .get(bucket)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn note_sample(&self, bucket: usize) {
        if let Some(c) = self.bucket_samples.get(bucket) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Zero the sample count of `bucket`.
    pub fn clear_bucket(&self, bucket: usize) {
        if let Some(c) = self.bucket_samples.get(bucket) {
            c.store(0, Ordering::Relaxed);
        }
    }

    /// Make `bucket` current, opened at `now_us`.
    fn open(&self, bucket: usize, now_us: i64) {
        self.clear_bucket(bucket);
        self.bucket_start_us[bucket].store(now_us, Ordering::Release);
        self.current.store(bucket, Ordering::Release);
    }

    /// Back to the initial state: bucket 0 current and opened at `now_us`.
    pub fn reset(&self, now_us: i64) {
        for (start, samples) in self.bucket_start_us.iter().zip(&self.bucket_samples) {
            start.store(UNSET, Ordering::Release);
            samples.store(0, Ordering::Relaxed);
        }
        self.open(0, now_us);
    }
}

/// What one rotation step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rotation {
    pub from: usize,
    pub to: usize,
    pub entries_reclaimed: usize,
    pub text_bytes_released: usize,
}

/// Decides when to rotate and performs one step.
#[derive(Debug, Clone, Copy)]
pub struct BucketRotator {
    duration_us: Option<i64>,
}

impl BucketRotator {
    /// `None` disables time-based rotation.
    #[must_use]
    pub fn new(duration: Option<Duration>) -> Self {
        Self {
            duration_us: duration.map(duration_to_micros).filter(|&us| us > 0),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.duration_us.is_some()
    }

    /// Whether the current bucket has been open for a full duration.
    #[must_use]
    pub fn is_due(&self, control: &ControlState, now_us: i64) -> bool {
        let Some(duration_us) = self.duration_us else {
            return false;
        };
        control
            .bucket_start(control.current())
            .is_some_and(|start| now_us.saturating_sub(start) >= duration_us)
    }

    /// Advance the ring by one slot.
    ///
    /// `entries` must be the table guarded by a held structural write lock.
    /// On error nothing changes and the current bucket stays open.
    pub fn rotate(
        &self,
        control: &ControlState,
        entries: &mut EntryStore,
        arena: &TextArena,
        metrics: &StoreMetrics,
        now_us: i64,
    ) -> StoreResult<Rotation> {
        let started = Instant::now();
        let from = control.current();
        let to = (from + 1) % control.bucket_count();

        let text_bytes_released = arena.reset(to)?;
        let entries_reclaimed = entries.evict_batch(EvictScope::Bucket(to), metrics);
        control.open(to, now_us);

        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        metrics.record_rotation(
            u64::try_from(entries_reclaimed).unwrap_or(u64::MAX),
            elapsed_us,
        );
        tracing::debug!(
            from,
            to,
            entries_reclaimed,
            text_bytes_released,
            elapsed_us,
            "rotated statistics bucket"
        );
        Ok(Rotation {
            from,
            to,
            entries_reclaimed,
            text_bytes_released,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SampleKey;

    const SEC: i64 = 1_000_000;

    #[test]
    fn fresh_state_opens_bucket_zero() {
        let control = ControlState::new(3, 5 * SEC);
        assert_eq!(control.current(), 0);
        assert_eq!(control.bucket_start(0), Some(5 * SEC));
        assert_eq!(control.bucket_start(1), None);
        assert_eq!(control.bucket_start(9), None);
    }

    #[test]
    fn due_only_after_full_duration() {
        let control = ControlState::new(2, 0);
        let rotator = BucketRotator::new(Some(Duration::from_secs(60)));
        assert!(!rotator.is_due(&control, 59 * SEC));
        assert!(rotator.is_due(&control, 60 * SEC));
    }

    #[test]
    fn zero_duration_never_rotates() {
        let control = ControlState::new(2, 0);
        let rotator = BucketRotator::new(Some(Duration::ZERO));
        assert!(!rotator.is_enabled());
        assert!(!rotator.is_due(&control, i64::MAX));
        assert!(!BucketRotator::new(None).is_due(&control, i64::MAX));
    }

    #[test]
    fn rotate_wraps_and_reclaims_target_bucket() {
        let metrics = StoreMetrics::new();
        let control = ControlState::new(2, 0);
        let arena = TextArena::new(2, 1024);
        let mut entries = EntryStore::new(16, 5);
        let rotator = BucketRotator::new(Some(Duration::from_secs(60)));

        entries
            .find_or_create(SampleKey::new(1, 1, 1, 0).in_bucket(0), &metrics)
            .unwrap();
        arena.register(0, 1, "select 1").unwrap();
        control.note_sample(0);

        let r = rotator
            .rotate(&control, &mut entries, &arena, &metrics, 61 * SEC)
            .unwrap();
        assert_eq!((r.from, r.to, r.entries_reclaimed), (0, 1, 0));
        assert_eq!(control.current(), 1);
        assert_eq!(control.bucket_start(1), Some(61 * SEC));
        assert_eq!(entries.len(), 1);

        let r = rotator
            .rotate(&control, &mut entries, &arena, &metrics, 122 * SEC)
            .unwrap();
        assert_eq!((r.from, r.to, r.entries_reclaimed), (1, 0, 1));
        assert!(r.text_bytes_released > 0);
        assert_eq!(control.bucket_samples(0), 0);
        assert!(entries.is_empty());
        assert_eq!(metrics.rotations_total.load(), 2);
        assert_eq!(metrics.entries_reclaimed_total.load(), 1);
    }

    #[test]
    fn busy_arena_aborts_rotation() {
        let metrics = StoreMetrics::new();
        let control = ControlState::new(2, 0);
        let arena = TextArena::new(2, 1024);
        let mut entries = EntryStore::new(16, 5);
        let rotator = BucketRotator::new(Some(Duration::from_secs(1)));

        let _writer = arena.enter_writer();
        assert!(
            rotator
                .rotate(&control, &mut entries, &arena, &metrics, 2 * SEC)
                .is_err()
        );
        assert_eq!(control.current(), 0);
        assert_eq!(metrics.rotations_total.load(), 0);
    }

    #[test]
    fn reset_reopens_bucket_zero() {
        let control = ControlState::new(3, 0);
        control.open(2, 10 * SEC);
        control.note_sample(2);
        control.reset(20 * SEC);
        assert_eq!(control.current(), 0);
        assert_eq!(control.bucket_start(0), Some(20 * SEC));
        assert_eq!(control.bucket_start(2), None);
        assert_eq!(control.bucket_samples(2), 0);
    }
}
