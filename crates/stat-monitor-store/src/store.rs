//! The statistics store context.
//!
//! [`StatStore`] ties the entry table, text arena, bucket ring and metrics
//! together. One instance is shared (usually behind an `Arc`) by every
//! thread that reports statements or reads statistics.
//!
//! # Record path
//!
//! 1. Rotate the bucket ring if the current bucket is due.
//! 2. Look the fingerprint up under the structural read lock.
//! 3. On a miss, retake the structural lock for writing, recheck, and insert.
//!    A full table triggers one ranked eviction pass and one retry.
//! 4. Release the structural lock, then fold the sample under the entry's
//!    own lock.
//!
//! The structural lock is never held while counters are folded.

use std::sync::Arc;

use stat_monitor_core::{
    Clock, Config, Limits, LockLevel, OrderedRwLock, StoreMetrics, StoreMetricsSnapshot,
    SystemClock, micros_to_datetime,
};

use crate::arena::{OVERFLOW_PLACEHOLDER, Registered, SLOT_HEADER_LEN, SlotRef, TextArena};
use crate::bounded::truncate_utf8;
use crate::counters::HistogramBounds;
use crate::entry_store::{Entry, EntryStore, EvictScope};
use crate::error::{StoreError, StoreResult};
use crate::key::{FingerprintKey, Phase, SampleKey};
use crate::normalize::{Fingerprinter, QueryFingerprint, normalize_query};
use crate::rotator::{BucketRotator, ControlState, Rotation};
use crate::sample::StatementSample;
use crate::snapshot::{EntryView, Snapshot, SnapshotHeader};

/// What happened to a reported sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Folded into the entry for `bucket`; `created` when the entry is new.
    Recorded { bucket: usize, created: bool },
    /// Not tracked under the current configuration.
    Disabled,
    /// The table stayed full after an eviction pass.
    Dropped,
}

/// Where a registered text ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextHandle {
    Stored(SlotRef),
    /// The bucket's region is full; readers see the overflow placeholder.
    Overflow,
}

impl TextHandle {
    #[must_use]
    pub const fn slot(&self) -> Option<SlotRef> {
        match self {
            Self::Stored(slot) => Some(*slot),
            Self::Overflow => None,
        }
    }
}

/// Target of [`StatStore::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    All,
    Bucket(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetReport {
    pub entries_removed: usize,
    pub text_bytes_released: usize,
}

#[derive(Debug)]
pub struct StatStore {
    config: Config,
    limits: Limits,
    bounds: HistogramBounds,
    clock: Arc<dyn Clock>,
    rotator: BucketRotator,
    control: ControlState,
    table: OrderedRwLock<EntryStore>,
    arena: TextArena,
    metrics: StoreMetrics,
}

impl StatStore {
    /// Build a store sized from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when a parameter is out of range.
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        config.validate()?;
        let limits = Limits::derive(&config, std::mem::size_of::<Entry>());
        let now = clock.now_micros();

        tracing::info!(
            max_entries = limits.max_entries,
            max_memory_bytes = limits.max_memory_bytes,
            bucket_count = limits.bucket_count,
            bucket_time_secs = config.bucket_time_secs,
            text_bytes_per_bucket = limits.text_bytes_per_bucket,
            "statistics store initialized"
        );

        Ok(Self {
            bounds: HistogramBounds::from_config(&config),
            rotator: BucketRotator::new(config.bucket_duration()),
            control: ControlState::new(limits.bucket_count, now),
            table: OrderedRwLock::new(
                LockLevel::StoreStructural,
                EntryStore::new(limits.max_entries, limits.dealloc_percent),
            ),
            arena: TextArena::new(limits.bucket_count, limits.text_bytes_per_bucket),
            metrics: StoreMetrics::new(),
            config,
            limits,
            clock,
        })
    }

    /// Build a store on the system wall clock.
    ///
    /// # Errors
    ///
    /// Same as [`StatStore::new`].
    pub fn with_system_clock(config: Config) -> StoreResult<Self> {
        Self::new(config, Arc::new(SystemClock::new()))
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    #[must_use]
    pub const fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn current_bucket(&self) -> usize {
        self.control.current()
    }

    /// Samples recorded into `bucket` since it was last opened.
    #[must_use]
    pub fn bucket_sample_count(&self, bucket: usize) -> u64 {
        self.control.bucket_samples(bucket)
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.table.read().len()
    }

    /// `(from_ms, to_ms)` of each response-time histogram slot.
    #[must_use]
    pub fn response_time_ranges(&self) -> Vec<(f64, f64)> {
        self.bounds.ranges()
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Fold one statement report into its entry.
    pub fn record_statement(&self, sample: &StatementSample) -> RecordOutcome {
        if !self.is_tracked(sample) {
            self.metrics.samples_ignored_total.inc();
            return RecordOutcome::Disabled;
        }

        self.maybe_rotate(self.clock.now_micros());

        let Some((entry, bucket, created)) = self.resolve_entry(sample.key) else {
            self.metrics.samples_dropped_total.inc();
            tracing::warn!(
                query_id = sample.key.query_id,
                max_entries = self.limits.max_entries,
                "entry table full after eviction; sample dropped"
            );
            return RecordOutcome::Dropped;
        };

        entry.update(sample, &self.bounds);
        self.control.note_sample(bucket);
        self.metrics.samples_recorded_total.inc();
        RecordOutcome::Recorded { bucket, created }
    }

    fn is_tracked(&self, sample: &StatementSample) -> bool {
        self.config.enabled
            && (self.config.track_planning || sample.phase != Phase::Plan)
            && (self.config.track_utility || !sample.is_utility)
    }

    /// Entry for `key` in the current bucket, created if needed.
    fn resolve_entry(&self, key: SampleKey) -> Option<(Arc<Entry>, usize, bool)> {
        {
            let table = self.table.read();
            let bucket = self.control.current();
            if let Some(entry) = table.get(&key.in_bucket(bucket)) {
                return Some((entry, bucket, false));
            }
        }

        let mut table = self.table.write();
        // Rotation may have moved the ring between the two acquisitions.
        let bucket = self.control.current();
        let fk = key.in_bucket(bucket);
        if let Some((entry, created)) = table.find_or_create(fk, &self.metrics) {
            return Some((entry, bucket, created));
        }
        table.evict_batch(EvictScope::Ranked, &self.metrics);
        table
            .find_or_create(fk, &self.metrics)
            .map(|(entry, created)| (entry, bucket, created))
    }

    // -----------------------------------------------------------------------
    // Query text
    // -----------------------------------------------------------------------

    /// Store `text` for `query_id` in the current bucket unless already there.
    ///
    /// Text longer than `query_max_len` bytes is truncated first.
    pub fn get_or_register_text(&self, query_id: u64, text: &str) -> TextHandle {
        self.maybe_rotate(self.clock.now_micros());

        let text = truncate_utf8(text, self.limits.query_max_len);
        let _table = self.table.read();
        let bucket = self.control.current();
        match self.arena.register(bucket, query_id, text) {
            Ok(Registered::New(slot)) => {
                self.metrics.text_registered_total.inc();
                self.metrics
                    .arena_bytes_used
                    .add(i64::try_from(slot.len + SLOT_HEADER_LEN).unwrap_or(i64::MAX));
                TextHandle::Stored(slot)
            }
            Ok(Registered::Existing(slot)) => {
                self.metrics.text_reused_total.inc();
                TextHandle::Stored(slot)
            }
            Err(overflow) => {
                self.metrics.text_overflow_total.inc();
                tracing::trace!(
                    bucket = overflow.bucket,
                    query_id,
                    needed = overflow.needed,
                    available = overflow.available,
                    "query text does not fit bucket arena"
                );
                TextHandle::Overflow
            }
        }
    }

    /// Register the text of an already fingerprinted statement.
    ///
    /// Literals are replaced with placeholders when `normalized_query` is on.
    pub fn register_query(&self, raw: &str, fingerprint: &QueryFingerprint) -> TextHandle {
        if self.config.normalized_query {
            let normalized = normalize_query(raw, fingerprint);
            self.get_or_register_text(fingerprint.query_id, &normalized)
        } else {
            self.get_or_register_text(fingerprint.query_id, raw)
        }
    }

    /// Fingerprint `raw` and register its text. Returns the query id.
    pub fn register_with(
        &self,
        raw: &str,
        fingerprinter: &dyn Fingerprinter,
    ) -> (u64, TextHandle) {
        let fingerprint = fingerprinter.fingerprint(raw);
        let handle = self.register_query(raw, &fingerprint);
        (fingerprint.query_id, handle)
    }

    /// Text stored at `handle`, or the overflow placeholder.
    #[must_use]
    pub fn resolve_text(&self, handle: TextHandle) -> String {
        handle
            .slot()
            .and_then(|slot| self.arena.read(slot))
            .unwrap_or_else(|| OVERFLOW_PLACEHOLDER.to_string())
    }

    // -----------------------------------------------------------------------
    // Rotation
    // -----------------------------------------------------------------------

    /// Rotate if the current bucket is due. Returns the step taken, if any.
    pub fn tick(&self) -> Option<Rotation> {
        self.maybe_rotate(self.clock.now_micros())
    }

    /// Rotate to the next bucket regardless of elapsed time.
    ///
    /// # Errors
    ///
    /// [`StoreError::ArenaBusy`] if the target region still has writers.
    pub fn rotate_now(&self) -> StoreResult<Rotation> {
        let now = self.clock.now_micros();
        let mut table = self.table.write();
        self.rotate_locked(&mut table, now)
    }

    fn maybe_rotate(&self, now: i64) -> Option<Rotation> {
        if !self.rotator.is_due(&self.control, now) {
            return None;
        }
        let mut table = self.table.write();
        // Another caller may have rotated while we waited.
        if !self.rotator.is_due(&self.control, now) {
            return None;
        }
        self.rotate_locked(&mut table, now).ok()
    }

    fn rotate_locked(&self, table: &mut EntryStore, now: i64) -> StoreResult<Rotation> {
        let rotation = self
            .rotator
            .rotate(&self.control, table, &self.arena, &self.metrics, now)?;
        self.metrics
            .arena_bytes_used
            .add(-i64::try_from(rotation.text_bytes_released).unwrap_or(i64::MAX));
        Ok(rotation)
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// Copy of one entry, if present.
    #[must_use]
    pub fn get(&self, key: &FingerprintKey) -> Option<EntryView> {
        let table = self.table.read();
        let entry = table.get(key)?;
        let text = self.arena.text(key.bucket_id, key.query_id);
        let start = self.control.bucket_start(key.bucket_id).map(micros_to_datetime);
        let counters = entry.counters();
        drop(table);
        Some(EntryView::build(
            key,
            &counters,
            start,
            text,
            OVERFLOW_PLACEHOLDER,
        ))
    }

    /// Copy every entry under the structural read lock.
    ///
    /// The returned [`Snapshot`] holds no lock and can be iterated as often
    /// as needed. Entries are ordered by key.
    #[must_use]
    pub fn snapshot_iterate(&self) -> Snapshot {
        let table = self.table.read();
        let bucket_starts: Vec<_> = (0..self.control.bucket_count())
            .map(|b| self.control.bucket_start(b).map(micros_to_datetime))
            .collect();
        let header = SnapshotHeader::new(
            micros_to_datetime(self.clock.now_micros()),
            self.control.current(),
            bucket_starts.clone(),
            table.cur_median_usage(),
            &self.bounds,
        );

        let mut entries: Vec<EntryView> = table
            .handles()
            .iter()
            .map(|entry| {
                let key = entry.key();
                let text = self.arena.text(key.bucket_id, key.query_id);
                let counters = entry.counters();
                EntryView::build(
                    key,
                    &counters,
                    bucket_starts.get(key.bucket_id).copied().flatten(),
                    text,
                    OVERFLOW_PLACEHOLDER,
                )
            })
            .collect();
        drop(table);

        entries.sort_by_key(EntryView::key);
        Snapshot { header, entries }
    }

    // -----------------------------------------------------------------------
    // Reset / shutdown
    // -----------------------------------------------------------------------

    /// Clear statistics.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownBucket`] for a bucket outside the ring;
    /// [`StoreError::ArenaBusy`] if a text region still has writers.
    pub fn reset(&self, scope: ResetScope) -> StoreResult<ResetReport> {
        let mut table = self.table.write();
        let report = match scope {
            ResetScope::All => {
                let text_bytes_released = self.arena.reset_all()?;
                let entries_removed = table.reset_all();
                self.control.reset(self.clock.now_micros());
                self.metrics.entries_live.set(0);
                self.metrics.arena_bytes_used.set(0);
                ResetReport {
                    entries_removed,
                    text_bytes_released,
                }
            }
            ResetScope::Bucket(bucket) => {
                let bucket_count = self.control.bucket_count();
                if bucket >= bucket_count {
                    return Err(StoreError::UnknownBucket {
                        bucket,
                        bucket_count,
                    });
                }
                let text_bytes_released = self.arena.reset(bucket)?;
                let entries_removed = table.evict_batch(EvictScope::Bucket(bucket), &self.metrics);
                self.control.clear_bucket(bucket);
                self.metrics
                    .entries_live
                    .add(-i64::try_from(entries_removed).unwrap_or(i64::MAX));
                self.metrics
                    .arena_bytes_used
                    .add(-i64::try_from(text_bytes_released).unwrap_or(i64::MAX));
                ResetReport {
                    entries_removed,
                    text_bytes_released,
                }
            }
        };
        drop(table);

        self.metrics.resets_total.inc();
        tracing::info!(
            ?scope,
            entries_removed = report.entries_removed,
            text_bytes_released = report.text_bytes_released,
            "statistics reset"
        );
        Ok(report)
    }

    /// Tear the store down and return its final metrics.
    #[must_use]
    pub fn shutdown(self) -> StoreMetricsSnapshot {
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            samples_recorded = snapshot.samples_recorded_total,
            samples_dropped = snapshot.samples_dropped_total,
            entries_live = snapshot.entries_live,
            rotations = snapshot.rotations_total,
            "statistics store shut down"
        );
        snapshot
    }
}
