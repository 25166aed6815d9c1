//! Per-bucket text arena.
//!
//! Each bucket owns a byte region of fixed capacity. Statement texts are
//! appended with a 16-byte header (query id, length) and addressed by
//! [`SlotRef`]. A text is stored once per `(bucket, query_id)`; later
//! registrations return the existing slot.
//!
//! # Reset protocol
//!
//! Appends run under the store's structural read lock and inside a
//! [`WriterGuard`] bracket. Bucket resets run under the structural write
//! lock, so a reset normally observes zero writers. If it does not, the reset
//! is refused with [`StoreError::ArenaBusy`] instead of rewinding a region
//! someone is writing into.
//!
//! A reset rewinds the region and bumps its generation. Slots handed out
//! before the reset stop resolving.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::Serialize;
use stat_monitor_core::{LockLevel, OrderedMutex};

use crate::error::{StoreError, StoreResult};

/// Bytes reserved in front of every stored text.
pub const SLOT_HEADER_LEN: usize = 2 * std::mem::size_of::<u64>();

/// Shown in place of a text that did not fit its bucket's region.
pub const OVERFLOW_PLACEHOLDER: &str = "<insufficient shared space>";

/// Address of one stored text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotRef {
    pub bucket: usize,
    pub offset: usize,
    pub len: usize,
    generation: u64,
}

/// A text did not fit the remaining space of its bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextOverflow {
    pub bucket: usize,
    pub needed: usize,
    pub available: usize,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    New(SlotRef),
    Existing(SlotRef),
}

impl Registered {
    #[must_use]
    pub const fn slot(&self) -> SlotRef {
        match self {
            Self::New(s) | Self::Existing(s) => *s,
        }
    }

    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

#[derive(Debug, Default)]
struct Region {
    buf: Vec<u8>,
    generation: u64,
    slots: HashMap<u64, SlotRef>,
}

impl Region {
    fn rewind(&mut self) -> usize {
        let released = self.buf.len();
        self.buf.clear();
        self.slots.clear();
        self.generation = self.generation.wrapping_add(1);
        released
    }
}

/// RAII bracket around an arena write. Decrements the writer count on drop.
#[derive(Debug)]
pub struct WriterGuard<'a> {
    writers: &'a AtomicI64,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.writers.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct TextArena {
    regions: OrderedMutex<Vec<Region>>,
    capacity: usize,
    writers: AtomicI64,
}

impl TextArena {
    #[must_use]
    pub fn new(bucket_count: usize, capacity_per_bucket: usize) -> Self {
        let regions = (0..bucket_count).map(|_| Region::default()).collect();
        Self {
            regions: OrderedMutex::new(LockLevel::StoreTextArena, regions),
            capacity: capacity_per_bucket,
            writers: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub const fn capacity_per_bucket(&self) -> usize {
        self.capacity
    }

    /// Enter a writer bracket.
    pub fn enter_writer(&self) -> WriterGuard<'_> {
        self.writers.fetch_add(1, Ordering::AcqRel);
        WriterGuard {
            writers: &self.writers,
        }
    }

    /// Writers currently inside a bracket.
    #[must_use]
    pub fn writers(&self) -> i64 {
        self.writers.load(Ordering::Acquire)
    }

    /// Slot already holding `query_id`'s text in `bucket`, if any.
    #[must_use]
    pub fn lookup(&self, bucket: usize, query_id: u64) -> Option<SlotRef> {
        let regions = self.regions.lock();
        regions.get(bucket)?.slots.get(&query_id).copied()
    }

    /// Store `text` for `query_id` in `bucket` unless already present.
    ///
    /// Fails with [`TextOverflow`] when `used + len + header > capacity`.
    pub fn register(
        &self,
        bucket: usize,
        query_id: u64,
        text: &str,
    ) -> Result<Registered, TextOverflow> {
        let _writer = self.enter_writer();
        let mut regions = self.regions.lock();
        let Some(region) = regions.get_mut(bucket) else {
            return Err(TextOverflow {
                bucket,
                needed: text.len() + SLOT_HEADER_LEN,
                available: 0,
            });
        };
        if let Some(existing) = region.slots.get(&query_id) {
            return Ok(Registered::Existing(*existing));
        }

        let used = region.buf.len();
        let needed = text.len() + SLOT_HEADER_LEN;
        if used + needed > self.capacity {
            return Err(TextOverflow {
                bucket,
                needed,
                available: self.capacity.saturating_sub(used),
            });
        }

        region.buf.extend_from_slice(&query_id.to_le_bytes());
        region.buf.extend_from_slice(&(text.len() as u64).to_le_bytes());
        let slot = SlotRef {
            bucket,
            offset: region.buf.len(),
            len: text.len(),
            generation: region.generation,
        };
        region.buf.extend_from_slice(text.as_bytes());
        region.slots.insert(query_id, slot);
        Ok(Registered::New(slot))
    }

    /// Text stored at `slot`, or `None` if the slot predates a reset.
    #[must_use]
    pub fn read(&self, slot: SlotRef) -> Option<String> {
        let regions = self.regions.lock();
        let region = regions.get(slot.bucket)?;
        if region.generation != slot.generation {
            return None;
        }
        let bytes = region.buf.get(slot.offset..slot.offset + slot.len)?;
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }

    /// Text registered for `query_id` in `bucket`, read under one lock.
    #[must_use]
    pub fn text(&self, bucket: usize, query_id: u64) -> Option<String> {
        let regions = self.regions.lock();
        let region = regions.get(bucket)?;
        let slot = region.slots.get(&query_id)?;
        let bytes = region.buf.get(slot.offset..slot.offset + slot.len)?;
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }

    /// Rewind `bucket`'s region and forget its slots.
    ///
    /// Returns the number of bytes released.
    pub fn reset(&self, bucket: usize) -> StoreResult<usize> {
        self.ensure_idle(Some(bucket))?;
        let mut regions = self.regions.lock();
        let bucket_count = regions.len();
        let region = regions
            .get_mut(bucket)
            .ok_or(StoreError::UnknownBucket {
                bucket,
                bucket_count,
            })?;
        Ok(region.rewind())
    }

    /// Rewind every region at once.
    ///
    /// Either all regions are rewound or, with writers in flight, none.
    pub fn reset_all(&self) -> StoreResult<usize> {
        self.ensure_idle(None)?;
        let mut regions = self.regions.lock();
        Ok(regions.iter_mut().map(Region::rewind).sum())
    }

    fn ensure_idle(&self, bucket: Option<usize>) -> StoreResult<()> {
        let writers = self.writers();
        if writers > 0 {
            tracing::warn!(?bucket, writers, "text arena reset refused: writers in flight");
            return Err(StoreError::ArenaBusy { writers });
        }
        Ok(())
    }

    /// Bytes used in `bucket`, headers included.
    #[must_use]
    pub fn used(&self, bucket: usize) -> usize {
        self.regions.lock().get(bucket).map_or(0, |r| r.buf.len())
    }

    /// Bytes used across every bucket.
    #[must_use]
    pub fn total_used(&self) -> usize {
        self.regions.lock().iter().map(|r| r.buf.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_then_overflows() {
        let arena = TextArena::new(2, 1000);
        let big = "a".repeat(900);
        let first = arena.register(0, 1, &big).unwrap();
        assert!(first.is_new());
        assert_eq!(arena.used(0), 900 + SLOT_HEADER_LEN);

        let overflow = arena.register(0, 2, &"b".repeat(200)).unwrap_err();
        assert_eq!(overflow.bucket, 0);
        assert_eq!(overflow.needed, 200 + SLOT_HEADER_LEN);
        assert_eq!(overflow.available, 1000 - 916);

        assert_eq!(arena.read(first.slot()).as_deref(), Some(big.as_str()));
        assert_eq!(arena.text(0, 1).as_deref(), Some(big.as_str()));
        assert!(arena.lookup(0, 2).is_none());
        assert!(arena.text(0, 2).is_none());
    }

    #[test]
    fn exact_fit_is_accepted() {
        let arena = TextArena::new(1, 100);
        let text = "x".repeat(100 - SLOT_HEADER_LEN);
        assert!(arena.register(0, 1, &text).is_ok());
        assert!(arena.register(0, 2, "").is_err());
    }

    #[test]
    fn registration_dedups_per_bucket() {
        let arena = TextArena::new(2, 1000);
        let a = arena.register(0, 7, "select 1").unwrap();
        let b = arena.register(0, 7, "select 1").unwrap();
        assert!(a.is_new());
        assert_eq!(b, Registered::Existing(a.slot()));
        assert_eq!(arena.used(0), 8 + SLOT_HEADER_LEN);

        // Another bucket stores its own copy.
        let c = arena.register(1, 7, "select 1").unwrap();
        assert!(c.is_new());
        assert_eq!(c.slot().bucket, 1);
    }

    #[test]
    fn reset_invalidates_slots_and_frees_space() {
        let arena = TextArena::new(1, 64);
        let slot = arena.register(0, 1, "old text").unwrap().slot();
        assert_eq!(arena.reset(0).unwrap(), 8 + SLOT_HEADER_LEN);
        assert_eq!(arena.used(0), 0);
        assert!(arena.read(slot).is_none());
        assert!(arena.lookup(0, 1).is_none());

        let fresh = arena.register(0, 1, "new text").unwrap();
        assert!(fresh.is_new());
        assert_eq!(arena.read(fresh.slot()).as_deref(), Some("new text"));
    }

    #[test]
    fn reset_refused_while_writer_in_flight() {
        let arena = TextArena::new(1, 64);
        arena.register(0, 1, "q").unwrap();
        {
            let _w = arena.enter_writer();
            assert_eq!(arena.writers(), 1);
            assert!(matches!(arena.reset(0), Err(StoreError::ArenaBusy { writers: 1 })));
        }
        assert_eq!(arena.writers(), 0);
        assert!(arena.reset(0).is_ok());
    }

    #[test]
    fn reset_all_is_all_or_nothing() {
        let arena = TextArena::new(3, 100);
        let a = arena.register(0, 1, "ab").unwrap().slot();
        arena.register(2, 1, "abcd").unwrap();
        {
            let _w = arena.enter_writer();
            assert!(matches!(arena.reset_all(), Err(StoreError::ArenaBusy { writers: 1 })));
            assert_eq!(arena.total_used(), 6 + 2 * SLOT_HEADER_LEN);
            assert_eq!(arena.read(a).as_deref(), Some("ab"));
        }
        assert_eq!(arena.reset_all().unwrap(), 6 + 2 * SLOT_HEADER_LEN);
        assert_eq!(arena.total_used(), 0);
        assert!(arena.read(a).is_none());
    }

    #[test]
    fn unknown_bucket_is_reported() {
        let arena = TextArena::new(2, 64);
        assert!(matches!(
            arena.reset(5),
            Err(StoreError::UnknownBucket {
                bucket: 5,
                bucket_count: 2
            })
        ));
        assert!(arena.register(5, 1, "q").is_err());
        assert!(arena.lookup(5, 1).is_none());
    }

    #[test]
    fn total_used_sums_regions() {
        let arena = TextArena::new(3, 100);
        arena.register(0, 1, "ab").unwrap();
        arena.register(2, 1, "abcd").unwrap();
        assert_eq!(arena.total_used(), 6 + 2 * SLOT_HEADER_LEN);
    }
}
