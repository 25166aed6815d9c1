//! Wall-clock source for bucket-duration comparisons.
//!
//! The store never reads time directly; it asks a [`Clock`]. Timestamps are
//! microseconds since the Unix epoch.
//!
//! # Clock Skew Protection
//!
//! [`SystemClock`] tracks the last observed wall-clock value. On a backward
//! jump (>1 s), it returns the high-water mark so bucket start times never
//! regress and an elapsed-time comparison can never go negative. Forward
//! jumps (>5 min) are counted and logged.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

const MICROS_PER_SECOND: i64 = 1_000_000;
const BACKWARD_JUMP_THRESHOLD_US: i64 = 1_000_000;
const FORWARD_JUMP_THRESHOLD_US: i64 = 300_000_000;

/// Time source consumed by the store.
pub trait Clock: Send + Sync + Debug {
    /// Current time in microseconds since the Unix epoch.
    fn now_micros(&self) -> i64;
}

/// Real wall clock with backward-jump protection.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_us: AtomicI64,
    backward_jumps: AtomicU64,
    forward_jumps: AtomicU64,
}

impl SystemClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_us: AtomicI64::new(0),
            backward_jumps: AtomicU64::new(0),
            forward_jumps: AtomicU64::new(0),
        }
    }

    /// Number of (backward, forward) jumps observed so far.
    #[must_use]
    pub fn skew_counts(&self) -> (u64, u64) {
        (
            self.backward_jumps.load(Ordering::Relaxed),
            self.forward_jumps.load(Ordering::Relaxed),
        )
    }

    fn observe(&self, current: i64) -> i64 {
        let last = self.last_us.load(Ordering::Relaxed);
        if last != 0 {
            let delta = current - last;
            if delta < -BACKWARD_JUMP_THRESHOLD_US {
                self.backward_jumps.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(delta_us = delta, "wall clock jumped backward; holding high-water mark");
                return last;
            }
            if delta > FORWARD_JUMP_THRESHOLD_US {
                self.forward_jumps.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(delta_us = delta, "wall clock jumped forward");
            }
        }
        self.last_us.fetch_max(current, Ordering::Relaxed);
        current.max(last)
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        self.observe(Utc::now().timestamp_micros())
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub const fn new(start_us: i64) -> Self {
        Self {
            now_us: AtomicI64::new(start_us),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now_us
            .fetch_add(duration_to_micros(by), Ordering::SeqCst);
    }

    pub fn set(&self, micros: i64) {
        self.now_us.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Convert a duration to whole microseconds, saturating at `i64::MAX`.
#[inline]
#[must_use]
pub fn duration_to_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

/// Convert microseconds since the Unix epoch to a UTC timestamp.
///
/// Values outside chrono's range clamp to its minimum/maximum instead of
/// panicking.
#[must_use]
pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let nsecs = u32::try_from(micros.rem_euclid(MICROS_PER_SECOND) * 1000).unwrap_or(0);
    Utc.timestamp_opt(secs, nsecs).single().unwrap_or(if micros < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
