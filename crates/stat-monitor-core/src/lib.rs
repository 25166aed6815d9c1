//! Core types for the query statistics monitor
//!
//! This crate provides:
//! - Configuration management (`Config`, environment parsing, derived `Limits`)
//! - The lock hierarchy shared by the store's structural, arena, and entry locks
//! - Lock-free metrics primitives and the store metrics surface
//! - The `Clock` abstraction used for bucket rotation
//! - Common error types

#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod error;
pub mod lock_order;
pub mod metrics;

// Re-export key types for convenience
pub use clock::{Clock, ManualClock, SystemClock, duration_to_micros, micros_to_datetime};
pub use config::{Config, ConfigParam, Limits, MAX_BUCKETS, MAX_RESPONSE_BUCKET};
pub use error::{Error as MonitorError, Result as MonitorResult};
pub use lock_order::{LockLevel, OrderedMutex, OrderedRwLock};
pub use metrics::{
    Counter, GaugeI64, GaugeU64, HistogramSnapshot, Log2Histogram, StoreMetrics,
    StoreMetricsSnapshot,
};
