//! Shared query statistics store.
//!
//! A fixed-capacity table of per-query aggregate counters, partitioned into
//! rotating time buckets and backed by a bounded per-bucket text arena.
//!
//! ```
//! use std::sync::Arc;
//! use stat_monitor_core::{Config, ManualClock};
//! use stat_monitor_store::{Phase, RecordOutcome, SampleKey, StatStore, StatementSample};
//!
//! let store = StatStore::new(Config::default(), Arc::new(ManualClock::new(0))).unwrap();
//! let key = SampleKey::new(0xfeed, 10, 1, 0);
//! store.get_or_register_text(key.query_id, "SELECT $1");
//! let outcome = store.record_statement(&StatementSample::new(key, Phase::Exec, 1.5));
//! assert!(matches!(outcome, RecordOutcome::Recorded { bucket: 0, .. }));
//!
//! let snapshot = store.snapshot_iterate();
//! assert_eq!(snapshot.iter().next().unwrap().query, "SELECT $1");
//! ```

#![forbid(unsafe_code)]

pub mod arena;
pub mod bounded;
pub mod counters;
pub mod entry_store;
pub mod error;
pub mod key;
pub mod normalize;
pub mod rotator;
pub mod sample;
pub mod snapshot;
pub mod store;

pub use arena::{OVERFLOW_PLACEHOLDER, SlotRef, TextArena, TextOverflow};
pub use bounded::{BoundedString, truncate_utf8};
pub use counters::{Counters, HistogramBounds, USAGE_EXEC, USAGE_INIT_WEIGHT};
pub use entry_store::{Entry, EntryStore, EvictScope};
pub use error::{StoreError, StoreResult};
pub use key::{FingerprintKey, Phase, SampleKey};
pub use normalize::{Fingerprinter, LiteralSpan, QueryFingerprint, normalize_query};
pub use rotator::{BucketRotator, ControlState, Rotation};
pub use sample::{BlockUsage, CpuUsage, ErrorReport, QueryMetadata, StatementSample};
pub use snapshot::{EntryView, PhaseStats, Snapshot, SnapshotHeader};
pub use store::{RecordOutcome, ResetReport, ResetScope, StatStore, TextHandle};
