//! One statement-completion report as handed to the store.

use serde::{Deserialize, Serialize};

use crate::key::{Phase, SampleKey};

/// Shared/local/temp block activity of one statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockUsage {
    pub shared_blks_hit: u64,
    pub shared_blks_read: u64,
    pub shared_blks_dirtied: u64,
    pub shared_blks_written: u64,
    pub local_blks_hit: u64,
    pub local_blks_read: u64,
    pub local_blks_dirtied: u64,
    pub local_blks_written: u64,
    pub temp_blks_read: u64,
    pub temp_blks_written: u64,
    pub blk_read_time_ms: f64,
    pub blk_write_time_ms: f64,
}

/// CPU time consumed by one statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub user_ms: f64,
    pub system_ms: f64,
}

/// Error raised by a statement. Fields are truncated when stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub elevel: u8,
    pub sqlcode: String,
    pub message: String,
}

/// Descriptive metadata about a statement. Fields are truncated when stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub application_name: String,
    pub relations: Vec<u32>,
    pub command_tags: Vec<String>,
}

/// A single statement report.
///
/// Built with [`StatementSample::new`] and the `with_*` helpers:
///
/// ```
/// use stat_monitor_store::{Phase, SampleKey, StatementSample};
///
/// let sample = StatementSample::new(SampleKey::new(7, 10, 1, 0), Phase::Exec, 2.5)
///     .with_rows(3);
/// assert_eq!(sample.rows, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementSample {
    pub key: SampleKey,
    pub phase: Phase,
    pub duration_ms: f64,
    pub rows: u64,
    pub blocks: BlockUsage,
    pub cpu: CpuUsage,
    pub error: Option<ErrorReport>,
    pub metadata: Option<QueryMetadata>,
    pub is_utility: bool,
}

impl StatementSample {
    #[must_use]
    pub fn new(key: SampleKey, phase: Phase, duration_ms: f64) -> Self {
        Self {
            key,
            phase,
            duration_ms,
            rows: 0,
            blocks: BlockUsage::default(),
            cpu: CpuUsage::default(),
            error: None,
            metadata: None,
            is_utility: false,
        }
    }

    #[must_use]
    pub const fn with_rows(mut self, rows: u64) -> Self {
        self.rows = rows;
        self
    }

    #[must_use]
    pub const fn with_blocks(mut self, blocks: BlockUsage) -> Self {
        self.blocks = blocks;
        self
    }

    #[must_use]
    pub const fn with_cpu(mut self, user_ms: f64, system_ms: f64) -> Self {
        self.cpu = CpuUsage { user_ms, system_ms };
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorReport) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: QueryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub const fn utility(mut self) -> Self {
        self.is_utility = true;
        self
    }
}
