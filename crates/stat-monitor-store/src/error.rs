//! Store-level error types.

use stat_monitor_core::MonitorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Config(#[from] MonitorError),

    #[error("bucket {bucket} does not exist (bucket count {bucket_count})")]
    UnknownBucket { bucket: usize, bucket_count: usize },

    #[error("text arena busy: {writers} writer(s) in flight")]
    ArenaBusy { writers: i64 },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::UnknownBucket { .. } => "NOT_FOUND",
            Self::ArenaBusy { .. } => "RESOURCE_BUSY",
        }
    }

    /// Whether retrying the same call later can succeed.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ArenaBusy { .. })
    }
}
