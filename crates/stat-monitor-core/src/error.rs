//! Error types for the statistics monitor.
//!
//! Nothing in the store is fatal to the host process: capacity pressure and
//! text overflow are resolved locally and surfaced as outcomes and metrics.
//! The variants here cover the configuration boundary and JSON export.

use thiserror::Error;

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the statistics monitor
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    #[error("Configuration value {name}={value} outside of [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Invalid configuration value for {name}: {message}")]
    InvalidValue { name: &'static str, message: String },

    // ==========================================================================
    // Runtime Errors
    // ==========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid-value error
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            name,
            message: message.into(),
        }
    }

    /// Returns the error type string (for JSON responses)
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::OutOfRange { .. } | Self::InvalidValue { .. } => "INVALID_CONFIGURATION",
            Self::Serialization(_) => "TYPE_ERROR",
        }
    }

    /// Returns whether the error is recoverable (can be retried).
    ///
    /// Configuration errors need a corrected value and are never retryable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping_exhaustive() {
        let cases: Vec<(Error, &str)> = vec![
            (
                Error::OutOfRange {
                    name: "max_buckets",
                    value: 11,
                    min: 1,
                    max: 10,
                },
                "INVALID_CONFIGURATION",
            ),
            (Error::invalid("max_buckets", "x"), "INVALID_CONFIGURATION"),
        ];

        for (err, expected) in &cases {
            assert_eq!(
                err.error_code(),
                *expected,
                "Error {err:?} should map to {expected}"
            );
        }
    }

    #[test]
    fn test_recoverable_classification() {
        let parse = serde_json::from_str::<u32>("nope").unwrap_err();
        assert!(Error::Serialization(parse).is_recoverable());
        assert!(!Error::invalid("bucket_time", "negative").is_recoverable());
    }

    #[test]
    fn test_out_of_range_message() {
        let err = Error::OutOfRange {
            name: "max_memory_mb",
            value: 0,
            min: 1,
            max: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Configuration value max_memory_mb=0 outside of [1, 1000]"
        );
    }

    #[test]
    fn test_serialization_from() {
        let parse = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: Error = parse.into();
        assert_eq!(err.error_code(), "TYPE_ERROR");
    }
}
