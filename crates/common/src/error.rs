/*
 * Error types for the table copy.
 *
 * Errors are categorized by:
 * - Phase: where the error originated (configuration, planning, delegation)
 * - Retryability: whether the write path may retry the operation
 * - Recoverability: whether the orchestrator continues after a warning
 */

use std::fmt;
use thiserror::Error;

/// Which side of the copy a configuration problem belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableRole {
    Source,
    Destination,
}

impl fmt::Display for TableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRole::Source => f.write_str("source"),
            TableRole::Destination => f.write_str("destination"),
        }
    }
}

/// Process exit statuses reported at the binary boundary.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const INVALID_PARAMETER: i32 = 2;
    pub const SECTION_OUT_OF_RANGE: i32 = 3;
    pub const MISSING_DESTINATION_PROFILE: i32 = 98;
    pub const MISSING_SOURCE_PROFILE: i32 = 99;
}

#[derive(Error, Debug, Clone)]
pub enum CopyError {
    #[error("Configuration error ({side}): {message}")]
    Configuration { side: TableRole, message: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing capacity: table '{table}' has no provisioned {what} capacity")]
    MissingCapacity { table: String, what: &'static str },

    #[error(
        "Section out of range: section {index} of {total_sections} cannot be served by {total_segments} segments"
    )]
    SectionOutOfRange {
        index: i64,
        total_sections: i64,
        total_segments: u32,
    },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl CopyError {
    /// Returns true if this error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CopyError::Throttled(_) | CopyError::Communication(_))
    }

    /// Returns true if the job continues after logging this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CopyError::MissingCapacity { .. })
    }

    /// Maps this error to the exit status reported by the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            CopyError::Configuration {
                side: TableRole::Source,
                ..
            } => exit_codes::MISSING_SOURCE_PROFILE,
            CopyError::Configuration {
                side: TableRole::Destination,
                ..
            } => exit_codes::MISSING_DESTINATION_PROFILE,
            CopyError::InvalidParameter(_) => exit_codes::INVALID_PARAMETER,
            CopyError::SectionOutOfRange { .. } => exit_codes::SECTION_OUT_OF_RANGE,
            _ => exit_codes::FAILURE,
        }
    }

    /// Wraps this error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match self {
            CopyError::Metadata(msg) => CopyError::Metadata(format!("{}: {}", ctx, msg)),
            CopyError::Throttled(msg) => CopyError::Throttled(format!("{}: {}", ctx, msg)),
            CopyError::Communication(msg) => {
                CopyError::Communication(format!("{}: {}", ctx, msg))
            }
            CopyError::Execution(msg) => CopyError::Execution(format!("{}: {}", ctx, msg)),
            CopyError::Interrupted(msg) => CopyError::Interrupted(format!("{}: {}", ctx, msg)),
            CopyError::InvalidParameter(msg) => {
                CopyError::InvalidParameter(format!("{}: {}", ctx, msg))
            }
            CopyError::Unexpected(msg) => CopyError::Unexpected(format!("{}: {}", ctx, msg)),
            CopyError::Configuration { side, message } => CopyError::Configuration {
                side,
                message: format!("{}: {}", ctx, message),
            },
            // Structured variants keep their shape so callers can still branch on them.
            e @ (CopyError::MissingCapacity { .. } | CopyError::SectionOutOfRange { .. }) => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, CopyError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Adds context lazily (only evaluated on error).
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_distinguish_missing_profiles() {
        let source = CopyError::Configuration {
            side: TableRole::Source,
            message: "no profile".into(),
        };
        let destination = CopyError::Configuration {
            side: TableRole::Destination,
            message: "no profile".into(),
        };

        assert_eq!(source.exit_code(), 99);
        assert_eq!(destination.exit_code(), 98);
        assert_eq!(CopyError::Execution("boom".into()).exit_code(), 1);
        assert_eq!(CopyError::Interrupted("signal".into()).exit_code(), 1);
    }

    #[test]
    fn test_only_missing_capacity_is_recoverable() {
        let missing = CopyError::MissingCapacity {
            table: "orders".into(),
            what: "read",
        };
        assert!(missing.is_recoverable());
        assert!(!CopyError::Metadata("gone".into()).is_recoverable());
        assert!(!CopyError::SectionOutOfRange {
            index: 3,
            total_sections: 3,
            total_segments: 10
        }
        .is_recoverable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(CopyError::Throttled("slow down".into()).is_retryable());
        assert!(CopyError::Communication("reset".into()).is_retryable());
        assert!(!CopyError::Execution("bad item".into()).is_retryable());
        assert!(!CopyError::Interrupted("signal".into()).is_retryable());
    }

    #[test]
    fn test_context_keeps_structured_variants() {
        let err: Result<()> = Err(CopyError::SectionOutOfRange {
            index: 4,
            total_sections: 2,
            total_segments: 10,
        });
        let err = err.context("orders").unwrap_err();
        assert!(matches!(err, CopyError::SectionOutOfRange { index: 4, .. }));

        let err: Result<()> = Err(CopyError::Execution("segment 3 failed".into()));
        let err = err.with_context(|| "orders -> orders_copy").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Execution error: orders -> orders_copy: segment 3 failed"
        );
    }
}
