//! Striper error types

use crate::store::StoreError;
use derive_more::Display;
use thiserror::Error;

/// Logical operation on a virtual object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum Operation {
    #[display("write")]
    Write,
    #[display("write_full")]
    WriteFull,
    #[display("append")]
    Append,
    #[display("read")]
    Read,
    #[display("truncate")]
    Truncate,
    #[display("delete")]
    Delete,
    #[display("stat")]
    Stat,
}

/// Identifies the logical operation an error belongs to
#[derive(Clone, Debug, PartialEq, Eq, Display)]
#[display("{op} {name} (offset {offset}, length {length})")]
pub struct OpContext {
    /// Operation
    pub op: Operation,
    /// Virtual object name
    pub name: String,
    /// Logical offset (new size for truncate)
    pub offset: u64,
    /// Logical length
    pub length: u64,
}

impl OpContext {
    pub(crate) fn new(op: Operation, name: &str, offset: u64, length: u64) -> Self {
        Self {
            op,
            name: name.to_string(),
            offset,
            length,
        }
    }
}

/// Why a backing call stopped before completing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum CancelReason {
    #[display("cancelled by caller")]
    Cancelled,
    #[display("backing call timed out")]
    TimedOut,
}

/// Striper error
#[derive(Error, Debug)]
pub enum StriperError {
    /// Bad layout, name, or range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Virtual object does not exist
    #[error("{context}: virtual object not found")]
    NotFound { context: OpContext },

    /// A backing call failed before anything was applied
    #[error("{context}: backing object {object} failed: {source}")]
    Store {
        context: OpContext,
        object: String,
        #[source]
        source: StoreError,
    },

    /// Some backing objects were updated before another one failed
    #[error(
        "{context}: backing object {object} failed after {} backing object(s) completed: {source}",
        .completed.len()
    )]
    PartialFailure {
        context: OpContext,
        completed: Vec<String>,
        object: String,
        #[source]
        source: StoreError,
    },

    /// The operation was cancelled or a backing call timed out
    #[error(
        "{context}: {reason} after {} backing object(s) completed",
        .completed.len()
    )]
    Cancelled {
        context: OpContext,
        reason: CancelReason,
        completed: Vec<String>,
    },
}

impl StriperError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if the virtual object was absent
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if the error stems from a rejected argument, either ours or the
    /// backing store's
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::Store {
                    source: StoreError::InvalidArgument(_),
                    ..
                }
        )
    }

    /// Check if the operation was cancelled or timed out
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check if the virtual object may be left partially updated
    #[must_use]
    pub fn is_partial(&self) -> bool {
        match self {
            Self::PartialFailure { .. } => true,
            Self::Cancelled { completed, .. } => !completed.is_empty(),
            _ => false,
        }
    }

    /// Operation the error belongs to
    #[must_use]
    pub const fn context(&self) -> Option<&OpContext> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::NotFound { context }
            | Self::Store { context, .. }
            | Self::PartialFailure { context, .. }
            | Self::Cancelled { context, .. } => Some(context),
        }
    }

    /// Backing objects that were fully processed before the failure
    #[must_use]
    pub fn completed_objects(&self) -> &[String] {
        match self {
            Self::PartialFailure { completed, .. } | Self::Cancelled { completed, .. } => {
                completed
            }
            _ => &[],
        }
    }

    /// Backing object whose call failed
    #[must_use]
    pub fn failed_object(&self) -> Option<&str> {
        match self {
            Self::Store { object, .. } | Self::PartialFailure { object, .. } => Some(object),
            _ => None,
        }
    }
}

impl From<objectio_common::Error> for StriperError {
    fn from(err: objectio_common::Error) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

/// Result type for striper operations
pub type StriperResult<T> = Result<T, StriperError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> OpContext {
        OpContext::new(Operation::Write, "disk", 4096, 100)
    }

    #[test]
    fn test_context_display() {
        assert_eq!(ctx().to_string(), "write disk (offset 4096, length 100)");
    }

    #[test]
    fn test_partial_failure_display() {
        let err = StriperError::PartialFailure {
            context: ctx(),
            completed: vec!["disk.0000000000000000".into()],
            object: "disk.0000000000000001".into(),
            source: StoreError::backend(-5, "EIO"),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("write disk (offset 4096, length 100)"));
        assert!(msg.contains("disk.0000000000000001"));
        assert!(msg.contains("after 1 backing object(s) completed"));
        assert!(err.is_partial());
        assert_eq!(err.completed_objects().len(), 1);
        assert_eq!(err.failed_object(), Some("disk.0000000000000001"));
    }

    #[test]
    fn test_invalid_argument_from_store() {
        let err = StriperError::Store {
            context: ctx(),
            object: "disk.0000000000000000".into(),
            source: StoreError::InvalidArgument("zero-length full write".into()),
        };
        assert!(err.is_invalid_argument());
        assert!(!err.is_partial());
        assert!(StriperError::invalid_argument("x").is_invalid_argument());
    }

    #[test]
    fn test_cancelled() {
        let err = StriperError::Cancelled {
            context: ctx(),
            reason: CancelReason::TimedOut,
            completed: Vec::new(),
        };
        assert!(err.is_cancelled());
        assert!(!err.is_partial());
        assert!(err.to_string().contains("backing call timed out"));
    }
}
