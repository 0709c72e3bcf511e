//! Error types for ObjectIO
//!
//! This module defines the common error type used for argument validation
//! and configuration handling across the striper components.

use crate::types::ObjectNameError;
use thiserror::Error;

/// Common result type for ObjectIO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for ObjectIO
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid object name: {0}")]
    InvalidObjectName(#[from] ObjectNameError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this error was caused by a bad argument
    #[must_use]
    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::InvalidObjectName(_))
    }
}
