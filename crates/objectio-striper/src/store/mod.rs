//! Backing object store interface
//!
//! The striper never talks to storage directly; it drives a [`BackingStore`],
//! whose operations are each atomic for one object. Errors carry
//! errno-style codes so failures from a real cluster can be surfaced
//! unchanged.
//!
//! Two implementations live here:
//! - [`MemoryStore`]: in-process map with fault injection, for tests
//! - [`DirStore`]: one file per backing object under a root directory

pub mod dir;
pub mod memory;

pub use dir::DirStore;
pub use memory::{FaultOp, MemoryStore};

use async_trait::async_trait;
use objectio_common::ObjectStat;
use thiserror::Error;

/// errno for a missing object
pub const ENOENT: i32 = 2;

/// errno for a rejected argument
pub const EINVAL: i32 = 22;

/// errno for a generic I/O failure
pub const EIO: i32 = 5;

/// Backing store error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Object does not exist
    #[error("object not found")]
    NotFound,

    /// The store rejected the request
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other store failure, with its (negative errno) code
    #[error("store error {code}: {message}")]
    Backend { code: i32, message: String },
}

impl StoreError {
    /// Create a backend error
    pub fn backend(code: i32, message: impl Into<String>) -> Self {
        Self::Backend {
            code,
            message: message.into(),
        }
    }

    /// Negative errno code for this error
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::NotFound => -ENOENT,
            Self::InvalidArgument(_) => -EINVAL,
            Self::Backend { code, .. } => *code,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::InvalidInput => Self::InvalidArgument(err.to_string()),
            _ => Self::Backend {
                code: -err.raw_os_error().unwrap_or(EIO),
                message: err.to_string(),
            },
        }
    }
}

/// Result type for backing store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Per-object operations of the underlying object store
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Write `data` at `offset`, extending the object (and creating it) as
    /// needed; unwritten gaps read as zeros
    async fn write(&self, name: &str, data: &[u8], offset: u64) -> StoreResult<()>;

    /// Replace the whole object content with `data`
    async fn write_full(&self, name: &str, data: &[u8]) -> StoreResult<()>;

    /// Append `data` to the object, creating it if absent
    async fn append(&self, name: &str, data: &[u8]) -> StoreResult<()>;

    /// Read up to `length` bytes at `offset`; short at the object's end
    async fn read(&self, name: &str, offset: u64, length: usize) -> StoreResult<Vec<u8>>;

    /// Remove the object
    async fn remove(&self, name: &str) -> StoreResult<()>;

    /// Size and modification time of the object
    async fn stat(&self, name: &str) -> StoreResult<ObjectStat>;

    /// Shrink or zero-extend an existing object to `size` bytes
    async fn truncate(&self, name: &str, size: u64) -> StoreResult<()>;

    /// Create the object empty if it does not exist; no-op otherwise
    async fn create(&self, name: &str) -> StoreResult<()>;
}
