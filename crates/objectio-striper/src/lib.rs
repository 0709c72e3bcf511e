#![allow(clippy::result_large_err)]
//! ObjectIO Striper
//!
//! Presents arbitrarily large "virtual objects" on top of an object store
//! whose objects are bounded in size. A virtual object's bytes are spread
//! round-robin, one stripe unit at a time, over a group of backing objects;
//! once those are full the next group (object set) takes over.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  write / read / stat │  (virtual object API)
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │       Striper        │
//! │  - layout calculator │
//! │  - size tracking     │
//! │  - bounded dispatch  │
//! └──────────┬───────────┘
//!            │
//! ┌──────────▼───────────┐
//! │     BackingStore     │  (one call per backing object)
//! └──────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use objectio_common::StripingLayout;
//! use objectio_striper::{MemoryStore, Striper};
//!
//! # async fn demo() -> objectio_striper::StriperResult<()> {
//! let layout = StripingLayout::new(4096, 2, 8192)?;
//! let striper = Striper::new(Arc::new(MemoryStore::new()), layout);
//! striper.write_full("disk", b"hello").await?;
//! assert_eq!(striper.stat("disk").await?.size, 5);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod layout;
pub mod size;
pub mod store;
pub mod striper;

pub use error::{CancelReason, OpContext, Operation, StriperError, StriperResult};
pub use layout::{ObjectExtent, ObjectRef, Segment, coalesce, compute_segments, object_name};
pub use size::{local_size_for, logical_end};
pub use store::{BackingStore, DirStore, FaultOp, MemoryStore, StoreError, StoreResult};
pub use striper::{DEFAULT_MAX_IN_FLIGHT, IoOptions, Striper};
