//! ObjectIO Common - Shared types and utilities
//!
//! This crate provides the striping layout, virtual object naming,
//! configuration and error definitions shared by the striper core and its
//! tools.

pub mod config;
pub mod error;
pub mod types;

pub use config::StriperConfig;
pub use error::{Error, Result};
pub use types::*;
