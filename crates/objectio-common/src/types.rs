//! Core type definitions for the ObjectIO striper
//!
//! This module defines the value types shared by the striper core, its
//! backing stores and the CLI: the striping layout, virtual object names and
//! per-object stat results.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Default stripe unit: 4 MiB
pub const DEFAULT_STRIPE_UNIT: u64 = 4 * 1024 * 1024;

/// Default number of backing objects per object set
pub const DEFAULT_STRIPE_COUNT: u64 = 1;

/// Default backing object size: 4 MiB
pub const DEFAULT_OBJECT_SIZE: u64 = 4 * 1024 * 1024;

/// Maximum length of a virtual object name in bytes
pub const MAX_OBJECT_NAME_LEN: usize = 1024;

/// Striping layout of a virtual object
///
/// Stripes of `stripe_unit` bytes are dealt round-robin across
/// `stripe_count` backing objects. Once every object of the set holds
/// `object_size` bytes, striping continues in a fresh object set.
///
/// ```text
/// stripe_unit = 4K, stripe_count = 2, object_size = 8K
///
///              object 0      object 1
/// set 0  r0   [stripe 0]    [stripe 1]
///        r1   [stripe 2]    [stripe 3]
///              object 2      object 3
/// set 1  r0   [stripe 4]    [stripe 5]
///        r1   [stripe 6]    [stripe 7]
/// ```
///
/// A layout is immutable once built; construction rejects parameters for
/// which the mapping is undefined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(try_from = "LayoutParams", into = "LayoutParams")]
#[display("stripe_unit={stripe_unit} stripe_count={stripe_count} object_size={object_size}")]
pub struct StripingLayout {
    stripe_unit: u64,
    stripe_count: u64,
    object_size: u64,
}

impl StripingLayout {
    /// Create a validated layout
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` when a parameter is zero, when
    /// `object_size` is not a multiple of `stripe_unit`, or when one object
    /// set would span more than `u64::MAX` bytes.
    pub fn new(stripe_unit: u64, stripe_count: u64, object_size: u64) -> Result<Self> {
        if stripe_unit == 0 {
            return Err(Error::invalid_argument("stripe_unit must be positive"));
        }
        if stripe_count == 0 {
            return Err(Error::invalid_argument("stripe_count must be positive"));
        }
        if object_size == 0 {
            return Err(Error::invalid_argument("object_size must be positive"));
        }
        if object_size % stripe_unit != 0 {
            return Err(Error::invalid_argument(format!(
                "object_size {object_size} is not a multiple of stripe_unit {stripe_unit}"
            )));
        }
        if object_size.checked_mul(stripe_count).is_none() {
            return Err(Error::invalid_argument(format!(
                "object set of {stripe_count} x {object_size} bytes overflows"
            )));
        }

        Ok(Self {
            stripe_unit,
            stripe_count,
            object_size,
        })
    }

    /// Size in bytes of one stripe
    #[must_use]
    pub const fn stripe_unit(&self) -> u64 {
        self.stripe_unit
    }

    /// Number of backing objects in one object set
    #[must_use]
    pub const fn stripe_count(&self) -> u64 {
        self.stripe_count
    }

    /// Maximum bytes per backing object
    #[must_use]
    pub const fn object_size(&self) -> u64 {
        self.object_size
    }

    /// Number of stripes (rounds) each backing object holds
    #[must_use]
    pub const fn stripes_per_object(&self) -> u64 {
        self.object_size / self.stripe_unit
    }

    /// Logical bytes covered by one complete object set
    #[must_use]
    pub const fn object_set_span(&self) -> u64 {
        self.object_size * self.stripe_count
    }

    /// Object set holding the given logical byte
    #[must_use]
    pub const fn object_set_of(&self, logical_offset: u64) -> u64 {
        logical_offset / self.object_set_span()
    }
}

impl Default for StripingLayout {
    fn default() -> Self {
        Self {
            stripe_unit: DEFAULT_STRIPE_UNIT,
            stripe_count: DEFAULT_STRIPE_COUNT,
            object_size: DEFAULT_OBJECT_SIZE,
        }
    }
}

/// Raw, unvalidated layout parameters as they appear in configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutParams {
    /// Stripe unit in bytes
    pub stripe_unit: u64,
    /// Backing objects per object set
    pub stripe_count: u64,
    /// Backing object size in bytes
    pub object_size: u64,
}

impl Default for LayoutParams {
    fn default() -> Self {
        StripingLayout::default().into()
    }
}

impl TryFrom<LayoutParams> for StripingLayout {
    type Error = Error;

    fn try_from(params: LayoutParams) -> Result<Self> {
        Self::new(params.stripe_unit, params.stripe_count, params.object_size)
    }
}

impl From<StripingLayout> for LayoutParams {
    fn from(layout: StripingLayout) -> Self {
        Self {
            stripe_unit: layout.stripe_unit,
            stripe_count: layout.stripe_count,
            object_size: layout.object_size,
        }
    }
}

/// Name of a virtual object
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ObjectName(String);

impl ObjectName {
    /// Create a new object name
    pub fn new(name: impl Into<String>) -> std::result::Result<Self, ObjectNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the object name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> std::result::Result<(), ObjectNameError> {
        if name.is_empty() {
            return Err(ObjectNameError::Empty);
        }
        if name.len() > MAX_OBJECT_NAME_LEN {
            return Err(ObjectNameError::TooLong);
        }
        if name.contains('\0') {
            return Err(ObjectNameError::ContainsNul);
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectName({:?})", self.0)
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating an object name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectNameError {
    #[error("object name cannot be empty")]
    Empty,
    #[error("object name must be at most {MAX_OBJECT_NAME_LEN} bytes")]
    TooLong,
    #[error("object name cannot contain NUL")]
    ContainsNul,
}

/// Size and modification time of an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectStat {
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub mtime: DateTime<Utc>,
}

impl ObjectStat {
    /// Create a stat result
    #[must_use]
    pub const fn new(size: u64, mtime: DateTime<Utc>) -> Self {
        Self { size, mtime }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_default() {
        let layout = StripingLayout::default();
        assert_eq!(layout.stripe_unit(), 4 * 1024 * 1024);
        assert_eq!(layout.stripe_count(), 1);
        assert_eq!(layout.object_size(), 4 * 1024 * 1024);
        assert_eq!(layout.stripes_per_object(), 1);
    }

    #[test]
    fn test_layout_rejects_bad_params() {
        assert!(StripingLayout::new(0, 1, 4096).is_err());
        assert!(StripingLayout::new(4096, 0, 4096).is_err());
        assert!(StripingLayout::new(4096, 1, 0).is_err());
        assert!(StripingLayout::new(4096, 2, 6000).is_err());
        assert!(StripingLayout::new(1, u64::MAX, 2).is_err());

        let err = StripingLayout::new(4096, 2, 6000).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_layout_spans() {
        let layout = StripingLayout::new(4096, 2, 8192).unwrap();
        assert_eq!(layout.stripes_per_object(), 2);
        assert_eq!(layout.object_set_span(), 16384);
        assert_eq!(layout.object_set_of(0), 0);
        assert_eq!(layout.object_set_of(16383), 0);
        assert_eq!(layout.object_set_of(16384), 1);
    }

    #[test]
    fn test_layout_serde_validates() {
        let json = r#"{"stripe_unit":4096,"stripe_count":3,"object_size":12288}"#;
        let layout: StripingLayout = serde_json::from_str(json).unwrap();
        assert_eq!(layout.stripe_count(), 3);

        let bad = r#"{"stripe_unit":4096,"stripe_count":3,"object_size":5000}"#;
        assert!(serde_json::from_str::<StripingLayout>(bad).is_err());
    }

    #[test]
    fn test_layout_display() {
        let layout = StripingLayout::new(4096, 2, 8192).unwrap();
        assert_eq!(
            layout.to_string(),
            "stripe_unit=4096 stripe_count=2 object_size=8192"
        );
    }

    #[test]
    fn test_object_name() {
        assert!(ObjectName::new("disk-image").is_ok());
        assert_eq!(ObjectName::new(""), Err(ObjectNameError::Empty));
        assert_eq!(
            ObjectName::new("a".repeat(MAX_OBJECT_NAME_LEN + 1)),
            Err(ObjectNameError::TooLong)
        );
        assert_eq!(ObjectName::new("a\0b"), Err(ObjectNameError::ContainsNul));
    }
}
