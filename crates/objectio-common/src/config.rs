//! Configuration types for the ObjectIO striper
//!
//! Every section and field has a default, so a partial (or empty) TOML file
//! is a valid configuration.

use crate::error::{Error, Result};
use crate::types::{LayoutParams, StripingLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the striper
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StriperConfig {
    /// Striping layout for virtual objects
    pub layout: LayoutParams,
    /// Backing call dispatch settings
    pub io: IoConfig,
    /// Backing store location
    pub store: StoreConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl StriperConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Validated striping layout
    pub fn striping_layout(&self) -> Result<StripingLayout> {
        StripingLayout::try_from(self.layout)
            .map_err(|e| Error::configuration(format!("[layout] {e}")))
    }
}

/// Backing call dispatch configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Maximum backing calls in flight per operation
    pub max_in_flight: usize,
    /// Timeout per backing call in milliseconds (0 = none)
    pub op_timeout_ms: u64,
}

impl IoConfig {
    /// Per-call timeout, if any
    #[must_use]
    pub const fn op_timeout(&self) -> Option<Duration> {
        if self.op_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.op_timeout_ms))
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            op_timeout_ms: 0,
        }
    }
}

/// Directory backing store configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory holding one file per backing object
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./striper-data"),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StriperConfig::default();
        assert_eq!(config.layout.stripe_unit, 4 * 1024 * 1024);
        assert_eq!(config.io.max_in_flight, 16);
        assert_eq!(config.io.op_timeout(), None);
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.striping_layout().unwrap(), StripingLayout::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = StriperConfig::from_toml_str(
            r#"
            [layout]
            stripe_unit = 65536
            stripe_count = 4

            [io]
            op_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.layout.stripe_unit, 65536);
        assert_eq!(config.layout.stripe_count, 4);
        assert_eq!(config.layout.object_size, 4 * 1024 * 1024);
        assert_eq!(config.io.max_in_flight, 16);
        assert_eq!(config.io.op_timeout(), Some(Duration::from_millis(2500)));

        let layout = config.striping_layout().unwrap();
        assert_eq!(layout.object_set_span(), 16 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_layout_is_configuration_error() {
        let config = StriperConfig::from_toml_str(
            r#"
            [layout]
            stripe_unit = 3000
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.striping_layout(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            StriperConfig::from_toml_str("[layout\nstripe_unit = 1"),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("striper.toml");
        std::fs::write(&path, "[store]\nroot = \"/srv/striper\"\n").unwrap();

        let config = StriperConfig::load(&path).unwrap();
        assert_eq!(config.store.root, PathBuf::from("/srv/striper"));
    }
}
