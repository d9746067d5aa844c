//! Authentication Configuration
//!
//! Loaded from TOML or JSON, picked by file extension.

use crate::refresh::DEFAULT_REFRESH_MARGIN_SECS;
use crate::settings::SettingsValues;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the authentication core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Refresh certificates expiring within this many seconds
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: i64,
    /// Directory of the file-backed key store
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Initial settings
    #[serde(default)]
    pub settings: SettingsValues,
}

fn default_refresh_margin() -> i64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./vpn-auth")
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: default_refresh_margin(),
            store_dir: default_store_dir(),
            settings: SettingsValues::default(),
        }
    }
}

impl AuthConfig {
    /// Load from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
            "toml" => Self::from_toml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Refresh margin as a duration
    pub fn refresh_margin(&self) -> TimeDelta {
        TimeDelta::seconds(self.refresh_margin_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_margin_secs <= 0 {
            return Err(ConfigError::InvalidMargin);
        }
        if self.settings.maintenance_interval_minutes == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format")]
    UnsupportedFormat,

    #[error("Refresh margin must be positive")]
    InvalidMargin,

    #[error("Maintenance interval must be at least one minute")]
    InvalidInterval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = AuthConfig::default();

        assert_eq!(config.refresh_margin(), TimeDelta::hours(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = AuthConfig::default();
        let parsed = AuthConfig::from_toml(&config.to_toml()).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml() {
        let config = AuthConfig::from_toml("refresh_margin_secs = 60").unwrap();

        assert_eq!(config.refresh_margin_secs, 60);
        assert_eq!(config.store_dir, PathBuf::from("./vpn-auth"));
    }

    #[test]
    fn test_invalid_values() {
        let config = AuthConfig {
            refresh_margin_secs: 0,
            ..AuthConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidMargin));

        let mut config = AuthConfig::default();
        config.settings.maintenance_interval_minutes = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidInterval));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.yaml");
        std::fs::write(&path, "refresh_margin_secs: 1").unwrap();

        assert_eq!(
            AuthConfig::from_file(&path),
            Err(ConfigError::UnsupportedFormat)
        );
    }
}
