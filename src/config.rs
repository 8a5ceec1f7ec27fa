// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Configuration file types and parsing.
//!
//! JSON5 configuration format supporting:
//! - Base name plus queue, rotation, and level knobs
//! - Comments and trailing commas

use crate::filestore::{DEFAULT_MAX_SIZE, DEFAULT_RETENTION};
use crate::level::Level;
use crate::logger::DEFAULT_QUEUE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Logger configuration (JSON5 file format)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Base name for log files; the only required field
    pub base_name: String,

    /// Primary queue capacity (the overflow ring matches it)
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Maximum file size in bytes before rotation
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Maximum number of rotated historical files kept on disk
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Minimum level written out
    #[serde(default = "default_min_level")]
    pub min_level: Level,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("base_name must not be empty")]
    EmptyBaseName,
    #[error("queue_size must be non-zero")]
    ZeroQueueSize,
    #[error("max_file_size must be non-zero")]
    ZeroMaxFileSize,
}

impl Config {
    /// Configuration with defaults for everything but the base name
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            queue_size: default_queue_size(),
            max_file_size: default_max_file_size(),
            retention: default_retention(),
            min_level: default_min_level(),
        }
    }

    /// Load configuration from a JSON5 file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Serialize configuration to a JSON5-compatible string
    pub fn to_json5(&self) -> String {
        // json5 is a superset of JSON, so serde_json handles output while
        // json5 handles input with comments and trailing commas
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json5())
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_name.is_empty() {
            return Err(ConfigError::EmptyBaseName);
        }
        if self.queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.max_file_size == 0 {
            return Err(ConfigError::ZeroMaxFileSize);
        }
        Ok(())
    }
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_SIZE
}

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

fn default_min_level() -> Level {
    Level::Debug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::parse(r#"{ base_name: "/var/log/myapp" }"#).unwrap();
        assert_eq!(config.base_name, "/var/log/myapp");
        assert_eq!(config.queue_size, 10_000);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.retention, 3);
        assert_eq!(config.min_level, Level::Debug);
    }

    #[test]
    fn test_parse_with_comments_and_trailing_comma() {
        let config = Config::parse(
            r#"{
                // rotation tuned down for the embedded target
                base_name: "app",
                max_file_size: 1048576,
                min_level: "Warning",
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_file_size, 1_048_576);
        assert_eq!(config.min_level, Level::Warning);
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::new("app");
        config.retention = 7;
        let parsed = Config::parse(&config.to_json5()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert_eq!(
            Config::new("").validate(),
            Err(ConfigError::EmptyBaseName)
        );

        let mut config = Config::new("app");
        config.queue_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueSize));

        let mut config = Config::new("app");
        config.max_file_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroMaxFileSize));
    }

    #[test]
    fn test_parse_error_reports() {
        assert!(matches!(
            Config::parse("not json5 at all {"),
            Err(ConfigError::Parse(_))
        ));
    }
}
