//! Configuration management for autopost
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `AUTOPOST__<section>__<key>`
//!
//! Examples:
//! - `AUTOPOST__HEALTH__BIND_ADDR=0.0.0.0:9000`
//! - `AUTOPOST__SCHEDULE__SCAN_INTERVAL_MINUTES=10`
//! - `AUTOPOST__RETRY__MAX_ATTEMPTS=5`
//!
//! Secrets (`UPLOAD_USERNAME`, `UPLOAD_PASSWORD`, `CAPTION_API_KEY`) are read
//! from the environment only and never from the TOML file.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/autopost.toml`.
//! This can be overridden using the `AUTOPOST_CONFIG` environment variable.

mod models;
mod sources;

pub use models::{
    AnalyzerConfig, CaptionConfig, Config, HealthConfig, PathsConfig, RetentionConfig,
    RetryConfig, ScheduleConfig, UploaderConfig,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`AUTOPOST__*`)
    /// 2. TOML file (default: `config/autopost.toml`)
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        Ok(config)
    }
}
