//! Configuration management for tidesync
//!
//! Defaults, overridden by a TOML file and then by `TIDESYNC_*` environment
//! variables, validated before use.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// The only conflict resolution strategy the engine implements
pub const LAST_WRITE_WINS: &str = "last_write_wins";

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Identity of this replica; required before an engine is built
    pub device_id: Option<String>,

    /// Delay between rounds of the periodic sync loop
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,

    /// Run the tombstone reaper after every sync round
    pub reap_after_sync: bool,

    /// Conflict resolution strategy
    pub conflict_resolution: String,

    pub retry: RetryConfig,
}

/// Backoff for failed exchanges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per exchange, first try included
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Randomize each delay within [delay/2, delay]
    pub jitter: bool,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Describe and record metrics
    pub enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sync_interval: Duration::from_secs(30),
            reap_after_sync: true,
            conflict_resolution: LAST_WRITE_WINS.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| ConfigError::invalid(key, e))
}

fn parse_duration(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(raw).map_err(|e| ConfigError::invalid(key, e))
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: TIDESYNC_<SECTION>_<KEY>
    /// Example: TIDESYNC_SYNC_INTERVAL=45s
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path)?;
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `TIDESYNC_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Sync config
        if let Some(id) = lookup("TIDESYNC_SYNC_DEVICE_ID") {
            self.sync.device_id = Some(id);
        }
        if let Some(raw) = lookup("TIDESYNC_SYNC_INTERVAL") {
            self.sync.sync_interval = parse_duration("TIDESYNC_SYNC_INTERVAL", &raw)?;
        }
        if let Some(raw) = lookup("TIDESYNC_SYNC_REAP_AFTER_SYNC") {
            self.sync.reap_after_sync = parse("TIDESYNC_SYNC_REAP_AFTER_SYNC", &raw)?;
        }
        if let Some(strategy) = lookup("TIDESYNC_SYNC_CONFLICT_RESOLUTION") {
            self.sync.conflict_resolution = strategy;
        }
        if let Some(raw) = lookup("TIDESYNC_SYNC_RETRY_MAX_ATTEMPTS") {
            self.sync.retry.max_attempts = parse("TIDESYNC_SYNC_RETRY_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("TIDESYNC_SYNC_RETRY_INITIAL_BACKOFF") {
            self.sync.retry.initial_backoff = parse_duration("TIDESYNC_SYNC_RETRY_INITIAL_BACKOFF", &raw)?;
        }
        if let Some(raw) = lookup("TIDESYNC_SYNC_RETRY_MAX_BACKOFF") {
            self.sync.retry.max_backoff = parse_duration("TIDESYNC_SYNC_RETRY_MAX_BACKOFF", &raw)?;
        }

        // Logging config
        if let Some(level) = lookup("TIDESYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(raw) = lookup("TIDESYNC_LOG_JSON") {
            self.logging.json_format = parse("TIDESYNC_LOG_JSON", &raw)?;
        }

        // Metrics config
        if let Some(raw) = lookup("TIDESYNC_METRICS_ENABLED") {
            self.metrics.enabled = parse("TIDESYNC_METRICS_ENABLED", &raw)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(id) = &self.sync.device_id {
            if id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed("device_id must not be empty".to_string()));
            }
        }

        if self.sync.sync_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sync_interval must be greater than 0".to_string(),
            ));
        }

        if self.sync.conflict_resolution != LAST_WRITE_WINS {
            return Err(ConfigError::ValidationFailed(format!(
                "Unsupported conflict resolution strategy: {}",
                self.sync.conflict_resolution
            )));
        }

        let retry = &self.sync.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if retry.initial_backoff > retry.max_backoff {
            return Err(ConfigError::ValidationFailed(
                "retry.initial_backoff exceeds retry.max_backoff".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
