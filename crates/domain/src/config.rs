//! Configuration structures
//!
//! Plain serde structs with defaults; loading from the environment or from
//! files lives in the infra crate.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RelayGateError, Result};
use crate::utils::serde::duration_millis;

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub resilience: ResilienceSettings,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.resilience.validate()?;
        self.logging.validate()
    }
}

/// Knobs shared by the resilience services.
///
/// Per-category tuning tables are fixed; these values only feed the
/// default bucket and the service-level housekeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Attempts for adapters that resolve to the default bucket.
    pub default_retry_attempts: u32,
    #[serde(rename = "default_retry_wait_ms", with = "duration_millis")]
    pub default_retry_wait: Duration,
    #[serde(rename = "default_retry_deadline_ms", with = "duration_millis")]
    pub default_retry_deadline: Duration,
    /// Multiplier applied to the bulkhead utilization ratio (100 = percent).
    pub bulkhead_utilization_scale: f64,
    pub classifier_cache_capacity: u64,
    /// Consecutive breaker-candidate failures before the monitor force-opens.
    pub monitor_force_open_threshold: u32,
    /// Unit count per service above which a warning is logged.
    pub live_unit_warning_threshold: usize,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            default_retry_attempts: 3,
            default_retry_wait: Duration::from_millis(1000),
            default_retry_deadline: Duration::from_secs(30),
            bulkhead_utilization_scale: 100.0,
            classifier_cache_capacity: 10_000,
            monitor_force_open_threshold: 5,
            live_unit_warning_threshold: 1_000,
        }
    }
}

impl ResilienceSettings {
    pub fn validate(&self) -> Result<()> {
        if self.default_retry_attempts == 0 {
            return Err(RelayGateError::Config(
                "default_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.default_retry_deadline.is_zero() {
            return Err(RelayGateError::Config(
                "default_retry_deadline_ms must be greater than 0".to_string(),
            ));
        }
        if !(self.bulkhead_utilization_scale.is_finite() && self.bulkhead_utilization_scale > 0.0) {
            return Err(RelayGateError::Config(format!(
                "bulkhead_utilization_scale must be a positive number, got {}",
                self.bulkhead_utilization_scale
            )));
        }
        if self.classifier_cache_capacity == 0 {
            return Err(RelayGateError::Config(
                "classifier_cache_capacity must be greater than 0".to_string(),
            ));
        }
        if self.monitor_force_open_threshold == 0 {
            return Err(RelayGateError::Config(
                "monitor_force_open_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = RelayGateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(RelayGateError::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Text }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.level.trim().is_empty() {
            return Err(RelayGateError::Config("logging.level must not be empty".to_string()));
        }
        Ok(())
    }
}
