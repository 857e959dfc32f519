//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If none are set, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//! 5. Without either source, the built-in defaults apply
//!
//! ## Environment Variables
//! Each variable overrides one field; unset fields keep their defaults.
//! - `RELAYGATE_DEFAULT_RETRY_ATTEMPTS`: Attempts for the default bucket
//! - `RELAYGATE_DEFAULT_RETRY_WAIT_MS`: Fixed wait for the default bucket
//! - `RELAYGATE_DEFAULT_RETRY_DEADLINE_MS`: Retry deadline for the default
//!   bucket
//! - `RELAYGATE_BULKHEAD_UTILIZATION_SCALE`: Utilization multiplier
//! - `RELAYGATE_CLASSIFIER_CACHE_CAPACITY`: Classification memo size
//! - `RELAYGATE_MONITOR_FORCE_OPEN_THRESHOLD`: Consecutive failures before
//!   the monitor force-opens a breaker
//! - `RELAYGATE_LIVE_UNIT_WARNING_THRESHOLD`: Live units per service before
//!   warning
//! - `RELAYGATE_LOG_LEVEL`: Default log filter (`RUST_LOG` wins when set)
//! - `RELAYGATE_LOG_FORMAT`: `text` or `json`
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./relaygate.toml` or `./relaygate.json` (current working directory)
//! 2. `./config.toml` or `./config.json` (current working directory)
//! 3. The same names one and two directories up
//! 4. Relative to executable location

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use relaygate_domain::{Config, RelayGateError, Result};

const ENV_PREFIX: &str = "RELAYGATE_";

const CONFIG_FILE_NAMES: &[&str] =
    &["relaygate.toml", "relaygate.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// Environment variables take precedence over files. When neither is
/// present the defaults are returned. The result is always validated.
///
/// # Errors
/// Returns `RelayGateError::Config` if:
/// - A variable or file holds an invalid value
/// - The loaded configuration fails validation
pub fn load() -> Result<Config> {
    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) if has_env_overrides() => return Err(e),
        Err(e) => {
            tracing::debug!(error = %e, "No environment configuration, trying file");
            match probe_config_paths() {
                Some(path) => load_from_file(Some(path))?,
                None => {
                    tracing::info!("No configuration found, using defaults");
                    Config::default()
                }
            }
        }
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// Fields without a variable keep their defaults.
///
/// # Errors
/// Returns `RelayGateError::Config` if no `RELAYGATE_*` variable is set or
/// a variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    if !has_env_overrides() {
        return Err(RelayGateError::Config(format!("No {ENV_PREFIX}* environment variables set")));
    }

    let mut config = Config::default();
    let resilience = &mut config.resilience;

    if let Some(attempts) = env_parse("RELAYGATE_DEFAULT_RETRY_ATTEMPTS")? {
        resilience.default_retry_attempts = attempts;
    }
    if let Some(wait) = env_parse("RELAYGATE_DEFAULT_RETRY_WAIT_MS")? {
        resilience.default_retry_wait = Duration::from_millis(wait);
    }
    if let Some(deadline) = env_parse("RELAYGATE_DEFAULT_RETRY_DEADLINE_MS")? {
        resilience.default_retry_deadline = Duration::from_millis(deadline);
    }
    if let Some(scale) = env_parse("RELAYGATE_BULKHEAD_UTILIZATION_SCALE")? {
        resilience.bulkhead_utilization_scale = scale;
    }
    if let Some(capacity) = env_parse("RELAYGATE_CLASSIFIER_CACHE_CAPACITY")? {
        resilience.classifier_cache_capacity = capacity;
    }
    if let Some(threshold) = env_parse("RELAYGATE_MONITOR_FORCE_OPEN_THRESHOLD")? {
        resilience.monitor_force_open_threshold = threshold;
    }
    if let Some(threshold) = env_parse("RELAYGATE_LIVE_UNIT_WARNING_THRESHOLD")? {
        resilience.live_unit_warning_threshold = threshold;
    }

    if let Ok(level) = std::env::var("RELAYGATE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env_parse("RELAYGATE_LOG_FORMAT")? {
        config.logging.format = format;
    }

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `RelayGateError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(RelayGateError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            RelayGateError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| RelayGateError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| RelayGateError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| RelayGateError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(RelayGateError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory and its two parents, then the
/// executable's directory and its two parents.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd);
    }
    if let Some(exe_dir) =
        std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        roots.push(exe_dir);
    }

    roots
        .iter()
        .flat_map(|root| [root.clone(), root.join(".."), root.join("../..")])
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

fn has_env_overrides() -> bool {
    std::env::vars_os().any(|(key, _)| key.to_str().is_some_and(|key| key.starts_with(ENV_PREFIX)))
}

/// Parse an optional environment variable
///
/// # Errors
/// Returns `RelayGateError::Config` if the variable is set but does not
/// parse.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| RelayGateError::Config(format!("Invalid value for {key}: {e}"))),
        Err(_) => Ok(None),
    }
}
