//! Tracing subscriber setup

use relaygate_domain::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use super::{ObservabilityError, ObservabilityResult};

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Can succeed only once
/// per process.
///
/// # Errors
/// Returns [`ObservabilityError::InvalidFilter`] when the configured level
/// does not parse, or [`ObservabilityError::AlreadyInitialized`] when a
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> ObservabilityResult<()> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
    };
    installed.map_err(|e| ObservabilityError::AlreadyInitialized(e.to_string()))?;

    tracing::debug!(level = %config.level, format = ?config.format, "Tracing initialized");
    Ok(())
}

fn build_filter(config: &LoggingConfig) -> ObservabilityResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| ObservabilityError::InvalidFilter {
        directive: config.level.clone(),
        message: e.to_string(),
    })
}
