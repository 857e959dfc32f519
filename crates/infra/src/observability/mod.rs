//! Observability infrastructure for logging and metrics
//!
//! - [`init_tracing`] installs the process-wide `tracing` subscriber
//! - [`PrometheusEventSink`] turns resilience events into Prometheus series

mod prometheus_sink;
mod tracing_init;

pub use prometheus_sink::PrometheusEventSink;
pub use tracing_init::init_tracing;

/// Observability setup error
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// The log filter directive did not parse
    #[error("Invalid log filter '{directive}': {message}")]
    InvalidFilter { directive: String, message: String },

    /// A global subscriber was installed earlier
    #[error("Tracing subscriber already initialized: {0}")]
    AlreadyInitialized(String),

    /// Metric registration or collection failed
    #[error("Prometheus error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Metrics exposition is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Result type for observability setup
pub type ObservabilityResult<T> = Result<T, ObservabilityError>;
