//! Error types shared by the resilience primitives

use std::time::Duration;

use thiserror::Error;

use super::CircuitState;

/// Configuration error raised by `validate()` on primitive configs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur in resilience operations
///
/// This error type is generic over the underlying operation error type `E`,
/// allowing it to wrap and preserve the original error information while
/// providing resilience-specific rejection variants. The rejection variants
/// (`CircuitOpen`, `BulkheadFull`) are raised before the operation runs.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Circuit breaker is open (or forced open), rejecting calls
    #[error("Circuit breaker is {state}, rejecting calls")]
    CircuitOpen { state: CircuitState },

    /// Bulkhead capacity exceeded
    #[error("Bulkhead capacity exceeded: {capacity} concurrent operations (waited {waited:?})")]
    BulkheadFull { capacity: usize, waited: Duration },

    /// The underlying operation failed
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },

    /// An offloaded task never produced a result (worker panicked or the pool
    /// shut down)
    #[error("Offloaded task aborted before completion")]
    TaskAborted,
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Whether this error was produced by a protection mechanism rather than
    /// by the operation itself
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::BulkheadFull { .. })
    }

    /// Borrow the operation error, if the operation ran and failed
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Consume and return the operation error, if any
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::OperationFailed { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type for resilience operations
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
