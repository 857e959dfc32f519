//! Errors surfaced by guarded adapter calls

use std::time::Duration;

use relaygate_common::resilience::{CircuitState, ResilienceError, RetryError};
use relaygate_domain::{AdapterError, PolicyKey, RelayGateError};
use thiserror::Error;

/// Terminal outcome of a call executed under resilience protection.
///
/// Every variant names the unit that produced it. Use
/// [`ExecutionError::is_rejection`] to tell self-protection apart from a
/// failing dependency.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Circuit breaker {key} is {state}, call rejected")]
    CircuitOpen { key: PolicyKey, state: CircuitState },

    #[error("Bulkhead {key} is full: {capacity} concurrent calls (waited {waited:?})")]
    BulkheadFull { key: PolicyKey, capacity: usize, waited: Duration },

    #[error("Retries exhausted for {key} after {attempts} attempts: {source}")]
    RetriesExhausted {
        key: PolicyKey,
        attempts: u32,
        #[source]
        source: AdapterError,
    },

    #[error("Retry deadline exceeded for {key} after {elapsed:?} ({attempts} attempts): {source}")]
    DeadlineExceeded {
        key: PolicyKey,
        elapsed: Duration,
        attempts: u32,
        #[source]
        source: AdapterError,
    },

    #[error("Operation failed for {key}: {source}")]
    Operation {
        key: PolicyKey,
        #[source]
        source: AdapterError,
    },

    #[error("Offloaded call for {key} aborted before completion")]
    Aborted { key: PolicyKey },

    #[error("Resilience unit {key} could not be built: {message}")]
    Configuration { key: PolicyKey, message: String },
}

/// Result type for guarded calls
pub type ExecutionResult<T> = Result<T, ExecutionError>;

impl ExecutionError {
    /// Key of the call that failed
    pub fn key(&self) -> &PolicyKey {
        match self {
            Self::CircuitOpen { key, .. }
            | Self::BulkheadFull { key, .. }
            | Self::RetriesExhausted { key, .. }
            | Self::DeadlineExceeded { key, .. }
            | Self::Operation { key, .. }
            | Self::Aborted { key }
            | Self::Configuration { key, .. } => key,
        }
    }

    /// Raised by a protection layer before the operation ran.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::BulkheadFull { .. })
    }

    /// The adapter failure behind this error, if the operation ran.
    pub fn adapter_error(&self) -> Option<&AdapterError> {
        match self {
            Self::RetriesExhausted { source, .. }
            | Self::DeadlineExceeded { source, .. }
            | Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Owned form of [`adapter_error`](Self::adapter_error)
    pub fn into_adapter_error(self) -> Option<AdapterError> {
        match self {
            Self::RetriesExhausted { source, .. }
            | Self::DeadlineExceeded { source, .. }
            | Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Short label for logs and reports.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::BulkheadFull { .. } => "bulkhead_full",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Operation { .. } => "operation_failed",
            Self::Aborted { .. } => "aborted",
            Self::Configuration { .. } => "configuration",
        }
    }

    pub(crate) fn operation(key: &PolicyKey, source: AdapterError) -> Self {
        Self::Operation { key: key.clone(), source }
    }

    pub(crate) fn configuration(key: &PolicyKey, err: impl std::fmt::Display) -> Self {
        Self::Configuration { key: key.clone(), message: err.to_string() }
    }

    pub(crate) fn from_retry(key: &PolicyKey, err: RetryError<AdapterError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, source } => {
                Self::RetriesExhausted { key: key.clone(), attempts, source }
            }
            RetryError::NonRetryable { source } => Self::operation(key, source),
            RetryError::DeadlineExceeded { elapsed, attempts, source } => {
                Self::DeadlineExceeded { key: key.clone(), elapsed, attempts, source }
            }
        }
    }

    /// Flatten a layer error whose inner operation already speaks
    /// `ExecutionError`.
    pub(crate) fn from_layer(key: &PolicyKey, err: ResilienceError<ExecutionError>) -> Self {
        match err {
            ResilienceError::CircuitOpen { state } => Self::CircuitOpen { key: key.clone(), state },
            ResilienceError::BulkheadFull { capacity, waited } => {
                Self::BulkheadFull { key: key.clone(), capacity, waited }
            }
            ResilienceError::OperationFailed { source } => source,
            ResilienceError::TaskAborted => Self::Aborted { key: key.clone() },
        }
    }
}

impl From<ExecutionError> for RelayGateError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::Configuration { .. } => RelayGateError::Config(err.to_string()),
            other => RelayGateError::Internal(other.to_string()),
        }
    }
}
