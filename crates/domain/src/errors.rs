//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for RelayGate configuration and lookups
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum RelayGateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for RelayGate operations
pub type Result<T> = std::result::Result<T, RelayGateError>;

impl From<std::io::Error> for RelayGateError {
    fn from(err: std::io::Error) -> Self {
        RelayGateError::Config(format!("I/O error: {err}"))
    }
}

impl From<serde_json::Error> for RelayGateError {
    fn from(err: serde_json::Error) -> Self {
        RelayGateError::Config(format!("JSON error: {err}"))
    }
}
