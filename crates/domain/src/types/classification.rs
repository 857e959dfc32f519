//! Error classification types
//!
//! The value objects the classifier produces. They are serializable so an
//! operations console can render them directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::impl_domain_label_conversions;
use crate::utils::serde::duration_millis;

/// Failure taxonomy shared by classification, monitoring and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Timeout,
    Connection,
    Authentication,
    RateLimit,
    Validation,
    NotFound,
    Permission,
    Resource,
    Database,
    Transaction,
    ConstraintViolation,
    ServiceUnavailable,
    Io,
    Unknown,
}

impl_domain_label_conversions!(ErrorCategory {
    Timeout => "TIMEOUT",
    Connection => "CONNECTION",
    Authentication => "AUTHENTICATION",
    RateLimit => "RATE_LIMIT",
    Validation => "VALIDATION",
    NotFound => "NOT_FOUND",
    Permission => "PERMISSION",
    Resource => "RESOURCE",
    Database => "DATABASE",
    Transaction => "TRANSACTION",
    ConstraintViolation => "CONSTRAINT_VIOLATION",
    ServiceUnavailable => "SERVICE_UNAVAILABLE",
    Io => "IO",
    Unknown => "UNKNOWN",
});

/// Operational severity, ordered from least to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl_domain_label_conversions!(ErrorSeverity {
    Low => "LOW",
    Medium => "MEDIUM",
    High => "HIGH",
    Critical => "CRITICAL",
});

impl ErrorSeverity {
    /// One level more urgent; `Critical` saturates.
    pub fn escalate(self) -> Self {
        match self {
            ErrorSeverity::Low => ErrorSeverity::Medium,
            ErrorSeverity::Medium => ErrorSeverity::High,
            ErrorSeverity::High | ErrorSeverity::Critical => ErrorSeverity::Critical,
        }
    }

    /// Scale applied to a category's base recovery time.
    pub fn recovery_multiplier(self) -> f64 {
        match self {
            ErrorSeverity::Critical => 2.0,
            ErrorSeverity::High => 1.5,
            ErrorSeverity::Medium => 1.0,
            ErrorSeverity::Low => 0.5,
        }
    }

    pub fn is_severe(self) -> bool {
        self >= ErrorSeverity::High
    }
}

/// Outcome of classifying one adapter failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub error_type: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub circuit_breaker_candidate: bool,
    pub recovery_suggestions: Vec<String>,
    #[serde(rename = "estimated_recovery_time_ms", with = "duration_millis")]
    pub estimated_recovery_time: Duration,
}
