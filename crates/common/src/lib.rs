//! Generic resilience primitives shared across RelayGate crates.
//!
//! # Safety and Quality
//!
//! This crate holds the domain-free building blocks (clock abstraction,
//! sliding windows, circuit breaker, bulkheads, retry executor). It knows
//! nothing about adapters, policy keys or error taxonomies; those live in
//! `relaygate-domain` and `relaygate-core`.
//!
//! # Features
//!
//! - `serde`: serializable metrics and health snapshots

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    Clock, ConfigError, MockClock, ResilienceError, Retry, RetryConfig, RetryError,
    RetryMetricsSnapshot, SemaphoreBulkhead, SystemClock, ThreadPoolBulkhead,
};
