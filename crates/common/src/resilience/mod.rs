//! Resilience patterns for fault tolerance
//!
//! This module provides **generic, reusable** resilience primitives:
//! - **Circuit Breaker**: sliding-window failure-rate and slow-call-rate state
//!   machine with administrative overrides
//! - **Bulkheads**: a semaphore gate with bounded acquire wait and a bounded
//!   thread pool for offloaded work
//! - **Retry**: bounded attempts with fixed or exponential backoff, an
//!   overall deadline, and per-unit outcome counters
//!
//! ## Architecture
//!
//! Everything here is generic over the operation error type `E` and over a
//! [`Clock`]. Deciding *which* errors count as failures or are worth a retry
//! is left to the caller through predicates and the [`RetryPolicy`] trait;
//! `relaygate-core` plugs the adapter error taxonomy in at that seam.
//!
//! | Primitive | Blocking behaviour |
//! |-----------|--------------------|
//! | [`CircuitBreaker`] | Never blocks; permits or rejects immediately |
//! | [`SemaphoreBulkhead`] | Blocks (sync) or suspends (async) up to `max_wait` |
//! | [`ThreadPoolBulkhead`] | Never blocks the submitter; rejects when saturated |
//! | [`Retry`] | Sleeps the thread (sync) or the task (async) between attempts |

pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod retry;
pub mod sliding_window;
pub mod thread_pool;

// Re-export bulkhead types
pub use bulkhead::{BulkheadConfig, BulkheadMetrics, BulkheadPermit, SemaphoreBulkhead};
// Re-export circuit breaker types
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitState, Outcome, StateTransition, TransitionListener,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
// Re-export retry types
pub use retry::{
    BackoffStrategy, Retry, RetryConfig, RetryConfigBuilder, RetryDecision, RetryError,
    RetryMetricsSnapshot, RetryPolicy, RetryResult,
};
pub use sliding_window::{SlidingWindow, WindowSnapshot, WindowType};
pub use thread_pool::{PoolHandle, ThreadPoolConfig, ThreadPoolBulkhead, ThreadPoolMetrics};
