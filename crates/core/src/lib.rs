//! # RelayGate Core
//!
//! Resilience control layer for integration adapters - no infrastructure
//! dependencies.
//!
//! This crate contains:
//! - Error classification with memoization
//! - Per-category retry, circuit breaker and bulkhead policy registries
//! - Services owning the live resilience units per `(adapter_type, adapter_id)`
//! - The [`ResilienceFacade`] composing them for every adapter call
//! - The [`EventSink`] port for metrics backends
//!
//! ## Architecture Principles
//! - Depends only on `relaygate-common` and `relaygate-domain`
//! - Policies are built once and read-only afterwards
//! - Live units are created lazily and atomically per key
//! - Metrics leave the crate as [`ResilienceEvent`] values

pub mod classifier;
pub mod error;
pub mod events;
pub mod facade;
pub mod monitor;
pub mod policy;
pub mod service;

pub use classifier::ErrorClassifier;
pub use error::{ExecutionError, ExecutionResult};
pub use events::{
    AdminAction, EventSink, FanoutEventSink, NoOpEventSink, RecordingEventSink, ResilienceEvent,
    SharedEventSink, TracingEventSink, UnitKind,
};
pub use facade::{FailureReport, HealthReport, ResilienceFacade, ResolvedTuning};
pub use monitor::{FailureMonitor, MonitorDecision};
pub use policy::{
    AdapterRetryPolicy, BulkheadPolicy, BulkheadPolicyRegistry, CircuitBreakerPolicy,
    CircuitBreakerPolicyRegistry, RetryPolicyRegistry,
};
pub use service::bulkhead::OffloadHandle;
pub use service::{BulkheadService, CircuitBreakerService, CircuitHealth, RetryService, UnitReport};
