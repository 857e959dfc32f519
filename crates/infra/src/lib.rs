//! # RelayGate Infrastructure
//!
//! Ambient infrastructure around the resilience core.
//!
//! This crate contains:
//! - Configuration loading from `RELAYGATE_*` variables and TOML/JSON files
//! - Tracing subscriber setup driven by [`LoggingConfig`](relaygate_domain::LoggingConfig)
//! - A Prometheus-backed [`EventSink`](relaygate_core::EventSink)

pub mod config;
pub mod observability;

pub use observability::{init_tracing, PrometheusEventSink};
