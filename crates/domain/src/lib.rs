//! # RelayGate Domain
//!
//! Domain types for the RelayGate resilience layer.
//!
//! This crate contains:
//! - Policy keys and adapter categories
//! - The adapter error taxonomy and classification value objects
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other RelayGate crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod errors;
pub mod macros;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
