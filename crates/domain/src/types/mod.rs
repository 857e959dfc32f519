//! Domain types and models
//!
//! Everything the resilience layer keys on or reports about: which adapter
//! a call belongs to, what went wrong, and how that failure was judged.

pub mod adapter_error;
pub mod classification;
pub mod policy_key;

pub use adapter_error::{AdapterError, ErrorKind, StatusBearing, VendorError, VendorErrorGroup};
pub use classification::{ErrorCategory, ErrorClassification, ErrorSeverity};
pub use policy_key::{AdapterCategory, PolicyKey};
