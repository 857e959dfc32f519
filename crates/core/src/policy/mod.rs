//! Per-category policy registries
//!
//! Each registry is built once at startup from fixed tuning tables and is
//! read-only afterwards. Adapter type tags resolve to a category through
//! [`AdapterCategory::resolve`]; unknown tags get the default bundle.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod retry;

use relaygate_domain::{AdapterCategory, Result};

pub use bulkhead::{BulkheadPolicy, BulkheadPolicyRegistry};
pub use circuit_breaker::{CircuitBreakerPolicy, CircuitBreakerPolicyRegistry};
pub use retry::{AdapterRetryPolicy, RetryPolicyRegistry};

/// One value per adapter category
#[derive(Debug, Clone)]
pub struct CategoryTable<T> {
    http: T,
    database: T,
    messaging: T,
    file: T,
    critical: T,
    default: T,
}

impl<T> CategoryTable<T> {
    /// Build every entry, failing on the first error.
    pub fn try_build(mut build: impl FnMut(AdapterCategory) -> Result<T>) -> Result<Self> {
        Ok(Self {
            http: build(AdapterCategory::Http)?,
            database: build(AdapterCategory::Database)?,
            messaging: build(AdapterCategory::Messaging)?,
            file: build(AdapterCategory::File)?,
            critical: build(AdapterCategory::CriticalSystem)?,
            default: build(AdapterCategory::Default)?,
        })
    }

    pub fn get(&self, category: AdapterCategory) -> &T {
        match category {
            AdapterCategory::Http => &self.http,
            AdapterCategory::Database => &self.database,
            AdapterCategory::Messaging => &self.messaging,
            AdapterCategory::File => &self.file,
            AdapterCategory::CriticalSystem => &self.critical,
            AdapterCategory::Default => &self.default,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (AdapterCategory, &T)> + '_ {
        AdapterCategory::ALL.into_iter().map(move |category| (category, self.get(category)))
    }
}

pub(crate) fn config_error(
    category: AdapterCategory,
    err: relaygate_common::resilience::ConfigError,
) -> relaygate_domain::RelayGateError {
    relaygate_domain::RelayGateError::Config(format!("{category} policy: {err}"))
}
