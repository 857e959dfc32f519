//! Live resilience units keyed by `(adapter_type, adapter_id)`
//!
//! Each service owns one [`UnitCache`] and creates units lazily from the
//! policy registered for the key's category. Units live until removed
//! explicitly; a warning is logged when a cache grows past the configured
//! threshold.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod retry;

use std::fmt::Display;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relaygate_domain::PolicyKey;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ExecutionError, ExecutionResult};
use crate::events::{ResilienceEvent, SharedEventSink, UnitKind};

pub use bulkhead::BulkheadService;
pub use circuit_breaker::{CircuitBreakerService, CircuitHealth};
pub use retry::RetryService;

/// Metrics of one live unit, tagged with its key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitReport<M> {
    pub key: PolicyKey,
    pub metrics: M,
}

pub(crate) struct UnitCache<U> {
    kind: UnitKind,
    units: DashMap<PolicyKey, Arc<U>>,
    sink: SharedEventSink,
    warning_threshold: usize,
}

impl<U> UnitCache<U> {
    pub(crate) fn new(kind: UnitKind, sink: SharedEventSink, warning_threshold: usize) -> Self {
        Self { kind, units: DashMap::new(), sink, warning_threshold }
    }

    /// Existing unit for `key`, or a new one from `build`.
    ///
    /// Creation is atomic per key: concurrent first calls observe the same
    /// unit and `build` runs at most once.
    pub(crate) fn get_or_try_create<F, E>(&self, key: &PolicyKey, build: F) -> ExecutionResult<Arc<U>>
    where
        F: FnOnce() -> Result<U, E>,
        E: Display,
    {
        if let Some(unit) = self.units.get(key) {
            return Ok(Arc::clone(unit.value()));
        }

        let (unit, created) = match self.units.entry(key.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let unit = Arc::new(build().map_err(|err| ExecutionError::configuration(key, err))?);
                entry.insert(Arc::clone(&unit));
                (unit, true)
            }
        };

        if created {
            self.on_created(key);
        }
        Ok(unit)
    }

    pub(crate) fn get(&self, key: &PolicyKey) -> Option<Arc<U>> {
        self.units.get(key).map(|unit| Arc::clone(unit.value()))
    }

    pub(crate) fn remove(&self, key: &PolicyKey) -> Option<Arc<U>> {
        let removed = self.units.remove(key).map(|(_, unit)| unit);
        if removed.is_some() {
            debug!(
                adapter_type = key.adapter_type(),
                adapter_id = key.adapter_id(),
                unit = self.kind.as_str(),
                "Resilience unit removed"
            );
        }
        removed
    }

    /// Every live unit, ordered by key
    pub(crate) fn snapshot(&self) -> Vec<(PolicyKey, Arc<U>)> {
        let mut units: Vec<_> =
            self.units.iter().map(|entry| (entry.key().clone(), Arc::clone(entry.value()))).collect();
        units.sort_by(|a, b| a.0.cmp(&b.0));
        units
    }

    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn sink(&self) -> &SharedEventSink {
        &self.sink
    }

    fn on_created(&self, key: &PolicyKey) {
        debug!(
            adapter_type = key.adapter_type(),
            adapter_id = key.adapter_id(),
            unit = self.kind.as_str(),
            "Resilience unit created"
        );
        self.sink.emit(&ResilienceEvent::UnitCreated { key: key.clone(), unit: self.kind });

        let live = self.units.len();
        if live > self.warning_threshold {
            warn!(
                unit = self.kind.as_str(),
                live,
                threshold = self.warning_threshold,
                "Live resilience units above warning threshold; adapter ids may be unbounded"
            );
        }
    }
}
