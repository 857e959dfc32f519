//! Circuit breaker units per policy key

use std::future::Future;
use std::sync::Arc;

use relaygate_common::resilience::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitState, Outcome, ResilienceError, StateTransition,
};
use relaygate_domain::{AdapterError, PolicyKey, ResilienceSettings};
use serde::Serialize;
use tracing::{error, instrument, warn};

use super::{UnitCache, UnitReport};
use crate::error::{ExecutionError, ExecutionResult};
use crate::events::{AdminAction, ResilienceEvent, SharedEventSink, UnitKind};
use crate::policy::{CircuitBreakerPolicy, CircuitBreakerPolicyRegistry};

/// Health view of one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitHealth {
    pub state: CircuitState,
    /// Percent; absent until the window holds the minimum number of calls
    pub failure_rate: Option<f32>,
    pub slow_call_rate: Option<f32>,
    pub buffered_calls: u32,
    pub failed_calls: u32,
    pub slow_calls: u32,
    pub successful_calls: u32,
    pub not_permitted_calls: u64,
}

impl From<CircuitBreakerMetrics> for CircuitHealth {
    fn from(metrics: CircuitBreakerMetrics) -> Self {
        Self {
            state: metrics.state,
            failure_rate: metrics.failure_rate,
            slow_call_rate: metrics.slow_call_rate,
            buffered_calls: metrics.buffered_calls,
            failed_calls: metrics.failed_calls,
            slow_calls: metrics.slow_calls,
            successful_calls: metrics.successful_calls,
            not_permitted_calls: metrics.not_permitted_calls,
        }
    }
}

/// Guards adapter calls with the circuit breaker of their key
pub struct CircuitBreakerService {
    registry: Arc<CircuitBreakerPolicyRegistry>,
    units: UnitCache<CircuitBreaker>,
}

impl CircuitBreakerService {
    pub fn new(
        registry: Arc<CircuitBreakerPolicyRegistry>,
        settings: &ResilienceSettings,
        sink: SharedEventSink,
    ) -> Self {
        Self {
            registry,
            units: UnitCache::new(
                UnitKind::CircuitBreaker,
                sink,
                settings.live_unit_warning_threshold,
            ),
        }
    }

    /// Run a synchronous call through the breaker
    pub fn execute_with_circuit_breaker<T, F>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Result<T, AdapterError>,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        self.guard(&key, || operation().map_err(|source| ExecutionError::operation(&key, source)))
    }

    /// Run a synchronous call; `fallback` supplies the result only when the
    /// breaker rejects the call. Operation failures propagate.
    pub fn execute_with_fallback<T, F, G>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
        fallback: G,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Result<T, AdapterError>,
        G: FnOnce() -> Result<T, AdapterError>,
    {
        match self.execute_with_circuit_breaker(adapter_type, adapter_id, operation) {
            Err(err @ ExecutionError::CircuitOpen { .. }) => {
                let key = err.key().clone();
                warn!(adapter_type, adapter_id, error = %err, "Circuit open, invoking fallback");
                self.units.sink().emit(&ResilienceEvent::FallbackInvoked {
                    key: key.clone(),
                    unit: UnitKind::CircuitBreaker,
                });
                fallback().map_err(|source| ExecutionError::operation(&key, source))
            }
            other => other,
        }
    }

    /// Run an async call through the breaker
    pub async fn execute_async<T, F, Fut>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        self.guard_async(&key, || async {
            operation().await.map_err(|source| ExecutionError::operation(&key, source))
        })
        .await
    }

    /// Whether the breaker currently rejects calls. Keys without a live unit
    /// are closed.
    pub fn is_open(&self, adapter_type: &str, adapter_id: &str) -> bool {
        self.state(adapter_type, adapter_id).is_some_and(CircuitState::is_rejecting)
    }

    pub fn state(&self, adapter_type: &str, adapter_id: &str) -> Option<CircuitState> {
        self.units.get(&PolicyKey::new(adapter_type, adapter_id)).map(|unit| unit.state())
    }

    pub fn health_status(&self, adapter_type: &str, adapter_id: &str) -> Option<CircuitHealth> {
        self.units
            .get(&PolicyKey::new(adapter_type, adapter_id))
            .map(|unit| CircuitHealth::from(unit.metrics()))
    }

    pub fn all_statuses(&self) -> Vec<UnitReport<CircuitHealth>> {
        self.units
            .snapshot()
            .into_iter()
            .map(|(key, unit)| UnitReport { key, metrics: CircuitHealth::from(unit.metrics()) })
            .collect()
    }

    /// Return the breaker to CLOSED with an empty window
    pub fn reset_circuit_breaker(&self, adapter_type: &str, adapter_id: &str) -> ExecutionResult<()> {
        let key = PolicyKey::new(adapter_type, adapter_id);
        warn!(adapter_type, adapter_id, "Circuit breaker reset by operator");
        self.unit(&key)?.reset();
        self.admin_event(key, AdminAction::Reset);
        Ok(())
    }

    /// Reject every call until the breaker is reset
    pub fn force_open(&self, adapter_type: &str, adapter_id: &str) -> ExecutionResult<()> {
        let key = PolicyKey::new(adapter_type, adapter_id);
        error!(adapter_type, adapter_id, "Circuit breaker forced open");
        self.unit(&key)?.force_open();
        self.admin_event(key, AdminAction::ForceOpen);
        Ok(())
    }

    /// Permit every call and stop recording outcomes
    pub fn disable(&self, adapter_type: &str, adapter_id: &str) -> ExecutionResult<()> {
        let key = PolicyKey::new(adapter_type, adapter_id);
        warn!(adapter_type, adapter_id, "Circuit breaker disabled by operator");
        self.unit(&key)?.disable();
        self.admin_event(key, AdminAction::Disable);
        Ok(())
    }

    /// Start a trial period now. This is the manual recovery path for
    /// breakers without automatic half-open.
    pub fn transition_to_half_open(
        &self,
        adapter_type: &str,
        adapter_id: &str,
    ) -> ExecutionResult<()> {
        let key = PolicyKey::new(adapter_type, adapter_id);
        warn!(adapter_type, adapter_id, "Circuit breaker moved to half-open by operator");
        self.unit(&key)?.transition_to_half_open();
        self.admin_event(key, AdminAction::HalfOpen);
        Ok(())
    }

    pub fn policy_for(&self, adapter_type: &str) -> Arc<CircuitBreakerPolicy> {
        self.registry.resolve(adapter_type)
    }

    pub fn remove(&self, adapter_type: &str, adapter_id: &str) -> bool {
        self.units.remove(&PolicyKey::new(adapter_type, adapter_id)).is_some()
    }

    pub fn live_units(&self) -> usize {
        self.units.len()
    }

    /// Run an operation that already reports [`ExecutionError`], counting
    /// its adapter failure with the key's record/ignore predicates.
    ///
    /// Errors that carry no adapter failure are not recorded.
    #[instrument(
        skip_all,
        level = "debug",
        fields(adapter_type = key.adapter_type(), adapter_id = key.adapter_id())
    )]
    pub(crate) fn guard<T, F>(&self, key: &PolicyKey, operation: F) -> ExecutionResult<T>
    where
        F: FnOnce() -> ExecutionResult<T>,
    {
        let unit = self.unit(key)?;
        let policy = self.registry.resolve(key.adapter_type());
        unit.call_classified(operation, |err| classify(&policy, err))
            .map_err(|err| self.flatten(key, err))
    }

    #[instrument(
        skip_all,
        level = "debug",
        fields(adapter_type = key.adapter_type(), adapter_id = key.adapter_id())
    )]
    pub(crate) async fn guard_async<T, F, Fut>(
        &self,
        key: &PolicyKey,
        operation: F,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExecutionResult<T>>,
    {
        let unit = self.unit(key)?;
        let policy = self.registry.resolve(key.adapter_type());
        unit.execute_classified(operation, |err| classify(&policy, err))
            .await
            .map_err(|err| self.flatten(key, err))
    }

    pub(crate) fn force_open_key(&self, key: &PolicyKey) -> ExecutionResult<()> {
        self.force_open(key.adapter_type(), key.adapter_id())
    }

    fn unit(&self, key: &PolicyKey) -> ExecutionResult<Arc<CircuitBreaker>> {
        self.units.get_or_try_create(key, || {
            let policy = self.registry.resolve(key.adapter_type());
            let breaker = CircuitBreaker::new(policy.config().clone())?;

            let sink = Arc::clone(self.units.sink());
            let listener_key = key.clone();
            breaker.on_transition(Arc::new(move |transition: &StateTransition| {
                sink.emit(&ResilienceEvent::StateTransition {
                    key: listener_key.clone(),
                    from: transition.from,
                    to: transition.to,
                });
            }));
            Ok::<_, relaygate_common::resilience::ConfigError>(breaker)
        })
    }

    fn flatten(&self, key: &PolicyKey, err: ResilienceError<ExecutionError>) -> ExecutionError {
        if let ResilienceError::CircuitOpen { state } = &err {
            warn!(
                adapter_type = key.adapter_type(),
                adapter_id = key.adapter_id(),
                state = %state,
                "Circuit breaker rejected call"
            );
            self.units.sink().emit(&ResilienceEvent::CallRejected {
                key: key.clone(),
                unit: UnitKind::CircuitBreaker,
            });
        }
        ExecutionError::from_layer(key, err)
    }

    fn admin_event(&self, key: PolicyKey, action: AdminAction) {
        self.units.sink().emit(&ResilienceEvent::AdminOverride { key, action });
    }
}

fn classify(policy: &CircuitBreakerPolicy, err: &ExecutionError) -> Outcome {
    err.adapter_error().map_or(Outcome::Ignored, |source| policy.outcome_for(source))
}

impl std::fmt::Debug for CircuitBreakerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerService").field("live_units", &self.units.len()).finish()
    }
}
