//! Prometheus exporter for resilience events
//!
//! Series are registered on a registry owned by the caller so several
//! sinks (and test cases) never collide in the process-wide default
//! registry.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use relaygate_common::resilience::CircuitState;
use relaygate_core::{EventSink, ResilienceEvent};

use super::ObservabilityResult;

const NAMESPACE: &str = "relaygate";

/// Event sink that keeps Prometheus counters and gauges up to date
#[derive(Clone)]
pub struct PrometheusEventSink {
    registry: Registry,
    units_created: IntCounterVec,
    circuit_state: IntGaugeVec,
    circuit_transitions: IntCounterVec,
    calls_rejected: IntCounterVec,
    retries_exhausted: IntCounterVec,
    fallbacks: IntCounterVec,
    admin_overrides: IntCounterVec,
    failures_observed: IntCounterVec,
}

impl PrometheusEventSink {
    /// Register the resilience series on `registry`
    ///
    /// # Errors
    /// Fails when a series with the same name is already registered.
    pub fn new(registry: &Registry) -> ObservabilityResult<Self> {
        let units_created = counter_vec(
            registry,
            "units_created_total",
            "Resilience units created",
            &["adapter_type", "unit"],
        )?;
        let circuit_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open, 3=forced-open, 4=disabled)",
            )
            .namespace(NAMESPACE),
            &["adapter_type", "adapter_id"],
        )?;
        registry.register(Box::new(circuit_state.clone()))?;
        let circuit_transitions = counter_vec(
            registry,
            "circuit_breaker_transitions_total",
            "Circuit breaker state transitions",
            &["adapter_type", "adapter_id", "from", "to"],
        )?;
        let calls_rejected = counter_vec(
            registry,
            "calls_rejected_total",
            "Calls rejected by a protection layer",
            &["adapter_type", "adapter_id", "unit"],
        )?;
        let retries_exhausted = counter_vec(
            registry,
            "retries_exhausted_total",
            "Calls that failed after their last retry",
            &["adapter_type", "adapter_id", "deadline_exceeded"],
        )?;
        let fallbacks = counter_vec(
            registry,
            "fallbacks_total",
            "Fallbacks invoked in place of a failed call",
            &["adapter_type", "unit"],
        )?;
        let admin_overrides = counter_vec(
            registry,
            "admin_overrides_total",
            "Operator overrides applied to circuit breakers",
            &["adapter_type", "adapter_id", "action"],
        )?;
        let failures_observed = counter_vec(
            registry,
            "failures_observed_total",
            "Failures reported to the consecutive-failure monitor",
            &["adapter_type", "category", "severity", "forced_open"],
        )?;

        Ok(Self {
            registry: registry.clone(),
            units_created,
            circuit_state,
            circuit_transitions,
            calls_rejected,
            retries_exhausted,
            fallbacks,
            admin_overrides,
            failures_observed,
        })
    }

    /// Text exposition of every series in the registry
    pub fn render(&self) -> ObservabilityResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> ObservabilityResult<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn state_value(state: CircuitState) -> i64 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
        CircuitState::ForcedOpen => 3,
        CircuitState::Disabled => 4,
    }
}

impl EventSink for PrometheusEventSink {
    fn emit(&self, event: &ResilienceEvent) {
        let key = event.key();
        let adapter_type = key.adapter_type();
        let adapter_id = key.adapter_id();

        match event {
            ResilienceEvent::UnitCreated { unit, .. } => {
                self.units_created.with_label_values(&[adapter_type, unit.as_str()]).inc();
            }
            ResilienceEvent::StateTransition { from, to, .. } => {
                self.circuit_state.with_label_values(&[adapter_type, adapter_id]).set(state_value(*to));
                let (from, to) = (from.to_string(), to.to_string());
                self.circuit_transitions
                    .with_label_values(&[adapter_type, adapter_id, from.as_str(), to.as_str()])
                    .inc();
            }
            ResilienceEvent::CallRejected { unit, .. } => {
                self.calls_rejected.with_label_values(&[adapter_type, adapter_id, unit.as_str()]).inc();
            }
            ResilienceEvent::RetriesExhausted { deadline_exceeded, .. } => {
                let deadline = if *deadline_exceeded { "true" } else { "false" };
                self.retries_exhausted.with_label_values(&[adapter_type, adapter_id, deadline]).inc();
            }
            ResilienceEvent::FallbackInvoked { unit, .. } => {
                self.fallbacks.with_label_values(&[adapter_type, unit.as_str()]).inc();
            }
            ResilienceEvent::AdminOverride { action, .. } => {
                self.admin_overrides
                    .with_label_values(&[adapter_type, adapter_id, action.as_str()])
                    .inc();
            }
            ResilienceEvent::FailureObserved { category, severity, forced_open, .. } => {
                let forced = if *forced_open { "true" } else { "false" };
                self.failures_observed
                    .with_label_values(&[adapter_type, category.as_str(), severity.as_str(), forced])
                    .inc();
            }
        }
    }
}

impl std::fmt::Debug for PrometheusEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusEventSink").field("namespace", &NAMESPACE).finish_non_exhaustive()
    }
}
