//! Observable resilience events
//!
//! Services describe what happened as [`ResilienceEvent`] values and hand
//! them to an [`EventSink`]. The concrete metrics backend lives outside the
//! core; the sinks here cover logging, tests and opting out.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use relaygate_common::resilience::CircuitState;
use relaygate_domain::{ErrorCategory, ErrorSeverity, PolicyKey};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Which kind of live unit an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Retry,
    CircuitBreaker,
    Bulkhead,
    ThreadPool,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Retry => "retry",
            UnitKind::CircuitBreaker => "circuit_breaker",
            UnitKind::Bulkhead => "bulkhead",
            UnitKind::ThreadPool => "thread_pool",
        }
    }
}

/// Operator action applied to a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Reset,
    ForceOpen,
    Disable,
    HalfOpen,
}

impl AdminAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdminAction::Reset => "reset",
            AdminAction::ForceOpen => "force_open",
            AdminAction::Disable => "disable",
            AdminAction::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResilienceEvent {
    UnitCreated {
        key: PolicyKey,
        unit: UnitKind,
    },
    StateTransition {
        key: PolicyKey,
        from: CircuitState,
        to: CircuitState,
    },
    CallRejected {
        key: PolicyKey,
        unit: UnitKind,
    },
    RetriesExhausted {
        key: PolicyKey,
        attempts: u32,
        deadline_exceeded: bool,
    },
    FallbackInvoked {
        key: PolicyKey,
        unit: UnitKind,
    },
    AdminOverride {
        key: PolicyKey,
        action: AdminAction,
    },
    FailureObserved {
        key: PolicyKey,
        category: ErrorCategory,
        severity: ErrorSeverity,
        consecutive_candidates: u32,
        forced_open: bool,
    },
}

impl ResilienceEvent {
    pub fn key(&self) -> &PolicyKey {
        match self {
            Self::UnitCreated { key, .. }
            | Self::StateTransition { key, .. }
            | Self::CallRejected { key, .. }
            | Self::RetriesExhausted { key, .. }
            | Self::FallbackInvoked { key, .. }
            | Self::AdminOverride { key, .. }
            | Self::FailureObserved { key, .. } => key,
        }
    }

    /// Metric-style name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::UnitCreated { .. } => "unit_created",
            Self::StateTransition { .. } => "state_transition",
            Self::CallRejected { .. } => "call_rejected",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::FallbackInvoked { .. } => "fallback_invoked",
            Self::AdminOverride { .. } => "admin_override",
            Self::FailureObserved { .. } => "failure_observed",
        }
    }
}

/// Receiver for resilience events
///
/// Implementations must be cheap and must not block: events are emitted on
/// the call path, sometimes from a breaker transition listener.
pub trait EventSink: Send + Sync + Debug {
    fn emit(&self, event: &ResilienceEvent);
}

/// Shared handle to a sink
pub type SharedEventSink = Arc<dyn EventSink>;

/// Sink that drops every event
#[derive(Debug, Clone, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &ResilienceEvent) {
        // No-op
    }
}

/// Sink that turns events into structured log lines
///
/// Transitions into OPEN log at `error`, other availability changes at
/// `warn`.
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &ResilienceEvent) {
        let key = event.key();
        let adapter_type = key.adapter_type();
        let adapter_id = key.adapter_id();

        match event {
            ResilienceEvent::StateTransition { from, to, .. } => match to {
                CircuitState::Open => {
                    error!(adapter_type, adapter_id, from = %from, to = %to, "Circuit breaker opened");
                }
                CircuitState::ForcedOpen | CircuitState::Disabled => {
                    warn!(adapter_type, adapter_id, from = %from, to = %to, "Circuit breaker overridden");
                }
                _ => info!(adapter_type, adapter_id, from = %from, to = %to, "Circuit breaker transition"),
            },
            ResilienceEvent::AdminOverride { action, .. } => {
                // The service logs the override itself at warn/error
                debug!(adapter_type, adapter_id, action = action.as_str(), "Operator override applied");
            }
            ResilienceEvent::CallRejected { unit, .. } => {
                warn!(adapter_type, adapter_id, unit = unit.as_str(), "Call rejected");
            }
            ResilienceEvent::RetriesExhausted { attempts, deadline_exceeded, .. } => {
                warn!(adapter_type, adapter_id, attempts, deadline_exceeded, "Retries exhausted");
            }
            ResilienceEvent::FallbackInvoked { unit, .. } => {
                info!(adapter_type, adapter_id, unit = unit.as_str(), "Fallback invoked");
            }
            ResilienceEvent::UnitCreated { unit, .. } => {
                info!(adapter_type, adapter_id, unit = unit.as_str(), "Resilience unit created");
            }
            ResilienceEvent::FailureObserved {
                category,
                severity,
                consecutive_candidates,
                forced_open,
                ..
            } => {
                if *forced_open {
                    error!(
                        adapter_type,
                        adapter_id,
                        category = %category,
                        severity = %severity,
                        consecutive_candidates,
                        "Failure monitor forced circuit open"
                    );
                } else {
                    info!(
                        adapter_type,
                        adapter_id,
                        category = %category,
                        severity = %severity,
                        consecutive_candidates,
                        "Failure observed"
                    );
                }
            }
        }
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<ResilienceEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|event| event.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Sink that forwards to several others
#[derive(Debug, Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<SharedEventSink>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<SharedEventSink>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: &ResilienceEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
