//! Consecutive-failure watchdog
//!
//! Adapters report failures here off the call path. Runs of breaker
//! candidates against one key trip that key's breaker into FORCED_OPEN,
//! which holds until an operator resets it.

use std::sync::Arc;

use dashmap::DashMap;
use relaygate_domain::{AdapterError, ErrorClassification, PolicyKey, ResilienceSettings};
use serde::Serialize;
use tracing::error;

use crate::classifier::ErrorClassifier;
use crate::events::{ResilienceEvent, SharedEventSink};
use crate::service::CircuitBreakerService;

/// What the monitor concluded from one failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorDecision {
    pub classification: ErrorClassification,
    /// Length of the current run of breaker candidates, including this one
    pub consecutive_candidates: u32,
    pub forced_open: bool,
}

pub struct FailureMonitor {
    classifier: ErrorClassifier,
    breakers: Arc<CircuitBreakerService>,
    runs: DashMap<PolicyKey, u32>,
    threshold: u32,
    sink: SharedEventSink,
}

impl FailureMonitor {
    pub fn new(
        classifier: ErrorClassifier,
        breakers: Arc<CircuitBreakerService>,
        settings: &ResilienceSettings,
        sink: SharedEventSink,
    ) -> Self {
        Self {
            classifier,
            breakers,
            runs: DashMap::new(),
            threshold: settings.monitor_force_open_threshold,
            sink,
        }
    }

    /// Classify a failure in the key's category context and update the run
    /// of breaker candidates. Reaching the threshold force-opens the breaker
    /// and starts a new run.
    pub fn observe(&self, key: &PolicyKey, error: &AdapterError) -> MonitorDecision {
        let classification = self.classifier.classify_for(error, key.category());

        let (consecutive_candidates, trip) = {
            let mut run = self.runs.entry(key.clone()).or_insert(0);
            if classification.circuit_breaker_candidate {
                *run += 1;
                let count = *run;
                let trip = count >= self.threshold;
                if trip {
                    *run = 0;
                }
                (count, trip)
            } else {
                *run = 0;
                (0, false)
            }
        };

        let forced_open = trip && self.force_open(key, &classification);

        self.sink.emit(&ResilienceEvent::FailureObserved {
            key: key.clone(),
            category: classification.category,
            severity: classification.severity,
            consecutive_candidates,
            forced_open,
        });

        MonitorDecision { classification, consecutive_candidates, forced_open }
    }

    /// Current run length for a key
    pub fn consecutive_candidates(&self, key: &PolicyKey) -> u32 {
        self.runs.get(key).map_or(0, |run| *run)
    }

    /// Forget the run for a key
    pub fn clear(&self, key: &PolicyKey) {
        self.runs.remove(key);
    }

    /// Consecutive breaker candidates that force a circuit open
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    fn force_open(&self, key: &PolicyKey, classification: &ErrorClassification) -> bool {
        error!(
            adapter_type = key.adapter_type(),
            adapter_id = key.adapter_id(),
            category = %classification.category,
            severity = %classification.severity,
            threshold = self.threshold,
            "Consecutive breaker-candidate failures reached threshold, forcing circuit open"
        );
        match self.breakers.force_open_key(key) {
            Ok(()) => true,
            Err(err) => {
                error!(key = %key, error = %err, "Failed to force circuit open");
                false
            }
        }
    }
}

impl std::fmt::Debug for FailureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureMonitor")
            .field("threshold", &self.threshold)
            .field("tracked_keys", &self.runs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use relaygate_common::resilience::CircuitState;
    use relaygate_domain::ErrorCategory;

    use super::*;
    use crate::events::RecordingEventSink;
    use crate::policy::CircuitBreakerPolicyRegistry;

    fn monitor(threshold: u32) -> (FailureMonitor, Arc<CircuitBreakerService>, RecordingEventSink) {
        let sink = RecordingEventSink::new();
        let settings =
            ResilienceSettings { monitor_force_open_threshold: threshold, ..Default::default() };
        let breakers = Arc::new(CircuitBreakerService::new(
            Arc::new(CircuitBreakerPolicyRegistry::new().unwrap()),
            &settings,
            Arc::new(sink.clone()),
        ));
        let monitor = FailureMonitor::new(
            ErrorClassifier::default(),
            Arc::clone(&breakers),
            &settings,
            Arc::new(sink.clone()),
        );
        (monitor, breakers, sink)
    }

    #[test]
    fn test_threshold_forces_breaker_open() {
        let (monitor, breakers, sink) = monitor(3);
        let key = PolicyKey::new("sap-like", "erp-1");

        for expected in 1..3 {
            let decision = monitor.observe(&key, &AdapterError::timeout("read timed out"));
            assert_eq!(decision.consecutive_candidates, expected);
            assert!(!decision.forced_open);
        }
        let decision = monitor.observe(&key, &AdapterError::timeout("read timed out"));
        assert!(decision.forced_open);
        assert_eq!(decision.classification.category, ErrorCategory::Timeout);
        assert_eq!(breakers.state("sap-like", "erp-1"), Some(CircuitState::ForcedOpen));
        assert_eq!(monitor.consecutive_candidates(&key), 0);
        assert_eq!(sink.count("failure_observed"), 3);
    }

    #[test]
    fn test_non_candidate_resets_the_run() {
        let (monitor, breakers, _) = monitor(2);
        let key = PolicyKey::new("sap-like", "erp-2");

        monitor.observe(&key, &AdapterError::timeout("slow"));
        let decision = monitor.observe(&key, &AdapterError::illegal_argument("bad input"));
        assert_eq!(decision.consecutive_candidates, 0);
        assert!(!decision.classification.circuit_breaker_candidate);

        let decision = monitor.observe(&key, &AdapterError::timeout("slow"));
        assert_eq!(decision.consecutive_candidates, 1);
        assert!(!decision.forced_open);
        assert!(breakers.state("sap-like", "erp-2").is_none());
    }

    #[test]
    fn test_medium_severity_outside_critical_context_is_not_counted() {
        let (monitor, _, _) = monitor(1);
        let key = PolicyKey::new("http", "svc");

        let decision = monitor.observe(&key, &AdapterError::timeout("slow"));
        assert!(!decision.classification.circuit_breaker_candidate);
        assert!(!decision.forced_open);

        let decision = monitor.observe(&key, &AdapterError::io("No space left on device"));
        assert_eq!(decision.classification.category, ErrorCategory::Resource);
        assert!(decision.forced_open);
    }

    #[test]
    fn test_runs_are_tracked_per_key() {
        let (monitor, _, _) = monitor(5);
        let first = PolicyKey::new("rfc", "orders");
        let second = PolicyKey::new("rfc", "billing");

        monitor.observe(&first, &AdapterError::connection_refused("down"));
        monitor.observe(&first, &AdapterError::connection_refused("down"));
        monitor.observe(&second, &AdapterError::connection_refused("down"));

        assert_eq!(monitor.consecutive_candidates(&first), 2);
        assert_eq!(monitor.consecutive_candidates(&second), 1);
        monitor.clear(&first);
        assert_eq!(monitor.consecutive_candidates(&first), 0);
    }
}
