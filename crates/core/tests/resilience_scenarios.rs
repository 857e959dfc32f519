//! End-to-end scenarios through the resilience facade
//!
//! Each test drives the public surface the way an adapter would. Breaker
//! timing is checked against a mock clock; bulkhead waits and retry backoff
//! run on paused tokio time.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use relaygate_common::resilience::{CircuitBreaker, CircuitState, MockClock, ResilienceError};
use relaygate_core::{ExecutionError, ResilienceFacade};
use relaygate_domain::{
    AdapterCategory, AdapterError, ErrorCategory, ErrorSeverity, PolicyKey, ResilienceSettings,
};
use support::{facade, facade_with, scripted, CallCounter, RfcFault};
use tokio::sync::Semaphore;

#[test]
fn test_timeout_kinds_classify_as_timeout_whatever_the_message() {
    let (facade, _) = facade();
    let errors = [
        AdapterError::timeout("HTTP 404 while waiting"),
        AdapterError::socket_timeout("permission denied"),
        AdapterError::timeout(""),
    ];
    for error in &errors {
        assert_eq!(facade.classify(error).category, ErrorCategory::Timeout, "{error}");
    }
}

#[test]
fn test_classification_is_deterministic() {
    let (facade, _) = facade();
    let error = AdapterError::io("No space left on device");

    let first = facade.classify(&error);
    let second = facade.classify(&error);
    assert_eq!(first, second);
    assert_eq!(first.category, ErrorCategory::Resource);
    assert_eq!(first.severity, ErrorSeverity::Critical);

    let other = facade.classify(&AdapterError::io("connection reset by peer"));
    assert_ne!(other.message, first.message);
}

#[test]
fn test_unknown_adapter_type_resolves_to_default_everywhere() {
    let (facade, _) = facade();
    let adapter_type = "carrier-pigeon";

    assert_eq!(facade.retries().policy_for(adapter_type).category(), AdapterCategory::Default);
    assert_eq!(
        facade.circuit_breakers().policy_for(adapter_type).category(),
        AdapterCategory::Default
    );
    assert_eq!(facade.bulkheads().policy_for(adapter_type).category(), AdapterCategory::Default);

    let tuning = facade.tuning(adapter_type);
    assert_eq!(tuning.category, AdapterCategory::Default);
    assert_eq!(tuning.retry.max_attempts, 3);
    assert_eq!(tuning.circuit_breaker.sliding_window_size, 100);
    assert_eq!(tuning.bulkhead.max_concurrent_calls, 25);

    let value = facade.execute(adapter_type, "coop-7", || Ok::<_, AdapterError>("delivered"));
    assert_eq!(value.unwrap(), "delivered");
}

#[test]
fn test_retryable_failure_propagates_after_max_attempts() {
    let (facade, sink) = facade();
    let calls = CallCounter::new();

    let result: Result<(), _> =
        facade.execute("legacy", "ledger", scripted(vec![Err(AdapterError::runtime("flaky"))], &calls));

    match result {
        Err(ExecutionError::RetriesExhausted { attempts, source, .. }) => {
            assert_eq!(attempts, 3);
            assert_eq!(source.message(), "flaky");
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    assert_eq!(calls.get(), 3);
    assert_eq!(sink.count("retries_exhausted"), 1);

    let metrics = facade.retries().metrics("legacy", "ledger").unwrap();
    assert_eq!(metrics.failed_calls_with_retry, 1);
}

#[test]
fn test_fallback_supplies_result_after_max_attempts() {
    let (facade, sink) = facade();
    let calls = CallCounter::new();

    let value = facade.execute_with_fallback(
        "legacy",
        "ledger",
        scripted(vec![Err(AdapterError::runtime("flaky"))], &calls),
        || Ok("cached balance"),
    );

    assert_eq!(value.unwrap(), "cached balance");
    assert_eq!(calls.get(), 3);
    assert_eq!(sink.count("fallback_invoked"), 1);
}

#[test]
fn test_non_retryable_failure_runs_once_without_backoff() {
    let (facade, _) = facade_with(ResilienceSettings::default());
    let calls = CallCounter::new();

    let started = Instant::now();
    let result: Result<(), _> = facade.execute(
        "legacy",
        "ledger",
        scripted(vec![Err(AdapterError::illegal_argument("negative amount"))], &calls),
    );

    assert!(matches!(result, Err(ExecutionError::Operation { .. })));
    assert_eq!(calls.get(), 1);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_breaker_opens_at_failure_rate_and_short_circuits() {
    let (facade, sink) = facade();
    let breakers = facade.circuit_breakers();

    for _ in 0..5 {
        breakers.execute_with_circuit_breaker("http", "billing", || Ok::<_, AdapterError>(())).unwrap();
    }
    for _ in 0..4 {
        let _ = breakers.execute_with_circuit_breaker("http", "billing", || {
            Err::<(), _>(AdapterError::http(503, "Service Unavailable"))
        });
        assert!(!breakers.is_open("http", "billing"));
    }
    let _ = breakers.execute_with_circuit_breaker("http", "billing", || {
        Err::<(), _>(AdapterError::http(503, "Service Unavailable"))
    });
    assert_eq!(breakers.state("http", "billing"), Some(CircuitState::Open));

    let calls = CallCounter::new();
    let result = breakers.execute_with_circuit_breaker("http", "billing", || {
        calls.hit();
        Ok::<_, AdapterError>(())
    });
    assert!(matches!(result, Err(ExecutionError::CircuitOpen { state: CircuitState::Open, .. })));
    assert_eq!(calls.get(), 0);

    let health = breakers.health_status("http", "billing").unwrap();
    assert_eq!(health.failure_rate, Some(50.0));
    assert_eq!(health.not_permitted_calls, 1);
    assert_eq!(sink.count("state_transition"), 1);
}

#[test]
fn test_http_breaker_half_opens_after_wait_duration() {
    let (facade, _) = facade();
    let policy = facade.circuit_breakers().policy_for("http");
    let clock = MockClock::new();
    let breaker = CircuitBreaker::with_clock(policy.config().clone(), clock.clone()).unwrap();

    for _ in 0..5 {
        let _ = breaker.call_classified(
            || Err::<(), _>(AdapterError::http(502, "Bad Gateway")),
            |err| policy.outcome_for(err),
        );
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(29));
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(2));
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    for _ in 0..3 {
        breaker
            .call_classified(|| Ok::<_, AdapterError>(()), |err| policy.outcome_for(err))
            .unwrap();
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[test]
fn test_breaker_duration_includes_retry_backoff() {
    let (facade, _) = facade();
    let retry = facade.retries().policy_for("kafka");
    let policy = facade.circuit_breakers().policy_for("kafka");
    let clock = MockClock::new();
    let breaker = CircuitBreaker::with_clock(policy.config().clone(), clock.clone()).unwrap();

    let backoff: Duration = (0..retry.config().max_attempts - 1)
        .map(|retry_index| retry.config().backoff.calculate_delay(retry_index))
        .sum();
    assert_eq!(backoff, Duration::from_secs(3));

    breaker
        .call_classified(
            || {
                clock.advance(backoff + Duration::from_millis(5));
                Ok::<_, AdapterError>(())
            },
            |err| policy.outcome_for(err),
        )
        .unwrap();

    let metrics = breaker.metrics();
    assert_eq!(metrics.failed_calls, 0);
    assert_eq!(metrics.slow_calls, 1);
}

#[test]
fn test_critical_breaker_stays_open_until_operator_acts() {
    let (facade, _) = facade();
    let policy = facade.circuit_breakers().policy_for("sap-like");
    let clock = MockClock::new();
    let breaker = CircuitBreaker::with_clock(policy.config().clone(), clock.clone()).unwrap();

    for _ in 0..3 {
        let _ = breaker.call_classified(
            || Err::<(), _>(RfcFault::communication("RFC read timed out")),
            |err| policy.outcome_for(err),
        );
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance(Duration::from_secs(3600));
    assert_eq!(breaker.state(), CircuitState::Open);
    let rejected = breaker.call_classified(|| Ok::<_, AdapterError>(()), |err| policy.outcome_for(err));
    assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { state: CircuitState::Open })));

    breaker.transition_to_half_open();
    breaker.call_classified(|| Ok::<_, AdapterError>(()), |err| policy.outcome_for(err)).unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_bulkhead_rejects_call_beyond_capacity_after_max_wait() {
    let (facade, sink) = facade();
    let facade = Arc::new(facade);
    let gate = Arc::new(Semaphore::new(0));

    let holders: Vec<_> = (0..3)
        .map(|_| {
            let facade = Arc::clone(&facade);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                facade
                    .execute_async("sap-like", "erp-1", || {
                        let gate = Arc::clone(&gate);
                        async move {
                            let _permit = gate.acquire().await.map_err(|_| {
                                AdapterError::runtime("gate closed")
                            })?;
                            Ok(())
                        }
                    })
                    .await
            })
        })
        .collect();

    while facade.bulkheads().has_available_capacity("sap-like", "erp-1") {
        tokio::task::yield_now().await;
    }
    assert_eq!(facade.bulkheads().utilization_percentage("sap-like", "erp-1"), 100.0);

    let calls = CallCounter::new();
    let started = tokio::time::Instant::now();
    let result = facade
        .execute_async("sap-like", "erp-1", || {
            calls.hit();
            async { Ok::<_, AdapterError>(()) }
        })
        .await;

    match result {
        Err(ExecutionError::BulkheadFull { capacity, .. }) => assert_eq!(capacity, 3),
        other => panic!("expected a full bulkhead, got {other:?}"),
    }
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert_eq!(calls.get(), 0);
    assert_eq!(sink.count("call_rejected"), 1);

    gate.add_permits(3);
    for holder in holders {
        holder.await.unwrap().unwrap();
    }
    assert!(facade.bulkheads().has_available_capacity("sap-like", "erp-1"));
}

#[tokio::test(start_paused = true)]
async fn test_http_call_recovers_after_two_unavailable_responses() {
    let (facade, _) = facade();
    let calls = CallCounter::new();
    let mut op = scripted(
        vec![
            Err(AdapterError::http(503, "Service Unavailable")),
            Err(AdapterError::http(503, "Service Unavailable")),
            Ok(200u16),
        ],
        &calls,
    );

    let status = facade.execute_async("http", "orders", || std::future::ready(op())).await.unwrap();

    assert_eq!(status, 200);
    assert_eq!(calls.get(), 3);
    let retry = facade.retries().metrics("http", "orders").unwrap();
    assert_eq!(retry.successful_calls_with_retry, 1);
    assert_eq!(retry.failed_calls_with_retry + retry.failed_calls_without_retry, 0);

    let health = facade.circuit_breakers().health_status("http", "orders").unwrap();
    assert_eq!(health.state, CircuitState::Closed);
    assert_eq!(health.successful_calls, 1);
    assert_eq!(health.failed_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_critical_system_outage_trips_without_automatic_recovery() {
    let (facade, sink) = facade();
    let calls = CallCounter::new();
    let outage = RfcFault::communication("RFC read timed out");

    for _ in 0..3 {
        let result: Result<(), _> = facade
            .execute_async("sap-like", "erp-1", || {
                calls.hit();
                std::future::ready(Err(outage.clone()))
            })
            .await;
        match result {
            Err(ExecutionError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }
    assert_eq!(calls.get(), 6);

    let classification = facade.classify_for("sap-like", &outage);
    assert_eq!(classification.category, ErrorCategory::Timeout);
    assert_eq!(classification.severity, ErrorSeverity::High);
    assert!(classification.circuit_breaker_candidate);
    assert!(!facade.classify(&outage).circuit_breaker_candidate);

    assert_eq!(facade.circuit_breakers().state("sap-like", "erp-1"), Some(CircuitState::Open));
    assert!(!facade.tuning("sap-like").circuit_breaker.automatic_transition);

    let result: Result<(), _> = facade
        .execute_async("sap-like", "erp-1", || {
            calls.hit();
            std::future::ready(Ok(()))
        })
        .await;
    assert!(matches!(result, Err(ExecutionError::CircuitOpen { .. })));
    assert_eq!(calls.get(), 6);
    assert_eq!(sink.count("retries_exhausted"), 3);

    let report = facade.health_report();
    assert_eq!(report.open_circuits(), vec![&PolicyKey::new("sap-like", "erp-1")]);
}

#[test]
fn test_monitor_forces_breaker_open_after_consecutive_candidates() {
    let settings = ResilienceSettings { monitor_force_open_threshold: 2, ..Default::default() };
    let (facade, _) = facade_with(settings);
    let outage = RfcFault::communication("RFC read timed out");

    assert!(!facade.record_failure("rfc", "orders", &outage).forced_open);
    let decision = facade.record_failure("rfc", "orders", &outage);
    assert!(decision.forced_open);
    assert_eq!(facade.circuit_breakers().state("rfc", "orders"), Some(CircuitState::ForcedOpen));

    let logon = facade.record_failure("rfc", "billing", &RfcFault::logon("password expired"));
    assert!(!logon.classification.circuit_breaker_candidate);
    assert_eq!(logon.consecutive_candidates, 0);
}

#[test]
fn test_forced_open_rejects_until_reset() {
    let (facade, _) = facade();
    facade.force_open("rest", "catalog").unwrap();

    let calls = CallCounter::new();
    let result = facade.execute("rest", "catalog", || {
        calls.hit();
        Ok::<_, AdapterError>(())
    });
    match &result {
        Err(err @ ExecutionError::CircuitOpen { state, .. }) => {
            assert_eq!(*state, CircuitState::ForcedOpen);
            let report = facade.describe_failure(err);
            assert!(report.rejection);
            assert!(report.classification.is_none());
        }
        other => panic!("expected a forced-open rejection, got {other:?}"),
    }
    assert_eq!(calls.get(), 0);

    facade.reset_circuit_breaker("rest", "catalog").unwrap();
    facade.execute("rest", "catalog", || Ok::<_, AdapterError>(())).unwrap();
    assert_eq!(calls.get(), 0);
    assert_eq!(facade.circuit_breakers().state("rest", "catalog"), Some(CircuitState::Closed));
}

#[test]
fn test_invalid_settings_are_rejected() {
    let settings = ResilienceSettings { default_retry_attempts: 0, ..Default::default() };
    let sink = Arc::new(relaygate_core::NoOpEventSink);
    assert!(ResilienceFacade::new(&settings, sink).is_err());
}
