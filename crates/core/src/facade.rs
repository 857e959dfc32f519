//! Single entry point for guarded adapter calls
//!
//! Every call passes through the layers of its key from the outside in:
//!
//! ```text
//! Bulkhead -> CircuitBreaker -> Retry -> operation
//! ```
//!
//! The bulkhead slot is held for the whole retried call, and the breaker
//! records one outcome per retried call rather than one per attempt. The
//! duration the breaker measures therefore includes retry backoff: a
//! messaging call that succeeds on its fifth attempt has already slept 3s
//! and counts as slow.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use relaygate_common::resilience::{
    BulkheadMetrics, RetryMetricsSnapshot, ThreadPoolMetrics, WindowType,
};
use relaygate_domain::utils::serde::duration_millis;
use relaygate_domain::{
    AdapterCategory, AdapterError, ErrorClassification, PolicyKey, ResilienceSettings,
    StatusBearing,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::classifier::ErrorClassifier;
use crate::error::{ExecutionError, ExecutionResult};
use crate::events::{ResilienceEvent, SharedEventSink, UnitKind};
use crate::monitor::{FailureMonitor, MonitorDecision};
use crate::policy::{BulkheadPolicyRegistry, CircuitBreakerPolicyRegistry, RetryPolicyRegistry};
use crate::service::bulkhead::OffloadHandle;
use crate::service::{
    BulkheadService, CircuitBreakerService, CircuitHealth, RetryService, UnitReport,
};

/// Point-in-time view of every live unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub circuit_breakers: Vec<UnitReport<CircuitHealth>>,
    pub bulkheads: Vec<UnitReport<BulkheadMetrics>>,
    pub thread_pools: Vec<UnitReport<ThreadPoolMetrics>>,
    pub retries: Vec<UnitReport<RetryMetricsSnapshot>>,
}

impl HealthReport {
    /// Keys whose breaker currently rejects calls
    pub fn open_circuits(&self) -> Vec<&PolicyKey> {
        self.circuit_breakers
            .iter()
            .filter(|report| report.metrics.state.is_rejecting())
            .map(|report| &report.key)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryTuning {
    pub max_attempts: u32,
    pub backoff: String,
    pub max_total_duration_ms: Option<u64>,
    pub retries_server_error_results: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerTuning {
    pub failure_rate_threshold: f32,
    pub slow_call_rate_threshold: f32,
    #[serde(rename = "slow_call_duration_threshold_ms", with = "duration_millis")]
    pub slow_call_duration_threshold: Duration,
    #[serde(rename = "wait_duration_in_open_state_ms", with = "duration_millis")]
    pub wait_duration_in_open_state: Duration,
    pub sliding_window_type: WindowType,
    pub sliding_window_size: u32,
    pub minimum_number_of_calls: u32,
    pub permitted_calls_in_half_open: u32,
    pub automatic_transition: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkheadTuning {
    pub max_concurrent_calls: usize,
    #[serde(rename = "max_wait_duration_ms", with = "duration_millis")]
    pub max_wait_duration: Duration,
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub queue_capacity: usize,
    #[serde(rename = "keep_alive_ms", with = "duration_millis")]
    pub keep_alive: Duration,
}

/// Effective tuning an adapter type resolves to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedTuning {
    pub adapter_type: String,
    pub category: AdapterCategory,
    pub retry: RetryTuning,
    pub circuit_breaker: CircuitBreakerTuning,
    pub bulkhead: BulkheadTuning,
}

/// Operator-facing account of a failed call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub key: PolicyKey,
    /// Raised by resource protection before the operation ran
    pub rejection: bool,
    pub kind: &'static str,
    pub message: String,
    /// Present when the operation itself failed
    pub classification: Option<ErrorClassification>,
}

/// Retry, circuit breaking and bulkheading for adapter calls
pub struct ResilienceFacade {
    settings: ResilienceSettings,
    retries: Arc<RetryService>,
    breakers: Arc<CircuitBreakerService>,
    bulkheads: Arc<BulkheadService>,
    classifier: ErrorClassifier,
    monitor: FailureMonitor,
    sink: SharedEventSink,
}

impl ResilienceFacade {
    /// Build the policy registries and services
    ///
    /// Fails when the settings or a tuning table are invalid.
    pub fn new(settings: &ResilienceSettings, sink: SharedEventSink) -> relaygate_domain::Result<Self> {
        settings.validate()?;

        let retries = Arc::new(RetryService::new(
            Arc::new(RetryPolicyRegistry::new(settings)?),
            settings,
            Arc::clone(&sink),
        ));
        let breakers = Arc::new(CircuitBreakerService::new(
            Arc::new(CircuitBreakerPolicyRegistry::new()?),
            settings,
            Arc::clone(&sink),
        ));
        let bulkheads = Arc::new(BulkheadService::new(
            Arc::new(BulkheadPolicyRegistry::new()?),
            settings,
            Arc::clone(&sink),
        ));
        let classifier = ErrorClassifier::from_settings(settings);
        let monitor = FailureMonitor::new(
            classifier.clone(),
            Arc::clone(&breakers),
            settings,
            Arc::clone(&sink),
        );

        info!(
            retry_attempts = settings.default_retry_attempts,
            monitor_threshold = settings.monitor_force_open_threshold,
            "Resilience facade initialized"
        );

        Ok(Self {
            settings: settings.clone(),
            retries,
            breakers,
            bulkheads,
            classifier,
            monitor,
            sink,
        })
    }

    /// Run a synchronous call under every layer of its key
    ///
    /// Blocks the calling thread for bulkhead waits and retry backoff.
    pub fn execute<T, F>(&self, adapter_type: &str, adapter_id: &str, operation: F) -> ExecutionResult<T>
    where
        F: FnMut() -> Result<T, AdapterError>,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        self.bulkheads.isolate(&key, || self.breakers.guard(&key, || self.retries.run(&key, operation)))
    }

    /// Like [`execute`](Self::execute), also retrying successful results
    /// whose status the key's retry policy rejects (HTTP 5xx)
    ///
    /// The breaker records the final result as a success.
    pub fn execute_with_result_retry<T, F>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
    ) -> ExecutionResult<T>
    where
        T: StatusBearing,
        F: FnMut() -> Result<T, AdapterError>,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        self.bulkheads
            .isolate(&key, || self.breakers.guard(&key, || self.retries.run_checked(&key, operation)))
    }

    /// Like [`execute`](Self::execute); `fallback` supplies the result on any
    /// terminal failure, rejections included
    pub fn execute_with_fallback<T, F, G>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
        fallback: G,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Result<T, AdapterError>,
        G: FnOnce() -> Result<T, AdapterError>,
    {
        self.execute(adapter_type, adapter_id, operation)
            .or_else(|err| self.fall_back(err, fallback))
    }

    /// Run an async call under every layer of its key
    ///
    /// Bulkhead waits and retry backoff suspend the task, never the worker
    /// thread.
    pub async fn execute_async<T, F, Fut>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        self.bulkheads
            .isolate_async(&key, || {
                self.breakers.guard_async(&key, || self.retries.run_async(&key, operation))
            })
            .await
    }

    /// Async counterpart of
    /// [`execute_with_result_retry`](Self::execute_with_result_retry)
    pub async fn execute_async_with_result_retry<T, F, Fut>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
    ) -> ExecutionResult<T>
    where
        T: StatusBearing,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        self.bulkheads
            .isolate_async(&key, || {
                self.breakers.guard_async(&key, || self.retries.run_async_checked(&key, operation))
            })
            .await
    }

    /// Async counterpart of
    /// [`execute_with_fallback`](Self::execute_with_fallback)
    pub async fn execute_async_with_fallback<T, F, Fut, G>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
        fallback: G,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
        G: FnOnce() -> Result<T, AdapterError>,
    {
        match self.execute_async(adapter_type, adapter_id, operation).await {
            Ok(value) => Ok(value),
            Err(err) => self.fall_back(err, fallback),
        }
    }

    /// Offload a call to the key's thread pool; breaker and retry run on
    /// the pool worker
    ///
    /// Rejected immediately when the pool is saturated.
    pub fn submit<T, F>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
    ) -> ExecutionResult<OffloadHandle<T>>
    where
        F: FnMut() -> Result<T, AdapterError> + Send + 'static,
        T: Send + 'static,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        let breakers = Arc::clone(&self.breakers);
        let retries = Arc::clone(&self.retries);
        let task_key = key.clone();
        self.bulkheads.offload(&key, move || {
            breakers.guard(&task_key, || retries.run(&task_key, operation))
        })
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            circuit_breakers: self.breakers.all_statuses(),
            bulkheads: self.bulkheads.all_metrics(),
            thread_pools: self.bulkheads.all_thread_pool_metrics(),
            retries: self.retries.all_metrics(),
        }
    }

    /// Close the key's breaker and forget its monitored failure run
    pub fn reset_circuit_breaker(&self, adapter_type: &str, adapter_id: &str) -> ExecutionResult<()> {
        self.breakers.reset_circuit_breaker(adapter_type, adapter_id)?;
        self.monitor.clear(&PolicyKey::new(adapter_type, adapter_id));
        Ok(())
    }

    pub fn force_open(&self, adapter_type: &str, adapter_id: &str) -> ExecutionResult<()> {
        self.breakers.force_open(adapter_type, adapter_id)
    }

    /// Tuning the three registries resolve for an adapter type
    pub fn tuning(&self, adapter_type: &str) -> ResolvedTuning {
        let retry = self.retries.policy_for(adapter_type);
        let breaker = self.breakers.policy_for(adapter_type);
        let bulkhead = self.bulkheads.policy_for(adapter_type);

        let retry_config = retry.config();
        let breaker_config = breaker.config();
        let semaphore = bulkhead.semaphore();
        let pool = bulkhead.thread_pool();

        ResolvedTuning {
            adapter_type: adapter_type.to_string(),
            category: AdapterCategory::resolve(adapter_type),
            retry: RetryTuning {
                max_attempts: retry_config.max_attempts,
                backoff: retry_config.backoff.to_string(),
                max_total_duration_ms: retry_config
                    .max_total_duration
                    .map(|deadline| u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX)),
                retries_server_error_results: retry.retries_server_error_results(),
            },
            circuit_breaker: CircuitBreakerTuning {
                failure_rate_threshold: breaker_config.failure_rate_threshold,
                slow_call_rate_threshold: breaker_config.slow_call_rate_threshold,
                slow_call_duration_threshold: breaker_config.slow_call_duration_threshold,
                wait_duration_in_open_state: breaker_config.wait_duration_in_open_state,
                sliding_window_type: breaker_config.sliding_window_type,
                sliding_window_size: breaker_config.sliding_window_size,
                minimum_number_of_calls: breaker_config.minimum_number_of_calls,
                permitted_calls_in_half_open: breaker_config.permitted_calls_in_half_open,
                automatic_transition: breaker_config.automatic_transition,
            },
            bulkhead: BulkheadTuning {
                max_concurrent_calls: semaphore.max_concurrent_calls,
                max_wait_duration: semaphore.max_wait_duration,
                core_pool_size: pool.core_pool_size,
                max_pool_size: pool.max_pool_size,
                queue_capacity: pool.queue_capacity,
                keep_alive: pool.keep_alive,
            },
        }
    }

    pub fn classify(&self, error: &AdapterError) -> ErrorClassification {
        self.classifier.classify(error)
    }

    /// Classify as seen from an adapter type's category
    pub fn classify_for(&self, adapter_type: &str, error: &AdapterError) -> ErrorClassification {
        self.classifier.classify_for(error, AdapterCategory::resolve(adapter_type))
    }

    pub fn describe_failure(&self, err: &ExecutionError) -> FailureReport {
        let key = err.key().clone();
        let classification =
            err.adapter_error().map(|source| self.classifier.classify_for(source, key.category()));
        FailureReport {
            rejection: err.is_rejection(),
            kind: err.kind_label(),
            message: err.to_string(),
            classification,
            key,
        }
    }

    /// Report a failure to the consecutive-failure monitor
    pub fn record_failure(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        error: &AdapterError,
    ) -> MonitorDecision {
        self.monitor.observe(&PolicyKey::new(adapter_type, adapter_id), error)
    }

    pub fn settings(&self) -> &ResilienceSettings {
        &self.settings
    }

    pub fn retries(&self) -> &RetryService {
        &self.retries
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerService {
        &self.breakers
    }

    pub fn bulkheads(&self) -> &BulkheadService {
        &self.bulkheads
    }

    pub fn monitor(&self) -> &FailureMonitor {
        &self.monitor
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    fn fall_back<T, G>(&self, err: ExecutionError, fallback: G) -> ExecutionResult<T>
    where
        G: FnOnce() -> Result<T, AdapterError>,
    {
        let key = err.key().clone();
        let unit = match &err {
            ExecutionError::CircuitOpen { .. } => UnitKind::CircuitBreaker,
            ExecutionError::BulkheadFull { .. } => UnitKind::Bulkhead,
            _ => UnitKind::Retry,
        };
        warn!(
            adapter_type = key.adapter_type(),
            adapter_id = key.adapter_id(),
            reason = err.kind_label(),
            error = %err,
            "Guarded call failed, invoking fallback"
        );
        self.sink.emit(&ResilienceEvent::FallbackInvoked { key: key.clone(), unit });
        fallback().map_err(|source| ExecutionError::operation(&key, source))
    }
}

impl std::fmt::Debug for ResilienceFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceFacade")
            .field("retries", &self.retries)
            .field("breakers", &self.breakers)
            .field("bulkheads", &self.bulkheads)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}
