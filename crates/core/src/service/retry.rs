//! Retry units per policy key

use std::future::Future;
use std::sync::Arc;

use relaygate_common::resilience::{Retry, RetryError, RetryMetricsSnapshot};
use relaygate_domain::{AdapterError, PolicyKey, ResilienceSettings, StatusBearing};
use tracing::{instrument, warn};

use super::{UnitCache, UnitReport};
use crate::error::{ExecutionError, ExecutionResult};
use crate::events::{ResilienceEvent, SharedEventSink, UnitKind};
use crate::policy::{AdapterRetryPolicy, RetryPolicyRegistry};

/// Runs adapter calls under the retry policy of their category
pub struct RetryService {
    registry: Arc<RetryPolicyRegistry>,
    units: UnitCache<Retry<AdapterError>>,
}

impl RetryService {
    pub fn new(
        registry: Arc<RetryPolicyRegistry>,
        settings: &ResilienceSettings,
        sink: SharedEventSink,
    ) -> Self {
        Self {
            registry,
            units: UnitCache::new(UnitKind::Retry, sink, settings.live_unit_warning_threshold),
        }
    }

    /// Run a synchronous call, sleeping the calling thread between attempts
    pub fn execute_with_retry<T, F>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Result<T, AdapterError>,
    {
        self.run(&PolicyKey::new(adapter_type, adapter_id), operation)
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), also retrying
    /// successful results the policy rejects (HTTP 5xx statuses).
    ///
    /// When attempts run out on such a result, the last result is returned.
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
        self.run_checked(&PolicyKey::new(adapter_type, adapter_id), operation)
    }

    /// Run a synchronous call; `fallback` supplies the result when the call
    /// fails terminally for any reason
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
        let key = PolicyKey::new(adapter_type, adapter_id);
        match self.run(&key, operation) {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(
                    adapter_type,
                    adapter_id,
                    error = %err,
                    "Retry failed, invoking fallback"
                );
                self.units
                    .sink()
                    .emit(&ResilienceEvent::FallbackInvoked { key: key.clone(), unit: UnitKind::Retry });
                fallback().map_err(|source| ExecutionError::operation(&key, source))
            }
        }
    }

    /// Run an async call; backoff waits suspend only the current task
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
        self.run_async(&PolicyKey::new(adapter_type, adapter_id), operation).await
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
        self.run_async_checked(&PolicyKey::new(adapter_type, adapter_id), operation).await
    }

    /// Outcome counters of a live unit, if one exists
    pub fn metrics(&self, adapter_type: &str, adapter_id: &str) -> Option<RetryMetricsSnapshot> {
        self.units.get(&PolicyKey::new(adapter_type, adapter_id)).map(|unit| unit.metrics())
    }

    pub fn all_metrics(&self) -> Vec<UnitReport<RetryMetricsSnapshot>> {
        self.units
            .snapshot()
            .into_iter()
            .map(|(key, unit)| UnitReport { key, metrics: unit.metrics() })
            .collect()
    }

    pub fn policy_for(&self, adapter_type: &str) -> Arc<AdapterRetryPolicy> {
        self.registry.resolve(adapter_type)
    }

    /// Drop the live unit for a key; its counters are lost
    pub fn remove(&self, adapter_type: &str, adapter_id: &str) -> bool {
        self.units.remove(&PolicyKey::new(adapter_type, adapter_id)).is_some()
    }

    pub fn live_units(&self) -> usize {
        self.units.len()
    }

    #[instrument(
        skip_all,
        level = "debug",
        fields(adapter_type = key.adapter_type(), adapter_id = key.adapter_id())
    )]
    pub(crate) fn run<T, F>(&self, key: &PolicyKey, operation: F) -> ExecutionResult<T>
    where
        F: FnMut() -> Result<T, AdapterError>,
    {
        let unit = self.unit(key)?;
        unit.call(operation).map_err(|err| self.terminal(key, err))
    }

    #[instrument(
        skip_all,
        level = "debug",
        fields(adapter_type = key.adapter_type(), adapter_id = key.adapter_id())
    )]
    pub(crate) async fn run_async<T, F, Fut>(
        &self,
        key: &PolicyKey,
        operation: F,
    ) -> ExecutionResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let unit = self.unit(key)?;
        unit.execute(operation).await.map_err(|err| self.terminal(key, err))
    }

    #[instrument(
        skip_all,
        level = "debug",
        fields(adapter_type = key.adapter_type(), adapter_id = key.adapter_id())
    )]
    pub(crate) fn run_checked<T, F>(&self, key: &PolicyKey, operation: F) -> ExecutionResult<T>
    where
        T: StatusBearing,
        F: FnMut() -> Result<T, AdapterError>,
    {
        let policy = self.registry.resolve(key.adapter_type());
        let unit = self.unit(key)?;
        unit.call_with_result(operation, |result| policy.should_retry_result(result))
            .map_err(|err| self.terminal(key, err))
    }

    #[instrument(
        skip_all,
        level = "debug",
        fields(adapter_type = key.adapter_type(), adapter_id = key.adapter_id())
    )]
    pub(crate) async fn run_async_checked<T, F, Fut>(
        &self,
        key: &PolicyKey,
        operation: F,
    ) -> ExecutionResult<T>
    where
        T: StatusBearing,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let policy = self.registry.resolve(key.adapter_type());
        let unit = self.unit(key)?;
        unit.execute_with_result(operation, |result| policy.should_retry_result(result))
            .await
            .map_err(|err| self.terminal(key, err))
    }

    fn unit(&self, key: &PolicyKey) -> ExecutionResult<Arc<Retry<AdapterError>>> {
        self.units.get_or_try_create(key, || {
            let policy = self.registry.resolve(key.adapter_type());
            Retry::<AdapterError>::with_shared_policy(policy.config().clone(), policy)
        })
    }

    fn terminal(&self, key: &PolicyKey, err: RetryError<AdapterError>) -> ExecutionError {
        let exhausted = match &err {
            RetryError::Exhausted { attempts, .. } => Some((*attempts, false)),
            RetryError::DeadlineExceeded { attempts, .. } => Some((*attempts, true)),
            RetryError::NonRetryable { .. } => None,
        };
        if let Some((attempts, deadline_exceeded)) = exhausted {
            self.units.sink().emit(&ResilienceEvent::RetriesExhausted {
                key: key.clone(),
                attempts,
                deadline_exceeded,
            });
        }
        ExecutionError::from_retry(key, err)
    }
}

impl std::fmt::Debug for RetryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryService").field("live_units", &self.units.len()).finish()
    }
}
