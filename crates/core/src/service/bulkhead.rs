//! Bulkhead units per policy key
//!
//! Every key gets a semaphore bulkhead for inline calls and, on first
//! offloaded call, a bounded thread pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use relaygate_common::resilience::{
    BulkheadMetrics, PoolHandle, ResilienceError, SemaphoreBulkhead, ThreadPoolBulkhead,
    ThreadPoolMetrics,
};
use relaygate_domain::{AdapterError, PolicyKey, ResilienceSettings};
use tracing::{instrument, warn};

use super::{UnitCache, UnitReport};
use crate::error::{ExecutionError, ExecutionResult};
use crate::events::{ResilienceEvent, SharedEventSink, UnitKind};
use crate::policy::{BulkheadPolicy, BulkheadPolicyRegistry};

/// Result of a call offloaded to a key's thread pool
///
/// Await it from async code or call [`OffloadHandle::wait`] from a plain
/// thread.
#[must_use = "the call result is lost if the handle is dropped"]
#[derive(Debug)]
pub struct OffloadHandle<T> {
    key: PolicyKey,
    inner: PoolHandle<T, ExecutionError>,
}

impl<T> OffloadHandle<T> {
    /// Block the current thread until the call finishes
    pub fn wait(self) -> ExecutionResult<T> {
        let key = self.key;
        self.inner.wait().map_err(|err| ExecutionError::from_layer(&key, err))
    }
}

impl<T> Future for OffloadHandle<T> {
    type Output = ExecutionResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.inner)
            .poll(cx)
            .map(|result| result.map_err(|err| ExecutionError::from_layer(&this.key, err)))
    }
}

/// Caps concurrent adapter calls per key
pub struct BulkheadService {
    registry: Arc<BulkheadPolicyRegistry>,
    semaphores: UnitCache<SemaphoreBulkhead>,
    pools: UnitCache<ThreadPoolBulkhead>,
    utilization_scale: f64,
}

impl BulkheadService {
    pub fn new(
        registry: Arc<BulkheadPolicyRegistry>,
        settings: &ResilienceSettings,
        sink: SharedEventSink,
    ) -> Self {
        let threshold = settings.live_unit_warning_threshold;
        Self {
            registry,
            semaphores: UnitCache::new(UnitKind::Bulkhead, Arc::clone(&sink), threshold),
            pools: UnitCache::new(UnitKind::ThreadPool, sink, threshold),
            utilization_scale: settings.bulkhead_utilization_scale,
        }
    }

    /// Run a synchronous call once a slot is free, blocking the calling
    /// thread up to the policy's max wait
    pub fn execute_with_bulkhead<T, F>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        operation: F,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Result<T, AdapterError>,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        self.isolate(&key, || operation().map_err(|source| ExecutionError::operation(&key, source)))
    }

    /// Run a synchronous call; `fallback` supplies the result only when no
    /// slot became free in time
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
        match self.execute_with_bulkhead(adapter_type, adapter_id, operation) {
            Err(err @ ExecutionError::BulkheadFull { .. }) => {
                let key = err.key().clone();
                warn!(adapter_type, adapter_id, error = %err, "Bulkhead full, invoking fallback");
                self.semaphores.sink().emit(&ResilienceEvent::FallbackInvoked {
                    key: key.clone(),
                    unit: UnitKind::Bulkhead,
                });
                fallback().map_err(|source| ExecutionError::operation(&key, source))
            }
            other => other,
        }
    }

    /// Run a call on the key's thread pool and await its result
    ///
    /// Rejected immediately when the pool and its queue are saturated.
    pub async fn execute_async<T, F>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        task: F,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Result<T, AdapterError> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(adapter_type, adapter_id, task)?.await
    }

    /// Hand a call to the key's thread pool without waiting for it
    pub fn submit<T, F>(
        &self,
        adapter_type: &str,
        adapter_id: &str,
        task: F,
    ) -> ExecutionResult<OffloadHandle<T>>
    where
        F: FnOnce() -> Result<T, AdapterError> + Send + 'static,
        T: Send + 'static,
    {
        let key = PolicyKey::new(adapter_type, adapter_id);
        let task_key = key.clone();
        self.offload(&key, move || {
            task().map_err(|source| ExecutionError::operation(&task_key, source))
        })
    }

    /// Non-blocking pre-flight check; keys without a live unit have capacity
    pub fn has_available_capacity(&self, adapter_type: &str, adapter_id: &str) -> bool {
        self.semaphores
            .get(&PolicyKey::new(adapter_type, adapter_id))
            .map_or(true, |unit| unit.has_available_capacity())
    }

    /// Occupied share of the slots, scaled by the configured factor
    pub fn utilization_percentage(&self, adapter_type: &str, adapter_id: &str) -> f64 {
        self.metrics(adapter_type, adapter_id)
            .map_or(0.0, |metrics| metrics.utilization(self.utilization_scale))
    }

    pub fn metrics(&self, adapter_type: &str, adapter_id: &str) -> Option<BulkheadMetrics> {
        self.semaphores.get(&PolicyKey::new(adapter_type, adapter_id)).map(|unit| unit.metrics())
    }

    pub fn thread_pool_metrics(
        &self,
        adapter_type: &str,
        adapter_id: &str,
    ) -> Option<ThreadPoolMetrics> {
        self.pools.get(&PolicyKey::new(adapter_type, adapter_id)).map(|pool| pool.metrics())
    }

    pub fn all_metrics(&self) -> Vec<UnitReport<BulkheadMetrics>> {
        self.semaphores
            .snapshot()
            .into_iter()
            .map(|(key, unit)| UnitReport { key, metrics: unit.metrics() })
            .collect()
    }

    pub fn all_thread_pool_metrics(&self) -> Vec<UnitReport<ThreadPoolMetrics>> {
        self.pools
            .snapshot()
            .into_iter()
            .map(|(key, pool)| UnitReport { key, metrics: pool.metrics() })
            .collect()
    }

    pub fn policy_for(&self, adapter_type: &str) -> Arc<BulkheadPolicy> {
        self.registry.resolve(adapter_type)
    }

    /// Drop the key's units. A removed pool stops accepting work and
    /// finishes what is already queued.
    pub fn remove(&self, adapter_type: &str, adapter_id: &str) -> bool {
        let key = PolicyKey::new(adapter_type, adapter_id);
        let semaphore = self.semaphores.remove(&key);
        let pool = self.pools.remove(&key);
        if let Some(pool) = &pool {
            pool.shutdown();
        }
        semaphore.is_some() || pool.is_some()
    }

    pub fn live_units(&self) -> usize {
        self.semaphores.len() + self.pools.len()
    }

    #[instrument(
        skip_all,
        level = "debug",
        fields(adapter_type = key.adapter_type(), adapter_id = key.adapter_id())
    )]
    pub(crate) fn isolate<T, F>(&self, key: &PolicyKey, operation: F) -> ExecutionResult<T>
    where
        F: FnOnce() -> ExecutionResult<T>,
    {
        self.semaphore(key)?
            .call(operation)
            .map_err(|err| self.flatten(key, UnitKind::Bulkhead, err))
    }

    #[instrument(
        skip_all,
        level = "debug",
        fields(adapter_type = key.adapter_type(), adapter_id = key.adapter_id())
    )]
    pub(crate) async fn isolate_async<T, F, Fut>(
        &self,
        key: &PolicyKey,
        operation: F,
    ) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExecutionResult<T>>,
    {
        let unit = self.semaphore(key)?;
        unit.execute(operation).await.map_err(|err| self.flatten(key, UnitKind::Bulkhead, err))
    }

    pub(crate) fn offload<T, F>(&self, key: &PolicyKey, task: F) -> ExecutionResult<OffloadHandle<T>>
    where
        F: FnOnce() -> ExecutionResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool(key)?;
        let inner = pool.submit(task).map_err(|err| self.flatten(key, UnitKind::ThreadPool, err))?;
        Ok(OffloadHandle { key: key.clone(), inner })
    }

    fn semaphore(&self, key: &PolicyKey) -> ExecutionResult<Arc<SemaphoreBulkhead>> {
        self.semaphores.get_or_try_create(key, || {
            SemaphoreBulkhead::new(self.registry.resolve(key.adapter_type()).semaphore().clone())
        })
    }

    fn pool(&self, key: &PolicyKey) -> ExecutionResult<Arc<ThreadPoolBulkhead>> {
        self.pools.get_or_try_create(key, || {
            ThreadPoolBulkhead::new(self.registry.resolve(key.adapter_type()).thread_pool_for(key))
        })
    }

    fn flatten(
        &self,
        key: &PolicyKey,
        unit: UnitKind,
        err: ResilienceError<ExecutionError>,
    ) -> ExecutionError {
        if let ResilienceError::BulkheadFull { capacity, waited } = &err {
            warn!(
                adapter_type = key.adapter_type(),
                adapter_id = key.adapter_id(),
                unit = unit.as_str(),
                capacity,
                waited_ms = waited.as_millis() as u64,
                "Bulkhead rejected call"
            );
            self.semaphores.sink().emit(&ResilienceEvent::CallRejected { key: key.clone(), unit });
        }
        ExecutionError::from_layer(key, err)
    }
}

impl std::fmt::Debug for BulkheadService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadService")
            .field("semaphores", &self.semaphores.len())
            .field("pools", &self.pools.len())
            .finish()
    }
}
