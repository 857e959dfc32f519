//! Semaphore bulkhead for limiting concurrent operations
//!
//! The bulkhead pattern prevents resource exhaustion by limiting the number
//! of concurrent operations. Named after ship bulkheads that contain flooding
//! to specific compartments, this pattern isolates failures and prevents
//! cascading resource exhaustion.
//!
//! One gate serves both worlds: synchronous callers park on a condition
//! variable, async callers await a [`tokio::sync::Notify`]. Both wait at most
//! `max_wait_duration` for a slot and then fail with
//! [`ResilienceError::BulkheadFull`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tracing::{debug, instrument};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    pub max_concurrent_calls: usize,
    /// How long a caller may wait for a slot; zero rejects immediately
    pub max_wait_duration: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent_calls: 25, max_wait_duration: Duration::from_secs(5) }
    }
}

impl BulkheadConfig {
    /// Create a new configuration builder
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::invalid("max_concurrent_calls must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for BulkheadConfig
#[derive(Debug, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    pub fn new() -> Self {
        Self { config: BulkheadConfig::default() }
    }

    pub fn max_concurrent_calls(mut self, max: usize) -> Self {
        self.config.max_concurrent_calls = max;
        self
    }

    pub fn max_wait_duration(mut self, wait: Duration) -> Self {
        self.config.max_wait_duration = wait;
        self
    }

    pub fn build(self) -> ConfigResult<BulkheadConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Metrics for bulkhead monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BulkheadMetrics {
    /// Slots free right now
    pub available_concurrent_calls: usize,
    /// Configured slot count
    pub max_allowed_concurrent_calls: usize,
    /// Calls admitted since creation
    pub permitted_calls: u64,
    /// Calls rejected since creation
    pub rejected_calls: u64,
}

impl BulkheadMetrics {
    /// Slots currently held
    pub fn in_flight(&self) -> usize {
        self.max_allowed_concurrent_calls.saturating_sub(self.available_concurrent_calls)
    }

    /// Occupied share of the slots multiplied by `scale` (100.0 for percent)
    pub fn utilization(&self, scale: f64) -> f64 {
        if self.max_allowed_concurrent_calls == 0 {
            return 0.0;
        }
        self.in_flight() as f64 / self.max_allowed_concurrent_calls as f64 * scale
    }

    /// Whether at least one slot is free
    pub fn has_capacity(&self) -> bool {
        self.available_concurrent_calls > 0
    }
}

struct Gate {
    available: Mutex<usize>,
    condvar: Condvar,
    notify: Notify,
}

impl Gate {
    fn try_take(&self) -> bool {
        let mut available = self.available.lock();
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    fn release(&self) {
        *self.available.lock() += 1;
        self.condvar.notify_one();
        self.notify.notify_one();
    }
}

/// A held bulkhead slot, released on drop
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct BulkheadPermit {
    gate: Arc<Gate>,
}

impl fmt::Debug for BulkheadPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkheadPermit").finish_non_exhaustive()
    }
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Counting-semaphore bulkhead with a bounded acquire wait
///
/// Clones share the same slots.
///
/// # Examples
///
/// ```rust
/// use relaygate_common::resilience::{BulkheadConfig, SemaphoreBulkhead};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = BulkheadConfig::builder().max_concurrent_calls(5).build()?;
/// let bulkhead = SemaphoreBulkhead::new(config)?;
///
/// let value = bulkhead.call(|| Ok::<_, std::io::Error>("done"))?;
/// assert_eq!(value, "done");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SemaphoreBulkhead {
    config: Arc<BulkheadConfig>,
    gate: Arc<Gate>,
    permitted_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
}

impl SemaphoreBulkhead {
    /// Create a new bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> ConfigResult<Self> {
        config.validate()?;
        let gate = Gate {
            available: Mutex::new(config.max_concurrent_calls),
            condvar: Condvar::new(),
            notify: Notify::new(),
        };
        Ok(Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            permitted_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The configuration this bulkhead was built from
    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Take a slot if one is free, without waiting
    pub fn try_acquire(&self) -> Option<BulkheadPermit> {
        if self.gate.try_take() {
            Some(self.admit())
        } else {
            None
        }
    }

    /// Take a slot, blocking the calling thread up to the max wait
    pub fn acquire(&self) -> Option<BulkheadPermit> {
        let deadline = Instant::now() + self.config.max_wait_duration;
        let mut available = self.gate.available.lock();
        while *available == 0 {
            if self.gate.condvar.wait_until(&mut available, deadline).timed_out() && *available == 0
            {
                drop(available);
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
        *available -= 1;
        drop(available);
        Some(self.admit())
    }

    /// Take a slot, suspending the current task up to the max wait
    pub async fn acquire_async(&self) -> Option<BulkheadPermit> {
        let deadline = tokio::time::Instant::now() + self.config.max_wait_duration;
        loop {
            let notified = self.gate.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.gate.try_take() {
                return Some(self.admit());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                if self.gate.try_take() {
                    return Some(self.admit());
                }
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }
    }

    /// Run a synchronous operation inside the bulkhead
    #[instrument(skip_all, level = "debug", fields(max = self.config.max_concurrent_calls))]
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = Instant::now();
        let Some(_permit) = self.acquire() else {
            return Err(self.full(started.elapsed()));
        };
        operation().map_err(|source| ResilienceError::OperationFailed { source })
    }

    /// Run an async operation inside the bulkhead
    #[instrument(skip_all, level = "debug", fields(max = self.config.max_concurrent_calls))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = Instant::now();
        let Some(_permit) = self.acquire_async().await else {
            return Err(self.full(started.elapsed()));
        };
        operation().await.map_err(|source| ResilienceError::OperationFailed { source })
    }

    /// Slots free right now
    pub fn available_permits(&self) -> usize {
        *self.gate.available.lock()
    }

    /// Non-blocking pre-flight check
    pub fn has_available_capacity(&self) -> bool {
        self.available_permits() > 0
    }

    /// Get bulkhead metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            available_concurrent_calls: self.available_permits(),
            max_allowed_concurrent_calls: self.config.max_concurrent_calls,
            permitted_calls: self.permitted_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }

    fn admit(&self) -> BulkheadPermit {
        self.permitted_calls.fetch_add(1, Ordering::Relaxed);
        BulkheadPermit { gate: Arc::clone(&self.gate) }
    }

    fn full<E>(&self, waited: Duration) -> ResilienceError<E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        debug!(
            capacity = self.config.max_concurrent_calls,
            waited_ms = waited.as_millis() as u64,
            "Bulkhead rejected operation"
        );
        ResilienceError::BulkheadFull { capacity: self.config.max_concurrent_calls, waited }
    }
}

impl fmt::Debug for SemaphoreBulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreBulkhead")
            .field("max_concurrent_calls", &self.config.max_concurrent_calls)
            .field("max_wait_duration", &self.config.max_wait_duration)
            .field("available", &self.available_permits())
            .finish()
    }
}
