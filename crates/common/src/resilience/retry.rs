//! Retry with bounded attempts, backoff and an overall deadline
//!
//! A [`Retry`] unit owns a [`RetryConfig`], a [`RetryPolicy`] deciding which
//! errors are worth another attempt, and monotonic outcome counters. The
//! same unit serves synchronous callers (the thread sleeps between
//! attempts) and async callers (the task sleeps on the tokio timer).
//!
//! Attempts within one call are strictly sequential. A call ends when:
//!
//! - the operation succeeds (or returns a result the caller accepts)
//! - the policy says [`RetryDecision::Stop`]: the error is returned at once
//! - `max_attempts` is reached: [`RetryError::Exhausted`]
//! - the next backoff would overrun `max_total_duration`:
//!   [`RetryError::DeadlineExceeded`]

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::error::{ConfigError, ConfigResult};

/// Errors that end a retried call
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All attempts failed with retryable errors
    #[error("All {attempts} retry attempts exhausted, last error: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The operation failed with a non-retryable error
    #[error("Operation failed with non-retryable error: {source}")]
    NonRetryable { source: E },

    /// Waiting for another attempt would overrun the overall deadline
    #[error("Retry deadline exceeded after {elapsed:?} ({attempts} attempts), last error: {source}")]
    DeadlineExceeded { elapsed: Duration, attempts: u32, source: E },
}

impl<E> RetryError<E> {
    /// The last error produced by the operation
    pub fn last_error(&self) -> &E {
        match self {
            Self::Exhausted { source, .. }
            | Self::NonRetryable { source }
            | Self::DeadlineExceeded { source, .. } => source,
        }
    }

    /// Consume and return the last error produced by the operation
    pub fn into_last_error(self) -> E {
        match self {
            Self::Exhausted { source, .. }
            | Self::NonRetryable { source }
            | Self::DeadlineExceeded { source, .. } => source,
        }
    }

    /// Number of times the operation ran
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::DeadlineExceeded { attempts, .. } => *attempts,
            Self::NonRetryable { .. } => 1,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Trait for determining whether an error should be retried
pub trait RetryPolicy<E>: Send + Sync {
    /// Decide on a retry after the `attempt`-th failure (0-based)
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Decision for whether to retry an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation with the default backoff delay
    Retry,
    /// Retry the operation with a custom delay
    RetryAfter(Duration),
    /// Don't retry the operation
    Stop,
}

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff: initial_delay * multiplier^retry, capped
    Exponential { initial_delay: Duration, multiplier: f64, max_delay: Duration },
}

impl BackoffStrategy {
    /// Delay before retry number `retry` (0-based)
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial_delay, multiplier, max_delay } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let delay = initial_delay.as_millis() as f64 * multiplier.powi(exponent);
                let delay_ms = delay.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(delay_ms)
            }
        }
    }
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => write!(f, "fixed {}ms", delay.as_millis()),
            Self::Exponential { initial_delay, multiplier, .. } => {
                write!(f, "exponential {}ms x{multiplier}", initial_delay.as_millis())
            }
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first call
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Wall-clock budget for the whole call, attempts and waits included
    pub max_total_duration: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Fixed(Duration::from_millis(1000)),
            max_total_duration: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryConfig {
    /// Create a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }

        if let BackoffStrategy::Exponential { multiplier, .. } = &self.backoff {
            if *multiplier < 1.0 {
                return Err(ConfigError::invalid("exponential multiplier must be at least 1.0"));
            }
        }

        Ok(())
    }
}

/// Builder for RetryConfig with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.config.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        self.config.backoff = BackoffStrategy::Exponential { initial_delay, multiplier, max_delay };
        self
    }

    pub fn max_total_duration(mut self, duration: Duration) -> Self {
        self.config.max_total_duration = Some(duration);
        self
    }

    pub fn unlimited_time(mut self) -> Self {
        self.config.max_total_duration = None;
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Outcome counters of a retry unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryMetricsSnapshot {
    pub successful_calls_without_retry: u64,
    pub successful_calls_with_retry: u64,
    pub failed_calls_without_retry: u64,
    pub failed_calls_with_retry: u64,
}

impl RetryMetricsSnapshot {
    pub fn total_calls(&self) -> u64 {
        self.successful_calls_without_retry
            + self.successful_calls_with_retry
            + self.failed_calls_without_retry
            + self.failed_calls_with_retry
    }
}

#[derive(Debug, Default)]
struct Counters {
    successful_without_retry: AtomicU64,
    successful_with_retry: AtomicU64,
    failed_without_retry: AtomicU64,
    failed_with_retry: AtomicU64,
}

impl Counters {
    fn record(&self, succeeded: bool, attempts: u32) {
        let counter = match (succeeded, attempts > 1) {
            (true, false) => &self.successful_without_retry,
            (true, true) => &self.successful_with_retry,
            (false, false) => &self.failed_without_retry,
            (false, true) => &self.failed_with_retry,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum Step<T, E> {
    Done(RetryResult<T, E>),
    Wait(Duration),
}

/// A retry unit with shared outcome counters
///
/// Clones share counters and policy.
pub struct Retry<E> {
    config: Arc<RetryConfig>,
    policy: Arc<dyn RetryPolicy<E>>,
    counters: Arc<Counters>,
}

impl<E> Clone for Retry<E> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            policy: Arc::clone(&self.policy),
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<E> fmt::Debug for Retry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retry")
            .field("config", &self.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl<E> Retry<E> {
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn metrics(&self) -> RetryMetricsSnapshot {
        RetryMetricsSnapshot {
            successful_calls_without_retry: self
                .counters
                .successful_without_retry
                .load(Ordering::Relaxed),
            successful_calls_with_retry: self.counters.successful_with_retry.load(Ordering::Relaxed),
            failed_calls_without_retry: self.counters.failed_without_retry.load(Ordering::Relaxed),
            failed_calls_with_retry: self.counters.failed_with_retry.load(Ordering::Relaxed),
        }
    }
}

impl<E> Retry<E>
where
    E: fmt::Display,
{
    /// Create a retry unit from a validated configuration and a policy
    pub fn new<P>(config: RetryConfig, policy: P) -> ConfigResult<Self>
    where
        P: RetryPolicy<E> + 'static,
    {
        Self::with_shared_policy(config, Arc::new(policy))
    }

    /// Create a retry unit sharing an existing policy
    pub fn with_shared_policy(
        config: RetryConfig,
        policy: Arc<dyn RetryPolicy<E>>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config: Arc::new(config), policy, counters: Arc::new(Counters::default()) })
    }

    /// Run a synchronous operation, sleeping the calling thread between
    /// attempts
    pub fn call<F, T>(&self, operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        self.call_with_result(operation, |_| false)
    }

    /// Like [`call`](Self::call), also retrying successful results for which
    /// `retry_on_result` is true
    ///
    /// When attempts run out on such a result, that last result is returned.
    #[instrument(skip_all, level = "debug", fields(max_attempts = self.config.max_attempts))]
    pub fn call_with_result<F, T, R>(
        &self,
        mut operation: F,
        retry_on_result: R,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        R: Fn(&T) -> bool,
    {
        let started = std::time::Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = operation();
            match self.after_attempt(outcome, attempt, started.elapsed(), &retry_on_result) {
                Step::Done(result) => return result,
                Step::Wait(delay) => std::thread::sleep(delay),
            }
        }
    }

    /// Run an async operation; backoff waits suspend only the current task
    pub async fn execute<F, Fut, T>(&self, operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_result(operation, |_| false).await
    }

    /// Async counterpart of [`call_with_result`](Self::call_with_result)
    #[instrument(skip_all, level = "debug", fields(max_attempts = self.config.max_attempts))]
    pub async fn execute_with_result<F, Fut, T, R>(
        &self,
        mut operation: F,
        retry_on_result: R,
    ) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&T) -> bool,
    {
        let started = tokio::time::Instant::now();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = operation().await;
            match self.after_attempt(outcome, attempt, started.elapsed(), &retry_on_result) {
                Step::Done(result) => return result,
                Step::Wait(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    fn after_attempt<T, R>(
        &self,
        outcome: Result<T, E>,
        attempt: u32,
        elapsed: Duration,
        retry_on_result: &R,
    ) -> Step<T, E>
    where
        R: Fn(&T) -> bool,
    {
        let error = match outcome {
            Ok(value) if !retry_on_result(&value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                self.counters.record(true, attempt);
                return Step::Done(Ok(value));
            }
            Ok(value) => {
                let wait = self.next_wait(attempt, elapsed, None);
                return match wait {
                    Some(delay) => {
                        warn!(attempt, delay_ms = delay.as_millis() as u64, "Retrying on result");
                        Step::Wait(delay)
                    }
                    None => {
                        self.counters.record(false, attempt);
                        Step::Done(Ok(value))
                    }
                };
            }
            Err(error) => error,
        };

        let custom_delay = match self.policy.should_retry(&error, attempt - 1) {
            RetryDecision::Stop => {
                debug!(attempt, error = %error, "Error is not retryable");
                self.counters.record(false, attempt);
                return Step::Done(Err(RetryError::NonRetryable { source: error }));
            }
            RetryDecision::Retry => None,
            RetryDecision::RetryAfter(delay) => Some(delay),
        };

        if attempt >= self.config.max_attempts {
            warn!(attempts = attempt, error = %error, "All retry attempts exhausted");
            self.counters.record(false, attempt);
            return Step::Done(Err(RetryError::Exhausted { attempts: attempt, source: error }));
        }

        match self.next_wait(attempt, elapsed, custom_delay) {
            Some(delay) => {
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Operation failed, retrying"
                );
                Step::Wait(delay)
            }
            None => {
                warn!(
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Retry deadline exceeded"
                );
                self.counters.record(false, attempt);
                Step::Done(Err(RetryError::DeadlineExceeded {
                    elapsed,
                    attempts: attempt,
                    source: error,
                }))
            }
        }
    }

    /// Delay before the next attempt, or `None` when no attempt may follow
    fn next_wait(
        &self,
        attempt: u32,
        elapsed: Duration,
        custom: Option<Duration>,
    ) -> Option<Duration> {
        if attempt >= self.config.max_attempts {
            return None;
        }
        let delay = custom.unwrap_or_else(|| self.config.backoff.calculate_delay(attempt - 1));
        match self.config.max_total_duration {
            Some(budget) if elapsed + delay > budget => None,
            _ => Some(delay),
        }
    }
}
