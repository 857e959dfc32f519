//! Sliding-window circuit breaker
//!
//! The breaker tracks call outcomes in a [`SlidingWindow`] and opens when
//! either the failure rate or the slow-call rate reaches its threshold once
//! enough calls have been buffered. After `wait_duration_in_open_state` it
//! moves to half-open (lazily, on the next state read) when automatic
//! transition is enabled; otherwise it stays open until an administrative
//! action. Half-open admits a fixed number of trial calls and decides from
//! their outcomes whether to close or re-open.
//!
//! ```text
//!            rate >= threshold                 wait elapsed (auto)
//!  CLOSED ───────────────────────▶ OPEN ───────────────────────▶ HALF_OPEN
//!    ▲                              ▲                                │
//!    │        trials under threshold│       trials over threshold    │
//!    └──────────────────────────────┼────────────────────────────────┘
//!                                   └────────────────────────────────┘
//! ```
//!
//! `DISABLED` and `FORCED_OPEN` are administrative overrides that bypass
//! the automatic state machine until [`CircuitBreaker::reset`].

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use super::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use super::sliding_window::{SlidingWindow, WindowSnapshot, WindowType};
use super::{Clock, SystemClock};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
    /// Breaker is switched off: every call is permitted and nothing is
    /// recorded
    Disabled,
    /// Breaker was opened by an operator and rejects until reset
    ForcedOpen,
}

impl CircuitState {
    /// Whether calls are currently rejected in this state
    pub fn is_rejecting(self) -> bool {
        matches!(self, Self::Open | Self::ForcedOpen)
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
            CircuitState::Disabled => write!(f, "DISABLED"),
            CircuitState::ForcedOpen => write!(f, "FORCED_OPEN"),
        }
    }
}

/// How a finished call is counted by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Counted as a successful call
    Success,
    /// Counted as a failed call
    Failure,
    /// Not recorded at all
    Ignored,
}

/// A state change observed by the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: Instant,
}

impl fmt::Display for StateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Callback invoked after every state transition, outside the breaker lock
pub type TransitionListener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure rate in percent at which the breaker opens
    pub failure_rate_threshold: f32,
    /// Slow-call rate in percent at which the breaker opens
    pub slow_call_rate_threshold: f32,
    /// Calls taking longer than this are counted as slow
    pub slow_call_duration_threshold: Duration,
    /// Time to stay open before half-open becomes possible
    pub wait_duration_in_open_state: Duration,
    /// Shape of the sliding window
    pub sliding_window_type: WindowType,
    /// Calls (count based) or seconds (time based)
    pub sliding_window_size: u32,
    /// Calls that must be buffered before rates are evaluated
    pub minimum_number_of_calls: u32,
    /// Trial calls admitted in half-open
    pub permitted_calls_in_half_open: u32,
    /// Whether OPEN moves to HALF_OPEN on its own after the wait
    pub automatic_transition: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            slow_call_rate_threshold: 100.0,
            slow_call_duration_threshold: Duration::from_secs(60),
            wait_duration_in_open_state: Duration::from_secs(60),
            sliding_window_type: WindowType::CountBased,
            sliding_window_size: 100,
            minimum_number_of_calls: 10,
            permitted_calls_in_half_open: 10,
            automatic_transition: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            return Err(ConfigError::invalid("failure_rate_threshold must be in (0, 100]"));
        }
        if !(self.slow_call_rate_threshold > 0.0 && self.slow_call_rate_threshold <= 100.0) {
            return Err(ConfigError::invalid("slow_call_rate_threshold must be in (0, 100]"));
        }
        if self.sliding_window_size == 0 {
            return Err(ConfigError::invalid("sliding_window_size must be greater than 0"));
        }
        if self.minimum_number_of_calls == 0 {
            return Err(ConfigError::invalid("minimum_number_of_calls must be greater than 0"));
        }
        if self.permitted_calls_in_half_open == 0 {
            return Err(ConfigError::invalid(
                "permitted_calls_in_half_open must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Minimum buffered calls before rates count, capped by the window size
    /// for count-based windows
    pub fn effective_minimum_calls(&self) -> u32 {
        match self.sliding_window_type {
            WindowType::CountBased => self.minimum_number_of_calls.min(self.sliding_window_size),
            WindowType::TimeBased => self.minimum_number_of_calls,
        }
    }

    fn exceeds_thresholds(&self, snapshot: &WindowSnapshot, minimum_calls: u32) -> bool {
        let failure = snapshot.failure_rate(minimum_calls);
        let slow = snapshot.slow_call_rate(minimum_calls);
        failure.is_some_and(|rate| rate >= self.failure_rate_threshold)
            || slow.is_some_and(|rate| rate >= self.slow_call_rate_threshold)
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.config.failure_rate_threshold = percent;
        self
    }

    pub fn slow_call_rate_threshold(mut self, percent: f32) -> Self {
        self.config.slow_call_rate_threshold = percent;
        self
    }

    pub fn slow_call_duration_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_call_duration_threshold = threshold;
        self
    }

    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    pub fn count_based_window(mut self, calls: u32) -> Self {
        self.config.sliding_window_type = WindowType::CountBased;
        self.config.sliding_window_size = calls;
        self
    }

    pub fn time_based_window(mut self, seconds: u32) -> Self {
        self.config.sliding_window_type = WindowType::TimeBased;
        self.config.sliding_window_size = seconds;
        self
    }

    pub fn minimum_number_of_calls(mut self, calls: u32) -> Self {
        self.config.minimum_number_of_calls = calls;
        self
    }

    pub fn permitted_calls_in_half_open(mut self, calls: u32) -> Self {
        self.config.permitted_calls_in_half_open = calls;
        self
    }

    pub fn automatic_transition(mut self, enabled: bool) -> Self {
        self.config.automatic_transition = enabled;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// Failure rate in percent, `None` until enough calls are buffered
    pub failure_rate: Option<f32>,
    /// Slow-call rate in percent, `None` until enough calls are buffered
    pub slow_call_rate: Option<f32>,
    pub buffered_calls: u32,
    pub failed_calls: u32,
    pub slow_calls: u32,
    pub slow_failed_calls: u32,
    pub successful_calls: u32,
    /// Calls rejected since the breaker was created
    pub not_permitted_calls: u64,
    pub time_in_state: Duration,
}

struct Inner {
    state: CircuitState,
    window: SlidingWindow,
    trial_window: SlidingWindow,
    trial_permits: u32,
    opened_at: Option<Instant>,
    state_since: Instant,
    /// Bumped on every transition so stale permits can be recognised
    generation: u64,
}

/// Permission to run one call through the breaker
///
/// Record the outcome with [`CallPermit::record`]. A permit dropped without
/// an outcome gives its half-open trial slot back.
#[must_use = "a permit must be recorded or it counts as abandoned"]
pub struct CallPermit<'a, C: Clock = SystemClock> {
    breaker: &'a CircuitBreaker<C>,
    started: Instant,
    generation: u64,
    completed: bool,
}

impl<C: Clock> CallPermit<'_, C> {
    /// Record the call outcome, timing it from permit acquisition
    pub fn record(mut self, outcome: Outcome) {
        self.completed = true;
        self.breaker.on_outcome(self.generation, self.started, outcome);
    }
}

impl<C: Clock> Drop for CallPermit<'_, C> {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.release_trial(self.generation);
        }
    }
}

/// Generic circuit breaker implementation
///
/// Clones share state. All state lives behind one mutex; the critical
/// sections are short and never run user code.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<Inner>>,
    not_permitted: Arc<AtomicU64>,
    listeners: Arc<RwLock<Vec<TransitionListener>>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("not_permitted", &self.not_permitted.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            inner: Arc::clone(&self.inner),
            not_permitted: Arc::clone(&self.not_permitted),
            listeners: Arc::clone(&self.listeners),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();
        let inner = Inner {
            state: CircuitState::Closed,
            window: SlidingWindow::new(
                config.sliding_window_type,
                config.sliding_window_size,
                now,
            ),
            trial_window: SlidingWindow::count_based(config.permitted_calls_in_half_open),
            trial_permits: 0,
            opened_at: None,
            state_since: now,
            generation: 0,
        };

        Ok(Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(inner)),
            not_permitted: Arc::new(AtomicU64::new(0)),
            listeners: Arc::new(RwLock::new(Vec::new())),
            clock: Arc::new(clock),
        })
    }

    /// The configuration this breaker was built from
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Register a callback for state transitions
    pub fn on_transition(&self, listener: TransitionListener) {
        self.listeners.write().push(listener);
    }

    /// Current state, applying a due OPEN -> HALF_OPEN transition first
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let (state, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.half_open_if_due(&mut inner, now);
            (inner.state, transition)
        };
        self.notify(transition);
        state
    }

    /// Try to obtain permission for one call
    ///
    /// Returns the rejecting state when the call is not permitted. Never
    /// blocks.
    pub fn try_acquire(&self) -> Result<CallPermit<'_, C>, CircuitState> {
        let now = self.clock.now();
        let (decision, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.half_open_if_due(&mut inner, now);
            let decision = match inner.state {
                CircuitState::Closed | CircuitState::Disabled => Ok(inner.generation),
                CircuitState::HalfOpen => {
                    if inner.trial_permits < self.config.permitted_calls_in_half_open {
                        inner.trial_permits += 1;
                        Ok(inner.generation)
                    } else {
                        Err(CircuitState::HalfOpen)
                    }
                }
                rejecting @ (CircuitState::Open | CircuitState::ForcedOpen) => Err(rejecting),
            };
            (decision, transition)
        };
        self.notify(transition);

        match decision {
            Ok(generation) => {
                Ok(CallPermit { breaker: self, started: now, generation, completed: false })
            }
            Err(state) => {
                self.not_permitted.fetch_add(1, Ordering::Relaxed);
                debug!(state = %state, "Circuit breaker rejecting call");
                Err(state)
            }
        }
    }

    /// Execute a synchronous operation, counting every error as a failure
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.call_classified(operation, |_| Outcome::Failure)
    }

    /// Execute a synchronous operation, letting `classify` decide how an
    /// error is counted
    #[instrument(skip_all, level = "debug")]
    pub fn call_classified<F, P, T, E>(&self, operation: F, classify: P) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        P: FnOnce(&E) -> Outcome,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.try_acquire().map_err(|state| ResilienceError::CircuitOpen { state })?;

        match operation() {
            Ok(value) => {
                permit.record(Outcome::Success);
                Ok(value)
            }
            Err(source) => {
                permit.record(classify(&source));
                Err(ResilienceError::OperationFailed { source })
            }
        }
    }

    /// Execute an async operation, counting every error as a failure
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.execute_classified(operation, |_| Outcome::Failure).await
    }

    /// Execute an async operation, letting `classify` decide how an error is
    /// counted
    ///
    /// The breaker decision itself never awaits.
    #[instrument(skip_all, level = "debug")]
    pub async fn execute_classified<F, Fut, P, T, E>(
        &self,
        operation: F,
        classify: P,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> Outcome,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.try_acquire().map_err(|state| ResilienceError::CircuitOpen { state })?;

        match operation().await {
            Ok(value) => {
                permit.record(Outcome::Success);
                Ok(value)
            }
            Err(source) => {
                permit.record(classify(&source));
                Err(ResilienceError::OperationFailed { source })
            }
        }
    }

    /// Snapshot of the currently active window
    ///
    /// In half-open the trial window is reported.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.now();
        let (metrics, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.half_open_if_due(&mut inner, now);
            let (snapshot, minimum) = if inner.state == CircuitState::HalfOpen {
                (inner.trial_window.snapshot(now), self.config.permitted_calls_in_half_open)
            } else {
                (inner.window.snapshot(now), self.config.effective_minimum_calls())
            };
            let metrics = CircuitBreakerMetrics {
                state: inner.state,
                failure_rate: snapshot.failure_rate(minimum),
                slow_call_rate: snapshot.slow_call_rate(minimum),
                buffered_calls: snapshot.total_calls,
                failed_calls: snapshot.failed_calls,
                slow_calls: snapshot.slow_calls,
                slow_failed_calls: snapshot.slow_failed_calls,
                successful_calls: snapshot.successful_calls(),
                not_permitted_calls: self.not_permitted.load(Ordering::Relaxed),
                time_in_state: now.saturating_duration_since(inner.state_since),
            };
            (metrics, transition)
        };
        self.notify(transition);
        metrics
    }

    /// Reject every call until [`reset`](Self::reset)
    pub fn force_open(&self) {
        self.admin_transition(CircuitState::ForcedOpen);
    }

    /// Stop evaluating outcomes and permit every call
    pub fn disable(&self) {
        self.admin_transition(CircuitState::Disabled);
    }

    /// Start a half-open trial period now, regardless of the wait duration
    pub fn transition_to_half_open(&self) {
        self.admin_transition(CircuitState::HalfOpen);
    }

    /// Return to CLOSED with an empty window
    pub fn reset(&self) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Closed {
                inner.window.clear(now);
                inner.generation += 1;
                None
            } else {
                Some(self.transition(&mut inner, CircuitState::Closed, now))
            }
        };
        info!("Circuit breaker reset to closed state");
        self.notify(transition);
    }

    fn admin_transition(&self, to: CircuitState) {
        let now = self.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            (inner.state != to).then(|| self.transition(&mut inner, to, now))
        };
        self.notify(transition);
    }

    fn half_open_if_due(&self, inner: &mut Inner, now: Instant) -> Option<StateTransition> {
        if inner.state != CircuitState::Open || !self.config.automatic_transition {
            return None;
        }
        let opened_at = inner.opened_at?;
        if now.saturating_duration_since(opened_at) < self.config.wait_duration_in_open_state {
            return None;
        }
        Some(self.transition(inner, CircuitState::HalfOpen, now))
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) -> StateTransition {
        let from = inner.state;
        inner.state = to;
        inner.state_since = now;
        inner.generation += 1;
        inner.trial_permits = 0;

        match to {
            CircuitState::Open => inner.opened_at = Some(now),
            CircuitState::HalfOpen => inner.trial_window.clear(now),
            CircuitState::Closed | CircuitState::Disabled | CircuitState::ForcedOpen => {
                inner.opened_at = None;
                inner.window.clear(now);
            }
        }

        StateTransition { from, to, at: now }
    }

    fn on_outcome(&self, generation: u64, started: Instant, outcome: Outcome) {
        let now = self.clock.now();
        let slow = now.saturating_duration_since(started) > self.config.slow_call_duration_threshold;

        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                // Permit predates the current state; its outcome no longer applies
                return;
            }
            match (inner.state, outcome) {
                (CircuitState::Closed, Outcome::Ignored) => None,
                (CircuitState::Closed, outcome) => {
                    let snapshot = inner.window.record(outcome == Outcome::Failure, slow, now);
                    if self
                        .config
                        .exceeds_thresholds(&snapshot, self.config.effective_minimum_calls())
                    {
                        Some(self.transition(&mut inner, CircuitState::Open, now))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, Outcome::Ignored) => {
                    inner.trial_permits = inner.trial_permits.saturating_sub(1);
                    None
                }
                (CircuitState::HalfOpen, outcome) => {
                    let permitted = self.config.permitted_calls_in_half_open;
                    let snapshot =
                        inner.trial_window.record(outcome == Outcome::Failure, slow, now);
                    if snapshot.total_calls < permitted {
                        None
                    } else if self.config.exceeds_thresholds(&snapshot, permitted) {
                        Some(self.transition(&mut inner, CircuitState::Open, now))
                    } else {
                        Some(self.transition(&mut inner, CircuitState::Closed, now))
                    }
                }
                _ => None,
            }
        };
        self.notify(transition);
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.trial_permits = inner.trial_permits.saturating_sub(1);
        }
    }

    fn notify(&self, transition: Option<StateTransition>) {
        let Some(transition) = transition else {
            return;
        };

        match transition.to {
            CircuitState::Open => error!(
                from = %transition.from,
                wait_ms = self.config.wait_duration_in_open_state.as_millis() as u64,
                automatic_transition = self.config.automatic_transition,
                "Circuit breaker opened"
            ),
            CircuitState::ForcedOpen => warn!(from = %transition.from, "Circuit breaker forced open"),
            CircuitState::Disabled => warn!(from = %transition.from, "Circuit breaker disabled"),
            CircuitState::HalfOpen | CircuitState::Closed => {
                info!(from = %transition.from, to = %transition.to, "Circuit breaker state changed")
            }
        }

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(&transition);
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the circuit breaker
    //!
    //! Time is driven with `MockClock`, so wait durations and slow-call
    //! thresholds are exercised without sleeping.

    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::resilience::MockClock;

    #[derive(Debug, thiserror::Error)]
    #[error("test error")]
    struct TestError;

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let cb = CircuitBreaker::with_clock(config, clock.clone()).expect("valid config");
        (cb, clock)
    }

    fn small_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_rate_threshold(50.0)
            .count_based_window(4)
            .minimum_number_of_calls(4)
            .permitted_calls_in_half_open(2)
            .wait_duration_in_open_state(Duration::from_secs(30))
            .build()
            .expect("valid config")
    }

    fn fail(cb: &CircuitBreaker<MockClock>) {
        let _ = cb.call(|| Err::<(), _>(TestError));
    }

    fn succeed(cb: &CircuitBreaker<MockClock>) {
        let _ = cb.call(|| Ok::<_, TestError>(()));
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(CircuitState::Disabled.to_string(), "DISABLED");
        assert_eq!(CircuitState::ForcedOpen.to_string(), "FORCED_OPEN");
    }

    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::builder().failure_rate_threshold(0.0).build().is_err());
        assert!(CircuitBreakerConfig::builder().failure_rate_threshold(101.0).build().is_err());
        assert!(CircuitBreakerConfig::builder().count_based_window(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().permitted_calls_in_half_open(0).build().is_err());
    }

    #[test]
    fn test_effective_minimum_is_capped_by_count_window() {
        let config = CircuitBreakerConfig::builder()
            .count_based_window(5)
            .minimum_number_of_calls(10)
            .build()
            .expect("valid config");
        assert_eq!(config.effective_minimum_calls(), 5);

        let config = CircuitBreakerConfig::builder()
            .time_based_window(5)
            .minimum_number_of_calls(10)
            .build()
            .expect("valid config");
        assert_eq!(config.effective_minimum_calls(), 10);
    }

    /// Half of the last four calls failing opens the breaker, and the next
    /// call never reaches the operation.
    #[test]
    fn test_opens_at_failure_rate_threshold() {
        let (cb, _clock) = breaker(small_config());

        succeed(&cb);
        fail(&cb);
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed, "below minimum calls");
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        let result = cb.call(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>(())
        });

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { state: CircuitState::Open })));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(cb.metrics().not_permitted_calls, 1);
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let (cb, _clock) = breaker(small_config());

        for _ in 0..3 {
            succeed(&cb);
        }
        fail(&cb);

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failure_rate, Some(25.0));
        assert_eq!(metrics.buffered_calls, 4);
        assert_eq!(metrics.successful_calls, 3);
    }

    #[test]
    fn test_automatic_half_open_after_wait() {
        let (cb, clock) = breaker(small_config());
        for _ in 0..4 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(29));
        assert_eq!(cb.state(), CircuitState::Open, "wait has not elapsed yet");

        clock.advance(Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.call(|| Ok::<_, TestError>(())).is_ok());
    }

    #[test]
    fn test_manual_recovery_when_automatic_transition_disabled() {
        let config = CircuitBreakerConfig {
            automatic_transition: false,
            ..small_config()
        };
        let (cb, clock) = breaker(config);
        for _ in 0..4 {
            fail(&cb);
        }

        clock.advance(Duration::from_secs(3600));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());

        cb.transition_to_half_open();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_successes_close() {
        let (cb, clock) = breaker(small_config());
        for _ in 0..4 {
            fail(&cb);
        }
        clock.advance(Duration::from_secs(30));

        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::HalfOpen, "one trial still outstanding");
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().buffered_calls, 0, "window starts fresh after closing");
    }

    #[test]
    fn test_half_open_failures_reopen() {
        let (cb, clock) = breaker(small_config());
        for _ in 0..4 {
            fail(&cb);
        }
        clock.advance(Duration::from_secs(30));

        fail(&cb);
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_limits_trial_calls() {
        let (cb, clock) = breaker(small_config());
        for _ in 0..4 {
            fail(&cb);
        }
        clock.advance(Duration::from_secs(30));

        let first = cb.try_acquire().expect("first trial");
        let second = cb.try_acquire().expect("second trial");
        assert_eq!(cb.try_acquire().err(), Some(CircuitState::HalfOpen));

        // Dropping a permit without an outcome frees its slot
        drop(second);
        let third = cb.try_acquire().expect("slot released");
        first.record(Outcome::Success);
        third.record(Outcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_slow_calls_open_breaker() {
        let config = CircuitBreakerConfig::builder()
            .count_based_window(2)
            .minimum_number_of_calls(2)
            .slow_call_rate_threshold(100.0)
            .slow_call_duration_threshold(Duration::from_secs(1))
            .build()
            .expect("valid config");
        let (cb, clock) = breaker(config);

        for _ in 0..2 {
            let permit = cb.try_acquire().expect("closed");
            clock.advance(Duration::from_secs(2));
            permit.record(Outcome::Success);
        }

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Open);
    }

    #[test]
    fn test_ignored_outcomes_are_not_buffered() {
        let (cb, _clock) = breaker(small_config());

        for _ in 0..4 {
            let _ = cb.call_classified(|| Err::<(), _>(TestError), |_| Outcome::Ignored);
        }
        assert_eq!(cb.metrics().buffered_calls, 0);

        for _ in 0..4 {
            let _ = cb.call_classified(|| Err::<(), _>(TestError), |_| Outcome::Success);
        }
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.failed_calls, 0);
        assert_eq!(metrics.successful_calls, 4);
    }

    #[test]
    fn test_force_open_rejects_until_reset() {
        let (cb, clock) = breaker(small_config());
        cb.force_open();

        clock.advance(Duration::from_secs(3600));
        assert!(matches!(
            cb.call(|| Ok::<_, TestError>(())),
            Err(ResilienceError::CircuitOpen { state: CircuitState::ForcedOpen })
        ));

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.call(|| Ok::<_, TestError>(())).is_ok());
    }

    #[test]
    fn test_disabled_permits_and_records_nothing() {
        let (cb, _clock) = breaker(small_config());
        cb.disable();

        for _ in 0..10 {
            fail(&cb);
        }
        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Disabled);
        assert_eq!(metrics.buffered_calls, 0);
    }

    #[test]
    fn test_time_based_window_forgets_old_failures() {
        let config = CircuitBreakerConfig::builder()
            .time_based_window(10)
            .minimum_number_of_calls(3)
            .build()
            .expect("valid config");
        let (cb, clock) = breaker(config);

        fail(&cb);
        fail(&cb);
        clock.advance(Duration::from_secs(15));
        succeed(&cb);

        let metrics = cb.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.buffered_calls, 1);
    }

    #[test]
    fn test_listeners_observe_transitions() {
        let (cb, clock) = breaker(small_config());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cb.on_transition(Arc::new(move |t: &StateTransition| sink.lock().push((t.from, t.to))));

        for _ in 0..4 {
            fail(&cb);
        }
        clock.advance(Duration::from_secs(30));
        let _ = cb.state();
        cb.reset();

        assert_eq!(
            *seen.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_async_execute_records_outcomes() {
        let (cb, _clock) = breaker(small_config());

        for _ in 0..4 {
            let _ = cb.execute(|| async { Err::<(), _>(TestError) }).await;
        }

        let result = cb.execute(|| async { Ok::<_, TestError>(1) }).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    }

    #[test]
    fn test_clones_share_state() {
        let (cb, _clock) = breaker(small_config());
        let other = cb.clone();
        other.force_open();
        assert_eq!(cb.state(), CircuitState::ForcedOpen);
    }
}
