//! Circuit breaker tuning per adapter category

use std::sync::Arc;
use std::time::Duration;

use relaygate_common::resilience::{CircuitBreakerConfig, Outcome};
use relaygate_domain::{AdapterCategory, AdapterError, ErrorKind, Result};

use super::{config_error, CategoryTable};

type ErrorPredicate = fn(&AdapterError) -> bool;

/// Circuit breaker bundle for one adapter category
#[derive(Debug, Clone)]
pub struct CircuitBreakerPolicy {
    category: AdapterCategory,
    config: CircuitBreakerConfig,
    record_on: ErrorPredicate,
    ignore_on: ErrorPredicate,
}

impl CircuitBreakerPolicy {
    pub fn category(&self) -> AdapterCategory {
        self.category
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// How a failed call counts in the sliding window.
    ///
    /// Ignored errors are not recorded at all; errors that are neither
    /// recorded nor ignored count as successes.
    pub fn outcome_for(&self, error: &AdapterError) -> Outcome {
        if (self.ignore_on)(error) {
            Outcome::Ignored
        } else if (self.record_on)(error) {
            Outcome::Failure
        } else {
            Outcome::Success
        }
    }
}

fn transport_failure(kind: &ErrorKind) -> bool {
    kind.is_timeout() || kind.is_connection() || matches!(kind, ErrorKind::Io)
}

fn http_records(error: &AdapterError) -> bool {
    let kind = error.kind();
    match kind {
        ErrorKind::Http { status } => *status >= 500,
        _ => transport_failure(kind) || matches!(kind, ErrorKind::Runtime),
    }
}

fn http_ignores(error: &AdapterError) -> bool {
    let kind = error.kind();
    kind.is_illegal_input() || matches!(kind, ErrorKind::Http { status } if (400..500).contains(status))
}

fn database_records(error: &AdapterError) -> bool {
    let kind = error.kind();
    transport_failure(kind) || matches!(kind, ErrorKind::Sql { .. } | ErrorKind::TransientDataAccess)
}

fn database_ignores(error: &AdapterError) -> bool {
    matches!(
        error.kind(),
        ErrorKind::IntegrityViolation | ErrorKind::DuplicateKey | ErrorKind::IllegalArgument
    )
}

fn messaging_records(error: &AdapterError) -> bool {
    let kind = error.kind();
    transport_failure(kind) || matches!(kind, ErrorKind::Messaging | ErrorKind::Runtime)
}

fn file_records(error: &AdapterError) -> bool {
    let kind = error.kind();
    transport_failure(kind) || matches!(kind, ErrorKind::FileSystem)
}

fn file_ignores(error: &AdapterError) -> bool {
    matches!(
        error.kind(),
        ErrorKind::FileNotFound | ErrorKind::AccessDenied | ErrorKind::IllegalArgument
    )
}

fn critical_records(error: &AdapterError) -> bool {
    let kind = error.kind();
    transport_failure(kind) || matches!(kind, ErrorKind::Vendor(_) | ErrorKind::Runtime)
}

fn critical_ignores(error: &AdapterError) -> bool {
    let kind = error.kind();
    kind.is_illegal_input() || matches!(kind, ErrorKind::Authentication)
}

fn illegal_input(error: &AdapterError) -> bool {
    error.kind().is_illegal_input()
}

fn illegal_argument(error: &AdapterError) -> bool {
    matches!(error.kind(), ErrorKind::IllegalArgument)
}

fn any_error(_: &AdapterError) -> bool {
    true
}

struct Tuning {
    failure_rate: f32,
    wait: Duration,
    time_window: bool,
    window_size: u32,
    minimum_calls: u32,
    half_open_calls: u32,
    automatic: bool,
    slow_rate: f32,
    slow_threshold: Duration,
}

fn tuning(category: AdapterCategory) -> Tuning {
    let secs = Duration::from_secs;
    match category {
        AdapterCategory::Http => Tuning {
            failure_rate: 50.0,
            wait: secs(30),
            time_window: false,
            window_size: 10,
            minimum_calls: 5,
            half_open_calls: 3,
            automatic: true,
            slow_rate: 50.0,
            slow_threshold: secs(5),
        },
        AdapterCategory::Database => Tuning {
            failure_rate: 60.0,
            wait: secs(60),
            time_window: true,
            window_size: 60,
            minimum_calls: 10,
            half_open_calls: 5,
            automatic: true,
            slow_rate: 70.0,
            slow_threshold: secs(10),
        },
        AdapterCategory::Messaging => Tuning {
            failure_rate: 40.0,
            wait: secs(20),
            time_window: false,
            window_size: 20,
            minimum_calls: 10,
            half_open_calls: 3,
            automatic: true,
            slow_rate: 60.0,
            slow_threshold: secs(3),
        },
        AdapterCategory::File => Tuning {
            failure_rate: 70.0,
            wait: secs(120),
            time_window: true,
            window_size: 300,
            minimum_calls: 5,
            half_open_calls: 2,
            automatic: true,
            slow_rate: 80.0,
            slow_threshold: secs(60),
        },
        AdapterCategory::CriticalSystem => Tuning {
            failure_rate: 30.0,
            wait: secs(300),
            time_window: false,
            window_size: 5,
            minimum_calls: 3,
            half_open_calls: 1,
            automatic: false,
            slow_rate: 40.0,
            slow_threshold: secs(30),
        },
        AdapterCategory::Default => Tuning {
            failure_rate: 50.0,
            wait: secs(60),
            time_window: false,
            window_size: 100,
            minimum_calls: 10,
            half_open_calls: 10,
            automatic: true,
            slow_rate: 100.0,
            slow_threshold: secs(60),
        },
    }
}

fn build_policy(category: AdapterCategory) -> Result<CircuitBreakerPolicy> {
    let t = tuning(category);
    let builder = CircuitBreakerConfig::builder()
        .failure_rate_threshold(t.failure_rate)
        .wait_duration_in_open_state(t.wait)
        .minimum_number_of_calls(t.minimum_calls)
        .permitted_calls_in_half_open(t.half_open_calls)
        .automatic_transition(t.automatic)
        .slow_call_rate_threshold(t.slow_rate)
        .slow_call_duration_threshold(t.slow_threshold);
    let builder = if t.time_window {
        builder.time_based_window(t.window_size)
    } else {
        builder.count_based_window(t.window_size)
    };
    let config = builder.build().map_err(|err| config_error(category, err))?;

    let record_on: ErrorPredicate = match category {
        AdapterCategory::Http => http_records,
        AdapterCategory::Database => database_records,
        AdapterCategory::Messaging => messaging_records,
        AdapterCategory::File => file_records,
        AdapterCategory::CriticalSystem => critical_records,
        AdapterCategory::Default => any_error,
    };
    let ignore_on: ErrorPredicate = match category {
        AdapterCategory::Http => http_ignores,
        AdapterCategory::Database => database_ignores,
        AdapterCategory::Messaging => illegal_input,
        AdapterCategory::File => file_ignores,
        AdapterCategory::CriticalSystem => critical_ignores,
        AdapterCategory::Default => illegal_argument,
    };

    Ok(CircuitBreakerPolicy { category, config, record_on, ignore_on })
}

/// Registry of circuit breaker policies, one per category
#[derive(Debug, Clone)]
pub struct CircuitBreakerPolicyRegistry {
    policies: CategoryTable<Arc<CircuitBreakerPolicy>>,
}

impl CircuitBreakerPolicyRegistry {
    pub fn new() -> Result<Self> {
        let policies = CategoryTable::try_build(|category| build_policy(category).map(Arc::new))?;
        Ok(Self { policies })
    }

    pub fn resolve(&self, adapter_type: &str) -> Arc<CircuitBreakerPolicy> {
        Arc::clone(self.for_category(AdapterCategory::resolve(adapter_type)))
    }

    pub fn for_category(&self, category: AdapterCategory) -> &Arc<CircuitBreakerPolicy> {
        self.policies.get(category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AdapterCategory, &Arc<CircuitBreakerPolicy>)> + '_ {
        self.policies.iter()
    }
}
