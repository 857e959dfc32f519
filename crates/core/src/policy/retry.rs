//! Retry tuning per adapter category

use std::sync::Arc;
use std::time::Duration;

use relaygate_common::resilience::{RetryConfig, RetryDecision, RetryPolicy};
use relaygate_domain::{
    AdapterCategory, AdapterError, ErrorKind, ResilienceSettings, Result, StatusBearing,
    VendorErrorGroup,
};

use super::{config_error, CategoryTable};

type ErrorPredicate = fn(&AdapterError) -> bool;

/// Retry bundle for one adapter category
#[derive(Debug, Clone)]
pub struct AdapterRetryPolicy {
    category: AdapterCategory,
    config: RetryConfig,
    retry_on: ErrorPredicate,
    retry_server_error_results: bool,
}

impl AdapterRetryPolicy {
    pub fn category(&self) -> AdapterCategory {
        self.category
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_retryable(&self, error: &AdapterError) -> bool {
        (self.retry_on)(error)
    }

    /// Whether a successful result should still be retried
    pub fn should_retry_result<T: StatusBearing>(&self, result: &T) -> bool {
        self.retry_server_error_results && result.is_server_error()
    }

    pub fn retries_server_error_results(&self) -> bool {
        self.retry_server_error_results
    }
}

impl RetryPolicy<AdapterError> for AdapterRetryPolicy {
    fn should_retry(&self, error: &AdapterError, _attempt: u32) -> RetryDecision {
        if self.is_retryable(error) {
            RetryDecision::Retry
        } else {
            RetryDecision::Stop
        }
    }
}

fn http_retryable(error: &AdapterError) -> bool {
    let kind = error.kind();
    match kind {
        ErrorKind::IllegalArgument | ErrorKind::IllegalState => false,
        ErrorKind::Http { status } => (500..600).contains(status),
        ErrorKind::Io => true,
        _ => kind.is_timeout() || kind.is_connection(),
    }
}

fn database_retryable(error: &AdapterError) -> bool {
    let kind = error.kind();
    match kind {
        ErrorKind::IntegrityViolation | ErrorKind::DuplicateKey => false,
        ErrorKind::TransientDataAccess | ErrorKind::QueryTimeout => true,
        ErrorKind::Sql { .. } => kind.sql_state_class() == Some("08"),
        _ => false,
    }
}

fn messaging_retryable(error: &AdapterError) -> bool {
    !error.kind().is_illegal_input()
}

fn file_retryable(error: &AdapterError) -> bool {
    let message = error.message().to_lowercase();
    if message.contains("permission denied") || message.contains("access denied") {
        return false;
    }
    matches!(
        error.kind(),
        ErrorKind::Io
            | ErrorKind::FileSystem
            | ErrorKind::Connection
            | ErrorKind::ConnectionRefused
            | ErrorKind::FtpConnectionClosed
    )
}

fn critical_retryable(error: &AdapterError) -> bool {
    error.kind().vendor_group() == Some(VendorErrorGroup::Communication)
}

fn default_retryable(error: &AdapterError) -> bool {
    !matches!(error.kind(), ErrorKind::IllegalArgument)
}

fn exponential(
    attempts: u32,
    initial: Duration,
    multiplier: f64,
    max_delay: Duration,
    deadline: Duration,
) -> std::result::Result<RetryConfig, relaygate_common::resilience::ConfigError> {
    RetryConfig::builder()
        .max_attempts(attempts)
        .exponential_backoff(initial, multiplier, max_delay)
        .max_total_duration(deadline)
        .build()
}

fn build_policy(
    category: AdapterCategory,
    settings: &ResilienceSettings,
) -> Result<AdapterRetryPolicy> {
    let secs = Duration::from_secs;
    let millis = Duration::from_millis;

    let retry_on: ErrorPredicate = match category {
        AdapterCategory::Http => http_retryable,
        AdapterCategory::Database => database_retryable,
        AdapterCategory::Messaging => messaging_retryable,
        AdapterCategory::File => file_retryable,
        AdapterCategory::CriticalSystem => critical_retryable,
        AdapterCategory::Default => default_retryable,
    };

    let config = match category {
        AdapterCategory::Http => exponential(3, millis(500), 2.0, secs(10), secs(30)),
        AdapterCategory::Database => exponential(2, millis(2000), 1.5, secs(30), secs(30)),
        AdapterCategory::Messaging => exponential(5, millis(200), 2.0, secs(10), secs(30)),
        AdapterCategory::File => exponential(4, millis(5000), 1.5, secs(60), secs(120)),
        AdapterCategory::CriticalSystem => {
            exponential(2, millis(10_000), 1.2, secs(60), secs(120))
        }
        AdapterCategory::Default => RetryConfig::builder()
            .max_attempts(settings.default_retry_attempts)
            .fixed_backoff(settings.default_retry_wait)
            .max_total_duration(settings.default_retry_deadline)
            .build(),
    };

    Ok(AdapterRetryPolicy {
        category,
        config: config.map_err(|err| config_error(category, err))?,
        retry_on,
        retry_server_error_results: category == AdapterCategory::Http,
    })
}

/// Registry of retry policies, one per category
#[derive(Debug, Clone)]
pub struct RetryPolicyRegistry {
    policies: CategoryTable<Arc<AdapterRetryPolicy>>,
}

impl RetryPolicyRegistry {
    pub fn new(settings: &ResilienceSettings) -> Result<Self> {
        let policies =
            CategoryTable::try_build(|category| build_policy(category, settings).map(Arc::new))?;
        Ok(Self { policies })
    }

    /// Policy for an adapter type tag
    pub fn resolve(&self, adapter_type: &str) -> Arc<AdapterRetryPolicy> {
        Arc::clone(self.for_category(AdapterCategory::resolve(adapter_type)))
    }

    pub fn for_category(&self, category: AdapterCategory) -> &Arc<AdapterRetryPolicy> {
        self.policies.get(category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AdapterCategory, &Arc<AdapterRetryPolicy>)> + '_ {
        self.policies.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use relaygate_common::resilience::BackoffStrategy;
    use relaygate_domain::VendorError;

    use super::*;

    #[derive(Debug)]
    struct Fault(VendorErrorGroup);

    impl fmt::Display for Fault {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "vendor fault {}", self.0)
        }
    }

    impl VendorError for Fault {
        fn error_group(&self) -> VendorErrorGroup {
            self.0
        }
    }

    fn registry() -> RetryPolicyRegistry {
        RetryPolicyRegistry::new(&ResilienceSettings::default()).unwrap()
    }

    #[test]
    fn test_http_tuning() {
        let policy = registry().resolve("rest");
        assert_eq!(policy.category(), AdapterCategory::Http);
        assert_eq!(policy.config().max_attempts, 3);

        let delays: Vec<_> = (0..3).map(|n| policy.config().backoff.calculate_delay(n)).collect();
        assert_eq!(
            delays,
            vec![Duration::from_millis(500), Duration::from_millis(1000), Duration::from_millis(2000)]
        );

        assert!(policy.is_retryable(&AdapterError::http(503, "")));
        assert!(policy.is_retryable(&AdapterError::socket_timeout("")));
        assert!(policy.is_retryable(&AdapterError::io("")));
        assert!(!policy.is_retryable(&AdapterError::http(400, "")));
        assert!(!policy.is_retryable(&AdapterError::illegal_argument("")));
        assert!(policy.should_retry_result(&503_u16));
        assert!(!policy.should_retry_result(&200_u16));
    }

    #[test]
    fn test_messaging_delays() {
        let policy = registry().resolve("kafka");
        let delays: Vec<_> =
            (0..5).map(|n| policy.config().backoff.calculate_delay(n).as_millis()).collect();
        assert_eq!(delays, vec![200, 400, 800, 1600, 3200]);
        assert!(policy.is_retryable(&AdapterError::runtime("broker gone")));
        assert!(!policy.is_retryable(&AdapterError::new(ErrorKind::IllegalState, "")));
    }

    #[test]
    fn test_database_only_retries_connection_class() {
        let policy = registry().resolve("postgres");
        assert_eq!(policy.config().max_attempts, 2);
        assert!(policy.is_retryable(&AdapterError::sql("08001", "")));
        assert!(!policy.is_retryable(&AdapterError::sql("42601", "")));
        assert!(policy.is_retryable(&AdapterError::new(ErrorKind::TransientDataAccess, "")));
        assert!(policy.is_retryable(&AdapterError::new(ErrorKind::QueryTimeout, "")));
        assert!(!policy.is_retryable(&AdapterError::new(ErrorKind::DuplicateKey, "")));
        assert!(!policy.should_retry_result(&503_u16));
    }

    #[test]
    fn test_file_skips_permission_messages() {
        let policy = registry().resolve("sftp");
        assert_eq!(policy.config().max_attempts, 4);
        assert_eq!(policy.config().max_total_duration, Some(Duration::from_secs(120)));
        assert!(policy.is_retryable(&AdapterError::new(ErrorKind::FtpConnectionClosed, "")));
        assert!(!policy.is_retryable(&AdapterError::io("Permission denied")));
        assert!(!policy.is_retryable(&AdapterError::new(ErrorKind::FileNotFound, "")));
        assert!(!policy.is_retryable(&AdapterError::new(ErrorKind::AccessDenied, "")));
    }

    #[test]
    fn test_critical_only_retries_communication_group() {
        let policy = registry().resolve("sap-like");
        assert_eq!(policy.config().max_attempts, 2);
        assert!(policy.is_retryable(&AdapterError::vendor(Fault(VendorErrorGroup::Communication))));
        assert!(!policy.is_retryable(&AdapterError::vendor(Fault(VendorErrorGroup::Logon))));
        assert!(!policy.is_retryable(&AdapterError::timeout("")));
    }

    #[test]
    fn test_default_follows_settings() {
        let settings = ResilienceSettings {
            default_retry_attempts: 7,
            default_retry_wait: Duration::from_millis(250),
            ..ResilienceSettings::default()
        };
        let registry = RetryPolicyRegistry::new(&settings).unwrap();
        let policy = registry.resolve("carrier-pigeon");

        assert_eq!(policy.category(), AdapterCategory::Default);
        assert_eq!(policy.config().max_attempts, 7);
        assert_eq!(policy.config().backoff, BackoffStrategy::Fixed(Duration::from_millis(250)));
        assert!(policy.is_retryable(&AdapterError::new(ErrorKind::IllegalState, "")));
        assert!(!policy.is_retryable(&AdapterError::illegal_argument("")));
    }

    #[test]
    fn test_policy_decision_maps_predicate() {
        let policy = registry().resolve("http");
        assert_eq!(policy.should_retry(&AdapterError::http(502, ""), 0), RetryDecision::Retry);
        assert_eq!(policy.should_retry(&AdapterError::http(404, ""), 0), RetryDecision::Stop);
    }
}
