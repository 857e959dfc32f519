//! Error classification engine
//!
//! Maps an [`AdapterError`] to an [`ErrorClassification`]: category,
//! severity, whether a retry can plausibly help, whether the failure should
//! count towards opening a breaker, and operator guidance.
//!
//! # Precedence
//!
//! 1. The error kind, when it pins the category on its own.
//! 2. Message patterns, tried in order: timeout, connection,
//!    authentication, rate limit, resource.
//! 3. Bare status literals in the message (`404`, `500`, `502`, `503`).
//! 4. `UNKNOWN`.
//!
//! Classification is a pure function of `(kind, message, context)` and is
//! memoized in a bounded cache.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use relaygate_domain::{
    AdapterCategory, AdapterError, ErrorCategory, ErrorClassification, ErrorKind, ErrorSeverity,
    ResilienceSettings,
};
use tracing::trace;

/// Message patterns in evaluation order
const MESSAGE_PATTERNS: &[(ErrorCategory, &str)] = &[
    (ErrorCategory::Timeout, r"(?i)(time[ds]?[\s_-]?out|deadline exceeded)"),
    (
        ErrorCategory::Connection,
        r"(?i)(connection (refused|reset|closed|aborted|failed)|unable to connect|could not connect|no route to host|unknown host|network is unreachable|broken pipe)",
    ),
    (
        ErrorCategory::Authentication,
        r"(?i)(unauthori[sz]ed|authentication|auth failed|invalid (credentials|token|api key)|token expired|login failed|\b401\b)",
    ),
    (
        ErrorCategory::RateLimit,
        r"(?i)(rate[\s_-]?limit|too many requests|throttl|quota exceeded|\b429\b)",
    ),
    (
        ErrorCategory::Resource,
        r"(?i)(out of memory|no space left|disk full|too many open files|resource exhausted|insufficient (memory|resources|storage)|pool exhausted)",
    ),
];

/// Status literals, consulted after the patterns above
const STATUS_LITERALS: &[(ErrorCategory, &str)] = &[
    (ErrorCategory::NotFound, r"404"),
    (ErrorCategory::ServiceUnavailable, r"50[023]"),
];

static MESSAGE_RULES: Lazy<Vec<(ErrorCategory, Regex)>> = Lazy::new(|| compile(MESSAGE_PATTERNS));
static STATUS_RULES: Lazy<Vec<(ErrorCategory, Regex)>> = Lazy::new(|| compile(STATUS_LITERALS));

fn compile(patterns: &[(ErrorCategory, &str)]) -> Vec<(ErrorCategory, Regex)> {
    patterns
        .iter()
        .filter_map(|(category, pattern)| Regex::new(pattern).ok().map(|re| (*category, re)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemoKey {
    kind: String,
    message_hash: u64,
    escalated: bool,
}

impl MemoKey {
    fn new(error: &AdapterError, escalated: bool) -> Self {
        let mut hasher = DefaultHasher::new();
        error.message().hash(&mut hasher);
        Self { kind: error.kind().cache_tag(), message_hash: hasher.finish(), escalated }
    }
}

/// Memoizing error classifier
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct ErrorClassifier {
    cache: Cache<MemoKey, Arc<ErrorClassification>>,
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier").field("entries", &self.cache.entry_count()).finish()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(ResilienceSettings::default().classifier_cache_capacity)
    }
}

impl ErrorClassifier {
    pub fn new(capacity: u64) -> Self {
        Self { cache: Cache::new(capacity) }
    }

    pub fn from_settings(settings: &ResilienceSettings) -> Self {
        Self::new(settings.classifier_cache_capacity)
    }

    /// Classify with the fixed severity table.
    pub fn classify(&self, error: &AdapterError) -> ErrorClassification {
        self.classify_memoized(error, false)
    }

    /// Classify in the context of an adapter category.
    ///
    /// Failures against a [`AdapterCategory::CriticalSystem`] are one
    /// severity level more urgent than the fixed table says.
    pub fn classify_for(
        &self,
        error: &AdapterError,
        category: AdapterCategory,
    ) -> ErrorClassification {
        self.classify_memoized(error, category == AdapterCategory::CriticalSystem)
    }

    /// Approximate number of memoized classifications
    pub fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    fn classify_memoized(&self, error: &AdapterError, escalated: bool) -> ErrorClassification {
        let key = MemoKey::new(error, escalated);
        if let Some(hit) = self.cache.get(&key) {
            if hit.message == error.message() {
                return hit.as_ref().clone();
            }
        }

        let classification = classify_uncached(error, escalated);
        trace!(
            error_type = %classification.error_type,
            category = %classification.category,
            severity = %classification.severity,
            "Classified adapter error"
        );
        self.cache.insert(key, Arc::new(classification.clone()));
        classification
    }
}

fn classify_uncached(error: &AdapterError, escalated: bool) -> ErrorClassification {
    let category = category_of(error);
    let base = severity_of(category);
    let severity = if escalated { base.escalate() } else { base };

    ErrorClassification {
        error_type: error.kind().type_name().to_string(),
        message: error.message().to_string(),
        category,
        severity,
        retryable: is_retryable(category, error.message()),
        circuit_breaker_candidate: is_breaker_candidate(category, severity),
        recovery_suggestions: recovery_suggestions(category)
            .iter()
            .map(|hint| (*hint).to_string())
            .collect(),
        estimated_recovery_time: estimated_recovery_time(category, severity),
    }
}

/// Category of an adapter error, following the documented precedence.
pub fn category_of(error: &AdapterError) -> ErrorCategory {
    type_category(error.kind(), error.message()).unwrap_or_else(|| message_category(error.message()))
}

fn type_category(kind: &ErrorKind, message: &str) -> Option<ErrorCategory> {
    let category = match kind {
        ErrorKind::SocketTimeout | ErrorKind::Timeout | ErrorKind::QueryTimeout => {
            ErrorCategory::Timeout
        }
        ErrorKind::ConnectionRefused
        | ErrorKind::Connection
        | ErrorKind::UnknownHost
        | ErrorKind::FtpConnectionClosed => ErrorCategory::Connection,
        ErrorKind::Authentication | ErrorKind::Security => ErrorCategory::Authentication,
        ErrorKind::IllegalArgument | ErrorKind::IllegalState => ErrorCategory::Validation,
        ErrorKind::FileNotFound => ErrorCategory::NotFound,
        ErrorKind::AccessDenied => ErrorCategory::Permission,
        ErrorKind::FileSystem => ErrorCategory::Io,
        ErrorKind::Sql { .. } => sql_category(kind.sql_state_class()),
        ErrorKind::IntegrityViolation | ErrorKind::DuplicateKey => {
            ErrorCategory::ConstraintViolation
        }
        ErrorKind::TransientDataAccess => ErrorCategory::Transaction,
        ErrorKind::Io => io_category(message),
        ErrorKind::Http { status } => return http_category(*status),
        ErrorKind::Vendor(_) | ErrorKind::Messaging | ErrorKind::Runtime | ErrorKind::Other => {
            return None;
        }
    };
    Some(category)
}

fn sql_category(state_class: Option<&str>) -> ErrorCategory {
    match state_class {
        Some("08") => ErrorCategory::Connection,
        Some("22") => ErrorCategory::Validation,
        Some("23") => ErrorCategory::ConstraintViolation,
        Some("40") => ErrorCategory::Transaction,
        Some("53" | "54") => ErrorCategory::Resource,
        _ => ErrorCategory::Database,
    }
}

fn io_category(message: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));

    if mentions(&["permission", "access denied"]) {
        ErrorCategory::Permission
    } else if mentions(&["no space", "disk full", "too many open files", "resource"]) {
        ErrorCategory::Resource
    } else if mentions(&["not found", "no such file"]) {
        ErrorCategory::NotFound
    } else {
        ErrorCategory::Io
    }
}

fn http_category(status: u16) -> Option<ErrorCategory> {
    match status {
        404 => Some(ErrorCategory::NotFound),
        401 => Some(ErrorCategory::Authentication),
        403 => Some(ErrorCategory::Permission),
        429 => Some(ErrorCategory::RateLimit),
        400 | 422 => Some(ErrorCategory::Validation),
        500..=599 => Some(ErrorCategory::ServiceUnavailable),
        _ => None,
    }
}

fn message_category(message: &str) -> ErrorCategory {
    MESSAGE_RULES
        .iter()
        .chain(STATUS_RULES.iter())
        .find(|(_, pattern)| pattern.is_match(message))
        .map_or(ErrorCategory::Unknown, |(category, _)| *category)
}

/// Fixed category to severity table
pub fn severity_of(category: ErrorCategory) -> ErrorSeverity {
    match category {
        ErrorCategory::Resource | ErrorCategory::Permission => ErrorSeverity::Critical,
        ErrorCategory::Authentication | ErrorCategory::Database | ErrorCategory::Transaction => {
            ErrorSeverity::High
        }
        ErrorCategory::Connection
        | ErrorCategory::Timeout
        | ErrorCategory::ServiceUnavailable => ErrorSeverity::Medium,
        ErrorCategory::Validation | ErrorCategory::NotFound | ErrorCategory::RateLimit => {
            ErrorSeverity::Low
        }
        _ => ErrorSeverity::Medium,
    }
}

pub fn is_retryable(category: ErrorCategory, message: &str) -> bool {
    match category {
        ErrorCategory::Timeout
        | ErrorCategory::Connection
        | ErrorCategory::ServiceUnavailable
        | ErrorCategory::RateLimit
        | ErrorCategory::Transaction => true,
        ErrorCategory::Resource => message.to_lowercase().contains("temporary"),
        _ => false,
    }
}

pub fn is_breaker_candidate(category: ErrorCategory, severity: ErrorSeverity) -> bool {
    matches!(
        category,
        ErrorCategory::ServiceUnavailable
            | ErrorCategory::Connection
            | ErrorCategory::Timeout
            | ErrorCategory::Resource
    ) && severity.is_severe()
}

fn base_recovery_time(category: ErrorCategory) -> Duration {
    match category {
        ErrorCategory::Timeout => Duration::from_secs(30),
        ErrorCategory::Connection | ErrorCategory::RateLimit => Duration::from_secs(60),
        ErrorCategory::ServiceUnavailable => Duration::from_secs(300),
        ErrorCategory::Resource => Duration::from_secs(600),
        ErrorCategory::Transaction => Duration::from_secs(5),
        _ => Duration::from_secs(10),
    }
}

pub fn estimated_recovery_time(category: ErrorCategory, severity: ErrorSeverity) -> Duration {
    base_recovery_time(category).mul_f64(severity.recovery_multiplier())
}

fn recovery_suggestions(category: ErrorCategory) -> &'static [&'static str] {
    match category {
        ErrorCategory::Timeout => &[
            "Increase the adapter timeout",
            "Check latency and load on the remote system",
            "Consider splitting large requests",
        ],
        ErrorCategory::Connection => &[
            "Verify the endpoint host and port",
            "Check network connectivity and firewall rules",
            "Confirm the remote service is running",
        ],
        ErrorCategory::Authentication => &[
            "Verify the adapter credentials",
            "Check whether the token or password has expired",
        ],
        ErrorCategory::RateLimit => &[
            "Reduce the request rate for this adapter",
            "Honor the Retry-After header when present",
            "Request a higher quota from the provider",
        ],
        ErrorCategory::Validation => &[
            "Check the request payload against the target schema",
            "Review the adapter mapping configuration",
        ],
        ErrorCategory::NotFound => &[
            "Verify the resource path or identifier",
            "Check whether the resource was moved or deleted",
        ],
        ErrorCategory::Permission => &[
            "Grant the adapter account access to the resource",
            "Review file system or API permissions",
        ],
        ErrorCategory::Resource => &[
            "Free disk space or memory on the affected host",
            "Raise file handle or connection pool limits",
            "Scale the target system",
        ],
        ErrorCategory::Database => &[
            "Check database health and logs",
            "Verify the SQL statement and schema",
        ],
        ErrorCategory::Transaction => &[
            "Retry the transaction",
            "Look for lock contention or deadlocks",
        ],
        ErrorCategory::ConstraintViolation => &[
            "Check for duplicate or conflicting records",
            "Validate foreign key references before writing",
        ],
        ErrorCategory::ServiceUnavailable => &[
            "Check the remote service status",
            "Wait for the service to recover before retrying",
        ],
        ErrorCategory::Io => &[
            "Check the file system or stream the adapter uses",
            "Verify paths and mount points",
        ],
        ErrorCategory::Unknown => &[
            "Inspect the adapter logs for details",
            "Escalate to the adapter owner if the failure persists",
        ],
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use relaygate_domain::{VendorError, VendorErrorGroup};

    use super::*;

    #[derive(Debug)]
    struct RfcFault;

    impl fmt::Display for RfcFault {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("RFC gateway timed out")
        }
    }

    impl VendorError for RfcFault {
        fn error_group(&self) -> VendorErrorGroup {
            VendorErrorGroup::Communication
        }
    }

    #[test]
    fn test_patterns_all_compile() {
        assert_eq!(MESSAGE_RULES.len(), MESSAGE_PATTERNS.len());
        assert_eq!(STATUS_RULES.len(), STATUS_LITERALS.len());
    }

    #[test]
    fn test_timeout_kinds_ignore_message() {
        let classifier = ErrorClassifier::default();
        for message in ["", "permission denied", "404 not found", "rate limit hit"] {
            let result = classifier.classify(&AdapterError::socket_timeout(message));
            assert_eq!(result.category, ErrorCategory::Timeout, "message {message:?}");
            assert_eq!(result.error_type, "SocketTimeout");
        }
    }

    #[test]
    fn test_sql_state_classes() {
        let cases = [
            ("08006", ErrorCategory::Connection),
            ("22001", ErrorCategory::Validation),
            ("23505", ErrorCategory::ConstraintViolation),
            ("40001", ErrorCategory::Transaction),
            ("53300", ErrorCategory::Resource),
            ("54000", ErrorCategory::Resource),
            ("42P01", ErrorCategory::Database),
        ];
        for (state, expected) in cases {
            assert_eq!(category_of(&AdapterError::sql(state, "x")), expected, "state {state}");
        }
        let no_state = AdapterError::new(ErrorKind::Sql { sql_state: None }, "boom");
        assert_eq!(category_of(&no_state), ErrorCategory::Database);
    }

    #[test]
    fn test_io_message_rules() {
        assert_eq!(category_of(&AdapterError::io("Permission denied")), ErrorCategory::Permission);
        assert_eq!(category_of(&AdapterError::io("disk full")), ErrorCategory::Resource);
        assert_eq!(category_of(&AdapterError::io("No such file")), ErrorCategory::NotFound);
        assert_eq!(category_of(&AdapterError::io("stream closed")), ErrorCategory::Io);
    }

    #[test]
    fn test_http_status_mapping() {
        let cases = [
            (404, ErrorCategory::NotFound),
            (401, ErrorCategory::Authentication),
            (403, ErrorCategory::Permission),
            (429, ErrorCategory::RateLimit),
            (422, ErrorCategory::Validation),
            (503, ErrorCategory::ServiceUnavailable),
        ];
        for (status, expected) in cases {
            assert_eq!(category_of(&AdapterError::http(status, "")), expected, "status {status}");
        }
        // Unmapped statuses fall through to the message
        assert_eq!(
            category_of(&AdapterError::http(418, "request timed out")),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn test_message_pattern_order() {
        // Timeout wins over connection when both match
        assert_eq!(
            category_of(&AdapterError::runtime("connection reset after read timeout")),
            ErrorCategory::Timeout
        );
        assert_eq!(
            category_of(&AdapterError::runtime("Too Many Requests")),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            category_of(&AdapterError::runtime("Unauthorized: invalid token")),
            ErrorCategory::Authentication
        );
    }

    #[test]
    fn test_status_literals_and_unknown() {
        assert_eq!(category_of(&AdapterError::runtime("got 404")), ErrorCategory::NotFound);
        assert_eq!(
            category_of(&AdapterError::runtime("upstream said 502")),
            ErrorCategory::ServiceUnavailable
        );
        assert_eq!(category_of(&AdapterError::runtime("something odd")), ErrorCategory::Unknown);
        assert_eq!(
            category_of(&AdapterError::runtime("code 5030")),
            ErrorCategory::ServiceUnavailable
        );
    }

    #[test]
    fn test_status_literals_match_inside_words() {
        for message in ["HTTP503", "error503 upstream", "code500"] {
            assert_eq!(
                category_of(&AdapterError::runtime(message)),
                ErrorCategory::ServiceUnavailable,
                "{message}"
            );
        }
        assert_eq!(category_of(&AdapterError::runtime("status:404Not")), ErrorCategory::NotFound);

        let classification = ErrorClassifier::default().classify(&AdapterError::runtime("HTTP503"));
        assert!(classification.retryable);
    }

    #[test]
    fn test_severity_and_retryability() {
        assert_eq!(severity_of(ErrorCategory::Resource), ErrorSeverity::Critical);
        assert_eq!(severity_of(ErrorCategory::Transaction), ErrorSeverity::High);
        assert_eq!(severity_of(ErrorCategory::Timeout), ErrorSeverity::Medium);
        assert_eq!(severity_of(ErrorCategory::RateLimit), ErrorSeverity::Low);
        assert_eq!(severity_of(ErrorCategory::Unknown), ErrorSeverity::Medium);

        assert!(is_retryable(ErrorCategory::RateLimit, ""));
        assert!(!is_retryable(ErrorCategory::ConstraintViolation, ""));
        assert!(is_retryable(ErrorCategory::Resource, "Temporary pool exhaustion"));
        assert!(!is_retryable(ErrorCategory::Resource, "disk full"));
        assert!(!is_retryable(ErrorCategory::Io, ""));
    }

    #[test]
    fn test_breaker_candidates() {
        let classifier = ErrorClassifier::default();
        let timeout = AdapterError::timeout("read timed out");

        let plain = classifier.classify(&timeout);
        assert_eq!(plain.severity, ErrorSeverity::Medium);
        assert!(!plain.circuit_breaker_candidate);

        let critical = classifier.classify_for(&timeout, AdapterCategory::CriticalSystem);
        assert_eq!(critical.severity, ErrorSeverity::High);
        assert!(critical.circuit_breaker_candidate);

        let resource = classifier.classify(&AdapterError::io("too many open files"));
        assert!(resource.circuit_breaker_candidate);
    }

    #[test]
    fn test_estimated_recovery_time_scales_with_severity() {
        assert_eq!(
            estimated_recovery_time(ErrorCategory::Timeout, ErrorSeverity::High),
            Duration::from_secs(45)
        );
        assert_eq!(
            estimated_recovery_time(ErrorCategory::Resource, ErrorSeverity::Critical),
            Duration::from_secs(1200)
        );
        assert_eq!(
            estimated_recovery_time(ErrorCategory::RateLimit, ErrorSeverity::Low),
            Duration::from_secs(30)
        );
        assert_eq!(
            estimated_recovery_time(ErrorCategory::Validation, ErrorSeverity::Low),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_classification_is_memoized_and_deterministic() {
        let classifier = ErrorClassifier::new(100);
        let error = AdapterError::http(503, "Service Unavailable");

        let first = classifier.classify(&error);
        let second = classifier.classify(&error.clone());
        assert_eq!(first, second);
        assert_eq!(classifier.cached_entries(), 1);

        classifier.classify_for(&error, AdapterCategory::CriticalSystem);
        classifier.classify_for(&error, AdapterCategory::Http);
        assert_eq!(classifier.cached_entries(), 2);
    }

    #[test]
    fn test_distinct_payloads_do_not_share_entries() {
        let classifier = ErrorClassifier::new(100);
        let a = classifier.classify(&AdapterError::sql("08001", "failed"));
        let b = classifier.classify(&AdapterError::sql("23505", "failed"));
        assert_ne!(a.category, b.category);
    }

    #[test]
    fn test_vendor_errors_use_message_rules() {
        let classifier = ErrorClassifier::default();
        let result = classifier.classify(&AdapterError::vendor(RfcFault));
        assert_eq!(result.category, ErrorCategory::Timeout);
        assert_eq!(result.error_type, "Vendor");
        assert!(!result.recovery_suggestions.is_empty());
    }
}
