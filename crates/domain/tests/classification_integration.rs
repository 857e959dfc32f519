//! Integration tests for domain types
//!
//! Exercises the public surface the way the core crate and operator
//! tooling consume it: keys resolving to categories, adapter errors
//! carrying vendor capability, classifications crossing a JSON boundary.

use std::fmt;
use std::time::Duration;

use relaygate_domain::{
    AdapterCategory, AdapterError, Config, ErrorCategory, ErrorClassification, ErrorKind,
    ErrorSeverity, LogFormat, PolicyKey, VendorError, VendorErrorGroup,
};

#[derive(Debug)]
struct GatewayFault(VendorErrorGroup);

impl fmt::Display for GatewayFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gateway fault in group {}", self.0)
    }
}

impl VendorError for GatewayFault {
    fn error_group(&self) -> VendorErrorGroup {
        self.0
    }
}

// ============================================================================
// Keys and categories
// ============================================================================

#[test]
fn test_every_category_has_a_distinct_label() {
    let labels: std::collections::HashSet<_> =
        AdapterCategory::ALL.iter().map(|c| c.to_string()).collect();
    assert_eq!(labels.len(), AdapterCategory::ALL.len());

    for category in AdapterCategory::ALL {
        assert_eq!(category.to_string().parse::<AdapterCategory>().unwrap(), category);
    }
}

#[test]
fn test_keys_from_the_same_family_share_a_category() {
    let keys = [PolicyKey::new("slack", "team-1"), PolicyKey::new("REST", "billing")];
    assert!(keys.iter().all(|k| k.category() == AdapterCategory::Http));
    assert_ne!(keys[0], keys[1]);
}

#[test]
fn test_policy_key_json_shape() {
    let key = PolicyKey::new("kafka", "orders");
    let value = serde_json::to_value(&key).unwrap();
    assert_eq!(value["adapter_type"], "kafka");
    assert_eq!(value["adapter_id"], "orders");
}

// ============================================================================
// Adapter errors
// ============================================================================

#[test]
fn test_vendor_errors_are_shared_on_clone() {
    let err = AdapterError::vendor(GatewayFault(VendorErrorGroup::Logon));
    let copy = err.clone();

    assert_eq!(copy.kind().vendor_group(), Some(VendorErrorGroup::Logon));
    assert_eq!(copy.message(), "gateway fault in group LOGON");
    assert_eq!(copy.kind().cache_tag(), "Vendor:vendor:LOGON");
}

#[test]
fn test_adapter_error_is_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    let err = AdapterError::new(ErrorKind::FtpConnectionClosed, "421 closing control connection");
    takes_error(&err);
    assert!(err.kind().is_connection());
}

// ============================================================================
// Classification and config crossing serialization boundaries
// ============================================================================

#[test]
fn test_classification_roundtrips_through_json() {
    let classification = ErrorClassification {
        error_type: "Http".to_string(),
        message: "503 Service Unavailable".to_string(),
        category: ErrorCategory::ServiceUnavailable,
        severity: ErrorSeverity::Medium,
        retryable: true,
        circuit_breaker_candidate: false,
        recovery_suggestions: vec!["Check the upstream status page".to_string()],
        estimated_recovery_time: Duration::from_secs(300),
    };

    let json = serde_json::to_string_pretty(&classification).unwrap();
    assert!(json.contains("SERVICE_UNAVAILABLE"));
    let back: ErrorClassification = serde_json::from_str(&json).unwrap();
    assert_eq!(back, classification);
}

#[test]
fn test_config_from_json() {
    let config: Config = serde_json::from_str(
        r#"{
            "resilience": { "live_unit_warning_threshold": 50, "default_retry_deadline_ms": 5000 },
            "logging": { "level": "debug", "format": "json" }
        }"#,
    )
    .unwrap();

    assert_eq!(config.resilience.live_unit_warning_threshold, 50);
    assert_eq!(config.resilience.default_retry_deadline, Duration::from_secs(5));
    assert_eq!(config.resilience.default_retry_attempts, 3);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert!(config.validate().is_ok());
}
