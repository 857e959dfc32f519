//! Structured adapter failures
//!
//! Adapters report failures as an [`AdapterError`]: a closed [`ErrorKind`]
//! tag plus the human-readable message. Classification and retry
//! predicates match on the kind, never on type-name strings.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::impl_domain_label_conversions;

/// Coarse error group reported by a vendor SDK wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorErrorGroup {
    Communication,
    Logon,
    Resource,
    Application,
    System,
    Other,
}

impl_domain_label_conversions!(VendorErrorGroup {
    Communication => "COMMUNICATION",
    Logon => "LOGON",
    Resource => "RESOURCE",
    Application => "APPLICATION",
    System => "SYSTEM",
    Other => "OTHER",
});

/// Capability implemented by adapters that wrap a vendor SDK.
///
/// Retry policies only look at [`VendorError::error_group`]; the message
/// goes through the regular classification rules.
pub trait VendorError: fmt::Debug + fmt::Display + Send + Sync {
    fn error_group(&self) -> VendorErrorGroup;

    /// Short vendor name used in logs and classification labels.
    fn vendor(&self) -> &str {
        "vendor"
    }
}

/// Closed set of failure kinds adapters produce.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    SocketTimeout,
    Timeout,
    QueryTimeout,
    ConnectionRefused,
    Connection,
    UnknownHost,
    FtpConnectionClosed,
    Authentication,
    Security,
    IllegalArgument,
    IllegalState,
    FileNotFound,
    AccessDenied,
    FileSystem,
    Sql { sql_state: Option<String> },
    IntegrityViolation,
    DuplicateKey,
    TransientDataAccess,
    Io,
    Http { status: u16 },
    Vendor(Arc<dyn VendorError>),
    Messaging,
    Runtime,
    Other,
}

impl ErrorKind {
    /// Variant name, reported as the error type in classifications.
    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorKind::SocketTimeout => "SocketTimeout",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::QueryTimeout => "QueryTimeout",
            ErrorKind::ConnectionRefused => "ConnectionRefused",
            ErrorKind::Connection => "Connection",
            ErrorKind::UnknownHost => "UnknownHost",
            ErrorKind::FtpConnectionClosed => "FtpConnectionClosed",
            ErrorKind::Authentication => "Authentication",
            ErrorKind::Security => "Security",
            ErrorKind::IllegalArgument => "IllegalArgument",
            ErrorKind::IllegalState => "IllegalState",
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::FileSystem => "FileSystem",
            ErrorKind::Sql { .. } => "Sql",
            ErrorKind::IntegrityViolation => "IntegrityViolation",
            ErrorKind::DuplicateKey => "DuplicateKey",
            ErrorKind::TransientDataAccess => "TransientDataAccess",
            ErrorKind::Io => "Io",
            ErrorKind::Http { .. } => "Http",
            ErrorKind::Vendor(_) => "Vendor",
            ErrorKind::Messaging => "Messaging",
            ErrorKind::Runtime => "Runtime",
            ErrorKind::Other => "Other",
        }
    }

    /// Type name plus any payload that changes classification.
    ///
    /// Two kinds with equal tags always classify identically for the same
    /// message, which makes the tag safe as a memoization key.
    pub fn cache_tag(&self) -> String {
        match self {
            ErrorKind::Sql { sql_state: Some(state) } => format!("Sql:{state}"),
            ErrorKind::Http { status } => format!("Http:{status}"),
            ErrorKind::Vendor(vendor) => {
                format!("Vendor:{}:{}", vendor.vendor(), vendor.error_group())
            }
            other => other.type_name().to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ErrorKind::SocketTimeout | ErrorKind::Timeout | ErrorKind::QueryTimeout)
    }

    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionRefused
                | ErrorKind::Connection
                | ErrorKind::UnknownHost
                | ErrorKind::FtpConnectionClosed
        )
    }

    pub fn is_illegal_input(&self) -> bool {
        matches!(self, ErrorKind::IllegalArgument | ErrorKind::IllegalState)
    }

    /// Two-character SQLSTATE class, when present.
    pub fn sql_state_class(&self) -> Option<&str> {
        match self {
            ErrorKind::Sql { sql_state: Some(state) } => state.get(..2),
            _ => None,
        }
    }

    pub fn vendor_group(&self) -> Option<VendorErrorGroup> {
        match self {
            ErrorKind::Vendor(vendor) => Some(vendor.error_group()),
            _ => None,
        }
    }
}

/// Failure returned by an adapter call.
#[derive(Debug, Clone)]
pub struct AdapterError {
    kind: ErrorKind,
    message: String,
}

impl AdapterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn socket_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SocketTimeout, message)
    }

    pub fn connection_refused(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionRefused, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalArgument, message)
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Http { status }, message)
    }

    pub fn sql(sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Sql { sql_state: Some(sql_state.into()) }, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Wrap a vendor SDK error; its display text becomes the message.
    pub fn vendor(error: impl VendorError + 'static) -> Self {
        let message = error.to_string();
        Self::new(ErrorKind::Vendor(Arc::new(error)), message)
    }

    /// HTTP status carried by the kind, if any.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            ErrorKind::Http { status } => Some(status),
            _ => None,
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(self.kind.type_name())
        } else {
            write!(f, "{}: {}", self.kind.type_name(), self.message)
        }
    }
}

impl std::error::Error for AdapterError {}

/// Results that carry an HTTP-like status code.
///
/// Lets a retry policy re-attempt calls that returned normally but with a
/// server-error status.
pub trait StatusBearing {
    fn status_code(&self) -> Option<u16>;

    fn is_server_error(&self) -> bool {
        self.status_code().is_some_and(|code| (500..600).contains(&code))
    }
}

impl StatusBearing for u16 {
    fn status_code(&self) -> Option<u16> {
        Some(*self)
    }
}

impl<T: StatusBearing> StatusBearing for Option<T> {
    fn status_code(&self) -> Option<u16> {
        self.as_ref().and_then(StatusBearing::status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct RfcFailure {
        group: VendorErrorGroup,
    }

    impl fmt::Display for RfcFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "RFC call failed ({})", self.group)
        }
    }

    impl VendorError for RfcFailure {
        fn error_group(&self) -> VendorErrorGroup {
            self.group
        }

        fn vendor(&self) -> &str {
            "rfc"
        }
    }

    #[test]
    fn test_display_includes_kind() {
        let err = AdapterError::http(503, "upstream unavailable");
        assert_eq!(err.to_string(), "Http: upstream unavailable");
        assert_eq!(AdapterError::new(ErrorKind::Other, "").to_string(), "Other");
    }

    #[test]
    fn test_cache_tag_discriminates_payload() {
        let a = AdapterError::sql("08001", "x");
        let b = AdapterError::sql("23505", "x");
        assert_ne!(a.kind().cache_tag(), b.kind().cache_tag());
        assert_eq!(AdapterError::http(503, "").kind().cache_tag(), "Http:503");
        assert_eq!(AdapterError::timeout("").kind().cache_tag(), "Timeout");
    }

    #[test]
    fn test_sql_state_class() {
        assert_eq!(AdapterError::sql("08S01", "").kind().sql_state_class(), Some("08"));
        assert_eq!(ErrorKind::Sql { sql_state: None }.sql_state_class(), None);
        assert_eq!(ErrorKind::Sql { sql_state: Some("0".into()) }.sql_state_class(), None);
    }

    #[test]
    fn test_vendor_error_wrapping() {
        let err = AdapterError::vendor(RfcFailure { group: VendorErrorGroup::Communication });
        assert_eq!(err.message(), "RFC call failed (COMMUNICATION)");
        assert_eq!(err.kind().vendor_group(), Some(VendorErrorGroup::Communication));
        assert_eq!(err.kind().cache_tag(), "Vendor:rfc:COMMUNICATION");
    }

    #[test]
    fn test_kind_families() {
        assert!(ErrorKind::QueryTimeout.is_timeout());
        assert!(ErrorKind::UnknownHost.is_connection());
        assert!(ErrorKind::IllegalState.is_illegal_input());
        assert!(!ErrorKind::Io.is_connection());
    }

    #[test]
    fn test_status_bearing() {
        assert!(503_u16.is_server_error());
        assert!(!404_u16.is_server_error());
        assert!(!None::<u16>.is_server_error());
        assert_eq!(AdapterError::http(429, "slow down").status(), Some(429));
    }
}
