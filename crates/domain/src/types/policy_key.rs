//! Policy keys and adapter categories
//!
//! A [`PolicyKey`] names one live resilience unit. Many keys share the
//! tuning of a single [`AdapterCategory`], resolved from the adapter type
//! tag through a fixed lookup table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::impl_domain_label_conversions;

/// Identity of one logical resilience unit: `(adapter_type, adapter_id)`.
///
/// Uniqueness is per pair; the same id under two types is two units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyKey {
    adapter_type: String,
    adapter_id: String,
}

impl PolicyKey {
    pub fn new(adapter_type: impl Into<String>, adapter_id: impl Into<String>) -> Self {
        Self { adapter_type: adapter_type.into(), adapter_id: adapter_id.into() }
    }

    pub fn adapter_type(&self) -> &str {
        &self.adapter_type
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    /// Tuning bucket this key resolves to.
    pub fn category(&self) -> AdapterCategory {
        AdapterCategory::resolve(&self.adapter_type)
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.adapter_type, self.adapter_id)
    }
}

/// Tuning bucket shared by every adapter of a similar protocol family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AdapterCategory {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "database")]
    Database,
    #[serde(rename = "messaging")]
    Messaging,
    #[serde(rename = "file")]
    File,
    /// Constrained ERP-style backend that recovers only under operator control.
    #[serde(rename = "sap-like")]
    CriticalSystem,
    #[serde(rename = "default")]
    Default,
}

impl_domain_label_conversions!(AdapterCategory {
    Http => "http",
    Database => "database",
    Messaging => "messaging",
    File => "file",
    CriticalSystem => "sap-like",
    Default => "default",
});

const HTTP_TAGS: &[&str] = &[
    "http", "https", "rest", "soap", "graphql", "webhook", "slack", "discord", "teams", "sms",
    "twilio",
];
const DATABASE_TAGS: &[&str] = &[
    "database",
    "db",
    "jdbc",
    "sql",
    "postgres",
    "postgresql",
    "mysql",
    "oracle",
    "sqlserver",
    "mongodb",
];
const MESSAGING_TAGS: &[&str] =
    &["messaging", "jms", "kafka", "rabbitmq", "amqp", "mqtt", "sqs", "activemq"];
const FILE_TAGS: &[&str] = &["file", "ftp", "sftp", "ftps", "s3", "smb", "nfs"];
const CRITICAL_TAGS: &[&str] = &["sap", "sap-like", "erp", "rfc", "idoc", "bapi"];

impl AdapterCategory {
    pub const ALL: [AdapterCategory; 6] = [
        AdapterCategory::Http,
        AdapterCategory::Database,
        AdapterCategory::Messaging,
        AdapterCategory::File,
        AdapterCategory::CriticalSystem,
        AdapterCategory::Default,
    ];

    /// Resolve an adapter type tag. Matching ignores ASCII case and
    /// surrounding whitespace; unknown tags land on [`AdapterCategory::Default`].
    pub fn resolve(adapter_type: &str) -> Self {
        let tag = adapter_type.trim().to_ascii_lowercase();
        let tables: [(&[&str], AdapterCategory); 5] = [
            (HTTP_TAGS, AdapterCategory::Http),
            (DATABASE_TAGS, AdapterCategory::Database),
            (MESSAGING_TAGS, AdapterCategory::Messaging),
            (FILE_TAGS, AdapterCategory::File),
            (CRITICAL_TAGS, AdapterCategory::CriticalSystem),
        ];

        tables
            .iter()
            .find(|(tags, _)| tags.contains(&tag.as_str()))
            .map_or(AdapterCategory::Default, |(_, category)| *category)
    }

    pub fn is_default(&self) -> bool {
        matches!(self, AdapterCategory::Default)
    }
}
