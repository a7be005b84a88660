//! Log records as received and after preprocessing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppId, EndpointId};

/// Metadata key carrying the submitting client's IP address.
pub const CLIENT_IP_KEY: &str = "clientIp";

/// Log encoding expected by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogFormat {
    Json,
    Text,
    Xml,
    Binary,
    Custom,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::Text => "TEXT",
            Self::Xml => "XML",
            Self::Binary => "BINARY",
            Self::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "JSON" => Ok(Self::Json),
            "TEXT" => Ok(Self::Text),
            "XML" => Ok(Self::Xml),
            "BINARY" => Ok(Self::Binary),
            "CUSTOM" => Ok(Self::Custom),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// A log record exactly as submitted. Immutable, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    content: String,
    source_id: String,
    format: LogFormat,
    timestamp: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
}

impl RawLog {
    /// Creates a log stamped with the current time.
    pub fn new(content: impl Into<String>, format: LogFormat) -> Self {
        Self {
            content: content.into(),
            source_id: String::new(),
            format,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_client_ip(self, ip: impl Into<String>) -> Self {
        self.with_metadata(CLIENT_IP_KEY, ip)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Client IP from metadata, empty when absent.
    pub fn client_ip(&self) -> &str {
        self.metadata
            .get(CLIENT_IP_KEY)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Content length in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// A log after preprocessing, ready for storage when `validated` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedLog {
    pub content: String,
    pub format: LogFormat,
    pub metadata: BTreeMap<String, String>,
    pub app_id: AppId,
    pub endpoint_id: EndpointId,
    pub source_id: String,
    pub log_time: DateTime<Utc>,
    pub process_time: DateTime<Utc>,
    pub validated: bool,
    pub validation_error: Option<String>,
    pub structured_fields: BTreeMap<String, serde_json::Value>,
}

impl ProcessedLog {
    /// Starts a validated record from a raw log.
    pub fn from_raw(raw: &RawLog, app_id: &AppId, endpoint_id: &EndpointId) -> Self {
        Self {
            content: raw.content.clone(),
            format: raw.format,
            metadata: raw.metadata.clone(),
            app_id: app_id.clone(),
            endpoint_id: endpoint_id.clone(),
            source_id: raw.source_id.clone(),
            log_time: raw.timestamp,
            process_time: Utc::now(),
            validated: true,
            validation_error: None,
            structured_fields: BTreeMap::new(),
        }
    }

    pub fn mark_invalid(&mut self, reason: impl Into<String>) {
        self.validated = false;
        self.validation_error = Some(reason.into());
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn add_structured_field(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.structured_fields.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn format_serializes_uppercase() {
        let json = serde_json::to_string(&LogFormat::Binary).unwrap();
        assert_eq!(json, "\"BINARY\"");
    }

    #[test]
    fn raw_log_equality_is_by_value() {
        let ts = Utc::now();
        let a = RawLog::new("hello", LogFormat::Text)
            .with_timestamp(ts)
            .with_client_ip("10.0.0.1");
        let b = RawLog::new("hello", LogFormat::Text)
            .with_timestamp(ts)
            .with_client_ip("10.0.0.1");
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_source("other"));
    }

    #[test]
    fn client_ip_defaults_to_empty() {
        let log = RawLog::new("x", LogFormat::Text);
        assert_eq!(log.client_ip(), "");
        assert_eq!(log.with_client_ip("1.2.3.4").client_ip(), "1.2.3.4");
    }

    #[test]
    fn size_counts_bytes_not_chars() {
        let log = RawLog::new("héllo", LogFormat::Text);
        assert_eq!(log.size(), 6);
    }

    #[test]
    fn processed_log_invalidation() {
        let raw = RawLog::new("{}", LogFormat::Json);
        let mut processed =
            ProcessedLog::from_raw(&raw, &AppId::from("a"), &EndpointId::from("e"));
        assert!(processed.validated);
        processed.mark_invalid("bad json");
        assert!(!processed.validated);
        assert_eq!(processed.validation_error.as_deref(), Some("bad json"));
    }
}
