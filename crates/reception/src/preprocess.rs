//! Reference preprocessor.
//!
//! [`StructuredPreprocessor`] implements [`PreprocessGateway`] in-process:
//!
//! - JSON: parsed with `serde_json`; nested objects are flattened into
//!   dot-notation structured fields. Invalid JSON, or a top level that is not
//!   an object, marks the log not validated.
//! - TEXT: must be non-blank; `key=value` pairs (values optionally quoted)
//!   become structured fields.
//! - anything else passes through validated.
//!
//! Well-known timestamp and level fields are normalized into metadata
//! (`timestamp` as RFC 3339, `level` in lowercase). Output order always
//! matches batch order.

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;

use crate::error::ReceptionError;
use crate::model::{LogBatch, LogFormat, ProcessedLog, RawLog};
use crate::ports::PreprocessGateway;

/// Metadata key for the normalized log timestamp.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Metadata key for the normalized log level.
pub const LEVEL_KEY: &str = "level";

const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "@timestamp", "time", "ts"];
const LEVEL_FIELDS: &[&str] = &["level", "severity", "lvl"];

/// `key=value` pairs in TEXT logs: group 1 is the key, group 2 a quoted value,
/// group 3 a bare one.
pub const DEFAULT_KEY_VALUE_PATTERN: &str = r#"([A-Za-z_][\w.\-]*)=(?:"([^"]*)"|(\S+))"#;

const DEFAULT_MAX_DEPTH: usize = 16;

/// In-process preprocessor for JSON and TEXT logs.
#[derive(Debug, Clone)]
pub struct StructuredPreprocessor {
    max_depth: usize,
    key_value: Regex,
}

impl StructuredPreprocessor {
    /// Creates a preprocessor with [`DEFAULT_KEY_VALUE_PATTERN`].
    pub fn new() -> Result<Self, ReceptionError> {
        Self::with_key_value_pattern(DEFAULT_KEY_VALUE_PATTERN)
    }

    /// Creates a preprocessor extracting TEXT fields with `pattern`, which
    /// must capture the key in group 1 and the value in group 2 or 3.
    pub fn with_key_value_pattern(pattern: &str) -> Result<Self, ReceptionError> {
        let key_value = Regex::new(pattern).map_err(|e| ReceptionError::Config {
            field: "key_value_pattern".to_owned(),
            reason: format!("invalid regex: {e}"),
        })?;
        Ok(Self {
            max_depth: DEFAULT_MAX_DEPTH,
            key_value,
        })
    }

    /// Limits how deep nested JSON objects are flattened.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Preprocesses a single raw log.
    pub fn preprocess_log(&self, raw: &RawLog, batch: &LogBatch) -> ProcessedLog {
        let mut log = ProcessedLog::from_raw(raw, &batch.app_id, &batch.endpoint_id);
        match raw.format() {
            LogFormat::Json => self.process_json(&mut log),
            LogFormat::Text => self.process_text(&mut log),
            LogFormat::Xml | LogFormat::Binary | LogFormat::Custom => {}
        }
        if !log.validated {
            tracing::debug!(
                batch_id = %batch.id,
                format = %log.format,
                reason = log.validation_error.as_deref().unwrap_or_default(),
                "log failed preprocessing"
            );
        }
        log
    }

    fn process_json(&self, log: &mut ProcessedLog) {
        let value: Value = match serde_json::from_str(&log.content) {
            Ok(value) => value,
            Err(e) => {
                log.mark_invalid(format!("invalid JSON: {}", e));
                return;
            }
        };
        let Value::Object(_) = value else {
            log.mark_invalid("expected JSON object at top level");
            return;
        };

        let mut fields = Vec::new();
        flatten(&value, "", self.max_depth, &mut fields);
        for (key, value) in fields {
            log.add_structured_field(key, value);
        }

        if let Some(timestamp) = first_field(log, TIMESTAMP_FIELDS).and_then(parse_timestamp) {
            log.log_time = timestamp;
            log.add_metadata(TIMESTAMP_KEY, timestamp.to_rfc3339());
        }
        if let Some(level) = first_field(log, LEVEL_FIELDS) {
            log.add_metadata(LEVEL_KEY, level.to_lowercase());
        }
    }

    fn process_text(&self, log: &mut ProcessedLog) {
        if log.content.trim().is_empty() {
            log.mark_invalid("empty text log");
            return;
        }
        let pairs: Vec<(String, String)> = self
            .key_value
            .captures_iter(&log.content)
            .filter_map(|caps| {
                let key = caps.get(1)?.as_str().to_owned();
                let value = caps.get(2).or_else(|| caps.get(3))?.as_str().to_owned();
                Some((key, value))
            })
            .collect();
        for (key, value) in pairs {
            log.add_structured_field(key, Value::String(value));
        }

        if let Some(level) = first_field(log, LEVEL_FIELDS) {
            log.add_metadata(LEVEL_KEY, level.to_lowercase());
        }
        if let Some(timestamp) = first_field(log, TIMESTAMP_FIELDS).and_then(parse_timestamp) {
            log.log_time = timestamp;
            log.add_metadata(TIMESTAMP_KEY, timestamp.to_rfc3339());
        }
    }
}

impl PreprocessGateway for StructuredPreprocessor {
    async fn preprocess_batch(&self, batch: &LogBatch) -> Result<Vec<ProcessedLog>, ReceptionError> {
        Ok(batch
            .logs
            .iter()
            .map(|raw| self.preprocess_log(raw, batch))
            .collect())
    }
}

/// Flattens nested objects into dot-notation keys. Nulls are skipped, arrays
/// are kept as values.
fn flatten(value: &Value, prefix: &str, depth: usize, out: &mut Vec<(String, Value)>) {
    let Some(object) = value.as_object() else {
        return;
    };
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Null => {}
            Value::Object(_) if depth > 0 => flatten(value, &name, depth - 1, out),
            other => out.push((name, other.clone())),
        }
    }
}

/// First of `names` present as a scalar structured field, as a string.
fn first_field(log: &ProcessedLog, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match log.structured_fields.get(*name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// RFC 3339, or Unix time in seconds (10 digits) or milliseconds.
fn parse_timestamp(raw: String) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let n = raw.parse::<i64>().ok()?;
    if n > 9_999_999_999 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppId, EndpointId};

    fn batch(logs: Vec<RawLog>) -> LogBatch {
        LogBatch::new(AppId::from("a1"), EndpointId::from("e1"), logs)
    }

    #[tokio::test]
    async fn json_is_flattened() {
        let batch = batch(vec![RawLog::new(
            r#"{"message":"hi","http":{"status":200,"path":"/x"},"tags":["a"],"gone":null}"#,
            LogFormat::Json,
        )]);
        let logs = StructuredPreprocessor::new().unwrap().preprocess_batch(&batch).await.unwrap();
        let fields = &logs[0].structured_fields;
        assert!(logs[0].validated);
        assert_eq!(fields["message"], "hi");
        assert_eq!(fields["http.status"], 200);
        assert_eq!(fields["http.path"], "/x");
        assert_eq!(fields["tags"], serde_json::json!(["a"]));
        assert!(!fields.contains_key("gone"));
    }

    #[tokio::test]
    async fn invalid_json_is_not_validated() {
        let batch = batch(vec![
            RawLog::new("{not json", LogFormat::Json),
            RawLog::new("[1,2]", LogFormat::Json),
        ]);
        let logs = StructuredPreprocessor::new().unwrap().preprocess_batch(&batch).await.unwrap();
        assert!(logs.iter().all(|log| !log.validated));
        assert!(logs[0].validation_error.as_deref().unwrap().starts_with("invalid JSON"));
        assert_eq!(
            logs[1].validation_error.as_deref(),
            Some("expected JSON object at top level")
        );
    }

    #[tokio::test]
    async fn json_timestamp_and_level_are_normalized() {
        let batch = batch(vec![RawLog::new(
            r#"{"timestamp":"2024-01-15T12:00:00+09:00","level":"WARN"}"#,
            LogFormat::Json,
        )]);
        let logs = StructuredPreprocessor::new().unwrap().preprocess_batch(&batch).await.unwrap();
        assert_eq!(logs[0].metadata[LEVEL_KEY], "warn");
        assert_eq!(logs[0].metadata[TIMESTAMP_KEY], "2024-01-15T03:00:00+00:00");
        assert_eq!(logs[0].log_time.timestamp(), 1_705_287_600);
    }

    #[tokio::test]
    async fn text_key_values_are_extracted() {
        let batch = batch(vec![RawLog::new(
            r#"user=alice action="log in" ts=1705320000 level=INFO"#,
            LogFormat::Text,
        )]);
        let logs = StructuredPreprocessor::new().unwrap().preprocess_batch(&batch).await.unwrap();
        let log = &logs[0];
        assert!(log.validated);
        assert_eq!(log.structured_fields["user"], "alice");
        assert_eq!(log.structured_fields["action"], "log in");
        assert_eq!(log.metadata[LEVEL_KEY], "info");
        assert_eq!(log.log_time.timestamp(), 1_705_320_000);
    }

    #[tokio::test]
    async fn blank_text_is_not_validated() {
        let batch = batch(vec![RawLog::new("   ", LogFormat::Text)]);
        let logs = StructuredPreprocessor::new().unwrap().preprocess_batch(&batch).await.unwrap();
        assert!(!logs[0].validated);
    }

    #[test]
    fn invalid_key_value_pattern_is_rejected() {
        let err = StructuredPreprocessor::with_key_value_pattern("(unclosed=").unwrap_err();
        match err {
            ReceptionError::Config { field, reason } => {
                assert_eq!(field, "key_value_pattern");
                assert!(reason.starts_with("invalid regex"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn custom_key_value_pattern_is_used() {
        let preprocessor =
            StructuredPreprocessor::with_key_value_pattern(r"(\w+):(?:'([^']*)'|(\S+))").unwrap();
        let batch = batch(vec![RawLog::new("user:bob note:'hi there' a=1", LogFormat::Text)]);
        let logs = preprocessor.preprocess_batch(&batch).await.unwrap();
        let fields = &logs[0].structured_fields;
        assert_eq!(fields["user"], "bob");
        assert_eq!(fields["note"], "hi there");
        assert!(!fields.contains_key("a"));
    }

    #[tokio::test]
    async fn order_is_preserved_across_formats() {
        let batch = batch(vec![
            RawLog::new("a=1", LogFormat::Text),
            RawLog::new(r#"{"b":2}"#, LogFormat::Json),
            RawLog::new("<c/>", LogFormat::Xml),
        ]);
        let logs = StructuredPreprocessor::new().unwrap().preprocess_batch(&batch).await.unwrap();
        let contents: Vec<_> = logs.iter().map(|log| log.content.as_str()).collect();
        assert_eq!(contents, ["a=1", r#"{"b":2}"#, "<c/>"]);
        assert!(logs.iter().all(|log| log.validated));
        assert_eq!(logs[0].app_id, batch.app_id);
    }

    #[test]
    fn flatten_respects_depth() {
        let value = serde_json::json!({"a": {"b": {"c": 1}}});
        let mut out = Vec::new();
        flatten(&value, "", 1, &mut out);
        assert_eq!(out, vec![("a.b".to_owned(), serde_json::json!({"c": 1}))]);
    }

    #[test]
    fn unix_timestamps_in_seconds_and_millis() {
        assert_eq!(parse_timestamp("1705320000".to_owned()).unwrap().timestamp(), 1_705_320_000);
        assert_eq!(
            parse_timestamp("1705320000123".to_owned()).unwrap().timestamp_millis(),
            1_705_320_000_123
        );
        assert!(parse_timestamp("yesterday".to_owned()).is_none());
    }
}
