//! Receiver endpoint definition.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{AppId, EndpointId, LogFormat};

/// Endpoint operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EndpointStatus {
    Active,
    Inactive,
    Overloaded,
    Error,
}

/// Receiver endpoint aggregate. Read-only for the reception pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverEndpoint {
    pub endpoint_id: EndpointId,
    pub name: String,
    /// Expected encoding of every log
    pub format: LogFormat,
    /// Per-log content limit in bytes
    pub max_payload_size: usize,
    /// Logs per batch submission, 0 for unlimited
    pub max_batch_count: usize,
    pub status: EndpointStatus,
    pub buffering_enabled: bool,
    pub buffering_time_ms: u64,
    pub buffering_size: usize,
    /// Empty allows every app
    pub allowed_app_ids: HashSet<AppId>,
}

impl ReceiverEndpoint {
    pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;
    pub const DEFAULT_MAX_BATCH_COUNT: usize = 1000;

    /// Creates an active endpoint with default limits.
    pub fn new(endpoint_id: impl Into<EndpointId>, format: LogFormat) -> Self {
        let endpoint_id = endpoint_id.into();
        Self {
            name: endpoint_id.to_string(),
            endpoint_id,
            format,
            max_payload_size: Self::DEFAULT_MAX_PAYLOAD_SIZE,
            max_batch_count: Self::DEFAULT_MAX_BATCH_COUNT,
            status: EndpointStatus::Active,
            buffering_enabled: true,
            buffering_time_ms: 5_000,
            buffering_size: 100,
            allowed_app_ids: HashSet::new(),
        }
    }

    pub fn with_max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    pub fn with_max_batch_count(mut self, count: usize) -> Self {
        self.max_batch_count = count;
        self
    }

    pub fn with_status(mut self, status: EndpointStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_allowed_apps<I, A>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AppId>,
    {
        self.allowed_app_ids = apps.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active
    }

    pub fn is_app_allowed(&self, app_id: &AppId) -> bool {
        self.allowed_app_ids.is_empty() || self.allowed_app_ids.contains(app_id)
    }

    pub fn is_payload_too_large(&self, bytes: usize) -> bool {
        bytes > self.max_payload_size
    }

    pub fn is_batch_count_exceeded(&self, count: usize) -> bool {
        self.max_batch_count > 0 && count > self.max_batch_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_limit_is_inclusive() {
        let ep = ReceiverEndpoint::new("ep", LogFormat::Json).with_max_payload_size(10);
        assert!(!ep.is_payload_too_large(10));
        assert!(ep.is_payload_too_large(11));
    }

    #[test]
    fn zero_batch_count_means_unlimited() {
        let ep = ReceiverEndpoint::new("ep", LogFormat::Json).with_max_batch_count(0);
        assert!(!ep.is_batch_count_exceeded(1_000_000));

        let ep = ep.with_max_batch_count(3);
        assert!(!ep.is_batch_count_exceeded(3));
        assert!(ep.is_batch_count_exceeded(4));
    }

    #[test]
    fn app_allow_list() {
        let ep = ReceiverEndpoint::new("ep", LogFormat::Text);
        assert!(ep.is_app_allowed(&AppId::from("anyone")));

        let ep = ep.with_allowed_apps(["a1"]);
        assert!(ep.is_app_allowed(&AppId::from("a1")));
        assert!(!ep.is_app_allowed(&AppId::from("a2")));
    }

    #[test]
    fn non_active_statuses() {
        for status in [
            EndpointStatus::Inactive,
            EndpointStatus::Overloaded,
            EndpointStatus::Error,
        ] {
            let ep = ReceiverEndpoint::new("ep", LogFormat::Text).with_status(status);
            assert!(!ep.is_active());
        }
    }
}
