//! Log batches and their processing state machine.
//!
//! ```text
//! PENDING ──> PROCESSING ──> PROCESSED (terminal)
//!                 │   ^
//!                 v   │ retry
//!               FAILED
//! ```
//!
//! PENDING and FAILED may also jump straight to PROCESSED when storage reports
//! the batch as already stored.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppEndpointKey, AppId, BatchId, EndpointId, RawLog};

/// Batch processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl BatchStatus {
    /// Whether a persisted batch may move from `self` to `next`.
    ///
    /// Re-recording PROCESSED on a processed batch is accepted as a no-op.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Processing | Processed | Failed)
                | (Processing, Processing | Processed | Failed)
                | (Failed, Processing | Processed | Failed)
                | (Processed, Processed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == BatchStatus::Processed
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A persisted group of raw logs processed and stored as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    pub id: BatchId,
    pub app_id: AppId,
    pub endpoint_id: EndpointId,
    /// Submission order, preserved end to end
    pub logs: Vec<RawLog>,
    pub status: BatchStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub received_time: DateTime<Utc>,
    pub processed_time: Option<DateTime<Utc>>,
    pub last_process_time: Option<DateTime<Utc>>,
    /// Assigned by storage on success
    pub batch_trace_id: Option<String>,
    pub confirmed: bool,
}

impl LogBatch {
    /// Creates a PENDING batch with a fresh id.
    pub fn new(app_id: AppId, endpoint_id: EndpointId, logs: Vec<RawLog>) -> Self {
        Self {
            id: BatchId::generate(),
            app_id,
            endpoint_id,
            logs,
            status: BatchStatus::Pending,
            error_message: None,
            retry_count: 0,
            received_time: Utc::now(),
            processed_time: None,
            last_process_time: None,
            batch_trace_id: None,
            confirmed: false,
        }
    }

    pub fn key(&self) -> AppEndpointKey {
        AppEndpointKey::new(self.app_id.clone(), self.endpoint_id.clone())
    }

    pub fn log_count(&self) -> usize {
        self.logs.len()
    }

    /// Total content bytes.
    pub fn payload_size(&self) -> usize {
        self.logs.iter().map(RawLog::size).sum()
    }

    /// Received-to-processed latency, `None` until processed.
    pub fn processing_time_ms(&self) -> Option<i64> {
        self.processed_time
            .map(|processed| (processed - self.received_time).num_milliseconds())
    }
}
