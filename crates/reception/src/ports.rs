//! Ports to collaborators outside the reception pipeline.
//!
//! Every lookup, persistence and downstream call goes through one of these
//! traits so the pipeline can run against in-memory adapters in tests and the
//! daemon, and against real stores elsewhere.
//!
//! # Batch persistence
//!
//! [`BatchRepository`] exposes one narrow operation per state transition.
//! Each call updates only the fields it names, so a crash between two calls
//! leaves the batch in the last successfully recorded state.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::ReceptionError;
use crate::model::{
    AppAccess, AppId, BatchId, BatchStatus, EndpointId, LogBatch, ProcessedLog, ReceiverEndpoint,
};

/// Application credential lookup.
pub trait AppAccessRepository: Send + Sync + 'static {
    fn find_app_by_access_key(
        &self,
        access_key: &str,
    ) -> impl Future<Output = Result<Option<AppAccess>, ReceptionError>> + Send;

    fn find_app_by_id(
        &self,
        app_id: &AppId,
    ) -> impl Future<Output = Result<Option<AppAccess>, ReceptionError>> + Send;
}

/// Endpoint definition lookup.
pub trait EndpointRepository: Send + Sync + 'static {
    fn find_endpoint_by_id(
        &self,
        endpoint_id: &EndpointId,
    ) -> impl Future<Output = Result<Option<ReceiverEndpoint>, ReceptionError>> + Send;
}

/// Batch persistence.
pub trait BatchRepository: Send + Sync + 'static {
    /// Inserts or replaces a batch.
    fn save(&self, batch: &LogBatch) -> impl Future<Output = Result<(), ReceptionError>> + Send;

    fn find_by_id(
        &self,
        batch_id: &BatchId,
    ) -> impl Future<Output = Result<Option<LogBatch>, ReceptionError>> + Send;

    /// Sets status and error message.
    fn update_status(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        error_message: Option<String>,
    ) -> impl Future<Output = Result<(), ReceptionError>> + Send;

    /// Records the start of a processing attempt.
    fn update_status_and_retry_count(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        retry_count: u32,
        last_process_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), ReceptionError>> + Send;

    /// Records the terminal failure of a batch along with the retry count it
    /// exhausted.
    fn update_failed_status(
        &self,
        batch_id: &BatchId,
        retry_count: u32,
        error_message: String,
        last_process_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), ReceptionError>> + Send;

    /// Marks a batch finished without a storage call.
    fn update_status_and_process_time(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        processed_time: DateTime<Utc>,
        last_process_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), ReceptionError>> + Send;

    /// Records a successful storage handoff.
    fn update_processed_status(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        processed_time: DateTime<Utc>,
        last_process_time: DateTime<Utc>,
        batch_trace_id: Option<String>,
        confirmed: bool,
    ) -> impl Future<Output = Result<(), ReceptionError>> + Send;

    fn find_by_status_and_processed_time_before(
        &self,
        status: BatchStatus,
        before: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<LogBatch>, ReceptionError>> + Send;

    fn find_by_status_and_last_process_time_before(
        &self,
        status: BatchStatus,
        before: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<LogBatch>, ReceptionError>> + Send;

    /// Returns whether a batch was removed.
    fn delete(&self, batch_id: &BatchId)
    -> impl Future<Output = Result<bool, ReceptionError>> + Send;

    fn count_by_status(
        &self,
        status: BatchStatus,
    ) -> impl Future<Output = Result<usize, ReceptionError>> + Send;
}

/// Turns raw logs into validated, field-extracted records.
///
/// A log that fails preprocessing comes back with `validated == false`; it is
/// dropped, not retried. An `Err` means the whole call failed and is retried.
pub trait PreprocessGateway: Send + Sync + 'static {
    fn preprocess_batch(
        &self,
        batch: &LogBatch,
    ) -> impl Future<Output = Result<Vec<ProcessedLog>, ReceptionError>> + Send;
}

/// Outcome of a storage handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageResult {
    pub success: bool,
    pub trace_id: Option<String>,
    pub error_message: Option<String>,
}

impl StorageResult {
    pub fn success(trace_id: impl Into<String>) -> Self {
        Self {
            success: true,
            trace_id: Some(trace_id.into()),
            error_message: None,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            trace_id: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// Downstream storage.
pub trait StorageGateway: Send + Sync + 'static {
    fn store_batch(
        &self,
        batch: &LogBatch,
        logs: &[ProcessedLog],
    ) -> impl Future<Output = Result<StorageResult, ReceptionError>> + Send;

    /// Idempotency probe: has this batch already been stored?
    fn is_batch_stored(
        &self,
        batch_id: &BatchId,
    ) -> impl Future<Output = Result<bool, ReceptionError>> + Send;
}

/// Invoked when a batch is persisted PENDING and ready for processing.
pub trait BatchReadyHandler: Send + Sync {
    fn on_batch_ready(&self, batch_id: BatchId);
}

/// Operator notification for batches that exhausted their retries.
pub trait FailureNotifier: Send + Sync {
    fn notify_batch_failed(&self, batch: &LogBatch, error: &str);
}

/// Notifier that reports failures through the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl FailureNotifier for LogNotifier {
    fn notify_batch_failed(&self, batch: &LogBatch, error: &str) {
        tracing::error!(
            batch_id = %batch.id,
            app_id = %batch.app_id,
            endpoint_id = %batch.endpoint_id,
            log_count = batch.log_count(),
            retry_count = batch.retry_count,
            error,
            "batch failed permanently"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_result_constructors() {
        let ok = StorageResult::success("trace-1");
        assert!(ok.success);
        assert_eq!(ok.trace_id.as_deref(), Some("trace-1"));

        let err = StorageResult::failure("disk full");
        assert!(!err.success);
        assert_eq!(err.error_message.as_deref(), Some("disk full"));
    }
}
