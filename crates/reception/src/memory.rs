//! In-memory port adapters.
//!
//! Used by the daemon when no external store is configured, and by tests.
//! [`MemoryBatchRepository`] enforces [`BatchStatus::can_transition_to`] so
//! illegal transitions surface as errors. [`MemoryStorage`] records what it
//! stored and can be told to fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::ReceptionError;
use crate::model::{
    AppAccess, AppId, BatchId, BatchStatus, EndpointId, LogBatch, ProcessedLog, ReceiverEndpoint,
};
use crate::ports::{
    AppAccessRepository, BatchRepository, EndpointRepository, StorageGateway, StorageResult,
};

// ─── apps ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryAppRepository {
    apps: RwLock<HashMap<AppId, AppAccess>>,
}

impl MemoryAppRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an app by id.
    pub fn insert(&self, app: AppAccess) {
        self.apps.write().insert(app.app_id().clone(), app);
    }

    pub fn remove(&self, app_id: &AppId) -> Option<AppAccess> {
        self.apps.write().remove(app_id)
    }

    pub fn len(&self) -> usize {
        self.apps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.read().is_empty()
    }
}

impl AppAccessRepository for MemoryAppRepository {
    async fn find_app_by_access_key(
        &self,
        access_key: &str,
    ) -> Result<Option<AppAccess>, ReceptionError> {
        Ok(self
            .apps
            .read()
            .values()
            .find(|app| app.access_key() == access_key)
            .cloned())
    }

    async fn find_app_by_id(&self, app_id: &AppId) -> Result<Option<AppAccess>, ReceptionError> {
        Ok(self.apps.read().get(app_id).cloned())
    }
}

// ─── endpoints ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryEndpointRepository {
    endpoints: RwLock<HashMap<EndpointId, ReceiverEndpoint>>,
}

impl MemoryEndpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, endpoint: ReceiverEndpoint) {
        self.endpoints
            .write()
            .insert(endpoint.endpoint_id.clone(), endpoint);
    }

    pub fn remove(&self, endpoint_id: &EndpointId) -> Option<ReceiverEndpoint> {
        self.endpoints.write().remove(endpoint_id)
    }
}

impl EndpointRepository for MemoryEndpointRepository {
    async fn find_endpoint_by_id(
        &self,
        endpoint_id: &EndpointId,
    ) -> Result<Option<ReceiverEndpoint>, ReceptionError> {
        Ok(self.endpoints.read().get(endpoint_id).cloned())
    }
}

// ─── batches ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryBatchRepository {
    batches: RwLock<HashMap<BatchId, LogBatch>>,
    fail_writes: AtomicBool,
}

impl MemoryBatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of a batch.
    pub fn get(&self, batch_id: &BatchId) -> Option<LogBatch> {
        self.batches.read().get(batch_id).cloned()
    }

    /// Snapshot of every batch, oldest first.
    pub fn all(&self) -> Vec<LogBatch> {
        let mut batches: Vec<_> = self.batches.read().values().cloned().collect();
        batches.sort_by_key(|batch| batch.received_time);
        batches
    }

    /// Replaces a batch without transition checks.
    pub fn put(&self, batch: LogBatch) {
        self.batches.write().insert(batch.id.clone(), batch);
    }

    pub fn len(&self) -> usize {
        self.batches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.read().is_empty()
    }

    fn check_writable(&self, operation: &str) -> Result<(), ReceptionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ReceptionError::repository(operation, "write failure injected"));
        }
        Ok(())
    }

    fn transition<F>(
        &self,
        operation: &str,
        batch_id: &BatchId,
        status: BatchStatus,
        apply: F,
    ) -> Result<(), ReceptionError>
    where
        F: FnOnce(&mut LogBatch),
    {
        self.check_writable(operation)?;
        let mut batches = self.batches.write();
        let batch = batches
            .get_mut(batch_id)
            .ok_or_else(|| ReceptionError::BatchNotFound(batch_id.to_string()))?;
        if !batch.status.can_transition_to(status) {
            return Err(ReceptionError::InvalidState(format!(
                "batch {} cannot move from {} to {}",
                batch_id, batch.status, status
            )));
        }
        batch.status = status;
        apply(batch);
        Ok(())
    }
}

impl BatchRepository for MemoryBatchRepository {
    async fn save(&self, batch: &LogBatch) -> Result<(), ReceptionError> {
        self.check_writable("save")?;
        self.batches.write().insert(batch.id.clone(), batch.clone());
        Ok(())
    }

    async fn find_by_id(&self, batch_id: &BatchId) -> Result<Option<LogBatch>, ReceptionError> {
        Ok(self.get(batch_id))
    }

    async fn update_status(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        error_message: Option<String>,
    ) -> Result<(), ReceptionError> {
        self.transition("update_status", batch_id, status, |batch| {
            batch.error_message = error_message;
        })
    }

    async fn update_status_and_retry_count(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        retry_count: u32,
        last_process_time: DateTime<Utc>,
    ) -> Result<(), ReceptionError> {
        self.transition("update_status_and_retry_count", batch_id, status, |batch| {
            batch.retry_count = retry_count;
            batch.last_process_time = Some(last_process_time);
        })
    }

    async fn update_failed_status(
        &self,
        batch_id: &BatchId,
        retry_count: u32,
        error_message: String,
        last_process_time: DateTime<Utc>,
    ) -> Result<(), ReceptionError> {
        self.transition("update_failed_status", batch_id, BatchStatus::Failed, |batch| {
            batch.retry_count = retry_count;
            batch.error_message = Some(error_message);
            batch.last_process_time = Some(last_process_time);
        })
    }

    async fn update_status_and_process_time(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        processed_time: DateTime<Utc>,
        last_process_time: DateTime<Utc>,
    ) -> Result<(), ReceptionError> {
        self.transition("update_status_and_process_time", batch_id, status, |batch| {
            batch.processed_time = Some(processed_time);
            batch.last_process_time = Some(last_process_time);
        })
    }

    async fn update_processed_status(
        &self,
        batch_id: &BatchId,
        status: BatchStatus,
        processed_time: DateTime<Utc>,
        last_process_time: DateTime<Utc>,
        batch_trace_id: Option<String>,
        confirmed: bool,
    ) -> Result<(), ReceptionError> {
        self.transition("update_processed_status", batch_id, status, |batch| {
            batch.processed_time = Some(processed_time);
            batch.last_process_time = Some(last_process_time);
            batch.batch_trace_id = batch_trace_id;
            batch.confirmed = confirmed;
            batch.error_message = None;
        })
    }

    async fn find_by_status_and_processed_time_before(
        &self,
        status: BatchStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<LogBatch>, ReceptionError> {
        Ok(self
            .batches
            .read()
            .values()
            .filter(|batch| batch.status == status)
            .filter(|batch| batch.processed_time.is_some_and(|t| t < before))
            .cloned()
            .collect())
    }

    async fn find_by_status_and_last_process_time_before(
        &self,
        status: BatchStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<LogBatch>, ReceptionError> {
        Ok(self
            .batches
            .read()
            .values()
            .filter(|batch| batch.status == status)
            .filter(|batch| batch.last_process_time.is_some_and(|t| t < before))
            .cloned()
            .collect())
    }

    async fn delete(&self, batch_id: &BatchId) -> Result<bool, ReceptionError> {
        self.check_writable("delete")?;
        Ok(self.batches.write().remove(batch_id).is_some())
    }

    async fn count_by_status(&self, status: BatchStatus) -> Result<usize, ReceptionError> {
        Ok(self
            .batches
            .read()
            .values()
            .filter(|batch| batch.status == status)
            .count())
    }
}

// ─── storage ────────────────────────────────────────────────────────

/// Storage that keeps processed logs in memory, keyed by batch id.
///
/// Storing the same batch twice overwrites the first copy.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    stored: RwLock<HashMap<BatchId, Vec<ProcessedLog>>>,
    store_calls: AtomicUsize,
    reject_next: AtomicU32,
    unavailable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers the next `count` store calls with a non-success result.
    pub fn reject_next(&self, count: u32) {
        self.reject_next.store(count, Ordering::SeqCst);
    }

    /// Makes every call fail with a gateway error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Records a batch as stored without a store call.
    pub fn mark_stored(&self, batch_id: BatchId) {
        self.stored.write().insert(batch_id, Vec::new());
    }

    pub fn stored_logs(&self, batch_id: &BatchId) -> Option<Vec<ProcessedLog>> {
        self.stored.read().get(batch_id).cloned()
    }

    pub fn stored_batch_count(&self) -> usize {
        self.stored.read().len()
    }

    /// Number of `store_batch` calls, including failed ones.
    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), ReceptionError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReceptionError::gateway("storage", "storage unavailable"));
        }
        Ok(())
    }
}

impl StorageGateway for MemoryStorage {
    async fn store_batch(
        &self,
        batch: &LogBatch,
        logs: &[ProcessedLog],
    ) -> Result<StorageResult, ReceptionError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let rejected = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Ok(StorageResult::failure("rejected by storage"));
        }

        self.stored.write().insert(batch.id.clone(), logs.to_vec());
        Ok(StorageResult::success(format!("trace-{}", batch.id)))
    }

    async fn is_batch_stored(&self, batch_id: &BatchId) -> Result<bool, ReceptionError> {
        self.check_available()?;
        Ok(self.stored.read().contains_key(batch_id))
    }
}
