//! Batch processing -- drives a persisted batch from PENDING to PROCESSED or FAILED.
//!
//! [`BatchProcessor`] runs one retry loop per batch on a bounded worker pool:
//!
//! ```text
//! fetch ──> already PROCESSED / exhausted? ──> done
//!   │
//!   ├─> storage says stored? ──> PROCESSED (confirmed) ──> done
//!   │
//!   └─> PROCESSING(retry) ──> preprocess ──> none valid ──> PROCESSED ──> done
//!                                   │
//!                                   └─> store ──> PROCESSED(trace id) ──> done
//!
//! any error ──> retry += 1 ──> backoff(interval * 2^(retry-1)) ──> fetch
//!           └─> retry > max ──> FAILED + notify
//! ```
//!
//! Every state change is one narrow repository call, so a crash between two
//! steps leaves the last recorded state. Storage may see the same batch more
//! than once across retries; the `is_batch_stored` probe makes a repeated
//! success observable as success.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::ReceptionError;
use crate::metrics::ProcessingMetrics;
use crate::model::{BatchId, BatchStatus, ProcessedLog};
use crate::ports::{
    BatchReadyHandler, BatchRepository, FailureNotifier, LogNotifier, PreprocessGateway,
    StorageGateway,
};

/// Retry bound and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retry_count: u32,
    /// Wait before the first retry, doubled for each later one
    pub retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            retry_interval: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_interval.saturating_mul(factor)
    }
}

/// How a call to [`BatchProcessor::process_batch`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Stored downstream and marked PROCESSED
    Processed {
        trace_id: Option<String>,
        stored_logs: usize,
    },
    /// Preprocessing left no valid logs; marked PROCESSED without a store call
    NothingToStore,
    /// Already PROCESSED before this call
    AlreadyProcessed,
    /// Storage already had the batch; marked PROCESSED without a store call
    AlreadyStored,
    /// FAILED with retries already exhausted
    Exhausted,
    /// No such batch
    NotFound,
    /// Retries exhausted in this call; marked FAILED
    Failed { error: String },
    /// Shutdown interrupted a retry wait; state left as last recorded
    Interrupted,
}

impl BatchOutcome {
    /// Whether the batch ended PROCESSED, now or earlier.
    pub fn is_processed(&self) -> bool {
        matches!(
            self,
            Self::Processed { .. } | Self::NothingToStore | Self::AlreadyProcessed | Self::AlreadyStored
        )
    }
}

/// Asynchronous batch processor with a bounded worker pool.
///
/// Cheap to clone; clones share the pool, the task tracker and the shutdown
/// token.
pub struct BatchProcessor<R, P, S> {
    batches: Arc<R>,
    preprocessor: Arc<P>,
    storage: Arc<S>,
    notifier: Arc<dyn FailureNotifier>,
    metrics: Arc<ProcessingMetrics>,
    policy: RetryPolicy,
    workers: Arc<Semaphore>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl<R, P, S> Clone for BatchProcessor<R, P, S> {
    fn clone(&self) -> Self {
        Self {
            batches: Arc::clone(&self.batches),
            preprocessor: Arc::clone(&self.preprocessor),
            storage: Arc::clone(&self.storage),
            notifier: Arc::clone(&self.notifier),
            metrics: Arc::clone(&self.metrics),
            policy: self.policy,
            workers: Arc::clone(&self.workers),
            tasks: self.tasks.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<R, P, S> BatchProcessor<R, P, S>
where
    R: BatchRepository,
    P: PreprocessGateway,
    S: StorageGateway,
{
    /// Creates a processor running at most `workers` batches at once.
    pub fn new(
        batches: Arc<R>,
        preprocessor: Arc<P>,
        storage: Arc<S>,
        metrics: Arc<ProcessingMetrics>,
        policy: RetryPolicy,
        workers: usize,
    ) -> Self {
        Self {
            batches,
            preprocessor,
            storage,
            notifier: Arc::new(LogNotifier),
            metrics,
            policy,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replaces the default [`LogNotifier`].
    pub fn with_notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Batches queued or running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Schedules `batch_id` on the worker pool and returns immediately.
    ///
    /// Safe to call more than once for the same id. Ignored after
    /// [`shutdown`](Self::shutdown); the batch keeps its recorded state.
    pub fn process_batch_async(&self, batch_id: BatchId) {
        if self.shutdown.is_cancelled() {
            tracing::warn!(batch_id = %batch_id, "processor shut down, batch not scheduled");
            return;
        }
        let this = self.clone();
        self.tasks.spawn(async move {
            let Ok(_permit) = Arc::clone(&this.workers).acquire_owned().await else {
                return;
            };
            this.process_batch(&batch_id).await;
        });
    }

    /// Runs the retry loop for one batch to completion.
    pub async fn process_batch(&self, batch_id: &BatchId) -> BatchOutcome {
        let mut retry = 0u32;
        loop {
            let error = match self.attempt(batch_id, retry).await {
                Ok(outcome) => return outcome,
                Err(e) => e,
            };

            retry += 1;
            tracing::warn!(
                batch_id = %batch_id,
                retry_count = retry,
                error = %error,
                "batch processing attempt failed"
            );
            if retry > self.policy.max_retry_count {
                return self.fail(batch_id, &error).await;
            }
            if self.wait_before_retry(batch_id, retry).await.is_err() {
                tracing::warn!(batch_id = %batch_id, retry_count = retry, "retry wait interrupted");
                return BatchOutcome::Interrupted;
            }
        }
    }

    /// Interrupts retry waits and waits for every scheduled batch to finish.
    ///
    /// Batches already queued still get one attempt; a failed attempt is not
    /// retried and keeps its recorded state.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Waits until every scheduled batch has finished, without interrupting
    /// anything.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    async fn attempt(&self, batch_id: &BatchId, retry: u32) -> Result<BatchOutcome, ReceptionError> {
        let Some(batch) = self.batches.find_by_id(batch_id).await? else {
            tracing::error!(batch_id = %batch_id, "batch not found, skipping");
            return Ok(BatchOutcome::NotFound);
        };
        if batch.status == BatchStatus::Processed {
            tracing::info!(batch_id = %batch_id, "batch already processed, skipping");
            return Ok(BatchOutcome::AlreadyProcessed);
        }
        if batch.status == BatchStatus::Failed && batch.retry_count >= self.policy.max_retry_count {
            tracing::warn!(
                batch_id = %batch_id,
                retry_count = batch.retry_count,
                "batch failed with retries exhausted, skipping"
            );
            return Ok(BatchOutcome::Exhausted);
        }

        if self.storage.is_batch_stored(batch_id).await? {
            tracing::info!(batch_id = %batch_id, "batch already stored downstream, marking processed");
            let now = Utc::now();
            if let Err(e) = self
                .batches
                .update_processed_status(batch_id, BatchStatus::Processed, now, now, None, true)
                .await
            {
                tracing::error!(batch_id = %batch_id, error = %e, "failed to record already-stored batch");
            }
            return Ok(BatchOutcome::AlreadyStored);
        }

        self.batches
            .update_status_and_retry_count(batch_id, BatchStatus::Processing, retry, Utc::now())
            .await?;

        let valid: Vec<ProcessedLog> = self
            .preprocessor
            .preprocess_batch(&batch)
            .await?
            .into_iter()
            .filter(|log| log.validated)
            .collect();
        if valid.is_empty() {
            tracing::warn!(batch_id = %batch_id, "no valid logs after preprocessing, marking processed");
            let now = Utc::now();
            self.batches
                .update_status_and_process_time(batch_id, BatchStatus::Processed, now, now)
                .await?;
            return Ok(BatchOutcome::NothingToStore);
        }

        let result = self.storage.store_batch(&batch, &valid).await?;
        if !result.success {
            return Err(ReceptionError::Storage(
                result
                    .error_message
                    .unwrap_or_else(|| "no error message".to_owned()),
            ));
        }

        let now = Utc::now();
        self.batches
            .update_processed_status(
                batch_id,
                BatchStatus::Processed,
                now,
                now,
                result.trace_id.clone(),
                true,
            )
            .await?;

        let elapsed_ms = (now - batch.received_time).num_milliseconds().max(0) as u64;
        self.metrics
            .record_process_success(&batch.key(), valid.len() as u64, elapsed_ms);
        tracing::info!(
            batch_id = %batch_id,
            app_id = %batch.app_id,
            endpoint_id = %batch.endpoint_id,
            log_count = batch.log_count(),
            valid_count = valid.len(),
            trace_id = result.trace_id.as_deref().unwrap_or_default(),
            processing_time_ms = elapsed_ms,
            "batch processed"
        );
        Ok(BatchOutcome::Processed {
            trace_id: result.trace_id,
            stored_logs: valid.len(),
        })
    }

    async fn wait_before_retry(&self, batch_id: &BatchId, retry: u32) -> Result<(), ReceptionError> {
        match self.batches.find_by_id(batch_id).await {
            Ok(Some(batch)) => self.metrics.record_retry(&batch.key()),
            Ok(None) => {}
            Err(e) => tracing::warn!(batch_id = %batch_id, error = %e, "failed to record retry metric"),
        }

        let wait = self.policy.backoff(retry);
        tracing::debug!(batch_id = %batch_id, retry_count = retry, wait_ms = wait.as_millis() as u64, "waiting before retry");
        tokio::select! {
            () = tokio::time::sleep(wait) => Ok(()),
            () = self.shutdown.cancelled() => Err(ReceptionError::Interrupted),
        }
    }

    async fn fail(&self, batch_id: &BatchId, error: &ReceptionError) -> BatchOutcome {
        let message = format!(
            "batch processing failed after {} retries: {}",
            self.policy.max_retry_count, error
        );
        tracing::error!(batch_id = %batch_id, error = %message, "batch processing exhausted retries");

        if let Err(e) = self
            .batches
            .update_failed_status(
                batch_id,
                self.policy.max_retry_count,
                message.clone(),
                Utc::now(),
            )
            .await
        {
            tracing::error!(batch_id = %batch_id, error = %e, "failed to mark batch FAILED");
            return BatchOutcome::Failed { error: message };
        }

        match self.batches.find_by_id(batch_id).await {
            Ok(Some(batch)) => {
                self.metrics.record_process_failure(&batch.key());
                self.notifier.notify_batch_failed(&batch, &message);
            }
            Ok(None) => tracing::warn!(batch_id = %batch_id, "failed batch vanished before notification"),
            Err(e) => tracing::error!(batch_id = %batch_id, error = %e, "failed to load batch for notification"),
        }
        BatchOutcome::Failed { error: message }
    }
}

impl<R, P, S> BatchReadyHandler for BatchProcessor<R, P, S>
where
    R: BatchRepository,
    P: PreprocessGateway,
    S: StorageGateway,
{
    fn on_batch_ready(&self, batch_id: BatchId) {
        self.process_batch_async(batch_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBatchRepository, MemoryStorage};
    use crate::model::{AppId, EndpointId, LogBatch, LogFormat, RawLog};
    use crate::preprocess::StructuredPreprocessor;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Harness {
        processor: BatchProcessor<MemoryBatchRepository, StructuredPreprocessor, MemoryStorage>,
        batches: Arc<MemoryBatchRepository>,
        storage: Arc<MemoryStorage>,
        metrics: Arc<ProcessingMetrics>,
    }

    fn harness() -> Harness {
        let batches = Arc::new(MemoryBatchRepository::new());
        let storage = Arc::new(MemoryStorage::new());
        let metrics = Arc::new(ProcessingMetrics::new());
        let processor = BatchProcessor::new(
            Arc::clone(&batches),
            Arc::new(StructuredPreprocessor::new().unwrap()),
            Arc::clone(&storage),
            Arc::clone(&metrics),
            RetryPolicy::default(),
            2,
        );
        Harness {
            processor,
            batches,
            storage,
            metrics,
        }
    }

    fn pending(contents: &[&str]) -> LogBatch {
        LogBatch::new(
            AppId::from("a1"),
            EndpointId::from("e1"),
            contents
                .iter()
                .map(|c| RawLog::new(*c, LogFormat::Text))
                .collect(),
        )
    }

    #[derive(Default)]
    struct CountingNotifier(AtomicU32);

    impl FailureNotifier for CountingNotifier {
        fn notify_batch_failed(&self, _batch: &LogBatch, _error: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        let waits: Vec<_> = (1..=4).map(|n| policy.backoff(n).as_millis()).collect();
        assert_eq!(waits, [1000, 2000, 4000, 8000]);
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert!(policy.backoff(200) >= policy.backoff(4));
    }

    #[tokio::test]
    async fn processes_pending_batch_in_order() {
        let h = harness();
        let batch = pending(&["a=1", "b=2", "c=3"]);
        h.batches.save(&batch).await.unwrap();

        let outcome = h.processor.process_batch(&batch.id).await;
        assert_eq!(
            outcome,
            BatchOutcome::Processed {
                trace_id: Some(format!("trace-{}", batch.id)),
                stored_logs: 3
            }
        );

        let stored = h.storage.stored_logs(&batch.id).unwrap();
        let contents: Vec<_> = stored.iter().map(|log| log.content.as_str()).collect();
        assert_eq!(contents, ["a=1", "b=2", "c=3"]);

        let saved = h.batches.get(&batch.id).unwrap();
        assert_eq!(saved.status, BatchStatus::Processed);
        assert!(saved.confirmed);
        assert_eq!(saved.batch_trace_id, Some(format!("trace-{}", batch.id)));
        assert_eq!(saved.retry_count, 0);
        assert_eq!(h.metrics.snapshot(&batch.key()).success_logs, 3);
    }

    #[tokio::test]
    async fn second_call_on_processed_batch_is_noop() {
        let h = harness();
        let batch = pending(&["x"]);
        h.batches.save(&batch).await.unwrap();
        assert!(h.processor.process_batch(&batch.id).await.is_processed());
        let before = h.batches.get(&batch.id).unwrap();

        assert_eq!(
            h.processor.process_batch(&batch.id).await,
            BatchOutcome::AlreadyProcessed
        );
        assert_eq!(h.storage.store_calls(), 1);
        assert_eq!(h.batches.get(&batch.id).unwrap(), before);
    }

    #[tokio::test]
    async fn already_stored_batch_is_confirmed_without_store_call() {
        let h = harness();
        let batch = pending(&["x"]);
        h.batches.save(&batch).await.unwrap();
        h.storage.mark_stored(batch.id.clone());

        assert_eq!(h.processor.process_batch(&batch.id).await, BatchOutcome::AlreadyStored);
        assert_eq!(h.storage.store_calls(), 0);
        let saved = h.batches.get(&batch.id).unwrap();
        assert_eq!(saved.status, BatchStatus::Processed);
        assert!(saved.confirmed);
        assert_eq!(saved.batch_trace_id, None);
    }

    #[tokio::test]
    async fn batch_without_valid_logs_skips_storage() {
        let h = harness();
        let batch = pending(&["  ", ""]);
        h.batches.save(&batch).await.unwrap();

        assert_eq!(h.processor.process_batch(&batch.id).await, BatchOutcome::NothingToStore);
        assert_eq!(h.storage.store_calls(), 0);
        let saved = h.batches.get(&batch.id).unwrap();
        assert_eq!(saved.status, BatchStatus::Processed);
        assert!(saved.processed_time.is_some());
    }

    #[tokio::test]
    async fn missing_batch_is_not_found() {
        let h = harness();
        assert_eq!(
            h.processor.process_batch(&BatchId::from("ghost")).await,
            BatchOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn exhausted_failed_batch_is_skipped() {
        let h = harness();
        let mut batch = pending(&["x"]);
        batch.status = BatchStatus::Failed;
        batch.retry_count = 3;
        h.batches.put(batch.clone());

        assert_eq!(h.processor.process_batch(&batch.id).await, BatchOutcome::Exhausted);
        assert_eq!(h.storage.store_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let h = harness();
        let batch = pending(&["x"]);
        h.batches.save(&batch).await.unwrap();
        h.storage.reject_next(2);

        let started = tokio::time::Instant::now();
        let outcome = h.processor.process_batch(&batch.id).await;
        assert!(matches!(outcome, BatchOutcome::Processed { .. }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000) && elapsed < Duration::from_millis(3100));

        let saved = h.batches.get(&batch.id).unwrap();
        assert_eq!(saved.retry_count, 2);
        assert_eq!(h.storage.store_calls(), 3);
        assert_eq!(h.metrics.snapshot(&batch.key()).retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_storage_ends_failed() {
        let h = harness();
        let notifier = Arc::new(CountingNotifier::default());
        let processor = h.processor.clone().with_notifier(notifier.clone());
        let batch = pending(&["x"]);
        h.batches.save(&batch).await.unwrap();
        h.storage.reject_next(u32::MAX);

        let started = tokio::time::Instant::now();
        let outcome = processor.process_batch(&batch.id).await;
        assert!(matches!(outcome, BatchOutcome::Failed { .. }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(7000) && elapsed < Duration::from_millis(7100));

        let saved = h.batches.get(&batch.id).unwrap();
        assert_eq!(saved.status, BatchStatus::Failed);
        assert_eq!(saved.retry_count, 3);
        assert!(saved.error_message.unwrap().contains("rejected by storage"));
        assert_eq!(h.storage.store_calls(), 4);
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);

        let snapshot = h.metrics.snapshot(&batch.key());
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn storage_outage_during_probe_is_retried() {
        let h = harness();
        let batch = pending(&["x"]);
        h.batches.save(&batch).await.unwrap();
        h.storage.set_unavailable(true);

        let storage = Arc::clone(&h.storage);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            storage.set_unavailable(false);
        });

        let outcome = h.processor.process_batch(&batch.id).await;
        assert!(outcome.is_processed());
        assert_eq!(h.batches.get(&batch.id).unwrap().retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_failing_before_processing_mark_stays_exhausted() {
        let h = harness();
        let batch = pending(&["x"]);
        h.batches.save(&batch).await.unwrap();
        h.storage.set_unavailable(true);

        let first = h.processor.process_batch(&batch.id).await;
        assert!(matches!(first, BatchOutcome::Failed { .. }));
        let saved = h.batches.get(&batch.id).unwrap();
        assert_eq!(saved.status, BatchStatus::Failed);
        assert_eq!(saved.retry_count, 3);
        assert!(saved.last_process_time.is_some());

        let second = h.processor.process_batch(&batch.id).await;
        assert_eq!(second, BatchOutcome::Exhausted);
        assert_eq!(h.storage.store_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_retry_wait() {
        let h = harness();
        let batch = pending(&["x"]);
        h.batches.save(&batch).await.unwrap();
        h.storage.reject_next(u32::MAX);

        h.processor.process_batch_async(batch.id.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.processor.in_flight(), 1);

        h.processor.shutdown().await;
        assert_eq!(h.processor.in_flight(), 0);
        let saved = h.batches.get(&batch.id).unwrap();
        assert_eq!(saved.status, BatchStatus::Processing);
        assert_eq!(h.storage.store_calls(), 1);

        h.processor.process_batch_async(batch.id.clone());
        assert_eq!(h.processor.in_flight(), 0);
    }

    #[tokio::test]
    async fn async_processing_via_ready_handler() {
        let h = harness();
        let handler: Arc<dyn BatchReadyHandler> = Arc::new(h.processor.clone());
        let batch = pending(&["x"]);
        h.batches.save(&batch).await.unwrap();

        handler.on_batch_ready(batch.id.clone());
        h.processor.wait_idle().await;
        assert_eq!(h.batches.get(&batch.id).unwrap().status, BatchStatus::Processed);
    }
}
