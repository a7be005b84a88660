//! Periodic batch cleanup.
//!
//! - PROCESSED batches older than the processed retention are deleted
//! - FAILED batches whose last attempt is older than the failed retention are deleted
//! - PROCESSING batches whose last attempt is older than the processing
//!   timeout are marked FAILED ("processing timeout")
//!
//! A failure in one step is logged and does not stop the others.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use intake_core::metrics as m;
use serde::Serialize;
use tokio::time::Duration;

use crate::error::ReceptionError;
use crate::model::{BatchId, BatchStatus};
use crate::ports::BatchRepository;

/// Error message recorded on batches failed by the timeout sweep.
pub const PROCESSING_TIMEOUT_MESSAGE: &str = "processing timeout";

const RESULT_DELETED: &str = "deleted";
const RESULT_TIMED_OUT: &str = "timed_out";

/// Age limits applied by [`BatchCleaner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub processed_retention: Duration,
    pub failed_retention: Duration,
    pub processing_timeout: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            processed_retention: Duration::from_secs(24 * 3600),
            failed_retention: Duration::from_secs(72 * 3600),
            processing_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// What one cleanup run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub processed_deleted: usize,
    pub failed_deleted: usize,
    pub timed_out: usize,
    /// Steps or batches that hit a repository error
    pub errors: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.processed_deleted + self.failed_deleted + self.timed_out
    }
}

pub struct BatchCleaner<B> {
    batches: Arc<B>,
    policy: CleanupPolicy,
}

impl<B: BatchRepository> BatchCleaner<B> {
    pub fn new(batches: Arc<B>, policy: CleanupPolicy) -> Self {
        Self { batches, policy }
    }

    pub fn policy(&self) -> CleanupPolicy {
        self.policy
    }

    pub async fn run_once(&self) -> CleanupReport {
        self.run_once_at(Utc::now()).await
    }

    /// Runs every step as if the clock read `now`.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> CleanupReport {
        let mut report = CleanupReport::default();

        match self.delete_processed(now, &mut report).await {
            Ok(count) => report.processed_deleted = count,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "cleanup of processed batches failed");
            }
        }
        match self.delete_failed(now, &mut report).await {
            Ok(count) => report.failed_deleted = count,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "cleanup of failed batches failed");
            }
        }
        match self.fail_timed_out(now, &mut report).await {
            Ok(count) => report.timed_out = count,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "processing timeout sweep failed");
            }
        }

        record(RESULT_DELETED, report.processed_deleted + report.failed_deleted);
        record(RESULT_TIMED_OUT, report.timed_out);
        if report.total() > 0 || report.errors > 0 {
            tracing::info!(
                processed_deleted = report.processed_deleted,
                failed_deleted = report.failed_deleted,
                timed_out = report.timed_out,
                errors = report.errors,
                "batch cleanup finished"
            );
        }
        report
    }

    async fn delete_processed(
        &self,
        now: DateTime<Utc>,
        report: &mut CleanupReport,
    ) -> Result<usize, ReceptionError> {
        let threshold = older_than(now, self.policy.processed_retention);
        let expired = self
            .batches
            .find_by_status_and_processed_time_before(BatchStatus::Processed, threshold)
            .await?;
        self.delete_all(expired.iter().map(|b| &b.id), report).await
    }

    async fn delete_failed(
        &self,
        now: DateTime<Utc>,
        report: &mut CleanupReport,
    ) -> Result<usize, ReceptionError> {
        let threshold = older_than(now, self.policy.failed_retention);
        let expired = self
            .batches
            .find_by_status_and_last_process_time_before(BatchStatus::Failed, threshold)
            .await?;
        self.delete_all(expired.iter().map(|b| &b.id), report).await
    }

    async fn fail_timed_out(
        &self,
        now: DateTime<Utc>,
        report: &mut CleanupReport,
    ) -> Result<usize, ReceptionError> {
        let threshold = older_than(now, self.policy.processing_timeout);
        let stuck = self
            .batches
            .find_by_status_and_last_process_time_before(BatchStatus::Processing, threshold)
            .await?;

        let mut failed = 0;
        for batch in &stuck {
            match self
                .batches
                .update_status(
                    &batch.id,
                    BatchStatus::Failed,
                    Some(PROCESSING_TIMEOUT_MESSAGE.to_owned()),
                )
                .await
            {
                Ok(()) => {
                    failed += 1;
                    tracing::warn!(
                        batch_id = %batch.id,
                        retry_count = batch.retry_count,
                        "batch stuck in PROCESSING, marked failed"
                    );
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(batch_id = %batch.id, error = %e, "failed to time out batch");
                }
            }
        }
        Ok(failed)
    }

    async fn delete_all<'a>(
        &self,
        ids: impl Iterator<Item = &'a BatchId>,
        report: &mut CleanupReport,
    ) -> Result<usize, ReceptionError> {
        let mut deleted = 0;
        for id in ids {
            match self.batches.delete(id).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(batch_id = %id, error = %e, "failed to delete batch");
                }
            }
        }
        Ok(deleted)
    }
}

fn record(result: &'static str, count: usize) {
    if count > 0 {
        metrics::counter!(m::BATCHES_CLEANED_TOTAL, m::LABEL_RESULT => result).increment(count as u64);
    }
}

/// `now - age`, clamped to the earliest representable time.
fn older_than(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
