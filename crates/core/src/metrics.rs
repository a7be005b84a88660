//! Metric names and descriptions.
//!
//! All Prometheus metric names are defined here. Components record through the
//! `metrics::counter!()`, `metrics::gauge!()` and `metrics::histogram!()` macros
//! using these constants.
//!
//! # Naming
//!
//! - prefix: `intake_`
//! - suffix: `_total` (counter), `_seconds` (histogram), none (gauge)
//!
//! # Example
//!
//! ```ignore
//! use intake_core::metrics as m;
//!
//! metrics::counter!(m::LOGS_RECEIVED_TOTAL, m::LABEL_APP_ID => "app-1").increment(1);
//! ```

// ─── label keys ─────────────────────────────────────────────────────

/// Application id label key
pub const LABEL_APP_ID: &str = "app_id";

/// Endpoint id label key
pub const LABEL_ENDPOINT_ID: &str = "endpoint_id";

/// Rejection reason label key
pub const LABEL_REASON: &str = "reason";

/// Result label key (deleted, timed_out)
pub const LABEL_RESULT: &str = "result";

// ─── reception ──────────────────────────────────────────────────────

/// Logs admitted by the reception chain (counter)
pub const LOGS_RECEIVED_TOTAL: &str = "intake_logs_received_total";

/// Batches created from batch submissions (counter)
pub const BATCHES_RECEIVED_TOTAL: &str = "intake_batches_received_total";

/// Requests rejected by admission control (counter, label: reason)
pub const ADMISSION_REJECTED_TOTAL: &str = "intake_admission_rejected_total";

/// Logs currently held in single-log buffers (gauge)
pub const BUFFERED_LOGS: &str = "intake_buffered_logs";

// ─── batch processing ───────────────────────────────────────────────

/// Batches that reached PROCESSED (counter)
pub const BATCHES_PROCESSED_TOTAL: &str = "intake_batches_processed_total";

/// Logs handed to storage successfully (counter)
pub const LOGS_STORED_TOTAL: &str = "intake_logs_stored_total";

/// Batches that reached FAILED after exhausting retries (counter)
pub const BATCHES_FAILED_TOTAL: &str = "intake_batches_failed_total";

/// Retry attempts (counter)
pub const BATCH_RETRIES_TOTAL: &str = "intake_batch_retries_total";

/// Received-to-processed latency (histogram, seconds)
pub const BATCH_PROCESSING_DURATION_SECONDS: &str = "intake_batch_processing_duration_seconds";

/// Batches removed or failed by cleanup (counter, label: result)
pub const BATCHES_CLEANED_TOTAL: &str = "intake_batches_cleaned_total";

// ─── daemon ─────────────────────────────────────────────────────────

/// Seconds since the daemon started (gauge)
pub const DAEMON_UPTIME_SECONDS: &str = "intake_daemon_uptime_seconds";

/// Histogram buckets for batch processing latency (seconds)
pub const PROCESSING_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Every metric name, for exporter setup and tests.
pub const ALL_METRIC_NAMES: &[&str] = &[
    LOGS_RECEIVED_TOTAL,
    BATCHES_RECEIVED_TOTAL,
    ADMISSION_REJECTED_TOTAL,
    BUFFERED_LOGS,
    BATCHES_PROCESSED_TOTAL,
    LOGS_STORED_TOTAL,
    BATCHES_FAILED_TOTAL,
    BATCH_RETRIES_TOTAL,
    BATCH_PROCESSING_DURATION_SECONDS,
    BATCHES_CLEANED_TOTAL,
    DAEMON_UPTIME_SECONDS,
];

/// Registers descriptions for every metric.
///
/// Call once after installing a recorder. Safe to call without one.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        LOGS_RECEIVED_TOTAL,
        "Total number of logs admitted per app and endpoint"
    );
    describe_counter!(
        BATCHES_RECEIVED_TOTAL,
        "Total number of batches created from batch submissions"
    );
    describe_counter!(
        ADMISSION_REJECTED_TOTAL,
        "Requests rejected by admission control, by reason"
    );
    describe_gauge!(
        BUFFERED_LOGS,
        "Logs waiting in single-log buffers"
    );
    describe_gauge!(
        DAEMON_UPTIME_SECONDS,
        "Seconds since the daemon started"
    );
    describe_counter!(
        BATCHES_PROCESSED_TOTAL,
        "Batches that reached the PROCESSED state"
    );
    describe_counter!(LOGS_STORED_TOTAL, "Logs handed to storage successfully");
    describe_counter!(
        BATCHES_FAILED_TOTAL,
        "Batches marked FAILED after exhausting retries"
    );
    describe_counter!(BATCH_RETRIES_TOTAL, "Batch processing retry attempts");
    describe_histogram!(
        BATCH_PROCESSING_DURATION_SECONDS,
        "Latency from batch reception to PROCESSED in seconds"
    );
    describe_counter!(
        BATCHES_CLEANED_TOTAL,
        "Batches deleted or timed out by the cleanup job"
    );
}
