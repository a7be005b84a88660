//! Per-(app, endpoint) processing metrics.
//!
//! [`ProcessingMetrics`] keeps in-process counters that can be read back as a
//! [`MetricsSnapshot`], and mirrors every update to the global `metrics`
//! recorder with `app_id` / `endpoint_id` labels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use intake_core::metrics as m;
use parking_lot::RwLock;
use serde::Serialize;

use crate::model::AppEndpointKey;

#[derive(Debug)]
struct KeyCounters {
    received_logs: AtomicU64,
    received_batches: AtomicU64,
    success_logs: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    processing_time_total_ms: AtomicU64,
    processing_time_max_ms: AtomicU64,
    processing_time_min_ms: AtomicU64,
    processing_time_count: AtomicU64,
}

impl Default for KeyCounters {
    fn default() -> Self {
        Self {
            received_logs: AtomicU64::new(0),
            received_batches: AtomicU64::new(0),
            success_logs: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            processing_time_total_ms: AtomicU64::new(0),
            processing_time_max_ms: AtomicU64::new(0),
            processing_time_min_ms: AtomicU64::new(u64::MAX),
            processing_time_count: AtomicU64::new(0),
        }
    }
}

/// Point-in-time counters for one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub received_logs: u64,
    pub received_batches: u64,
    pub success_logs: u64,
    pub failures: u64,
    pub retries: u64,
    pub processing_time_total_ms: u64,
    pub processing_time_max_ms: u64,
    /// 0 until the first processed batch
    pub processing_time_min_ms: u64,
    pub processing_time_count: u64,
}

impl MetricsSnapshot {
    pub fn average_processing_time_ms(&self) -> f64 {
        if self.processing_time_count == 0 {
            return 0.0;
        }
        self.processing_time_total_ms as f64 / self.processing_time_count as f64
    }
}

#[derive(Debug, Default)]
pub struct ProcessingMetrics {
    counters: RwLock<HashMap<AppEndpointKey, Arc<KeyCounters>>>,
}

impl ProcessingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, key: &AppEndpointKey) -> Arc<KeyCounters> {
        if let Some(counters) = self.counters.read().get(key) {
            return Arc::clone(counters);
        }
        Arc::clone(self.counters.write().entry(key.clone()).or_default())
    }

    pub fn record_logs_received(&self, key: &AppEndpointKey, count: u64) {
        self.counters(key)
            .received_logs
            .fetch_add(count, Ordering::Relaxed);
        metrics::counter!(
            m::LOGS_RECEIVED_TOTAL,
            m::LABEL_APP_ID => key.app_id.to_string(),
            m::LABEL_ENDPOINT_ID => key.endpoint_id.to_string()
        )
        .increment(count);
    }

    pub fn record_batch_received(&self, key: &AppEndpointKey) {
        self.counters(key)
            .received_batches
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::BATCHES_RECEIVED_TOTAL,
            m::LABEL_APP_ID => key.app_id.to_string(),
            m::LABEL_ENDPOINT_ID => key.endpoint_id.to_string()
        )
        .increment(1);
    }

    /// Records a batch handed to storage: its log count and received-to-processed latency.
    pub fn record_process_success(&self, key: &AppEndpointKey, log_count: u64, processing_time_ms: u64) {
        let counters = self.counters(key);
        counters.success_logs.fetch_add(log_count, Ordering::Relaxed);
        counters
            .processing_time_total_ms
            .fetch_add(processing_time_ms, Ordering::Relaxed);
        counters
            .processing_time_max_ms
            .fetch_max(processing_time_ms, Ordering::Relaxed);
        counters
            .processing_time_min_ms
            .fetch_min(processing_time_ms, Ordering::Relaxed);
        counters.processing_time_count.fetch_add(1, Ordering::Relaxed);

        let app_id = key.app_id.to_string();
        let endpoint_id = key.endpoint_id.to_string();
        metrics::counter!(
            m::BATCHES_PROCESSED_TOTAL,
            m::LABEL_APP_ID => app_id.clone(),
            m::LABEL_ENDPOINT_ID => endpoint_id.clone()
        )
        .increment(1);
        metrics::counter!(
            m::LOGS_STORED_TOTAL,
            m::LABEL_APP_ID => app_id.clone(),
            m::LABEL_ENDPOINT_ID => endpoint_id.clone()
        )
        .increment(log_count);
        metrics::histogram!(
            m::BATCH_PROCESSING_DURATION_SECONDS,
            m::LABEL_APP_ID => app_id,
            m::LABEL_ENDPOINT_ID => endpoint_id
        )
        .record(processing_time_ms as f64 / 1000.0);
    }

    pub fn record_process_failure(&self, key: &AppEndpointKey) {
        self.counters(key).failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::BATCHES_FAILED_TOTAL,
            m::LABEL_APP_ID => key.app_id.to_string(),
            m::LABEL_ENDPOINT_ID => key.endpoint_id.to_string()
        )
        .increment(1);
    }

    pub fn record_retry(&self, key: &AppEndpointKey) {
        self.counters(key).retries.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::BATCH_RETRIES_TOTAL,
            m::LABEL_APP_ID => key.app_id.to_string(),
            m::LABEL_ENDPOINT_ID => key.endpoint_id.to_string()
        )
        .increment(1);
    }

    /// Counts an admission rejection. Only the global recorder keeps these.
    pub fn record_rejection(&self, reason: &'static str) {
        metrics::counter!(m::ADMISSION_REJECTED_TOTAL, m::LABEL_REASON => reason).increment(1);
    }

    pub fn snapshot(&self, key: &AppEndpointKey) -> MetricsSnapshot {
        let Some(counters) = self.counters.read().get(key).cloned() else {
            return MetricsSnapshot::default();
        };
        let min = counters.processing_time_min_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            received_logs: counters.received_logs.load(Ordering::Relaxed),
            received_batches: counters.received_batches.load(Ordering::Relaxed),
            success_logs: counters.success_logs.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            processing_time_total_ms: counters.processing_time_total_ms.load(Ordering::Relaxed),
            processing_time_max_ms: counters.processing_time_max_ms.load(Ordering::Relaxed),
            processing_time_min_ms: if min == u64::MAX { 0 } else { min },
            processing_time_count: counters.processing_time_count.load(Ordering::Relaxed),
        }
    }

    /// Keys with at least one recorded event.
    pub fn keys(&self) -> Vec<AppEndpointKey> {
        let mut keys: Vec<_> = self.counters.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn reset(&self) {
        self.counters.write().clear();
    }
}
