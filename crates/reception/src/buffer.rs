//! Single-log buffering -- per-(app, endpoint) aggregation into batches.
//!
//! [`LogBufferManager`] collects logs submitted one at a time and turns them
//! into PENDING batches when a buffer reaches the size threshold or its age
//! reaches the time limit. The scheduler also calls
//! [`LogBufferManager::flush_all`] on a fixed cadence, bounding worst-case
//! latency for quiet keys.
//!
//! # Flushing
//! ```text
//! add_log ──> buffer[key] ──(threshold | age)──> take buffer ──spawn──> save PENDING batch
//!                                                                           │
//!                                                                  on_batch_ready(id)
//! ```
//!
//! Each key has its own buffer lock; the map lock is held only to find or
//! insert a key's buffer, so different keys never contend.
//!
//! Logs keep their submission order inside a batch. Logs still buffered when
//! the process dies are lost; [`LogBufferManager::flush_all`] on shutdown
//! avoids that for graceful stops.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use intake_core::metrics as m;
use parking_lot::{Mutex, RwLock};
use tokio::time::{Duration, Instant};
use tokio_util::task::TaskTracker;

use crate::error::ReceptionError;
use crate::model::{AppEndpointKey, AppId, BatchId, EndpointId, LogBatch, RawLog};
use crate::ports::{BatchReadyHandler, BatchRepository};

#[derive(Debug)]
struct PendingBuffer {
    logs: Vec<RawLog>,
    created_at: Instant,
}

impl PendingBuffer {
    fn new(now: Instant) -> Self {
        Self {
            logs: Vec::new(),
            created_at: now,
        }
    }

    fn push(&mut self, log: RawLog, now: Instant) {
        if self.logs.is_empty() {
            self.created_at = now;
        }
        self.logs.push(log);
    }

    fn take(&mut self) -> Vec<RawLog> {
        std::mem::take(&mut self.logs)
    }
}

/// Per-key log buffers feeding batch creation.
pub struct LogBufferManager<B> {
    batches: Arc<B>,
    on_ready: Arc<dyn BatchReadyHandler>,
    threshold: usize,
    max_buffer_time: Duration,
    buffers: RwLock<HashMap<AppEndpointKey, Arc<Mutex<PendingBuffer>>>>,
    buffered: AtomicUsize,
    flushes: TaskTracker,
}

impl<B: BatchRepository> LogBufferManager<B> {
    pub fn new(
        batches: Arc<B>,
        on_ready: Arc<dyn BatchReadyHandler>,
        threshold: usize,
        max_buffer_time: Duration,
    ) -> Self {
        Self {
            batches,
            on_ready,
            threshold: threshold.max(1),
            max_buffer_time,
            buffers: RwLock::new(HashMap::new()),
            buffered: AtomicUsize::new(0),
            flushes: TaskTracker::new(),
        }
    }

    /// Appends a log to its key's buffer.
    ///
    /// Returns `true` when this call filled or aged the buffer enough to start
    /// a flush. The flush runs in the background; must be called from within
    /// a tokio runtime.
    pub fn add_log(&self, log: RawLog, app_id: &AppId, endpoint_id: &EndpointId) -> bool {
        let key = AppEndpointKey::new(app_id.clone(), endpoint_id.clone());
        let now = Instant::now();

        let ready = {
            let buffer = self.buffer_for(&key, now);
            let mut buffer = buffer.lock();
            buffer.push(log, now);
            self.buffered.fetch_add(1, Ordering::Relaxed);
            let full = buffer.logs.len() >= self.threshold;
            let stale = now.saturating_duration_since(buffer.created_at) >= self.max_buffer_time;
            (full || stale).then(|| buffer.take())
        };

        let Some(logs) = ready else {
            metrics::gauge!(m::BUFFERED_LOGS).set(self.buffered_count() as f64);
            return false;
        };
        self.release(logs.len());
        tracing::debug!(key = %key, count = logs.len(), "buffer threshold reached, flushing");

        let batches = Arc::clone(&self.batches);
        let on_ready = Arc::clone(&self.on_ready);
        self.flushes.spawn(async move {
            // failure already logged inside
            let _ = flush(batches.as_ref(), on_ready.as_ref(), key, logs).await;
        });
        true
    }

    /// Flushes every non-empty buffer and waits for in-flight flushes.
    ///
    /// Returns the number of batches created by this call.
    pub async fn flush_all(&self) -> usize {
        let drained: Vec<(AppEndpointKey, Vec<RawLog>)> = self
            .snapshot()
            .into_iter()
            .filter_map(|(key, buffer)| {
                let logs = buffer.lock().take();
                (!logs.is_empty()).then_some((key, logs))
            })
            .collect();

        let mut created = 0;
        for (key, logs) in drained {
            self.release(logs.len());
            if flush(self.batches.as_ref(), self.on_ready.as_ref(), key, logs)
                .await
                .is_ok()
            {
                created += 1;
            }
        }
        self.wait_for_flushes().await;
        if created > 0 {
            tracing::debug!(batches = created, "flushed all buffers");
        }
        created
    }

    /// Waits for background flushes started by [`add_log`](Self::add_log).
    pub async fn wait_for_flushes(&self) {
        self.flushes.close();
        self.flushes.wait().await;
        self.flushes.reopen();
    }

    /// Logs currently waiting in buffers.
    pub fn buffered_count(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Number of keys with a non-empty buffer.
    pub fn buffer_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|(_, buffer)| !buffer.lock().logs.is_empty())
            .count()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn buffer_for(&self, key: &AppEndpointKey, now: Instant) -> Arc<Mutex<PendingBuffer>> {
        if let Some(buffer) = self.buffers.read().get(key) {
            return Arc::clone(buffer);
        }
        let mut buffers = self.buffers.write();
        Arc::clone(
            buffers
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(PendingBuffer::new(now)))),
        )
    }

    fn snapshot(&self) -> Vec<(AppEndpointKey, Arc<Mutex<PendingBuffer>>)> {
        self.buffers
            .read()
            .iter()
            .map(|(key, buffer)| (key.clone(), Arc::clone(buffer)))
            .collect()
    }

    fn release(&self, count: usize) {
        let previous = self.buffered.fetch_sub(count, Ordering::Relaxed);
        metrics::gauge!(m::BUFFERED_LOGS).set(previous.saturating_sub(count) as f64);
    }
}

/// Persists `logs` as a PENDING batch and hands its id to `on_ready`.
async fn flush<B: BatchRepository>(
    batches: &B,
    on_ready: &dyn BatchReadyHandler,
    key: AppEndpointKey,
    logs: Vec<RawLog>,
) -> Result<BatchId, ReceptionError> {
    let count = logs.len();
    let batch = LogBatch::new(key.app_id, key.endpoint_id, logs);
    if let Err(e) = batches.save(&batch).await {
        tracing::error!(
            batch_id = %batch.id,
            app_id = %batch.app_id,
            endpoint_id = %batch.endpoint_id,
            count,
            error = %e,
            "failed to persist buffered batch, logs dropped"
        );
        return Err(e);
    }
    tracing::info!(
        batch_id = %batch.id,
        app_id = %batch.app_id,
        endpoint_id = %batch.endpoint_id,
        count,
        "buffered batch created"
    );
    on_ready.on_batch_ready(batch.id.clone());
    Ok(batch.id)
}
