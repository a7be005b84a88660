//! Integration tests -- full reception flow
//!
//! Runs submissions through `ReceptionService` over the in-memory adapters,
//! from admission to storage.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::Duration;

use intake_core::pipeline::Pipeline;
use intake_reception::auth::sign;
use intake_reception::memory::{
    MemoryAppRepository, MemoryBatchRepository, MemoryEndpointRepository, MemoryStorage,
};
use intake_reception::ports::FailureNotifier;
use intake_reception::{
    AppAccess, AuthRequest, BatchOutcome, BatchStatus, LogBatch, LogFormat, RawLog,
    ReceiverEndpoint, ReceptionConfig, ReceptionConfigBuilder, ReceptionService,
    ReceptionServiceBuilder, StructuredPreprocessor,
};

type Service = ReceptionService<
    MemoryAppRepository,
    MemoryEndpointRepository,
    MemoryBatchRepository,
    StructuredPreprocessor,
    MemoryStorage,
>;

struct Harness {
    service: Service,
    apps: Arc<MemoryAppRepository>,
    endpoints: Arc<MemoryEndpointRepository>,
    batches: Arc<MemoryBatchRepository>,
    storage: Arc<MemoryStorage>,
}

#[derive(Default)]
struct CountingNotifier {
    failed: AtomicUsize,
}

impl FailureNotifier for CountingNotifier {
    fn notify_batch_failed(&self, _batch: &LogBatch, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

fn harness(config: ReceptionConfig, notifier: Option<Arc<CountingNotifier>>) -> Harness {
    let apps = Arc::new(MemoryAppRepository::new());
    apps.insert(
        AppAccess::new("A1", "ak-a1", "sk-a1")
            .with_rate_limit(10, 20)
            .expect("burst >= rate"),
    );
    let endpoints = Arc::new(MemoryEndpointRepository::new());
    endpoints.insert(ReceiverEndpoint::new("E1", LogFormat::Json).with_max_payload_size(64));
    let batches = Arc::new(MemoryBatchRepository::new());
    let storage = Arc::new(MemoryStorage::new());

    let mut builder = ReceptionServiceBuilder::new(
        Arc::clone(&apps),
        Arc::clone(&endpoints),
        Arc::clone(&batches),
        Arc::new(StructuredPreprocessor::new().unwrap()),
        Arc::clone(&storage),
    )
    .config(config);
    if let Some(notifier) = notifier {
        builder = builder.notifier(notifier);
    }
    let service = builder.build().expect("valid config");

    Harness {
        service,
        apps,
        endpoints,
        batches,
        storage,
    }
}

fn config() -> ReceptionConfig {
    ReceptionConfigBuilder::new()
        .buffer_threshold(3)
        .worker_threads(2)
        .cleanup_enabled(false)
        .build()
        .expect("valid config")
}

fn json(content: &str) -> RawLog {
    RawLog::new(content, LogFormat::Json)
}

/// 20 rapid single-log submissions pass, the 21st is rate limited until a refill.
#[tokio::test(start_paused = true)]
async fn test_rate_limit_scenario() {
    let mut h = harness(config(), None);
    h.service.start().await.expect("start");

    for i in 0..20 {
        let result = h
            .service
            .receive_log("A1", "E1", json(&format!(r#"{{"n":{i}}}"#)))
            .await;
        assert!(result.success, "submission {i} rejected: {}", result.message);
    }
    let result = h.service.receive_log("A1", "E1", json(r#"{"n":20}"#)).await;
    assert!(!result.success);
    assert_eq!(result.message, "rate limited");

    // 10 tokens per second; after 200ms the refill job has restored 2 tokens
    tokio::time::sleep(Duration::from_millis(200)).await;
    let result = h.service.receive_log("A1", "E1", json(r#"{"n":21}"#)).await;
    assert!(result.success, "{}", result.message);

    h.service.stop().await.expect("stop");
}

/// One oversized log out of three is dropped, the other two form the batch.
#[tokio::test]
async fn test_oversized_log_is_dropped_from_batch() {
    let mut h = harness(config(), None);
    h.service.start().await.expect("start");

    let oversized = format!(r#"{{"blob":"{}"}}"#, "x".repeat(100));
    let logs = vec![json(r#"{"a":1}"#), json(&oversized), json(r#"{"b":2}"#)];
    let result = h.service.receive_logs("A1", "E1", logs).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.invalid_count, 1);

    let batch_id = result.batch_id.expect("batch id");
    h.service.wait_idle().await;

    let batch = h.service.batch(&batch_id).await.expect("lookup").expect("batch");
    assert_eq!(batch.log_count(), 2);
    assert_eq!(batch.status, BatchStatus::Processed);
    assert!(batch.confirmed);

    let all_oversized = vec![json(&oversized), json(&oversized), json(&oversized)];
    let result = h.service.receive_logs("A1", "E1", all_oversized).await;
    assert!(!result.success);
    assert!(result.batch_id.is_none());

    h.service.stop().await.expect("stop");
}

/// Buffered logs reach storage in submission order.
#[tokio::test]
async fn test_order_preserved_through_buffer() {
    let mut h = harness(config(), None);
    h.service.start().await.expect("start");

    let contents = [r#"{"seq":1}"#, r#"{"seq":2}"#, r#"{"seq":3}"#];
    for content in contents {
        h.service.receive_log("A1", "E1", json(content)).await;
    }
    h.service.wait_idle().await;

    let batches = h.batches.all();
    assert_eq!(batches.len(), 1);
    let stored = h.storage.stored_logs(&batches[0].id).expect("stored");
    let stored: Vec<&str> = stored.iter().map(|log| log.content.as_str()).collect();
    assert_eq!(stored, contents);
    assert_eq!(stored.len(), 3);

    h.service.stop().await.expect("stop");
}

/// Processing an already processed batch makes no further store call.
#[tokio::test]
async fn test_processed_batch_is_idempotent() {
    let mut h = harness(config(), None);
    h.service.start().await.expect("start");

    let result = h
        .service
        .receive_logs("A1", "E1", vec![json(r#"{"a":1}"#)])
        .await;
    let batch_id = result.batch_id.expect("batch id");
    h.service.wait_idle().await;
    let before = h.service.batch(&batch_id).await.expect("lookup").expect("batch");
    assert_eq!(before.status, BatchStatus::Processed);
    assert_eq!(h.storage.store_calls(), 1);

    let outcome = h.service.processor().process_batch(&batch_id).await;
    assert_eq!(outcome, BatchOutcome::AlreadyProcessed);
    h.service.processor().process_batch_async(batch_id.clone());
    h.service.wait_idle().await;

    assert_eq!(h.storage.store_calls(), 1);
    let after = h.service.batch(&batch_id).await.expect("lookup").expect("batch");
    assert_eq!(after, before);

    h.service.stop().await.expect("stop");
}

/// A batch rejected on every attempt is tried max_retry_count + 1 times, then FAILED.
#[tokio::test(start_paused = true)]
async fn test_retry_is_bounded() {
    let notifier = Arc::new(CountingNotifier::default());
    let mut h = harness(config(), Some(Arc::clone(&notifier)));
    h.storage.reject_next(u32::MAX);
    h.service.start().await.expect("start");

    let result = h
        .service
        .receive_logs("A1", "E1", vec![json(r#"{"a":1}"#)])
        .await;
    let batch_id = result.batch_id.expect("batch id");
    h.service.wait_idle().await;

    let batch = h.service.batch(&batch_id).await.expect("lookup").expect("batch");
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.retry_count, 3);
    assert!(
        batch
            .error_message
            .as_deref()
            .is_some_and(|m| m.contains("after 3 retries"))
    );
    assert_eq!(h.storage.store_calls(), 4);
    assert_eq!(notifier.failed.load(Ordering::SeqCst), 1);

    let snapshot = h.service.metrics().snapshot(&batch.key());
    assert_eq!(snapshot.failures, 1);
    assert_eq!(snapshot.retries, 3);

    // exhausted batches are not retried again
    let outcome = h.service.processor().process_batch(&batch_id).await;
    assert_eq!(outcome, BatchOutcome::Exhausted);
    assert_eq!(h.storage.store_calls(), 4);

    h.service.stop().await.expect("stop");
}

/// A batch stored downstream but not marked locally is confirmed without a second store.
#[tokio::test]
async fn test_already_stored_batch_is_confirmed() {
    let mut h = harness(config(), None);
    h.service.start().await.expect("start");

    let batch = LogBatch::new("A1".into(), "E1".into(), vec![json(r#"{"a":1}"#)]);
    h.batches.put(batch.clone());
    h.storage.mark_stored(batch.id.clone());

    let outcome = h.service.processor().process_batch(&batch.id).await;
    assert_eq!(outcome, BatchOutcome::AlreadyStored);
    assert_eq!(h.storage.store_calls(), 0);

    let stored = h.service.batch(&batch.id).await.expect("lookup").expect("batch");
    assert_eq!(stored.status, BatchStatus::Processed);
    assert!(stored.confirmed);

    h.service.stop().await.expect("stop");
}

/// Signed requests are accepted exactly at the window edge and rejected one ms past it.
#[tokio::test]
async fn test_timestamp_window_edges() {
    let h = harness(config(), None);
    let now = Utc::now();
    let gateway = h.service.auth();

    for (offset_ms, accepted) in [
        (300_000, true),
        (-300_000, true),
        (300_001, false),
        (-300_001, false),
    ] {
        let timestamp = (now + ChronoDuration::milliseconds(offset_ms))
            .timestamp_millis()
            .to_string();
        let body = r#"{"a":1}"#;
        let signature = sign("sk-a1", "ak-a1", &timestamp, body);
        let request = AuthRequest::hmac("ak-a1", signature, timestamp, body);

        let result = gateway.authenticate_at(&request, now).await.expect("lookup");
        assert_eq!(result.is_success(), accepted, "offset {offset_ms}ms");
    }
}

/// Tampered bodies fail signature validation.
#[tokio::test]
async fn test_tampered_body_rejected() {
    let h = harness(config(), None);
    let timestamp = Utc::now().timestamp_millis().to_string();
    let signature = sign("sk-a1", "ak-a1", &timestamp, "original");
    let request = AuthRequest::hmac("ak-a1", signature, timestamp, "tampered");

    let result = h.service.authenticate(&request).await.expect("lookup");
    assert!(!result.is_success());
}

/// Endpoint and app changes take effect on the next submission.
#[tokio::test]
async fn test_endpoint_and_app_updates() {
    let mut h = harness(config(), None);
    h.service.start().await.expect("start");

    h.endpoints
        .insert(ReceiverEndpoint::new("E1", LogFormat::Json).with_allowed_apps(["other"]));
    let result = h.service.receive_log("A1", "E1", json("{}")).await;
    assert_eq!(result.message, "app not allowed for endpoint");

    h.endpoints.insert(ReceiverEndpoint::new("E1", LogFormat::Json));
    let mut blocked = AppAccess::new("A1", "ak-a1", "sk-a1");
    blocked.block();
    h.apps.insert(blocked);
    let result = h.service.receive_log("A1", "E1", json("{}")).await;
    assert!(!result.success);

    h.service.stop().await.expect("stop");
}

/// Buffered logs survive a stop: they are flushed and processed before it returns.
#[tokio::test]
async fn test_stop_drains_buffers() {
    let mut h = harness(config(), None);
    h.service.start().await.expect("start");

    h.service.receive_log("A1", "E1", json(r#"{"a":1}"#)).await;
    h.service.receive_log("A1", "E1", json(r#"{"a":2}"#)).await;
    assert_eq!(h.service.buffer().buffered_count(), 2);

    h.service.stop().await.expect("stop");
    let batches = h.batches.all();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].status, BatchStatus::Processed);
    assert_eq!(h.storage.stored_batch_count(), 1);
}
