//! Admission path benchmarks
//!
//! Measures the token bucket, HMAC signing, preprocessing and the full
//! single/batch admission chains over the in-memory adapters.

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use intake_reception::auth::{sign, verify};
use intake_reception::memory::{
    MemoryAppRepository, MemoryBatchRepository, MemoryEndpointRepository, MemoryStorage,
};
use intake_reception::model::{AppEndpointKey, AppId, EndpointId};
use intake_reception::{
    AppAccess, LogBatch, LogFormat, RateLimiter, RawLog, ReceiverEndpoint, ReceptionConfig,
    ReceptionServiceBuilder, StructuredPreprocessor,
};
use intake_core::pipeline::Pipeline;

const JSON_SHORT: &str = r#"{"timestamp":"2024-01-15T12:00:00Z","level":"info","message":"request processed"}"#;

const JSON_NESTED: &str = r#"{"timestamp":"2024-01-15T12:00:00.123Z","level":"warn","http":{"method":"POST","path":"/api/v1/users","status":403},"client":{"ip":"203.0.113.45","agent":"curl/8.0"},"duration_ms":245}"#;

const TEXT_KV: &str = r#"ts=1705320000 level=error user="admin" action=login result=denied"#;

fn bench_rate_limiter(c: &mut Criterion) {
    let limiter = RateLimiter::new();
    let key = AppEndpointKey::new(AppId::from("app"), EndpointId::from("ep"));
    limiter.create_or_update(key.clone(), u32::MAX / 2, u32::MAX / 2);

    let mut group = c.benchmark_group("rate_limiter");
    group.throughput(Throughput::Elements(1));
    group.bench_function("try_acquire", |b| {
        b.iter(|| limiter.try_acquire(black_box(&key), 1))
    });

    for keys in [10usize, 1000] {
        let limiter = RateLimiter::new();
        for i in 0..keys {
            let key = AppEndpointKey::new(AppId::new(format!("app-{i}")), EndpointId::from("ep"));
            limiter.create_or_update(key, 100, 200);
        }
        group.bench_with_input(BenchmarkId::new("refill_all", keys), &limiter, |b, limiter| {
            b.iter(|| limiter.refill_all())
        });
    }
    group.finish();
}

fn bench_signature(c: &mut Criterion) {
    let timestamp = "1705320000000";
    let signature = sign("secret", "access", timestamp, JSON_NESTED);

    let mut group = c.benchmark_group("hmac");
    group.bench_function("sign", |b| {
        b.iter(|| sign(black_box("secret"), "access", timestamp, black_box(JSON_NESTED)))
    });
    group.bench_function("verify", |b| {
        b.iter(|| verify(black_box(&signature), "secret", "access", timestamp, JSON_NESTED))
    });
    group.finish();
}

fn bench_preprocess(c: &mut Criterion) {
    let preprocessor = StructuredPreprocessor::new().unwrap();
    let batch = LogBatch::new(AppId::from("app"), EndpointId::from("ep"), Vec::new());

    let mut group = c.benchmark_group("preprocess");
    group.throughput(Throughput::Elements(1));
    for (name, content, format) in [
        ("json_short", JSON_SHORT, LogFormat::Json),
        ("json_nested", JSON_NESTED, LogFormat::Json),
        ("text_kv", TEXT_KV, LogFormat::Text),
    ] {
        let raw = RawLog::new(content, format);
        group.bench_function(name, |b| {
            b.iter(|| preprocessor.preprocess_log(black_box(&raw), &batch))
        });
    }
    group.finish();
}

fn bench_admission(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let apps = Arc::new(MemoryAppRepository::new());
    apps.insert(
        AppAccess::new("app", "ak", "sk")
            .with_rate_limit(u32::MAX / 2, u32::MAX / 2)
            .unwrap(),
    );
    let endpoints = Arc::new(MemoryEndpointRepository::new());
    endpoints.insert(ReceiverEndpoint::new("ep", LogFormat::Json));
    let config = ReceptionConfig {
        buffer_threshold: 1000,
        cleanup_enabled: false,
        ..Default::default()
    };
    let mut service = ReceptionServiceBuilder::new(
        apps,
        endpoints,
        Arc::new(MemoryBatchRepository::new()),
        Arc::new(StructuredPreprocessor::new().unwrap()),
        Arc::new(MemoryStorage::new()),
    )
    .config(config)
    .build()
    .unwrap();
    runtime.block_on(service.start()).unwrap();

    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1));
    group.bench_function("receive_log", |b| {
        b.iter(|| {
            runtime.block_on(service.receive_log("app", "ep", RawLog::new(JSON_SHORT, LogFormat::Json)))
        })
    });

    for size in [10usize, 100] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("receive_logs", size), &size, |b, &size| {
            b.iter(|| {
                let logs = (0..size)
                    .map(|_| RawLog::new(JSON_SHORT, LogFormat::Json))
                    .collect();
                runtime.block_on(service.receive_logs("app", "ep", logs))
            })
        });
    }
    group.finish();

    runtime.block_on(service.stop()).unwrap();
}

criterion_group!(
    benches,
    bench_rate_limiter,
    bench_signature,
    bench_preprocess,
    bench_admission
);
criterion_main!(benches);
