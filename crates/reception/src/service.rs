//! Service facade -- wires admission, buffering, processing and the scheduler.
//!
//! [`ReceptionService`] implements the core [`Pipeline`] trait so the daemon
//! manages it with the same start/stop/health lifecycle as any other
//! component.
//!
//! # Shutdown
//! ```text
//! stop() ──> flush_all ──> scheduler.stop ──> flush_all ──> processor.shutdown
//! ```
//!
//! Buffered logs become batches before anything stops; queued batches get one
//! more attempt; retry waits are interrupted.

use std::sync::Arc;

use intake_core::error::{IntakeError, PipelineError};
use intake_core::pipeline::{HealthStatus, Pipeline};

use crate::admission::{
    AdmissionChain, AdmissionDeps, AuthorizationRequest, AuthorizationResult, ReceptionResult,
};
use crate::auth::{AuthGateway, AuthRequest, AuthResult};
use crate::buffer::LogBufferManager;
use crate::cleanup::{BatchCleaner, CleanupReport};
use crate::config::ReceptionConfig;
use crate::error::ReceptionError;
use crate::metrics::ProcessingMetrics;
use crate::model::{AppId, BatchId, EndpointId, LogBatch, RawLog};
use crate::ports::{
    AppAccessRepository, BatchReadyHandler, BatchRepository, EndpointRepository,
    FailureNotifier, PreprocessGateway, StorageGateway,
};
use crate::processor::BatchProcessor;
use crate::ratelimit::RateLimiter;
use crate::scheduler::Scheduler;

/// Health degrades once buffered logs exceed this multiple of the threshold.
const DEGRADED_BUFFER_FACTOR: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Initialized,
    Running,
    Stopped,
}

/// The reception pipeline over a set of ports.
pub struct ReceptionService<A, E, B, P, S> {
    config: ReceptionConfig,
    state: ServiceState,
    admission: AdmissionChain<A, E, B>,
    processor: BatchProcessor<B, P, S>,
    cleaner: Arc<BatchCleaner<B>>,
    scheduler: Option<Scheduler>,
}

impl<A, E, B, P, S> ReceptionService<A, E, B, P, S>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
    P: PreprocessGateway,
    S: StorageGateway,
{
    pub fn state_name(&self) -> &'static str {
        match self.state {
            ServiceState::Initialized => "initialized",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == ServiceState::Running
    }

    pub fn config(&self) -> &ReceptionConfig {
        &self.config
    }

    /// Admits one log into its (app, endpoint) buffer.
    pub async fn receive_log(
        &self,
        app_id: impl Into<AppId>,
        endpoint_id: impl Into<EndpointId>,
        log: RawLog,
    ) -> ReceptionResult {
        if !self.is_running() {
            return not_running();
        }
        self.admission.receive_log(app_id, endpoint_id, log).await
    }

    /// Admits a list of logs as one batch.
    pub async fn receive_logs(
        &self,
        app_id: impl Into<AppId>,
        endpoint_id: impl Into<EndpointId>,
        logs: Vec<RawLog>,
    ) -> ReceptionResult {
        if !self.is_running() {
            return not_running();
        }
        self.admission.receive_logs(app_id, endpoint_id, logs).await
    }

    /// Verifies a signed request.
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, ReceptionError> {
        self.auth().authenticate(request).await
    }

    pub async fn authorize_access(&self, request: &AuthorizationRequest) -> AuthorizationResult {
        self.admission.authorize_access(request).await
    }

    /// Current persisted state of a batch.
    pub async fn batch(&self, batch_id: &BatchId) -> Result<Option<LogBatch>, ReceptionError> {
        self.admission.deps().batches.find_by_id(batch_id).await
    }

    /// Runs one cleanup pass outside the schedule.
    pub async fn run_cleanup(&self) -> CleanupReport {
        self.cleaner.run_once().await
    }

    /// Waits until buffered flushes and scheduled batches have settled.
    pub async fn wait_idle(&self) {
        self.buffer().wait_for_flushes().await;
        self.processor.wait_idle().await;
    }

    pub fn auth(&self) -> &Arc<AuthGateway<A>> {
        &self.admission.deps().auth
    }

    pub fn buffer(&self) -> &Arc<LogBufferManager<B>> {
        &self.admission.deps().buffer
    }

    pub fn metrics(&self) -> &Arc<ProcessingMetrics> {
        &self.admission.deps().metrics
    }

    pub fn processor(&self) -> &BatchProcessor<B, P, S> {
        &self.processor
    }

    fn schedule_jobs(&self) -> Scheduler {
        let mut scheduler = Scheduler::new();

        let buffer = Arc::clone(self.buffer());
        let flush_interval = self.config.flush_interval();
        scheduler.every("buffer_flush", flush_interval, flush_interval, move || {
            let buffer = Arc::clone(&buffer);
            async move {
                buffer.flush_all().await;
            }
        });

        let limiter = Arc::clone(self.auth().limiter());
        scheduler.every(
            "rate_limit_refill",
            self.config.refill_interval(),
            self.config.refill_interval(),
            move || {
                limiter.refill_all();
                std::future::ready(())
            },
        );

        let auth = Arc::clone(self.auth());
        scheduler.every(
            "auth_cache_eviction",
            self.config.auth_cache_ttl(),
            self.config.auth_cache_ttl(),
            move || {
                auth.evict_expired();
                std::future::ready(())
            },
        );

        if self.config.cleanup_enabled {
            let cleaner = Arc::clone(&self.cleaner);
            scheduler.every(
                "batch_cleanup",
                self.config.cleanup_initial_delay(),
                self.config.cleanup_interval(),
                move || {
                    let cleaner = Arc::clone(&cleaner);
                    async move {
                        cleaner.run_once().await;
                    }
                },
            );
        }

        scheduler
    }
}

fn not_running() -> ReceptionResult {
    ReceptionResult::failure("service not running")
}

impl<A, E, B, P, S> Pipeline for ReceptionService<A, E, B, P, S>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
    P: PreprocessGateway,
    S: StorageGateway,
{
    async fn start(&mut self) -> Result<(), IntakeError> {
        match self.state {
            ServiceState::Running => return Err(PipelineError::AlreadyRunning.into()),
            ServiceState::Stopped => {
                return Err(PipelineError::InitFailed("a stopped service cannot be restarted".to_owned()).into());
            }
            ServiceState::Initialized => {}
        }

        tracing::info!("starting reception service");
        let scheduler = self.schedule_jobs();
        tracing::info!(
            jobs = ?scheduler.job_names(),
            workers = self.config.workers(),
            buffer_threshold = self.config.buffer_threshold,
            "reception service started"
        );
        self.scheduler = Some(scheduler);
        self.state = ServiceState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), IntakeError> {
        if self.state != ServiceState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        tracing::info!("stopping reception service");
        self.state = ServiceState::Stopped;

        let flushed = self.buffer().flush_all().await;
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
        let late = self.buffer().flush_all().await;
        tracing::info!(batches = flushed + late, "buffers flushed");

        let in_flight = self.processor.in_flight();
        if in_flight > 0 {
            tracing::info!(in_flight, "draining batch processing");
        }
        self.processor.shutdown().await;

        tracing::info!("reception service stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            ServiceState::Running => {
                let buffered = self.buffer().buffered_count();
                let limit = self.buffer().threshold().saturating_mul(DEGRADED_BUFFER_FACTOR);
                if buffered > limit {
                    HealthStatus::Degraded(format!("buffered logs high: {} > {}", buffered, limit))
                } else {
                    HealthStatus::Healthy
                }
            }
            ServiceState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            ServiceState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// Builds a [`ReceptionService`] from its ports.
pub struct ReceptionServiceBuilder<A, E, B, P, S> {
    config: ReceptionConfig,
    apps: Arc<A>,
    endpoints: Arc<E>,
    batches: Arc<B>,
    preprocessor: Arc<P>,
    storage: Arc<S>,
    notifier: Option<Arc<dyn FailureNotifier>>,
    metrics: Option<Arc<ProcessingMetrics>>,
}

impl<A, E, B, P, S> ReceptionServiceBuilder<A, E, B, P, S>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
    P: PreprocessGateway,
    S: StorageGateway,
{
    pub fn new(
        apps: Arc<A>,
        endpoints: Arc<E>,
        batches: Arc<B>,
        preprocessor: Arc<P>,
        storage: Arc<S>,
    ) -> Self {
        Self {
            config: ReceptionConfig::default(),
            apps,
            endpoints,
            batches,
            preprocessor,
            storage,
            notifier: None,
            metrics: None,
        }
    }

    pub fn config(mut self, config: ReceptionConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default log-only failure notifier.
    pub fn notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Shares an existing metrics recorder.
    pub fn metrics(mut self, metrics: Arc<ProcessingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the config and wires every component.
    pub fn build(self) -> Result<ReceptionService<A, E, B, P, S>, ReceptionError> {
        self.config.validate()?;
        let config = self.config;
        let metrics = self.metrics.unwrap_or_default();

        let mut processor = BatchProcessor::new(
            Arc::clone(&self.batches),
            self.preprocessor,
            self.storage,
            Arc::clone(&metrics),
            config.retry_policy(),
            config.workers(),
        );
        if let Some(notifier) = self.notifier {
            processor = processor.with_notifier(notifier);
        }
        let on_batch_ready: Arc<dyn BatchReadyHandler> = Arc::new(processor.clone());

        let auth = Arc::new(AuthGateway::new(
            Arc::clone(&self.apps),
            Arc::new(RateLimiter::new()),
            config.timestamp_validity_ms,
            config.auth_cache_ttl(),
        ));
        let buffer = Arc::new(LogBufferManager::new(
            Arc::clone(&self.batches),
            Arc::clone(&on_batch_ready),
            config.buffer_threshold,
            config.max_buffer_time(),
        ));
        let cleaner = Arc::new(BatchCleaner::new(
            Arc::clone(&self.batches),
            config.cleanup_policy(),
        ));
        let admission = AdmissionChain::new(AdmissionDeps {
            auth,
            apps: self.apps,
            endpoints: self.endpoints,
            batches: self.batches,
            buffer,
            on_batch_ready,
            metrics,
        });

        Ok(ReceptionService {
            config,
            state: ServiceState::Initialized,
            admission,
            processor,
            cleaner,
            scheduler: None,
        })
    }
}
