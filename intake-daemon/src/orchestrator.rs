//! Daemon assembly and lifecycle.
//!
//! The [`Orchestrator`] loads configuration, installs the metrics exporter,
//! builds the reception pipeline over the in-memory adapters and runs it until
//! a shutdown signal arrives.
//!
//! # Shutdown
//!
//! 1. stop background tasks (uptime updater)
//! 2. stop the reception service: buffers are flushed and queued batches
//!    processed before it returns

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use intake_core::config::IntakeConfig;
use intake_core::pipeline::Pipeline;
use intake_reception::memory::{
    MemoryAppRepository, MemoryBatchRepository, MemoryEndpointRepository, MemoryStorage,
};
use intake_reception::{
    ReceptionConfig, ReceptionService, ReceptionServiceBuilder, StructuredPreprocessor,
};

use crate::health::{ComponentHealth, DaemonHealth, aggregate_status};
use crate::metrics_server;

/// Interval of the uptime gauge update.
const UPTIME_UPDATE_INTERVAL_SECS: u64 = 10;

/// The reception service over in-memory adapters.
pub type MemoryReceptionService = ReceptionService<
    MemoryAppRepository,
    MemoryEndpointRepository,
    MemoryBatchRepository,
    StructuredPreprocessor,
    MemoryStorage,
>;

/// Owns the configuration, the adapters and the reception service.
pub struct Orchestrator {
    config: IntakeConfig,
    service: MemoryReceptionService,
    apps: Arc<MemoryAppRepository>,
    endpoints: Arc<MemoryEndpointRepository>,
    batches: Arc<MemoryBatchRepository>,
    storage: Arc<MemoryStorage>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
}

impl Orchestrator {
    /// Loads `intake.toml` (with environment overrides) and builds the daemon.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = IntakeConfig::load(config_path)
            .await
            .with_context(|| format!("failed to load config from {}", config_path.display()))?;
        Self::build_from_config(config)
    }

    /// Builds from an already-loaded configuration.
    ///
    /// Installs the global metrics recorder when `[metrics] enabled = true`.
    pub fn build_from_config(config: IntakeConfig) -> Result<Self> {
        config.validate().context("config validation failed")?;
        let reception_config = ReceptionConfig::from_core(&config);
        reception_config
            .validate()
            .context("reception config validation failed")?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let apps = Arc::new(MemoryAppRepository::new());
        let endpoints = Arc::new(MemoryEndpointRepository::new());
        let batches = Arc::new(MemoryBatchRepository::new());
        let storage = Arc::new(MemoryStorage::new());

        let preprocessor =
            StructuredPreprocessor::new().context("failed to build preprocessor")?;

        let service = ReceptionServiceBuilder::new(
            Arc::clone(&apps),
            Arc::clone(&endpoints),
            Arc::clone(&batches),
            Arc::new(preprocessor),
            Arc::clone(&storage),
        )
        .config(reception_config)
        .build()
        .context("failed to build reception service")?;

        let (shutdown_tx, _) = broadcast::channel(4);
        tracing::info!(
            workers = service.config().workers(),
            cleanup = service.config().cleanup_enabled,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            service,
            apps,
            endpoints,
            batches,
            storage,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Runs until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(async {
            match wait_for_shutdown_signal().await {
                Ok(signal) => tracing::info!(signal, "shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "signal handler failed, shutting down"),
            }
        })
        .await
    }

    /// Starts the service, waits for `shutdown`, then stops everything.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.service
            .start()
            .await
            .context("failed to start reception service")?;

        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        tracing::info!("intake-daemon running");
        shutdown.await;

        let _ = self.shutdown_tx.send(());
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        self.service
            .stop()
            .await
            .context("failed to stop reception service")?;
        tracing::info!("intake-daemon shut down");
        Ok(())
    }

    pub async fn health(&self) -> DaemonHealth {
        let components = vec![ComponentHealth::new(
            "reception",
            self.service.health_check().await,
        )];
        DaemonHealth {
            status: aggregate_status(&components),
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
        }
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    pub fn service(&self) -> &MemoryReceptionService {
        &self.service
    }

    /// App registry served to the admission chain.
    pub fn apps(&self) -> &Arc<MemoryAppRepository> {
        &self.apps
    }

    /// Endpoint registry served to the admission chain.
    pub fn endpoints(&self) -> &Arc<MemoryEndpointRepository> {
        &self.endpoints
    }

    pub fn batches(&self) -> &Arc<MemoryBatchRepository> {
        &self.batches
    }

    pub fn storage(&self) -> &Arc<MemoryStorage> {
        &self.storage
    }
}

/// Waits for SIGTERM or SIGINT and returns the signal name.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl-C handler")?;
    Ok("CTRL_C")
}

fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use intake_core::metrics as m;

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(UPTIME_UPDATE_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    })
}
