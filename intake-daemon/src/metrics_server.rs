//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener of `metrics-exporter-prometheus`. Once
//! installed, every `metrics::counter!()` / `gauge!()` / `histogram!()` call
//! in the reception pipeline is exported.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use intake_core::config::MetricsConfig;
use intake_core::metrics as m;

/// Parses `listen_addr:port` and rejects endpoints the listener cannot serve.
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is currently supported",
            config.endpoint
        ));
    }

    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .with_context(|| format!("invalid metrics listen address '{}'", config.listen_addr))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process.
///
/// # Errors
///
/// - Invalid address or endpoint
/// - Socket binding fails
/// - Global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::BATCH_PROCESSING_DURATION_SECONDS.to_owned()),
            m::PROCESSING_DURATION_BUCKETS,
        )
        .context("invalid histogram buckets")?
        .install()
        .context("failed to install metrics recorder")?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}
