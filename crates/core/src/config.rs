//! Configuration management -- `intake.toml` parsing and runtime settings.
//!
//! [`IntakeConfig`] is the top-level structure holding every section.
//!
//! # Loading precedence
//! 1. CLI arguments (highest)
//! 2. Environment variables (`INTAKE_BUFFER_THRESHOLD=200` style)
//! 3. Config file (`intake.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), intake_core::error::IntakeError> {
//! use intake_core::config::IntakeConfig;
//!
//! // file + environment overrides
//! let config = IntakeConfig::load("intake.toml").await?;
//!
//! // straight from a TOML string
//! let config = IntakeConfig::parse("[buffer]\nthreshold = 50")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, IntakeError};

/// Unified intake configuration.
///
/// Mirrors the top level of `intake.toml`. Each component reads only its own section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

impl IntakeConfig {
    /// Loads a TOML file, applies environment overrides and validates the result.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IntakeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                IntakeError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, IntakeError> {
        toml::from_str(toml_str).map_err(|e| {
            IntakeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Overrides values from environment variables.
    ///
    /// Naming: `INTAKE_{SECTION}_{FIELD}`, e.g. `INTAKE_PROCESSING_MAX_RETRY_COUNT=5`.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "INTAKE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "INTAKE_GENERAL_LOG_FORMAT");

        // Metrics
        override_bool(&mut self.metrics.enabled, "INTAKE_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "INTAKE_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "INTAKE_METRICS_PORT");

        // Buffer
        override_usize(&mut self.buffer.threshold, "INTAKE_BUFFER_THRESHOLD");
        override_u64(
            &mut self.buffer.max_buffer_time_ms,
            "INTAKE_BUFFER_MAX_BUFFER_TIME_MS",
        );
        override_u64(
            &mut self.buffer.flush_interval_ms,
            "INTAKE_BUFFER_FLUSH_INTERVAL_MS",
        );

        // Processing
        override_u32(
            &mut self.processing.max_retry_count,
            "INTAKE_PROCESSING_MAX_RETRY_COUNT",
        );
        override_u64(
            &mut self.processing.retry_interval_ms,
            "INTAKE_PROCESSING_RETRY_INTERVAL_MS",
        );
        override_usize(
            &mut self.processing.worker_threads,
            "INTAKE_PROCESSING_WORKER_THREADS",
        );

        // Auth
        override_u64(
            &mut self.auth.timestamp_validity_ms,
            "INTAKE_AUTH_TIMESTAMP_VALIDITY_MS",
        );
        override_u64(&mut self.auth.cache_ttl_secs, "INTAKE_AUTH_CACHE_TTL_SECS");

        // Rate limit
        override_u64(
            &mut self.rate_limit.refill_interval_ms,
            "INTAKE_RATE_LIMIT_REFILL_INTERVAL_MS",
        );

        // Cleanup
        override_bool(&mut self.cleanup.enabled, "INTAKE_CLEANUP_ENABLED");
        override_u64(
            &mut self.cleanup.processed_retention_hours,
            "INTAKE_CLEANUP_PROCESSED_RETENTION_HOURS",
        );
        override_u64(
            &mut self.cleanup.failed_retention_hours,
            "INTAKE_CLEANUP_FAILED_RETENTION_HOURS",
        );
        override_u64(
            &mut self.cleanup.processing_timeout_minutes,
            "INTAKE_CLEANUP_PROCESSING_TIMEOUT_MINUTES",
        );
        override_u64(
            &mut self.cleanup.interval_minutes,
            "INTAKE_CLEANUP_INTERVAL_MINUTES",
        );
    }

    /// Validates values that every component depends on.
    ///
    /// Range limits specific to the reception pipeline are checked by the pipeline's own config.
    pub fn validate(&self) -> Result<(), IntakeError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.metrics.enabled && !self.metrics.endpoint.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "metrics.endpoint".to_owned(),
                reason: "must start with '/'".to_owned(),
            }
            .into());
        }

        let positive = [
            ("buffer.threshold", self.buffer.threshold as u64),
            ("buffer.max_buffer_time_ms", self.buffer.max_buffer_time_ms),
            ("buffer.flush_interval_ms", self.buffer.flush_interval_ms),
            ("processing.retry_interval_ms", self.processing.retry_interval_ms),
            ("auth.timestamp_validity_ms", self.auth.timestamp_validity_ms),
            ("auth.cache_ttl_secs", self.auth.cache_ttl_secs),
            ("rate_limit.refill_interval_ms", self.rate_limit.refill_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_owned(),
                    reason: "must be greater than 0".to_owned(),
                }
                .into());
            }
        }

        if self.cleanup.enabled && self.cleanup.interval_minutes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cleanup.interval_minutes".to_owned(),
                reason: "must be greater than 0 when cleanup is enabled".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn, error
    pub log_level: String,
    /// json, pretty
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// Single-log buffering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Buffered logs per (app, endpoint) that trigger a flush
    pub threshold: usize,
    /// Maximum age of a buffer before the next add flushes it (ms)
    pub max_buffer_time_ms: u64,
    /// Periodic flush cadence (ms)
    pub flush_interval_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            max_buffer_time_ms: 5_000,
            flush_interval_ms: 1_000,
        }
    }
}

/// Batch processing and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub max_retry_count: u32,
    /// Base backoff, doubled after every failed attempt (ms)
    pub retry_interval_ms: u64,
    /// Concurrent batch workers, 0 means one per CPU
    pub worker_threads: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            retry_interval_ms: 1_000,
            worker_threads: 0,
        }
    }
}

/// Request authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted clock skew for signed requests (ms)
    pub timestamp_validity_ms: u64,
    /// Authorization decision cache TTL (s)
    pub cache_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            timestamp_validity_ms: 300_000,
            cache_ttl_secs: 60,
        }
    }
}

/// Token bucket refill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub refill_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            refill_interval_ms: 100,
        }
    }
}

/// Batch retention and stuck-batch detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub processed_retention_hours: u64,
    pub failed_retention_hours: u64,
    pub processing_timeout_minutes: u64,
    pub initial_delay_minutes: u64,
    pub interval_minutes: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            processed_retention_hours: 24,
            failed_retention_hours: 72,
            processing_timeout_minutes: 30,
            initial_delay_minutes: 5,
            interval_minutes: 60,
        }
    }
}

// --- environment override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}
