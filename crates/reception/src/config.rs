//! Reception pipeline configuration.
//!
//! [`ReceptionConfig`] is derived from the core
//! [`IntakeConfig`](intake_core::config::IntakeConfig) sections and adds the
//! range checks that only the reception pipeline cares about.
//!
//! # Example
//! ```ignore
//! use intake_core::config::IntakeConfig;
//! use intake_reception::config::ReceptionConfig;
//!
//! let core_config = IntakeConfig::default();
//! let config = ReceptionConfig::from_core(&core_config);
//! config.validate()?;
//! ```

use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use intake_core::config::IntakeConfig;

use crate::cleanup::CleanupPolicy;
use crate::error::ReceptionError;
use crate::processor::RetryPolicy;

const MAX_BUFFER_THRESHOLD: usize = 100_000;
const MAX_RETRY_COUNT: u32 = 10;
const MAX_WORKER_THREADS: usize = 1024;

/// Runtime settings of the reception pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceptionConfig {
    /// Logs per buffer that trigger a flush
    pub buffer_threshold: usize,
    /// Buffer age that triggers a flush on the next add (ms)
    pub max_buffer_time_ms: u64,
    /// Cadence of the unconditional flush (ms)
    pub flush_interval_ms: u64,
    /// Retries after the first processing attempt
    pub max_retry_count: u32,
    /// Wait before the first retry, doubled per retry (ms)
    pub retry_interval_ms: u64,
    /// Concurrent batch processing tasks, 0 = number of CPUs
    pub worker_threads: usize,
    /// Accepted clock skew of signed requests (ms)
    pub timestamp_validity_ms: u64,
    /// Authorization decision cache TTL (s)
    pub auth_cache_ttl_secs: u64,
    /// Rate limiter refill cadence (ms)
    pub refill_interval_ms: u64,
    pub cleanup_enabled: bool,
    pub processed_retention_hours: u64,
    pub failed_retention_hours: u64,
    pub processing_timeout_minutes: u64,
    pub cleanup_initial_delay_minutes: u64,
    pub cleanup_interval_minutes: u64,
}

impl Default for ReceptionConfig {
    fn default() -> Self {
        Self {
            buffer_threshold: 100,
            max_buffer_time_ms: 5000,
            flush_interval_ms: 1000,
            max_retry_count: 3,
            retry_interval_ms: 1000,
            worker_threads: 0,
            timestamp_validity_ms: 300_000,
            auth_cache_ttl_secs: 60,
            refill_interval_ms: 100,
            cleanup_enabled: true,
            processed_retention_hours: 24,
            failed_retention_hours: 72,
            processing_timeout_minutes: 30,
            cleanup_initial_delay_minutes: 5,
            cleanup_interval_minutes: 60,
        }
    }
}

impl ReceptionConfig {
    pub fn from_core(core: &IntakeConfig) -> Self {
        Self {
            buffer_threshold: core.buffer.threshold,
            max_buffer_time_ms: core.buffer.max_buffer_time_ms,
            flush_interval_ms: core.buffer.flush_interval_ms,
            max_retry_count: core.processing.max_retry_count,
            retry_interval_ms: core.processing.retry_interval_ms,
            worker_threads: core.processing.worker_threads,
            timestamp_validity_ms: core.auth.timestamp_validity_ms,
            auth_cache_ttl_secs: core.auth.cache_ttl_secs,
            refill_interval_ms: core.rate_limit.refill_interval_ms,
            cleanup_enabled: core.cleanup.enabled,
            processed_retention_hours: core.cleanup.processed_retention_hours,
            failed_retention_hours: core.cleanup.failed_retention_hours,
            processing_timeout_minutes: core.cleanup.processing_timeout_minutes,
            cleanup_initial_delay_minutes: core.cleanup.initial_delay_minutes,
            cleanup_interval_minutes: core.cleanup.interval_minutes,
        }
    }

    pub fn validate(&self) -> Result<(), ReceptionError> {
        if self.buffer_threshold == 0 || self.buffer_threshold > MAX_BUFFER_THRESHOLD {
            return Err(invalid("buffer_threshold", format!("must be 1-{}", MAX_BUFFER_THRESHOLD)));
        }
        if self.max_retry_count > MAX_RETRY_COUNT {
            return Err(invalid("max_retry_count", format!("must be 0-{}", MAX_RETRY_COUNT)));
        }
        if self.worker_threads > MAX_WORKER_THREADS {
            return Err(invalid("worker_threads", format!("must be 0-{}", MAX_WORKER_THREADS)));
        }

        let positive = [
            ("max_buffer_time_ms", self.max_buffer_time_ms),
            ("flush_interval_ms", self.flush_interval_ms),
            ("retry_interval_ms", self.retry_interval_ms),
            ("timestamp_validity_ms", self.timestamp_validity_ms),
            ("auth_cache_ttl_secs", self.auth_cache_ttl_secs),
            ("refill_interval_ms", self.refill_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.cleanup_enabled {
            let cleanup = [
                ("processed_retention_hours", self.processed_retention_hours),
                ("failed_retention_hours", self.failed_retention_hours),
                ("processing_timeout_minutes", self.processing_timeout_minutes),
                ("cleanup_interval_minutes", self.cleanup_interval_minutes),
            ];
            for (field, value) in cleanup {
                if value == 0 {
                    return Err(invalid(field, "must be greater than 0 when cleanup is enabled"));
                }
            }
        }

        Ok(())
    }

    pub fn max_buffer_time(&self) -> Duration {
        Duration::from_millis(self.max_buffer_time_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    pub fn auth_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_cache_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retry_count: self.max_retry_count,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }

    /// Worker pool size with 0 resolved to the available parallelism.
    pub fn workers(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        CleanupPolicy {
            processed_retention: Duration::from_secs(self.processed_retention_hours * 3600),
            failed_retention: Duration::from_secs(self.failed_retention_hours * 3600),
            processing_timeout: Duration::from_secs(self.processing_timeout_minutes * 60),
        }
    }

    pub fn cleanup_initial_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_initial_delay_minutes * 60)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ReceptionError {
    ReceptionError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// Fluent construction of a validated [`ReceptionConfig`].
#[derive(Debug, Default)]
pub struct ReceptionConfigBuilder {
    config: ReceptionConfig,
}

impl ReceptionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer_threshold(mut self, threshold: usize) -> Self {
        self.config.buffer_threshold = threshold;
        self
    }

    pub fn max_buffer_time(mut self, max: Duration) -> Self {
        self.config.max_buffer_time_ms = max.as_millis() as u64;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.config.max_retry_count = count;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.config.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn worker_threads(mut self, workers: usize) -> Self {
        self.config.worker_threads = workers;
        self
    }

    pub fn timestamp_validity_ms(mut self, validity_ms: u64) -> Self {
        self.config.timestamp_validity_ms = validity_ms;
        self
    }

    pub fn auth_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.auth_cache_ttl_secs = ttl.as_secs();
        self
    }

    pub fn refill_interval(mut self, interval: Duration) -> Self {
        self.config.refill_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn cleanup_enabled(mut self, enabled: bool) -> Self {
        self.config.cleanup_enabled = enabled;
        self
    }

    /// Validates and returns the config.
    pub fn build(self) -> Result<ReceptionConfig, ReceptionError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
