#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;

// --- re-exports ---

pub use config::IntakeConfig;
pub use error::{ConfigError, IntakeError, PipelineError, StorageError};
pub use pipeline::{HealthStatus, Pipeline};
