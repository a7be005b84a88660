//! Error types shared by every intake crate.

/// Top-level intake error.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// Configuration could not be loaded or is invalid.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline lifecycle or wiring failure.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Downstream storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file does not exist.
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// TOML could not be parsed.
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A value is out of range or malformed.
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Pipeline lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Pipeline could not be built.
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// `start()` called on a running pipeline.
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// `stop()` called on a pipeline that is not running.
    #[error("pipeline is not running")]
    NotRunning,
}

/// Downstream storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Storage backend could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Storage backend refused the write.
    #[error("storage rejected write: {0}")]
    Rejected(String),
}
