//! Reception pipeline error types.
//!
//! [`ReceptionError`] covers failures of the ports the pipeline talks to
//! (repositories, gateways) and of its own configuration. Admission rejections
//! are *not* errors: they are returned as [`ReceptionResult`](crate::admission::ReceptionResult)
//! values. `From<ReceptionError> for IntakeError` lets upper layers propagate with `?`.

use intake_core::error::{IntakeError, PipelineError, StorageError};

/// Reception pipeline domain error.
#[derive(Debug, thiserror::Error)]
pub enum ReceptionError {
    /// Invalid pipeline configuration
    #[error("config error: {field}: {reason}")]
    Config {
        /// offending field
        field: String,
        /// why it was rejected
        reason: String,
    },

    /// Repository call failed
    #[error("repository error: {operation}: {reason}")]
    Repository {
        /// repository operation (save, find_by_id, update_status, ...)
        operation: String,
        /// failure reason
        reason: String,
    },

    /// Preprocess or storage gateway call failed
    #[error("gateway error: {gateway}: {reason}")]
    Gateway {
        /// gateway name (preprocess, storage)
        gateway: String,
        /// failure reason
        reason: String,
    },

    /// Batch id not present in the repository
    #[error("batch not found: {0}")]
    BatchNotFound(String),

    /// Storage reported a non-success result
    #[error("storage rejected batch: {0}")]
    Storage(String),

    /// Domain rule violated (e.g. blocked app activation)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Retry wait cancelled by shutdown
    #[error("processing interrupted")]
    Interrupted,
}

impl ReceptionError {
    pub(crate) fn repository(operation: &str, reason: impl ToString) -> Self {
        Self::Repository {
            operation: operation.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn gateway(gateway: &str, reason: impl ToString) -> Self {
        Self::Gateway {
            gateway: gateway.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<ReceptionError> for IntakeError {
    fn from(err: ReceptionError) -> Self {
        match err {
            ReceptionError::Storage(reason) => IntakeError::Storage(StorageError::Rejected(reason)),
            ReceptionError::Gateway { gateway, reason } if gateway == "storage" => {
                IntakeError::Storage(StorageError::Unavailable(reason))
            }
            other => IntakeError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}
