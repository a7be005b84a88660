//! Domain model -- applications, endpoints, raw logs and batches.
//!
//! - [`app`]: [`AppAccess`] credentials, limits and lifecycle
//! - [`endpoint`]: [`ReceiverEndpoint`] format and size policy
//! - [`log`]: [`RawLog`] as received and [`ProcessedLog`] after preprocessing
//! - [`batch`]: [`LogBatch`] and its [`BatchStatus`] state machine

pub mod app;
pub mod batch;
pub mod endpoint;
pub mod log;

pub use app::{AppAccess, AppAccessStatus};
pub use batch::{BatchStatus, LogBatch};
pub use endpoint::{EndpointStatus, ReceiverEndpoint};
pub use log::{LogFormat, ProcessedLog, RawLog};

/// Declares a string-backed identifier newtype.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Application identity
    AppId
);
string_id!(
    /// Receiver endpoint identity
    EndpointId
);
string_id!(
    /// Batch identity, a UUID v4 for generated batches
    BatchId
);

impl BatchId {
    /// Generates a fresh random batch id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Key shared by per-(app, endpoint) state: buffers, rate limiters, metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppEndpointKey {
    pub app_id: AppId,
    pub endpoint_id: EndpointId,
}

impl AppEndpointKey {
    pub fn new(app_id: AppId, endpoint_id: EndpointId) -> Self {
        Self {
            app_id,
            endpoint_id,
        }
    }
}

impl std::fmt::Display for AppEndpointKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app_id, self.endpoint_id)
    }
}
