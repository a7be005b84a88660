#![doc = include_str!("../README.md")]
//!
//! # Modules
//!
//! - [`ratelimit`]: per (app, endpoint) token buckets
//! - [`auth`]: HMAC request signing, authorization checks and the decision cache
//! - [`admission`]: ordered admission stages for single and batch submissions
//! - [`buffer`]: per-key log buffers that turn into persisted batches
//! - [`preprocess`]: JSON/TEXT structuring of raw logs
//! - [`processor`]: bounded-retry batch processing on a worker pool
//! - [`cleanup`]: retention and processing-timeout sweeps
//! - [`scheduler`]: periodic jobs (flush, refill, cache eviction, cleanup)
//! - [`service`]: the assembled pipeline (Pipeline trait implementation)
//! - [`ports`]: repository and gateway traits, [`memory`] implements them in memory
//! - [`config`]: pipeline config (extends the core config)
//! - [`error`]: domain error type
//!
//! # Architecture
//!
//! ```text
//! receive_log  ──> AdmissionChain ──> LogBufferManager ──┐
//! receive_logs ──> AdmissionChain ──> BatchRepository ───┤
//!                                                        v
//!                          BatchProcessor ──> PreprocessGateway ──> StorageGateway
//!                               |
//!                          retry / fail ──> FailureNotifier
//! ```

pub mod admission;
pub mod auth;
pub mod buffer;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod ports;
pub mod preprocess;
pub mod processor;
pub mod ratelimit;
pub mod scheduler;
pub mod service;

// --- re-exports ---

// service
pub use service::{ReceptionService, ReceptionServiceBuilder};

// config
pub use config::{ReceptionConfig, ReceptionConfigBuilder};

// error
pub use error::ReceptionError;

// admission
pub use admission::{AdmissionChain, ReceptionResult};

// components
pub use auth::{AuthGateway, AuthRequest, AuthResult};
pub use buffer::LogBufferManager;
pub use cleanup::{BatchCleaner, CleanupPolicy, CleanupReport};
pub use preprocess::StructuredPreprocessor;
pub use processor::{BatchOutcome, BatchProcessor, RetryPolicy};
pub use ratelimit::RateLimiter;

// model
pub use model::{AppAccess, BatchStatus, LogBatch, LogFormat, ProcessedLog, RawLog, ReceiverEndpoint};
