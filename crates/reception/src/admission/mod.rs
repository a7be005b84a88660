//! Admission control -- the validation chains every submission passes.
//!
//! ```text
//! basic ──> auth_limit ──> format_size ──> buffer_single | create_batch
//! ```
//!
//! - `basic`: logs present, ids present, endpoint exists, is active and admits the app
//! - `auth_limit`: endpoint authorization, IP whitelist, rate limit
//! - `format_size`: per-log format and size checks, batch count limit
//! - terminal: a single log goes to the [`LogBufferManager`], a batch is
//!   persisted PENDING and handed to the processor
//!
//! Stages share nothing but the [`AdmissionContext`] they pass along.
//! Rejections are [`ReceptionResult`] values, not errors.

pub mod authorization;
pub mod chain;
mod stages;

use std::sync::Arc;

use crate::auth::AuthGateway;
use crate::buffer::LogBufferManager;
use crate::metrics::ProcessingMetrics;
use crate::model::{AppId, BatchId, EndpointId, RawLog, ReceiverEndpoint};
use crate::ports::{AppAccessRepository, BatchReadyHandler, BatchRepository, EndpointRepository};

pub use authorization::{AuthorizationRequest, AuthorizationResult};
pub use chain::{Chain, Stage, StageFn, StageOutcome};

/// Single-log or batch submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionKind {
    Single,
    Batch,
}

/// A submission as seen by admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionRequest {
    pub app_id: AppId,
    pub endpoint_id: EndpointId,
    pub logs: Vec<RawLog>,
    pub kind: SubmissionKind,
}

impl ReceptionRequest {
    pub fn single(app_id: impl Into<AppId>, endpoint_id: impl Into<EndpointId>, log: RawLog) -> Self {
        Self {
            app_id: app_id.into(),
            endpoint_id: endpoint_id.into(),
            logs: vec![log],
            kind: SubmissionKind::Single,
        }
    }

    pub fn batch(
        app_id: impl Into<AppId>,
        endpoint_id: impl Into<EndpointId>,
        logs: Vec<RawLog>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            endpoint_id: endpoint_id.into(),
            logs,
            kind: SubmissionKind::Batch,
        }
    }

    /// Client IP of the first log, empty when absent.
    pub fn client_ip(&self) -> &str {
        self.logs.first().map(RawLog::client_ip).unwrap_or("")
    }
}

/// A log dropped by format/size validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLog {
    pub log: RawLog,
    pub reason: String,
}

/// State threaded through the stages of one request.
#[derive(Debug, Clone, Default)]
pub struct AdmissionContext {
    /// Set by the basic stage
    pub endpoint: Option<ReceiverEndpoint>,
    /// Set by the format/size stage, in submission order
    pub valid_logs: Vec<RawLog>,
    pub invalid_logs: Vec<InvalidLog>,
}

/// Admission outcome returned to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionResult {
    pub success: bool,
    pub message: String,
    /// Set when a batch was created
    pub batch_id: Option<BatchId>,
    /// Set when a single log was buffered
    pub buffered: bool,
    /// Logs dropped by format/size validation
    pub invalid_count: usize,
}

impl ReceptionResult {
    pub fn success(batch_id: BatchId, invalid_count: usize) -> Self {
        Self {
            success: true,
            message: "batch accepted".to_owned(),
            batch_id: Some(batch_id),
            buffered: false,
            invalid_count,
        }
    }

    pub fn buffered() -> Self {
        Self {
            success: true,
            message: "log buffered".to_owned(),
            batch_id: None,
            buffered: true,
            invalid_count: 0,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            batch_id: None,
            buffered: false,
            invalid_count: 0,
        }
    }
}

/// Everything the stages may call.
pub struct AdmissionDeps<A, E, B> {
    pub auth: Arc<AuthGateway<A>>,
    pub apps: Arc<A>,
    pub endpoints: Arc<E>,
    pub batches: Arc<B>,
    pub buffer: Arc<LogBufferManager<B>>,
    pub on_batch_ready: Arc<dyn BatchReadyHandler>,
    pub metrics: Arc<ProcessingMetrics>,
}

type ReceptionChain<A, E, B> = Chain<AdmissionDeps<A, E, B>, ReceptionRequest, AdmissionContext, ReceptionResult>;

type AuthorizationChain<A, E, B> =
    Chain<AdmissionDeps<A, E, B>, AuthorizationRequest, authorization::AuthorizationContext, AuthorizationResult>;

/// The single-log, batch and authorization-only chains over shared dependencies.
pub struct AdmissionChain<A, E, B> {
    deps: AdmissionDeps<A, E, B>,
    single: ReceptionChain<A, E, B>,
    batch: ReceptionChain<A, E, B>,
    authorization: AuthorizationChain<A, E, B>,
}

impl<A, E, B> AdmissionChain<A, E, B>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    pub fn new(deps: AdmissionDeps<A, E, B>) -> Self {
        let single = Chain::new("reception_single", no_terminal_stage)
            .stage("basic", stages::basic::<A, E, B>)
            .stage("auth_limit", stages::auth_limit::<A, E, B>)
            .stage("format_size", stages::format_size::<A, E, B>)
            .stage("buffer_single", stages::buffer_single::<A, E, B>);
        let batch = Chain::new("reception_batch", no_terminal_stage)
            .stage("basic", stages::basic::<A, E, B>)
            .stage("auth_limit", stages::auth_limit::<A, E, B>)
            .stage("format_size", stages::format_size::<A, E, B>)
            .stage("create_batch", stages::create_batch::<A, E, B>);
        Self {
            deps,
            single,
            batch,
            authorization: authorization::chain(),
        }
    }

    /// Admits one log into its (app, endpoint) buffer.
    pub async fn receive_log(
        &self,
        app_id: impl Into<AppId>,
        endpoint_id: impl Into<EndpointId>,
        log: RawLog,
    ) -> ReceptionResult {
        self.handle(ReceptionRequest::single(app_id, endpoint_id, log))
            .await
    }

    /// Admits a list of logs as one batch.
    pub async fn receive_logs(
        &self,
        app_id: impl Into<AppId>,
        endpoint_id: impl Into<EndpointId>,
        logs: Vec<RawLog>,
    ) -> ReceptionResult {
        self.handle(ReceptionRequest::batch(app_id, endpoint_id, logs))
            .await
    }

    /// Runs the chain matching the request kind.
    pub async fn handle(&self, request: ReceptionRequest) -> ReceptionResult {
        let chain = match request.kind {
            SubmissionKind::Single => &self.single,
            SubmissionKind::Batch => &self.batch,
        };
        chain
            .run(&self.deps, &request, AdmissionContext::default())
            .await
    }

    /// Checks app status, IP whitelist and endpoint permission without admitting anything.
    pub async fn authorize_access(&self, request: &AuthorizationRequest) -> AuthorizationResult {
        self.authorization
            .run(&self.deps, request, authorization::AuthorizationContext::default())
            .await
    }

    pub fn deps(&self) -> &AdmissionDeps<A, E, B> {
        &self.deps
    }
}

fn no_terminal_stage(_: AdmissionContext) -> ReceptionResult {
    ReceptionResult::failure("admission chain has no terminal stage")
}
