//! Authorization-only chain: may this app use this endpoint from this address?
//!
//! Two stages over the same dependencies as reception: the app must exist, be
//! active and unexpired; then the client IP must be whitelisted and the
//! endpoint allowed. Nothing is admitted or rate limited.

use chrono::Utc;
use futures::FutureExt;
use futures::future::BoxFuture;

use super::{AdmissionDeps, Chain, StageOutcome};
use crate::model::{AppAccess, AppId, EndpointId};
use crate::ports::{AppAccessRepository, BatchRepository, EndpointRepository};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub app_id: AppId,
    pub endpoint_id: EndpointId,
    /// Empty skips the whitelist check
    pub client_ip: String,
}

impl AuthorizationRequest {
    pub fn new(
        app_id: impl Into<AppId>,
        endpoint_id: impl Into<EndpointId>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            endpoint_id: endpoint_id.into(),
            client_ip: client_ip.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub allowed: bool,
    /// Why access was denied
    pub reason: Option<String>,
}

impl AuthorizationResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthorizationContext {
    pub app: Option<AppAccess>,
}

type Outcome = StageOutcome<AuthorizationContext, AuthorizationResult>;

fn deny(request: &AuthorizationRequest, reason: &str) -> Outcome {
    tracing::warn!(
        app_id = %request.app_id,
        endpoint_id = %request.endpoint_id,
        client_ip = %request.client_ip,
        reason,
        "authorization denied"
    );
    StageOutcome::Halt(AuthorizationResult::denied(reason))
}

pub(super) fn chain<A, E, B>()
-> Chain<AdmissionDeps<A, E, B>, AuthorizationRequest, AuthorizationContext, AuthorizationResult>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    Chain::new("authorization", |_| AuthorizationResult::allowed())
        .stage("app_status", app_status::<A, E, B>)
        .stage("permission", permission::<A, E, B>)
}

fn app_status<'a, A, E, B>(
    deps: &'a AdmissionDeps<A, E, B>,
    request: &'a AuthorizationRequest,
    mut context: AuthorizationContext,
) -> BoxFuture<'a, Outcome>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    async move {
        if request.app_id.is_empty() || request.endpoint_id.is_empty() {
            return deny(request, "parameters must not be empty");
        }
        let app = match deps.apps.find_app_by_id(&request.app_id).await {
            Ok(Some(app)) => app,
            Ok(None) => return deny(request, "app not found"),
            Err(e) => {
                tracing::error!(app_id = %request.app_id, error = %e, "app lookup failed");
                return deny(request, "app lookup failed");
            }
        };
        if !app.is_active() {
            return deny(request, "app not active");
        }
        if app.is_expired(Utc::now()) {
            return deny(request, "app access expired");
        }
        context.app = Some(app);
        StageOutcome::Continue(context)
    }
    .boxed()
}

fn permission<'a, A, E, B>(
    _deps: &'a AdmissionDeps<A, E, B>,
    request: &'a AuthorizationRequest,
    context: AuthorizationContext,
) -> BoxFuture<'a, Outcome>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    async move {
        let Some(app) = context.app.as_ref() else {
            return deny(request, "app not resolved");
        };
        if !request.client_ip.is_empty() && !app.is_ip_allowed(&request.client_ip) {
            return deny(request, "IP not whitelisted");
        }
        if !app.is_endpoint_allowed(&request.endpoint_id) {
            return deny(request, "endpoint not allowed");
        }
        StageOutcome::Continue(context)
    }
    .boxed()
}
