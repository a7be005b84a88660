//! Reception chain stages.

use futures::FutureExt;
use futures::future::BoxFuture;

use super::{AdmissionContext, AdmissionDeps, InvalidLog, ReceptionRequest, ReceptionResult, StageOutcome, SubmissionKind};
use crate::model::{AppEndpointKey, LogBatch};
use crate::ports::{AppAccessRepository, BatchRepository, EndpointRepository};

type Outcome = StageOutcome<AdmissionContext, ReceptionResult>;

fn reject<A, E, B>(
    deps: &AdmissionDeps<A, E, B>,
    request: &ReceptionRequest,
    reason: &'static str,
    message: impl Into<String>,
) -> Outcome {
    let message = message.into();
    deps.metrics.record_rejection(reason);
    tracing::warn!(
        app_id = %request.app_id,
        endpoint_id = %request.endpoint_id,
        reason,
        message = %message,
        "submission rejected"
    );
    StageOutcome::Halt(ReceptionResult::failure(message))
}

fn internal_error<A, E, B>(
    deps: &AdmissionDeps<A, E, B>,
    request: &ReceptionRequest,
    operation: &str,
    error: &dyn std::fmt::Display,
) -> Outcome {
    deps.metrics.record_rejection("internal_error");
    tracing::error!(
        app_id = %request.app_id,
        endpoint_id = %request.endpoint_id,
        operation,
        error = %error,
        "admission failed on dependency error"
    );
    StageOutcome::Halt(ReceptionResult::failure(format!("internal error: {}", operation)))
}

/// Parameters present; endpoint exists, is active and admits the app.
pub(super) fn basic<'a, A, E, B>(
    deps: &'a AdmissionDeps<A, E, B>,
    request: &'a ReceptionRequest,
    mut context: AdmissionContext,
) -> BoxFuture<'a, Outcome>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    async move {
        if request.logs.is_empty() || request.app_id.is_empty() || request.endpoint_id.is_empty() {
            return reject(deps, request, "invalid_parameters", "parameters must not be empty");
        }

        let endpoint = match deps.endpoints.find_endpoint_by_id(&request.endpoint_id).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return reject(deps, request, "endpoint_not_found", "endpoint not found"),
            Err(e) => return internal_error(deps, request, "find_endpoint_by_id", &e),
        };
        if !endpoint.is_active() {
            return reject(deps, request, "endpoint_inactive", "endpoint not active");
        }
        if !endpoint.is_app_allowed(&request.app_id) {
            return reject(deps, request, "app_not_allowed", "app not allowed for endpoint");
        }

        context.endpoint = Some(endpoint);
        StageOutcome::Continue(context)
    }
    .boxed()
}

/// Endpoint authorization, IP whitelist, then one token from the rate limiter.
pub(super) fn auth_limit<'a, A, E, B>(
    deps: &'a AdmissionDeps<A, E, B>,
    request: &'a ReceptionRequest,
    context: AdmissionContext,
) -> BoxFuture<'a, Outcome>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    async move {
        let client_ip = request.client_ip();

        match deps
            .auth
            .authorize_endpoint(&request.app_id, &request.endpoint_id, client_ip)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return reject(deps, request, "unauthorized", "app not authorized for endpoint");
            }
            Err(e) => return internal_error(deps, request, "authorize_endpoint", &e),
        }

        match deps.auth.is_ip_whitelisted(&request.app_id, client_ip).await {
            Ok(true) => {}
            Ok(false) => return reject(deps, request, "ip_not_whitelisted", "IP not whitelisted"),
            Err(e) => return internal_error(deps, request, "is_ip_whitelisted", &e),
        }

        let key = AppEndpointKey::new(request.app_id.clone(), request.endpoint_id.clone());
        match deps.auth.is_rate_limited(&key, 1).await {
            Ok(false) => {}
            Ok(true) => return reject(deps, request, "rate_limited", "rate limited"),
            Err(e) => return internal_error(deps, request, "is_rate_limited", &e),
        }

        StageOutcome::Continue(context)
    }
    .boxed()
}

/// Splits logs into valid and invalid by the endpoint's format and size limits.
pub(super) fn format_size<'a, A, E, B>(
    deps: &'a AdmissionDeps<A, E, B>,
    request: &'a ReceptionRequest,
    mut context: AdmissionContext,
) -> BoxFuture<'a, Outcome>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    async move {
        let Some(endpoint) = context.endpoint.as_ref() else {
            return internal_error(deps, request, "format_size", &"endpoint not resolved");
        };

        if request.kind == SubmissionKind::Batch && endpoint.is_batch_count_exceeded(request.logs.len()) {
            return reject(deps, request, "batch_count_exceeded", "batch count exceeded");
        }

        let mut valid_logs = Vec::with_capacity(request.logs.len());
        let mut invalid_logs = Vec::new();
        for log in &request.logs {
            let reason = if log.format() != endpoint.format {
                Some(format!(
                    "format mismatch: expected {}, got {}",
                    endpoint.format,
                    log.format()
                ))
            } else if endpoint.is_payload_too_large(log.size()) {
                Some(format!(
                    "payload too large: {} > {} bytes",
                    log.size(),
                    endpoint.max_payload_size
                ))
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    tracing::debug!(
                        app_id = %request.app_id,
                        endpoint_id = %request.endpoint_id,
                        reason = %reason,
                        "log dropped by format/size validation"
                    );
                    invalid_logs.push(InvalidLog {
                        log: log.clone(),
                        reason,
                    });
                }
                None => valid_logs.push(log.clone()),
            }
        }

        if valid_logs.is_empty() {
            return reject(deps, request, "all_logs_invalid", "all logs invalid");
        }

        context.valid_logs = valid_logs;
        context.invalid_logs = invalid_logs;
        StageOutcome::Continue(context)
    }
    .boxed()
}

/// Terminal stage for single submissions: hand the log to its buffer.
pub(super) fn buffer_single<'a, A, E, B>(
    deps: &'a AdmissionDeps<A, E, B>,
    request: &'a ReceptionRequest,
    context: AdmissionContext,
) -> BoxFuture<'a, Outcome>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    async move {
        let key = AppEndpointKey::new(request.app_id.clone(), request.endpoint_id.clone());
        let mut accepted = 0u64;
        for log in context.valid_logs {
            let flushed = deps.buffer.add_log(log, &request.app_id, &request.endpoint_id);
            tracing::debug!(key = %key, flushed, "log buffered");
            accepted += 1;
        }
        deps.metrics.record_logs_received(&key, accepted);
        StageOutcome::Halt(ReceptionResult::buffered())
    }
    .boxed()
}

/// Terminal stage for batch submissions: persist a PENDING batch and schedule it.
pub(super) fn create_batch<'a, A, E, B>(
    deps: &'a AdmissionDeps<A, E, B>,
    request: &'a ReceptionRequest,
    context: AdmissionContext,
) -> BoxFuture<'a, Outcome>
where
    A: AppAccessRepository,
    E: EndpointRepository,
    B: BatchRepository,
{
    async move {
        let invalid_count = context.invalid_logs.len();
        let batch = LogBatch::new(
            request.app_id.clone(),
            request.endpoint_id.clone(),
            context.valid_logs,
        );

        if let Err(e) = deps.batches.save(&batch).await {
            return internal_error(deps, request, "save", &e);
        }

        let key = batch.key();
        deps.metrics.record_batch_received(&key);
        deps.metrics.record_logs_received(&key, batch.log_count() as u64);
        deps.on_batch_ready.on_batch_ready(batch.id.clone());

        tracing::info!(
            batch_id = %batch.id,
            app_id = %batch.app_id,
            endpoint_id = %batch.endpoint_id,
            valid = batch.log_count(),
            invalid = invalid_count,
            "batch accepted"
        );
        StageOutcome::Halt(ReceptionResult::success(batch.id, invalid_count))
    }
    .boxed()
}
