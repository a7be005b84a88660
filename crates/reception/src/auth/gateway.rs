//! Credential checks used by admission control.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Duration;

use super::cache::{AuthCacheKey, AuthorizationCache};
use super::{AuthContext, AuthErrorCode, AuthMethod, AuthRequest, AuthResult, Permission, signature};
use crate::error::ReceptionError;
use crate::model::{AppEndpointKey, AppId, EndpointId};
use crate::ports::AppAccessRepository;
use crate::ratelimit::RateLimiter;

/// Default accepted clock skew between client and server.
pub const DEFAULT_TIMESTAMP_VALIDITY_MS: u64 = 300_000;

/// Authenticates requests, authorizes apps and applies per-key rate limits.
pub struct AuthGateway<A> {
    apps: Arc<A>,
    limiter: Arc<RateLimiter>,
    cache: AuthorizationCache,
    timestamp_validity_ms: u64,
}

impl<A: AppAccessRepository> AuthGateway<A> {
    pub fn new(
        apps: Arc<A>,
        limiter: Arc<RateLimiter>,
        timestamp_validity_ms: u64,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            apps,
            limiter,
            cache: AuthorizationCache::new(cache_ttl),
            timestamp_validity_ms,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &AuthorizationCache {
        &self.cache
    }

    /// Authenticates against the current wall clock.
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResult, ReceptionError> {
        self.authenticate_at(request, Utc::now()).await
    }

    /// Authenticates as if the server clock read `now`.
    ///
    /// Checks run in order and stop at the first failure: access key, app
    /// status, expiry, timestamp format and window, then signature.
    pub async fn authenticate_at(
        &self,
        request: &AuthRequest,
        now: DateTime<Utc>,
    ) -> Result<AuthResult, ReceptionError> {
        let Some(app) = self.apps.find_app_by_access_key(&request.access_key).await? else {
            tracing::warn!(access_key = %request.access_key, "authentication failed: unknown access key");
            return Ok(AuthResult::rejected(AuthErrorCode::InvalidAccessKey));
        };

        if !app.is_active() {
            tracing::warn!(app_id = %app.app_id(), status = ?app.status(), "authentication failed: app not active");
            return Ok(AuthResult::Rejected {
                code: AuthErrorCode::InvalidAppStatus,
                message: format!("{}: {:?}", AuthErrorCode::InvalidAppStatus.message(), app.status()),
            });
        }

        if app.is_expired(now) {
            tracing::warn!(app_id = %app.app_id(), "authentication failed: app access expired");
            return Ok(AuthResult::rejected(AuthErrorCode::AppAccessExpired));
        }

        let Ok(timestamp) = request.timestamp.trim().parse::<i64>() else {
            tracing::warn!(app_id = %app.app_id(), timestamp = %request.timestamp, "authentication failed: malformed timestamp");
            return Ok(AuthResult::rejected(AuthErrorCode::InvalidTimestampFormat));
        };
        if now.timestamp_millis().abs_diff(timestamp) > self.timestamp_validity_ms {
            tracing::warn!(app_id = %app.app_id(), timestamp, "authentication failed: timestamp outside window");
            return Ok(AuthResult::rejected(AuthErrorCode::InvalidTimestamp));
        }

        if request.method == AuthMethod::HmacSignature
            && !signature::verify(
                &request.signature,
                app.secret_key(),
                &request.access_key,
                &request.timestamp,
                &request.body,
            )
        {
            tracing::warn!(app_id = %app.app_id(), "authentication failed: signature mismatch");
            return Ok(AuthResult::rejected(AuthErrorCode::SignatureValidationFailed));
        }

        tracing::debug!(app_id = %app.app_id(), "authenticated");
        Ok(AuthResult::Authenticated(AuthContext::from_app(
            &app,
            request.client_ip.clone(),
            request.method,
            now,
        )))
    }

    /// Decides whether the context may exercise `permission`. Cached by TTL.
    pub fn authorize(&self, context: &AuthContext, permission: &Permission) -> bool {
        let key = AuthCacheKey {
            app_id: context.app_id.clone(),
            permission: permission.clone(),
            client_ip: context.client_ip.clone(),
        };
        if let Some(allowed) = self.cache.get(&key) {
            return allowed;
        }
        let allowed = evaluate(context, permission, Utc::now());
        self.cache.insert(key, allowed);
        allowed
    }

    /// Endpoint-access authorization by app id, resolving the app on a cache miss.
    ///
    /// An unknown app is denied without caching the decision.
    pub async fn authorize_endpoint(
        &self,
        app_id: &AppId,
        endpoint_id: &EndpointId,
        client_ip: &str,
    ) -> Result<bool, ReceptionError> {
        let permission = Permission::EndpointAccess(endpoint_id.clone());
        let key = AuthCacheKey {
            app_id: app_id.clone(),
            permission,
            client_ip: client_ip.to_owned(),
        };
        if let Some(allowed) = self.cache.get(&key) {
            return Ok(allowed);
        }

        let Some(app) = self.apps.find_app_by_id(app_id).await? else {
            tracing::warn!(app_id = %app_id, "authorization failed: unknown app");
            return Ok(false);
        };
        let now = Utc::now();
        let context = AuthContext::from_app(&app, client_ip, AuthMethod::None, now);
        let allowed = evaluate(&context, &key.permission, now);
        self.cache.insert(key, allowed);
        Ok(allowed)
    }

    /// IP whitelist check by app id. An empty IP is allowed, an unknown app is not.
    pub async fn is_ip_whitelisted(
        &self,
        app_id: &AppId,
        client_ip: &str,
    ) -> Result<bool, ReceptionError> {
        if client_ip.is_empty() {
            return Ok(true);
        }
        Ok(self
            .apps
            .find_app_by_id(app_id)
            .await?
            .is_some_and(|app| app.is_ip_allowed(client_ip)))
    }

    /// Takes `tokens` from the key's bucket after syncing the bucket with the
    /// app's current limits. Returns `true` when limited.
    pub async fn is_rate_limited(
        &self,
        key: &AppEndpointKey,
        tokens: u32,
    ) -> Result<bool, ReceptionError> {
        if let Some(app) = self.apps.find_app_by_id(&key.app_id).await?
            && self
                .limiter
                .sync_limits(key, app.rate_limit(), app.burst_capacity())
        {
            tracing::debug!(
                key = %key,
                rate_limit = app.rate_limit(),
                burst_capacity = app.burst_capacity(),
                "rate limiter synced with app limits"
            );
        }
        Ok(!self.limiter.try_acquire(key, tokens))
    }

    /// Drops expired authorization decisions.
    pub fn evict_expired(&self) -> usize {
        let evicted = self.cache.evict_expired();
        if evicted > 0 {
            tracing::debug!(evicted, "expired authorization decisions evicted");
        }
        evicted
    }
}

fn evaluate(context: &AuthContext, permission: &Permission, now: DateTime<Utc>) -> bool {
    if !context.is_active_at(now) {
        tracing::warn!(app_id = %context.app_id, "authorization failed: app not active");
        return false;
    }
    if !context.client_ip.is_empty() && !context.is_ip_whitelisted(&context.client_ip) {
        tracing::warn!(app_id = %context.app_id, client_ip = %context.client_ip, "authorization failed: ip not whitelisted");
        return false;
    }
    match permission {
        Permission::EndpointAccess(endpoint_id) => {
            let allowed = context.is_endpoint_allowed(endpoint_id);
            if !allowed {
                tracing::warn!(app_id = %context.app_id, endpoint_id = %endpoint_id, "authorization failed: endpoint not allowed");
            }
            allowed
        }
        Permission::ApiCall(_)
        | Permission::ResourceOperation { .. }
        | Permission::FeatureAccess(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAppRepository;
    use crate::model::{AppAccess, AppAccessStatus};
    use chrono::Duration as ChronoDuration;

    const SECRET: &str = "s3cret";

    fn gateway(apps: Vec<AppAccess>) -> AuthGateway<MemoryAppRepository> {
        let repo = MemoryAppRepository::new();
        for app in apps {
            repo.insert(app);
        }
        AuthGateway::new(
            Arc::new(repo),
            Arc::new(RateLimiter::new()),
            DEFAULT_TIMESTAMP_VALIDITY_MS,
            Duration::from_secs(60),
        )
    }

    fn signed(now: DateTime<Utc>, offset_ms: i64, body: &str) -> AuthRequest {
        let ts = (now.timestamp_millis() + offset_ms).to_string();
        let sig = signature::sign(SECRET, "ak-1", &ts, body);
        AuthRequest::hmac("ak-1", sig, ts, body)
    }

    fn app() -> AppAccess {
        AppAccess::new("a1", "ak-1", SECRET)
    }

    #[tokio::test]
    async fn valid_request_authenticates() {
        let gw = gateway(vec![app()]);
        let now = Utc::now();
        let result = gw
            .authenticate_at(&signed(now, 0, "{}").with_client_ip("10.0.0.1"), now)
            .await
            .unwrap();
        let context = result.context().unwrap();
        assert_eq!(context.app_id, AppId::from("a1"));
        assert_eq!(context.client_ip, "10.0.0.1");
        assert_eq!(context.rate_limit, AppAccess::DEFAULT_RATE_LIMIT);
    }

    #[tokio::test]
    async fn unknown_access_key() {
        let gw = gateway(vec![]);
        let now = Utc::now();
        let result = gw.authenticate_at(&signed(now, 0, "x"), now).await.unwrap();
        assert_eq!(result.error_code(), Some(AuthErrorCode::InvalidAccessKey));
    }

    #[tokio::test]
    async fn inactive_app_rejected_before_expiry_check() {
        let now = Utc::now();
        let gw = gateway(vec![
            app()
                .with_status(AppAccessStatus::Inactive)
                .with_expiry(now - ChronoDuration::days(1)),
        ]);
        let result = gw.authenticate_at(&signed(now, 0, "x"), now).await.unwrap();
        assert_eq!(result.error_code(), Some(AuthErrorCode::InvalidAppStatus));
    }

    #[tokio::test]
    async fn expired_app_rejected() {
        let now = Utc::now();
        let gw = gateway(vec![app().with_expiry(now)]);
        let result = gw.authenticate_at(&signed(now, 0, "x"), now).await.unwrap();
        assert_eq!(result.error_code(), Some(AuthErrorCode::AppAccessExpired));
    }

    #[tokio::test]
    async fn timestamp_window_is_inclusive() {
        let gw = gateway(vec![app()]);
        let now = Utc::now();
        for offset in [300_000, -300_000] {
            let result = gw.authenticate_at(&signed(now, offset, "b"), now).await.unwrap();
            assert!(result.is_success(), "offset {offset} should pass");
        }
        for offset in [300_001, -300_001] {
            let result = gw.authenticate_at(&signed(now, offset, "b"), now).await.unwrap();
            assert_eq!(result.error_code(), Some(AuthErrorCode::InvalidTimestamp));
        }
    }

    #[tokio::test]
    async fn non_numeric_timestamp() {
        let gw = gateway(vec![app()]);
        let now = Utc::now();
        let request = AuthRequest::hmac("ak-1", "sig", "yesterday", "b");
        let result = gw.authenticate_at(&request, now).await.unwrap();
        assert_eq!(result.error_code(), Some(AuthErrorCode::InvalidTimestampFormat));
    }

    #[tokio::test]
    async fn tampered_body_fails_signature() {
        let gw = gateway(vec![app()]);
        let now = Utc::now();
        let mut request = signed(now, 0, "{\"level\":\"info\"}");
        request.body = "{\"level\":\"warn\"}".to_owned();
        let result = gw.authenticate_at(&request, now).await.unwrap();
        assert_eq!(
            result.error_code(),
            Some(AuthErrorCode::SignatureValidationFailed)
        );
    }

    #[tokio::test]
    async fn non_hmac_method_skips_signature() {
        let gw = gateway(vec![app()]);
        let now = Utc::now();
        let mut request = signed(now, 0, "b");
        request.signature = "garbage".to_owned();
        request.method = AuthMethod::ApiKey;
        assert!(gw.authenticate_at(&request, now).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn authorize_endpoint_respects_allow_lists() {
        let gw = gateway(vec![
            app()
                .with_allowed_endpoints(["e1"])
                .with_ip_whitelist(["10.0.0.1"]),
        ]);
        let a1 = AppId::from("a1");
        assert!(gw.authorize_endpoint(&a1, &EndpointId::from("e1"), "10.0.0.1").await.unwrap());
        assert!(gw.authorize_endpoint(&a1, &EndpointId::from("e1"), "").await.unwrap());
        assert!(!gw.authorize_endpoint(&a1, &EndpointId::from("e2"), "10.0.0.1").await.unwrap());
        assert!(!gw.authorize_endpoint(&a1, &EndpointId::from("e1"), "10.9.9.9").await.unwrap());
        assert!(!gw.authorize_endpoint(&AppId::from("ghost"), &EndpointId::from("e1"), "").await.unwrap());
    }

    #[tokio::test]
    async fn authorization_decisions_are_cached() {
        let repo = Arc::new(MemoryAppRepository::new());
        repo.insert(app());
        let gw = AuthGateway::new(
            Arc::clone(&repo),
            Arc::new(RateLimiter::new()),
            DEFAULT_TIMESTAMP_VALIDITY_MS,
            Duration::from_secs(60),
        );
        let (a1, e1) = (AppId::from("a1"), EndpointId::from("e1"));
        assert!(gw.authorize_endpoint(&a1, &e1, "").await.unwrap());

        repo.insert(app().with_status(AppAccessStatus::Blocked));
        assert!(gw.authorize_endpoint(&a1, &e1, "").await.unwrap());

        gw.cache().clear();
        assert!(!gw.authorize_endpoint(&a1, &e1, "").await.unwrap());
    }

    #[tokio::test]
    async fn only_endpoint_permission_is_restricted() {
        let gw = gateway(vec![]);
        let restricted = app().with_allowed_endpoints(["e1"]);
        let context = AuthContext::from_app(&restricted, "", AuthMethod::HmacSignature, Utc::now());
        assert!(!gw.authorize(&context, &Permission::endpoint("e2")));
        assert!(gw.authorize(&context, &Permission::ApiCall("list".to_owned())));
        assert!(gw.authorize(&context, &Permission::FeatureAccess("export".to_owned())));
    }

    #[tokio::test]
    async fn ip_whitelist_lookup() {
        let gw = gateway(vec![app().with_ip_whitelist(["10.0.0.1"])]);
        let a1 = AppId::from("a1");
        assert!(gw.is_ip_whitelisted(&a1, "").await.unwrap());
        assert!(gw.is_ip_whitelisted(&a1, "10.0.0.1").await.unwrap());
        assert!(!gw.is_ip_whitelisted(&a1, "10.0.0.2").await.unwrap());
        assert!(!gw.is_ip_whitelisted(&AppId::from("ghost"), "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn rate_limit_provisioned_from_app() {
        let gw = gateway(vec![app().with_rate_limit(1, 2).unwrap()]);
        let key = AppEndpointKey::new(AppId::from("a1"), EndpointId::from("e1"));
        assert!(!gw.is_rate_limited(&key, 1).await.unwrap());
        assert!(!gw.is_rate_limited(&key, 1).await.unwrap());
        assert!(gw.is_rate_limited(&key, 1).await.unwrap());
        assert_eq!(gw.limiter().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_follows_updated_app_limits() {
        let repo = Arc::new(MemoryAppRepository::new());
        repo.insert(app().with_rate_limit(1, 1).unwrap());
        let gw = AuthGateway::new(
            Arc::clone(&repo),
            Arc::new(RateLimiter::new()),
            DEFAULT_TIMESTAMP_VALIDITY_MS,
            Duration::from_secs(60),
        );
        let key = AppEndpointKey::new(AppId::from("a1"), EndpointId::from("e1"));
        assert!(!gw.is_rate_limited(&key, 1).await.unwrap());
        assert!(gw.is_rate_limited(&key, 1).await.unwrap());

        repo.insert(app().with_rate_limit(100, 100).unwrap());
        assert!(!gw.is_rate_limited(&key, 1).await.unwrap());
        let config = gw.limiter().config(&key).unwrap();
        assert_eq!(config.rate_per_second, 100.0);
        assert_eq!(config.capacity, 100.0);

        repo.insert(app().with_rate_limit(0, 0).unwrap());
        assert!(!gw.is_rate_limited(&key, 1).await.unwrap());
        assert!(gw.limiter().is_empty());
    }
}
