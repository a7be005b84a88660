//! Authentication and authorization of log submitters.
//!
//! - [`signature`]: HMAC-SHA256 request signing and verification
//! - [`cache`]: TTL cache of authorization decisions
//! - [`gateway`]: [`AuthGateway`], the credential checks used by admission
//!
//! Authentication turns an [`AuthRequest`] into an [`AuthContext`] snapshot.
//! Authorization answers whether an app may exercise a [`Permission`], and is
//! cached per (app, permission, client IP).

pub mod cache;
pub mod gateway;
pub mod signature;

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::model::{AppAccess, AppAccessStatus, AppId, EndpointId};

pub use cache::AuthorizationCache;
pub use gateway::AuthGateway;
pub use signature::{sign, verify};

/// How a request proves its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthMethod {
    #[default]
    HmacSignature,
    ApiKey,
    IpBased,
    None,
}

/// Credentials presented with a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub access_key: String,
    /// base64 HMAC-SHA256 over `access_key ‖ timestamp ‖ body`
    pub signature: String,
    /// epoch milliseconds, as sent
    pub timestamp: String,
    pub client_ip: String,
    pub method: AuthMethod,
    /// raw request body as signed by the client
    pub body: String,
}

impl AuthRequest {
    /// Creates an HMAC-signed request.
    pub fn hmac(
        access_key: impl Into<String>,
        signature: impl Into<String>,
        timestamp: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            signature: signature.into(),
            timestamp: timestamp.into(),
            client_ip: String::new(),
            method: AuthMethod::HmacSignature,
            body: body.into(),
        }
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = client_ip.into();
        self
    }
}

/// Authentication failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    InvalidAccessKey,
    InvalidAppStatus,
    AppAccessExpired,
    InvalidTimestamp,
    InvalidTimestampFormat,
    SignatureValidationFailed,
}

impl AuthErrorCode {
    /// Stable code returned to callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAccessKey => "AUTH_001",
            Self::InvalidAppStatus => "AUTH_002",
            Self::AppAccessExpired => "AUTH_003",
            Self::InvalidTimestamp => "AUTH_004",
            Self::InvalidTimestampFormat => "AUTH_005",
            Self::SignatureValidationFailed => "AUTH_006",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidAccessKey => "invalid access key",
            Self::InvalidAppStatus => "invalid app status",
            Self::AppAccessExpired => "app access expired",
            Self::InvalidTimestamp => "timestamp outside validity window",
            Self::InvalidTimestampFormat => "timestamp is not epoch milliseconds",
            Self::SignatureValidationFailed => "signature validation failed",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

/// Point-in-time copy of an app's authorization attributes.
///
/// Later changes to the [`AppAccess`] do not affect a context already issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub app_id: AppId,
    pub client_ip: String,
    pub authenticated_at: DateTime<Utc>,
    pub method: AuthMethod,
    pub app_status: AppAccessStatus,
    pub expiry_time: Option<DateTime<Utc>>,
    pub allowed_endpoints: HashSet<EndpointId>,
    pub ip_whitelist: HashSet<String>,
    pub rate_limit: u32,
    pub burst_capacity: u32,
}

impl AuthContext {
    pub fn from_app(
        app: &AppAccess,
        client_ip: impl Into<String>,
        method: AuthMethod,
        authenticated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            app_id: app.app_id().clone(),
            client_ip: client_ip.into(),
            authenticated_at,
            method,
            app_status: app.status(),
            expiry_time: app.expiry_time(),
            allowed_endpoints: app.allowed_endpoints().clone(),
            ip_whitelist: app.ip_whitelist().clone(),
            rate_limit: app.rate_limit(),
            burst_capacity: app.burst_capacity(),
        }
    }

    /// Active and not past expiry at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.app_status == AppAccessStatus::Active
            && self.expiry_time.is_none_or(|expiry| now < expiry)
    }

    /// Empty whitelist allows every address.
    pub fn is_ip_whitelisted(&self, ip: &str) -> bool {
        self.ip_whitelist.is_empty() || self.ip_whitelist.contains(ip)
    }

    pub fn is_endpoint_allowed(&self, endpoint_id: &EndpointId) -> bool {
        self.allowed_endpoints.is_empty() || self.allowed_endpoints.contains(endpoint_id)
    }
}

/// Authentication outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Authenticated(AuthContext),
    Rejected {
        code: AuthErrorCode,
        message: String,
    },
}

impl AuthResult {
    pub(crate) fn rejected(code: AuthErrorCode) -> Self {
        Self::Rejected {
            code,
            message: code.message().to_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn app_id(&self) -> Option<&AppId> {
        match self {
            Self::Authenticated(context) => Some(&context.app_id),
            Self::Rejected { .. } => None,
        }
    }

    pub fn error_code(&self) -> Option<AuthErrorCode> {
        match self {
            Self::Authenticated(_) => None,
            Self::Rejected { code, .. } => Some(*code),
        }
    }

    pub fn context(&self) -> Option<&AuthContext> {
        match self {
            Self::Authenticated(context) => Some(context),
            Self::Rejected { .. } => None,
        }
    }
}

/// Something an authenticated app may ask to do.
///
/// Only endpoint access is restricted today; the other kinds are granted to
/// any active app from a whitelisted address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Permission {
    EndpointAccess(EndpointId),
    ApiCall(String),
    ResourceOperation { resource: String, operation: String },
    FeatureAccess(String),
}

impl Permission {
    pub fn endpoint(endpoint_id: impl Into<EndpointId>) -> Self {
        Self::EndpointAccess(endpoint_id.into())
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointAccess(endpoint) => write!(f, "endpoint:{}", endpoint),
            Self::ApiCall(name) => write!(f, "api:{}", name),
            Self::ResourceOperation {
                resource,
                operation,
            } => write!(f, "resource:{}:{}", resource, operation),
            Self::FeatureAccess(name) => write!(f, "feature:{}", name),
        }
    }
}
