//! Application credentials, limits and lifecycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AppId, EndpointId};
use crate::error::ReceptionError;

/// Application lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppAccessStatus {
    Active,
    Inactive,
    Blocked,
    Expired,
}

/// Application access aggregate.
///
/// Invariants:
/// - `burst_capacity >= rate_limit`
/// - a `Blocked` app never goes back to `Active` or `Inactive`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppAccess {
    app_id: AppId,
    access_key: String,
    secret_key: String,
    status: AppAccessStatus,
    /// `None` means the access never expires
    expiry_time: Option<DateTime<Utc>>,
    ip_whitelist: HashSet<String>,
    allowed_endpoints: HashSet<EndpointId>,
    /// requests per second
    rate_limit: u32,
    burst_capacity: u32,
}

impl AppAccess {
    pub const DEFAULT_RATE_LIMIT: u32 = 100;
    pub const DEFAULT_BURST_CAPACITY: u32 = 200;

    /// Creates an active app with default limits and no restrictions.
    pub fn new(
        app_id: impl Into<AppId>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            status: AppAccessStatus::Active,
            expiry_time: None,
            ip_whitelist: HashSet::new(),
            allowed_endpoints: HashSet::new(),
            rate_limit: Self::DEFAULT_RATE_LIMIT,
            burst_capacity: Self::DEFAULT_BURST_CAPACITY,
        }
    }

    pub fn with_expiry(mut self, expiry_time: DateTime<Utc>) -> Self {
        self.expiry_time = Some(expiry_time);
        self
    }

    pub fn with_ip_whitelist<I, S>(mut self, ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ip_whitelist = ips.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_allowed_endpoints<I, E>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EndpointId>,
    {
        self.allowed_endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: AppAccessStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets limits, rejecting `burst_capacity < rate_limit`.
    pub fn with_rate_limit(
        mut self,
        rate_limit: u32,
        burst_capacity: u32,
    ) -> Result<Self, ReceptionError> {
        self.update_rate_limit(rate_limit, burst_capacity)?;
        Ok(self)
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn status(&self) -> AppAccessStatus {
        self.status
    }

    pub fn expiry_time(&self) -> Option<DateTime<Utc>> {
        self.expiry_time
    }

    pub fn ip_whitelist(&self) -> &HashSet<String> {
        &self.ip_whitelist
    }

    pub fn allowed_endpoints(&self) -> &HashSet<EndpointId> {
        &self.allowed_endpoints
    }

    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    pub fn burst_capacity(&self) -> u32 {
        self.burst_capacity
    }

    pub fn is_active(&self) -> bool {
        self.status == AppAccessStatus::Active
    }

    /// True when `now` is at or past the expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time.is_some_and(|expiry| now >= expiry)
    }

    /// Empty whitelist allows every address.
    pub fn is_ip_allowed(&self, ip: &str) -> bool {
        self.ip_whitelist.is_empty() || self.ip_whitelist.contains(ip)
    }

    /// Empty allow-list allows every endpoint.
    pub fn is_endpoint_allowed(&self, endpoint_id: &EndpointId) -> bool {
        self.allowed_endpoints.is_empty() || self.allowed_endpoints.contains(endpoint_id)
    }

    pub fn activate(&mut self) -> Result<(), ReceptionError> {
        self.transition(AppAccessStatus::Active)
    }

    pub fn deactivate(&mut self) -> Result<(), ReceptionError> {
        self.transition(AppAccessStatus::Inactive)
    }

    pub fn block(&mut self) {
        self.status = AppAccessStatus::Blocked;
    }

    pub fn mark_expired(&mut self) {
        if self.status != AppAccessStatus::Blocked {
            self.status = AppAccessStatus::Expired;
        }
    }

    pub fn update_rate_limit(
        &mut self,
        rate_limit: u32,
        burst_capacity: u32,
    ) -> Result<(), ReceptionError> {
        if burst_capacity < rate_limit {
            return Err(ReceptionError::InvalidState(format!(
                "burst capacity {} is below rate limit {}",
                burst_capacity, rate_limit
            )));
        }
        self.rate_limit = rate_limit;
        self.burst_capacity = burst_capacity;
        Ok(())
    }

    fn transition(&mut self, target: AppAccessStatus) -> Result<(), ReceptionError> {
        if self.status == AppAccessStatus::Blocked {
            return Err(ReceptionError::InvalidState(format!(
                "app {} is blocked and cannot become {:?}",
                self.app_id, target
            )));
        }
        self.status = target;
        Ok(())
    }
}
