//! Pipeline lifecycle trait and health reporting.

use std::future::Future;

use serde::Serialize;

use crate::error::IntakeError;

/// Component health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Operating with reduced capacity
    Degraded(String),
    /// Not operating
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// Start/stop lifecycle shared by long-running components.
///
/// The daemon drives every component through this trait so startup and
/// graceful shutdown look the same everywhere.
pub trait Pipeline: Send {
    /// Starts background work. Fails if already running.
    fn start(&mut self) -> impl Future<Output = Result<(), IntakeError>> + Send;

    /// Drains in-flight work and stops. Fails if not running.
    fn stop(&mut self) -> impl Future<Output = Result<(), IntakeError>> + Send;

    /// Reports current health.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
