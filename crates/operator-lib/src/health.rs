//! Operator health for the liveness and readiness endpoints
//!
//! Health describes the operator process, not the workload. A workload stuck in
//! Blocked or Error leaves the operator degraded but alive; `/status` carries
//! the workload phase. Only a stopped reconciliation loop makes the operator
//! unhealthy.

use crate::models::{Phase, ReconciliationStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Nothing outstanding
    Healthy,
    /// Working, but the workload is not where it should be yet
    Degraded,
    /// The component can no longer make progress
    Unhealthy,
}

/// A component's last reported health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }

    /// Reconciler health for a workload status
    ///
    /// Active is healthy and every other phase, Error included, is degraded.
    pub fn for_status(status: &ReconciliationStatus) -> Self {
        match status.phase {
            Phase::Active => Self::healthy(),
            _ if status.message.is_empty() => Self::degraded(status.phase.to_string()),
            _ => Self::degraded(format!("{}: {}", status.phase, status.message)),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// The worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const CATALOG: &str = "catalog";
    pub const STORAGE: &str = "storage";
    pub const RECONCILER: &str = "reconciler";
    pub const RELATIONS: &str = "relations";
}

/// Shared registry written by the reconciliation loop and read by the API
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Mark initialization as finished
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once initialized, for as long as no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !*self.ready.read().await {
            Some("Operator not yet initialized")
        } else if self.health().await.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy() {
        let health = HealthRegistry::new().health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::CATALOG).await;
        registry.register(components::STORAGE).await;

        registry
            .set_degraded(components::CATALOG, "3 of 5 images attached")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::RECONCILER, "reconciliation loop stopped")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_readiness_requires_initialization() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Operator not yet initialized"));

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_stopped_loop_is_not_ready() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry
            .set_unhealthy(components::RECONCILER, "reconciliation loop stopped")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("Critical component unhealthy"));
    }

    #[test]
    fn test_phase_maps_to_component_health() {
        let active = ComponentHealth::for_status(&ReconciliationStatus::active());
        assert_eq!(active.status, ComponentStatus::Healthy);
        assert!(active.message.is_none());

        let blocked = ComponentHealth::for_status(&ReconciliationStatus::new(
            Phase::Blocked,
            "waiting for storage: shared-app",
        ));
        assert_eq!(blocked.status, ComponentStatus::Degraded);
        assert_eq!(
            blocked.message.as_deref(),
            Some("blocked: waiting for storage: shared-app")
        );
    }

    #[tokio::test]
    async fn test_workload_error_keeps_operator_alive() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry
            .update(
                components::RECONCILER,
                ComponentHealth::for_status(&ReconciliationStatus::new(
                    Phase::Error,
                    "platform rejected container web",
                )),
            )
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::RECONCILER].message.as_deref(),
            Some("error: platform rejected container web")
        );
        assert!(registry.readiness().await.ready);
    }
}
