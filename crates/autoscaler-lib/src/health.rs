//! Component health and readiness
//!
//! The engine loop reports per-component status here; the API server
//! reads it back for liveness and readiness probes. Readiness requires
//! the loop to have started and every component to be short of failed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Reported status of one engine component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Impaired but still making progress
    Degraded,
    /// Failed; blocks readiness
    Unhealthy,
}

impl ComponentStatus {
    fn severity(self) -> u8 {
        match self {
            ComponentStatus::Healthy => 0,
            ComponentStatus::Degraded => 1,
            ComponentStatus::Unhealthy => 2,
        }
    }
}

/// Latest report for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub reported_at: i64,
}

impl ComponentHealth {
    fn report(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            reported_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Liveness surface: the worst component status wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

/// Readiness surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names reported by the engine
pub mod components {
    pub const PLANNER: &str = "planner";
    pub const DISRUPTION: &str = "disruption";
    pub const LAUNCHER: &str = "launcher";
    pub const DEMAND_FEED: &str = "demand_feed";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: HashMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared registry the engine writes and the probes read
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component, starting healthy
    pub async fn register(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    async fn report(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        state
            .components
            .insert(name.to_string(), ComponentHealth::report(status, message));
    }

    pub async fn set_healthy(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Flip once the engine loop starts; readiness stays false until then
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("engine loop not started".to_string()),
            };
        }
        let failed = state
            .components
            .iter()
            .find(|(_, c)| c.status == ComponentStatus::Unhealthy);
        match failed {
            Some((name, _)) => ReadinessResponse {
                ready: false,
                reason: Some(format!("component {} has failed", name)),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_reports_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.register(components::PLANNER).await;
        registry.register(components::LAUNCHER).await;
        registry.register(components::DISRUPTION).await;

        registry.set_degraded(components::DISRUPTION, "slow drains").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::LAUNCHER, "provider unreachable")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_degraded_message_surfaces() {
        let registry = HealthRegistry::new();
        registry.register(components::LAUNCHER).await;
        registry
            .set_degraded(components::LAUNCHER, "3 consecutive launch failures")
            .await;

        let health = registry.health().await;
        let launcher = &health.components[components::LAUNCHER];
        assert_eq!(launcher.status, ComponentStatus::Degraded);
        assert_eq!(
            launcher.message.as_deref(),
            Some("3 consecutive launch failures")
        );
    }

    #[tokio::test]
    async fn test_not_ready_until_loop_starts() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_failed_component_blocks_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::DEMAND_FEED).await;
        registry.set_ready(true).await;

        registry
            .set_unhealthy(components::DEMAND_FEED, "demand feed closed")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("component demand_feed has failed")
        );
    }

    #[tokio::test]
    async fn test_recovery_restores_readiness() {
        let registry = HealthRegistry::new();
        registry.register(components::LAUNCHER).await;
        registry.set_ready(true).await;

        registry.set_unhealthy(components::LAUNCHER, "down").await;
        assert!(!registry.readiness().await.ready);

        registry.set_healthy(components::LAUNCHER).await;
        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
    }
}
