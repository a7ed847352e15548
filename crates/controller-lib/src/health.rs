//! Liveness and readiness of the controller's loops
//!
//! Every long-running task owns one named component in the
//! [`HealthRegistry`]. A failing critical component (state machine or
//! monitoring) takes the controller out of readiness; the auxiliary loops
//! only degrade it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    pub const MONITORING: &str = "monitoring";
    pub const ANOMALY_DETECTOR: &str = "anomaly_detector";
    pub const STATE_MACHINE: &str = "state_machine";
    pub const ENERGY_SAVER: &str = "energy_saver";
    pub const RECONFIGURATION: &str = "reconfiguration";

    /// Every component the controller registers at startup
    pub const ALL: [&str; 5] = [
        MONITORING,
        ANOMALY_DETECTOR,
        STATE_MACHINE,
        ENERGY_SAVER,
        RECONFIGURATION,
    ];

    /// Components without which the controller cannot accept work
    pub const CRITICAL: [&str; 2] = [STATE_MACHINE, MONITORING];

    pub fn is_critical(name: &str) -> bool {
        CRITICAL.contains(&name)
    }
}

/// Ordered from best to worst so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
    /// Reports in a row that were not healthy
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn report(status: ComponentStatus, message: Option<String>, previous: Option<&Self>) -> Self {
        let consecutive_failures = match (status, previous) {
            (ComponentStatus::Healthy, _) => 0,
            (_, Some(previous)) => previous.consecutive_failures.saturating_add(1),
            (_, None) => 1,
        };
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
            consecutive_failures,
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    initialized: bool,
}

/// Shared health registry, cloned into every loop
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        self.register_all(&[name]).await;
    }

    pub async fn register_all(&self, names: &[&str]) {
        let mut state = self.state.write().await;
        for name in names {
            state.components.insert(
                name.to_string(),
                ComponentHealth::report(ComponentStatus::Healthy, None, None),
            );
        }
    }

    async fn report(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        let health = ComponentHealth::report(status, message, state.components.get(name));
        state.components.insert(name.to_string(), health);
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

    /// Flip once the repository, state machine and loops are wired
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.initialized = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.initialized {
            return ReadinessResponse {
                ready: false,
                reason: Some("Group controller is still starting".to_string()),
            };
        }

        let failed = state.components.iter().find(|(name, health)| {
            components::is_critical(name) && health.status == ComponentStatus::Unhealthy
        });
        match failed {
            Some((name, health)) => ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "{} is unhealthy: {}",
                    name,
                    health.message.as_deref().unwrap_or("no details")
                )),
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
    async fn test_empty_registry_is_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_overall_status_is_worst_component() {
        let registry = HealthRegistry::new();
        registry.register_all(&components::ALL).await;
        assert_eq!(registry.health().await.components.len(), 5);

        registry
            .set_degraded(components::ENERGY_SAVER, "Power down failed")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(components::MONITORING, "Monitoring queue closed")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_failure_streak_resets_on_recovery() {
        let registry = HealthRegistry::new();
        registry.register(components::ANOMALY_DETECTOR).await;

        registry.set_degraded(components::ANOMALY_DETECTOR, "a").await;
        registry.set_unhealthy(components::ANOMALY_DETECTOR, "b").await;
        let health = registry.health().await;
        assert_eq!(health.components[components::ANOMALY_DETECTOR].consecutive_failures, 2);

        registry.set_healthy(components::ANOMALY_DETECTOR).await;
        let health = registry.health().await;
        let detector = &health.components[components::ANOMALY_DETECTOR];
        assert_eq!(detector.consecutive_failures, 0);
        assert!(detector.message.is_none());
    }

    #[tokio::test]
    async fn test_not_ready_until_initialized() {
        let registry = HealthRegistry::new();
        assert!(!registry.readiness().await.ready);

        registry.set_ready(true).await;
        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
    }

    #[tokio::test]
    async fn test_only_critical_failures_block_readiness() {
        let registry = HealthRegistry::new();
        registry.register_all(&components::ALL).await;
        registry.set_ready(true).await;

        registry
            .set_unhealthy(components::RECONFIGURATION, "Invalid cron expression")
            .await;
        assert!(registry.readiness().await.ready);

        registry
            .set_unhealthy(components::STATE_MACHINE, "Repository unreachable")
            .await;
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains("state_machine"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ComponentStatus::Degraded.to_string(), "degraded");
        assert!(ComponentStatus::Unhealthy > ComponentStatus::Healthy);
    }
}
