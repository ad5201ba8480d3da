//! Component health of the health model agent
//!
//! Backs the agent's liveness and readiness probes. The pipeline reports
//! each cycle's result here; persistence trouble and an empty inventory
//! degrade the agent, repeated cycle failures make it unhealthy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed cycles before the pipeline is reported unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

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
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// The worst component status wins
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        let mut status = ComponentStatus::Healthy;
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => status = ComponentStatus::Degraded,
                ComponentStatus::Healthy => {}
            }
        }
        status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const PIPELINE: &str = "pipeline";
    pub const PERSISTENCE: &str = "persistence";
    pub const INVENTORY: &str = "inventory";
}

/// What one cycle looked like from the health registry's point of view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Error that discarded the cycle's output, if any
    pub error: Option<String>,
    pub persisted: bool,
    pub inventory_empty: bool,
}

#[derive(Debug, Default)]
struct HealthState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
    consecutive_failures: u32,
}

/// Shared component health registry
#[derive(Debug, Clone)]
pub struct AgentHealth {
    state: Arc<RwLock<HealthState>>,
    failure_threshold: u32,
}

impl Default for AgentHealth {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl AgentHealth {
    pub fn new(failure_threshold: u32) -> Self {
        let mut state = HealthState::default();
        for name in [
            components::PIPELINE,
            components::PERSISTENCE,
            components::INVENTORY,
        ] {
            state
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }

        Self {
            state: Arc::new(RwLock::new(state)),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut state = self.state.write().await;
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    /// Fold one cycle's result into the component statuses
    pub async fn report_cycle(&self, report: &CycleReport) {
        let mut state = self.state.write().await;

        let pipeline = match &report.error {
            None => {
                state.consecutive_failures = 0;
                ComponentHealth::healthy()
            }
            Some(error) => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.failure_threshold {
                    ComponentHealth::unhealthy(format!(
                        "{} consecutive cycles failed, last: {}",
                        state.consecutive_failures, error
                    ))
                } else {
                    ComponentHealth::degraded(format!("cycle failed: {}", error))
                }
            }
        };
        state
            .components
            .insert(components::PIPELINE.to_string(), pipeline);

        if report.error.is_none() {
            let persistence = if report.persisted {
                ComponentHealth::healthy()
            } else {
                ComponentHealth::degraded("state snapshot could not be written")
            };
            state
                .components
                .insert(components::PERSISTENCE.to_string(), persistence);
        }

        let inventory = if report.inventory_empty {
            ComponentHealth::degraded("inventory is empty, presence checks fail open")
        } else {
            ComponentHealth::healthy()
        };
        state
            .components
            .insert(components::INVENTORY.to_string(), inventory);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = self.state.read().await.ready;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Health model not yet loaded".to_string()),
            }
        } else if !health.status.is_operational() {
            ReadinessResponse {
                ready: false,
                reason: Some("Pipeline unhealthy".to_string()),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}
