//! Supervisor health and readiness
//!
//! Component health feeds `/healthz`. Readiness is tracked separately: the
//! daemon is ready once startup reconciliation has run and the sampler has
//! produced a host sample, and stops being ready when shutdown begins. A
//! failed deployment degrades health but never takes the daemon out of
//! rotation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Supervisor parts that report health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Telemetry,
    Discovery,
    Deployment,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::Telemetry,
        Component::Discovery,
        Component::Deployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Telemetry => "telemetry",
            Component::Discovery => "discovery",
            Component::Deployment => "deployment",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working with reduced data, e.g. a tick without host counters
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Why the daemon is not ready yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotReady {
    AwaitingReconciliation,
    AwaitingHostSample,
    ShuttingDown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<NotReady>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub first_sample_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct RegistryState {
    components: BTreeMap<Component, ComponentHealth>,
    reconciled_at: Option<DateTime<Utc>>,
    first_sample_at: Option<DateTime<Utc>>,
    shutting_down: bool,
}

/// Shared health and readiness state; clones share it
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts healthy; the daemon starts not ready
    pub fn new() -> Self {
        let components = Component::ALL
            .into_iter()
            .map(|c| (c, ComponentHealth::new(ComponentStatus::Healthy, None)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(RegistryState {
                components,
                reconciled_at: None,
                first_sample_at: None,
                shutting_down: false,
            })),
        }
    }

    async fn set(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        self.state
            .write()
            .await
            .components
            .insert(component, ComponentHealth::new(status, message));
    }

    pub async fn set_healthy(&self, component: Component) {
        self.set(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.set(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    pub async fn status(&self, component: Component) -> ComponentStatus {
        self.state
            .read()
            .await
            .components
            .get(&component)
            .map(|h| h.status)
            .unwrap_or(ComponentStatus::Healthy)
    }

    /// Startup reconciliation finished; discovery is healthy
    pub async fn mark_reconciled(&self) {
        let mut state = self.state.write().await;
        state.reconciled_at.get_or_insert_with(Utc::now);
        state.components.insert(
            Component::Discovery,
            ComponentHealth::new(ComponentStatus::Healthy, None),
        );
    }

    /// A tick produced a host sample
    pub async fn record_host_sample(&self) {
        let mut state = self.state.write().await;
        state.first_sample_at.get_or_insert_with(Utc::now);
        state.components.insert(
            Component::Telemetry,
            ComponentHealth::new(ComponentStatus::Healthy, None),
        );
    }

    /// Stop reporting ready; there is no way back
    pub async fn begin_shutdown(&self) {
        self.state.write().await.shutting_down = true;
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let reason = if state.shutting_down {
            Some(NotReady::ShuttingDown)
        } else if state.reconciled_at.is_none() {
            Some(NotReady::AwaitingReconciliation)
        } else if state.first_sample_at.is_none() {
            Some(NotReady::AwaitingHostSample)
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason,
            reconciled_at: state.reconciled_at,
            first_sample_at: state.first_sample_at,
        }
    }
}
