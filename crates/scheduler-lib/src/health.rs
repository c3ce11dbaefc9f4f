//! Health tracking for the scheduler duties
//!
//! Each duty reports the outcome of every cycle. A failing cycle marks the
//! duty degraded; enough consecutive failures mark it unhealthy, which
//! fails the readiness probe until a cycle succeeds again.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failures after which a degraded component turns unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub consecutive_failures: u32,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const TELEMETRY: &str = "telemetry";
    pub const WATCH: &str = "watch";
    pub const SWEEP: &str = "sweep";
}

#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
    failure_threshold: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_threshold(failure_threshold: u32) -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub async fn register(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Record a successful cycle of `name`
    pub async fn record_success(&self, name: &str) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Record a failed cycle of `name`
    pub async fn record_failure(&self, name: &str, message: impl Into<String>) {
        let mut components = self.components.write().await;
        let entry = components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::healthy);

        entry.consecutive_failures += 1;
        entry.message = Some(message.into());
        entry.last_check_timestamp = chrono::Utc::now().timestamp();
        entry.status = if entry.consecutive_failures >= self.failure_threshold {
            ComponentStatus::Unhealthy
        } else {
            ComponentStatus::Degraded
        };
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = if components
            .values()
            .any(|c| c.status == ComponentStatus::Unhealthy)
        {
            ComponentStatus::Unhealthy
        } else if components
            .values()
            .any(|c| c.status == ComponentStatus::Degraded)
        {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Scheduler not yet initialized".to_string()),
            };
        }

        let unhealthy: Vec<String> = self
            .components
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.clone())
            .collect();

        if unhealthy.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy components: {}", unhealthy.join(", "))),
            }
        }
    }
}
