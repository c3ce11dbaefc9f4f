//! Power-aware scheduling engine for Kubernetes
//!
//! This crate provides the core functionality for:
//! - Power telemetry ingestion from Scaphandre via Prometheus
//! - Per-node and per-workload wattage tracking
//! - Telemetry-lag compensation for recent placements
//! - Lowest-power node selection and binding
//! - Health checks and observability

pub mod api;
pub mod cluster;
pub mod correction;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod resolver;
pub mod selector;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use error::{Result, SchedulerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SchedulerMetrics, StructuredLogger};
