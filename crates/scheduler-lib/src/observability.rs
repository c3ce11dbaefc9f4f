//! Observability for the scheduler
//!
//! Provides:
//! - Prometheus metrics (placements, refresh latency, store sizes)
//! - Structured JSON logging of scheduling events with tracing

use crate::error::SchedulerError;
use prometheus::{
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, Histogram,
    IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

struct SchedulerMetricsInner {
    registry: Registry,
    placements: IntCounter,
    placement_failures: IntCounterVec,
    placement_latency_seconds: Histogram,
    refresh_latency_seconds: Histogram,
    refresh_errors: IntCounter,
    node_readings: IntGauge,
    workloads_tracked: IntGauge,
    pending_binds: IntGauge,
}

/// Scheduler metrics for Prometheus exposition
///
/// Each handle owns its registry; clones share the same metrics.
#[derive(Clone)]
pub struct SchedulerMetrics {
    inner: Arc<SchedulerMetricsInner>,
}

impl SchedulerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let placements = register_int_counter_with_registry!(
            "kubepower_placements_total",
            "Pods bound to a node by this scheduler",
            registry
        )?;
        let placement_failures = register_int_counter_vec_with_registry!(
            "kubepower_placement_failures_total",
            "Placement attempts that did not bind, by error kind",
            &["kind"],
            registry
        )?;
        let placement_latency_seconds = register_histogram_with_registry!(
            "kubepower_placement_latency_seconds",
            "Time from candidate fetch to bind",
            LATENCY_BUCKETS.to_vec(),
            registry
        )?;
        let refresh_latency_seconds = register_histogram_with_registry!(
            "kubepower_refresh_latency_seconds",
            "Time spent refreshing power telemetry",
            LATENCY_BUCKETS.to_vec(),
            registry
        )?;
        let refresh_errors = register_int_counter_with_registry!(
            "kubepower_refresh_errors_total",
            "Telemetry refresh cycles that failed",
            registry
        )?;
        let node_readings = register_int_gauge_with_registry!(
            "kubepower_node_readings",
            "Nodes in the latest power snapshot",
            registry
        )?;
        let workloads_tracked = register_int_gauge_with_registry!(
            "kubepower_workloads_tracked",
            "Workloads with a smoothed power history",
            registry
        )?;
        let pending_binds = register_int_gauge_with_registry!(
            "kubepower_pending_binds",
            "Recent placements not yet visible in telemetry",
            registry
        )?;

        Ok(Self {
            inner: Arc::new(SchedulerMetricsInner {
                registry,
                placements,
                placement_failures,
                placement_latency_seconds,
                refresh_latency_seconds,
                refresh_errors,
                node_readings,
                workloads_tracked,
                pending_binds,
            }),
        })
    }

    pub fn inc_placements(&self) {
        self.inner.placements.inc();
    }

    pub fn inc_placement_failure(&self, err: &SchedulerError) {
        self.inner
            .placement_failures
            .with_label_values(&[err.kind()])
            .inc();
    }

    pub fn observe_placement_latency(&self, duration_secs: f64) {
        self.inner.placement_latency_seconds.observe(duration_secs);
    }

    pub fn observe_refresh_latency(&self, duration_secs: f64) {
        self.inner.refresh_latency_seconds.observe(duration_secs);
    }

    pub fn inc_refresh_errors(&self) {
        self.inner.refresh_errors.inc();
    }

    pub fn set_node_readings(&self, count: usize) {
        self.inner.node_readings.set(count as i64);
    }

    pub fn set_workloads_tracked(&self, count: usize) {
        self.inner.workloads_tracked.set(count as i64);
    }

    pub fn set_pending_binds(&self, count: usize) {
        self.inner.pending_binds.set(count as i64);
    }

    pub fn placements(&self) -> u64 {
        self.inner.placements.get()
    }

    pub fn placement_failures(&self, kind: &str) -> u64 {
        self.inner
            .placement_failures
            .with_label_values(&[kind])
            .get()
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Structured logger for scheduling events
#[derive(Clone)]
pub struct StructuredLogger {
    scheduler_name: String,
}

impl StructuredLogger {
    pub fn new(scheduler_name: impl Into<String>) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, prometheus_url: &str) {
        info!(
            event = "scheduler_started",
            scheduler = %self.scheduler_name,
            version = %version,
            prometheus_url = %prometheus_url,
            "Power-aware scheduler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scheduler_shutdown",
            scheduler = %self.scheduler_name,
            reason = %reason,
            "Power-aware scheduler shutting down"
        );
    }

    pub fn log_placement(&self, pod: &str, namespace: &str, node: &str, corrected_micro_watts: i64) {
        info!(
            event = "pod_placed",
            scheduler = %self.scheduler_name,
            pod = %pod,
            namespace = %namespace,
            node = %node,
            corrected_micro_watts = corrected_micro_watts,
            "Bound pod to lowest-power node"
        );
    }

    pub fn log_placement_failure(&self, pod: &str, namespace: &str, err: &SchedulerError) {
        if err.is_transient() {
            warn!(
                event = "placement_failed",
                scheduler = %self.scheduler_name,
                pod = %pod,
                namespace = %namespace,
                kind = err.kind(),
                error = %err,
                "Placement attempt failed, pod stays unscheduled"
            );
        } else {
            error!(
                event = "placement_failed",
                scheduler = %self.scheduler_name,
                pod = %pod,
                namespace = %namespace,
                kind = err.kind(),
                error = %err,
                "Placement attempt failed, pod stays unscheduled"
            );
        }
    }
}
