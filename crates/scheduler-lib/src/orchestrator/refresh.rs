//! Periodic power telemetry refresh

use super::{DutyReporter, MIN_INTERVAL};
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::observability::SchedulerMetrics;
use crate::state::{NodePowerStore, WorkloadPowerHistory};
use crate::telemetry::{node_readings, MetricNames, PowerSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// What a refresh cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The node query returned no series
    NoData,
    /// Node readings were not newer than the stored ones; pod query skipped
    Stale,
    /// Node readings advanced and pod samples were ingested
    Advanced,
}

/// Feeds the node store and workload history from telemetry
#[derive(Clone)]
pub struct MetricRefresher {
    source: Arc<dyn PowerSource>,
    node_store: NodePowerStore,
    history: WorkloadPowerHistory,
    metric_names: MetricNames,
    metrics: SchedulerMetrics,
    health: HealthRegistry,
}

impl MetricRefresher {
    pub fn new(
        source: Arc<dyn PowerSource>,
        node_store: NodePowerStore,
        history: WorkloadPowerHistory,
        metric_names: MetricNames,
        metrics: SchedulerMetrics,
        health: HealthRegistry,
    ) -> Self {
        Self {
            source,
            node_store,
            history,
            metric_names,
            metrics,
            health,
        }
    }

    /// Run one refresh cycle
    ///
    /// The per-process query is only issued when the node timestamp
    /// advanced.
    pub async fn refresh_once(&self) -> Result<RefreshOutcome> {
        let response = self.source.query(&self.metric_names.host_watts).await?;

        let Some((readings, timestamp)) = node_readings(&response) else {
            debug!(query = %self.metric_names.host_watts, "Node power query returned no series");
            return Ok(RefreshOutcome::NoData);
        };

        let advanced = self.node_store.refresh(readings, timestamp).await;
        self.metrics.set_node_readings(self.node_store.len().await);
        if !advanced {
            return Ok(RefreshOutcome::Stale);
        }

        let response = self.source.query(&self.metric_names.process_watts).await?;
        let samples = response.samples();
        let pod_timestamp = response.timestamp().unwrap_or(timestamp);
        self.history.ingest(&samples, pod_timestamp).await;
        self.metrics.set_workloads_tracked(self.history.len().await);

        Ok(RefreshOutcome::Advanced)
    }

    async fn cycle(&self) {
        let start = Instant::now();
        let result = self.refresh_once().await;
        self.metrics
            .observe_refresh_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(outcome) => {
                debug!(outcome = ?outcome, elapsed_ms = start.elapsed().as_millis(), "Refresh cycle complete");
                self.health.record_success(components::TELEMETRY).await;
            }
            Err(e) => {
                warn!(error = %e, "Telemetry refresh failed");
                self.metrics.inc_refresh_errors();
                self.health
                    .record_failure(components::TELEMETRY, e.to_string())
                    .await;
            }
        }
    }

    pub async fn run(
        self,
        every: Duration,
        mut shutdown: broadcast::Receiver<()>,
        state: DutyReporter,
    ) {
        let every = every.max(MIN_INTERVAL);
        info!(interval_ms = every.as_millis(), "Starting telemetry refresh loop");

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.cycle().await,
                _ = shutdown.recv() => {
                    state.stopping();
                    info!("Shutting down telemetry refresh loop");
                    break;
                }
            }
        }
    }
}
