//! Periodic retry of every unscheduled pod

use super::{DutyReporter, Placer, MIN_INTERVAL};
use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub placed: usize,
}

pub struct RetrySweep {
    cluster: Arc<dyn ClusterApi>,
    placer: Placer,
    health: HealthRegistry,
}

impl RetrySweep {
    pub fn new(cluster: Arc<dyn ClusterApi>, placer: Placer, health: HealthRegistry) -> Self {
        Self {
            cluster,
            placer,
            health,
        }
    }

    /// Attempt placement of every pod that is still unscheduled
    ///
    /// The scheduling lock is held for the whole batch. A failing pod does
    /// not stop the rest.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let _guard = self.placer.lock().await;

        let pods = self.cluster.unscheduled_pods().await?;
        let mut report = SweepReport::default();

        for pod in &pods {
            report.attempted += 1;
            if self.placer.attempt(pod).await {
                report.placed += 1;
            }
        }

        Ok(report)
    }

    pub async fn run(
        self,
        every: Duration,
        mut shutdown: broadcast::Receiver<()>,
        state: DutyReporter,
    ) {
        let every = every.max(MIN_INTERVAL);
        info!(interval_ms = every.as_millis(), "Starting retry sweep");

        // The watch sees existing pods on subscribe, so the first sweep waits a full interval
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => match self.sweep_once().await {
                    Ok(report) => {
                        debug!(attempted = report.attempted, placed = report.placed, "Retry sweep complete");
                        self.health.record_success(components::SWEEP).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to list unscheduled pods");
                        self.health.record_failure(components::SWEEP, e.to_string()).await;
                    }
                },
                _ = shutdown.recv() => {
                    state.stopping();
                    info!("Shutting down retry sweep");
                    break;
                }
            }
        }
    }
}
