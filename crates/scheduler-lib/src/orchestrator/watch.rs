//! Event-driven placement of newly unscheduled pods

use super::{DutyReporter, Placer};
use crate::cluster::ClusterApi;
use crate::health::{components, HealthRegistry};
use crate::models::PodInfo;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Consumes the unscheduled-pod stream, re-subscribing when it ends
pub struct PodWatch {
    cluster: Arc<dyn ClusterApi>,
    placer: Placer,
    health: HealthRegistry,
    settle_delay: Duration,
    backoff: Duration,
}

impl PodWatch {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        placer: Placer,
        health: HealthRegistry,
        settle_delay: Duration,
        backoff: Duration,
    ) -> Self {
        Self {
            cluster,
            placer,
            health,
            settle_delay,
            backoff,
        }
    }

    async fn handle(&self, pod: &PodInfo) {
        if pod.is_bound() {
            return;
        }
        debug!(pod = %pod.name, namespace = %pod.namespace, "Unscheduled pod observed");

        let _guard = self.placer.lock().await;
        // Give telemetry a moment to reflect recent binds
        sleep(self.settle_delay).await;
        self.placer.attempt(pod).await;
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>, state: DutyReporter) {
        info!("Starting unscheduled pod watch");

        'subscribe: loop {
            match self.cluster.watch_unscheduled().await {
                Ok(mut stream) => {
                    self.health.record_success(components::WATCH).await;

                    loop {
                        tokio::select! {
                            item = stream.next() => match item {
                                Some(Ok(pod)) => self.handle(&pod).await,
                                Some(Err(e)) => {
                                    warn!(error = %e, "Pod watch yielded an error");
                                    self.health.record_failure(components::WATCH, e.to_string()).await;
                                }
                                None => {
                                    warn!(backoff_ms = self.backoff.as_millis(), "Pod watch ended, re-subscribing");
                                    break;
                                }
                            },
                            _ = shutdown.recv() => break 'subscribe,
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = self.backoff.as_millis(), "Failed to start pod watch");
                    self.health
                        .record_failure(components::WATCH, e.to_string())
                        .await;
                }
            }

            tokio::select! {
                _ = sleep(self.backoff) => {}
                _ = shutdown.recv() => break 'subscribe,
            }
        }

        state.stopping();
        info!("Shutting down unscheduled pod watch");
    }
}
