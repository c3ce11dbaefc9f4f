//! Single placement attempts

use crate::cluster::ClusterApi;
use crate::error::{Result, SchedulerError};
use crate::models::PodInfo;
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::selector::NodeSelector;
use crate::state::PendingBindLedger;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::debug;

/// Result of a successful placement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// The pod already had a node; nothing was done
    AlreadyBound,
    /// The pod was bound to `node`
    Bound {
        node: String,
        corrected_micro_watts: i64,
    },
}

/// Runs the decision phase: candidate fetch, selection, bind and ledger record
///
/// Clones share one scheduling lock. The watch and sweep duties hold it
/// around every attempt, so at most one decision is in flight.
#[derive(Clone)]
pub struct Placer {
    cluster: Arc<dyn ClusterApi>,
    selector: NodeSelector,
    ledger: PendingBindLedger,
    lock: Arc<Mutex<()>>,
    metrics: SchedulerMetrics,
    logger: StructuredLogger,
}

impl Placer {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        selector: NodeSelector,
        ledger: PendingBindLedger,
        metrics: SchedulerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            cluster,
            selector,
            ledger,
            lock: Arc::new(Mutex::new(())),
            metrics,
            logger,
        }
    }

    /// Acquire the scheduling lock
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Try to place one pod
    ///
    /// Callers hold the scheduling lock.
    pub async fn schedule_pod(&self, pod: &PodInfo) -> Result<PlacementOutcome> {
        if pod.is_bound() {
            debug!(pod = %pod.name, "Pod already has a node, skipping");
            return Ok(PlacementOutcome::AlreadyBound);
        }

        let start = Instant::now();

        let candidates = self.cluster.fit(pod).await?;
        if candidates.is_empty() {
            return Err(SchedulerError::NoEligibleNodes(pod.name.clone()));
        }

        let selection = self.selector.select(&candidates, &pod.name).await?;
        self.cluster.bind(pod, &selection.node).await?;
        self.ledger
            .record(pod.workload_name(), selection.node.name.clone())
            .await;

        self.metrics
            .observe_placement_latency(start.elapsed().as_secs_f64());
        self.metrics.inc_placements();
        self.metrics.set_pending_binds(self.ledger.len().await);
        self.logger.log_placement(
            &pod.name,
            &pod.namespace,
            &selection.node.name,
            selection.corrected_micro_watts,
        );

        Ok(PlacementOutcome::Bound {
            node: selection.node.name,
            corrected_micro_watts: selection.corrected_micro_watts,
        })
    }

    /// Like [`schedule_pod`](Self::schedule_pod), with failures logged and counted
    ///
    /// Returns whether the pod ended up bound by this attempt.
    pub async fn attempt(&self, pod: &PodInfo) -> bool {
        match self.schedule_pod(pod).await {
            Ok(PlacementOutcome::Bound { .. }) => true,
            Ok(PlacementOutcome::AlreadyBound) => false,
            Err(e) => {
                self.metrics.inc_placement_failure(&e);
                self.logger
                    .log_placement_failure(&pod.name, &pod.namespace, &e);
                false
            }
        }
    }
}
