//! Record of recent binds not yet visible in telemetry
//!
//! Scaphandre scrapes every few seconds and Prometheus adds its own lag, so
//! a freshly bound pod draws power on its node well before the node's
//! measured wattage shows it. Each bind is kept here for `max_age` and its
//! workload's average is added to the node's wattage in the meantime.

use super::WorkloadPowerHistory;
use crate::models::PendingBind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default age after which a pending bind is assumed to be measured
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(14);

/// Append-ordered ledger of pending binds
#[derive(Debug, Clone)]
pub struct PendingBindLedger {
    entries: Arc<Mutex<Vec<PendingBind>>>,
    max_age_secs: i64,
}

impl Default for PendingBindLedger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

impl PendingBindLedger {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            max_age_secs: max_age.as_secs() as i64,
        }
    }

    /// Record a bind at the current time
    pub async fn record(&self, workload: impl Into<String>, node_name: impl Into<String>) {
        self.record_at(workload, node_name, now_unix()).await;
    }

    /// Record a bind at an explicit unix timestamp
    ///
    /// The prune relies on entries being in time order, so a timestamp
    /// older than the newest entry (a clock step) is raised to match it.
    pub async fn record_at(
        &self,
        workload: impl Into<String>,
        node_name: impl Into<String>,
        now: i64,
    ) {
        let mut entries = self.entries.lock().await;
        self.prune_locked(&mut entries, now);

        let recorded_at = match entries.last() {
            Some(last) if last.recorded_at > now => {
                warn!(
                    now = now,
                    newest = last.recorded_at,
                    "Clock went backwards, clamping pending bind time"
                );
                last.recorded_at
            }
            _ => now,
        };
        let entry = PendingBind {
            workload: workload.into(),
            node_name: node_name.into(),
            recorded_at,
        };
        info!(workload = %entry.workload, node = %entry.node_name, "Queueing pending bind");
        entries.push(entry);
    }

    /// Drop every entry recorded before `now - max_age`
    pub async fn prune(&self, now: i64) -> usize {
        let mut entries = self.entries.lock().await;
        self.prune_locked(&mut entries, now)
    }

    fn prune_locked(&self, entries: &mut Vec<PendingBind>, now: i64) -> usize {
        let age_bound = now - self.max_age_secs;
        let cut = entries.partition_point(|e| e.recorded_at < age_bound);

        if cut > 0 {
            entries.drain(..cut);
            debug!(
                dropped = cut,
                remaining = entries.len(),
                "Pruned pending binds"
            );
        }
        cut
    }

    /// Predicted extra wattage on `node_name` from pending binds
    pub async fn correction_for(&self, node_name: &str, history: &WorkloadPowerHistory) -> i64 {
        self.correction_for_at(node_name, history, now_unix()).await
    }

    pub async fn correction_for_at(
        &self,
        node_name: &str,
        history: &WorkloadPowerHistory,
        now: i64,
    ) -> i64 {
        let pending: Vec<String> = {
            let mut entries = self.entries.lock().await;
            self.prune_locked(&mut entries, now);
            entries
                .iter()
                .filter(|e| e.node_name == node_name)
                .map(|e| e.workload.clone())
                .collect()
        };

        let mut extra = 0;
        for workload in pending {
            match history.value_of(&workload).await {
                Some(micro_watts) => {
                    debug!(workload = %workload, node = %node_name, micro_watts = micro_watts, "Pending bind correction");
                    extra += micro_watts;
                }
                None => {
                    debug!(workload = %workload, node = %node_name, "No average known for pending bind");
                }
            }
        }
        extra
    }

    /// Copy of the current entries, oldest first
    pub async fn entries(&self) -> Vec<PendingBind> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
