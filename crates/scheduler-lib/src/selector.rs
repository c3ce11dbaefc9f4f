//! Energy-based node selection
//!
//! Each candidate's measured wattage is corrected for pods telemetry has
//! not caught up with. The node with the lowest corrected wattage wins.

use crate::cluster::ClusterApi;
use crate::correction::{compute_corrections, correction_for_node};
use crate::error::{Result, SchedulerError};
use crate::models::NodeInfo;
use crate::resolver::IpNodeResolver;
use crate::state::{NodePowerStore, PendingBindLedger, WorkloadPowerHistory};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Node labels that mark control-plane nodes
pub const CONTROL_PLANE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// How to break ties between nodes with equal corrected wattage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// The last examined node wins (`<=` comparison)
    #[default]
    Last,
    /// The first examined node wins (`<` comparison)
    First,
}

impl TieBreak {
    fn replaces(self, candidate: i64, best: i64) -> bool {
        match self {
            TieBreak::Last => candidate <= best,
            TieBreak::First => candidate < best,
        }
    }
}

/// Configuration for node selection
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub tie_break: TieBreak,
    /// Nodes whose name contains this marker are never selected
    pub control_plane_marker: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            tie_break: TieBreak::Last,
            control_plane_marker: "controller".to_string(),
        }
    }
}

/// Whether the node is a control-plane node
pub fn is_control_plane(node: &NodeInfo, marker: &str) -> bool {
    CONTROL_PLANE_LABELS
        .iter()
        .any(|label| node.labels.contains_key(*label))
        || (!marker.is_empty() && node.name.contains(marker))
}

/// Outcome of a selection
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub node: NodeInfo,
    pub corrected_micro_watts: i64,
}

/// Picks the candidate with the lowest corrected wattage
#[derive(Clone)]
pub struct NodeSelector {
    node_store: NodePowerStore,
    history: WorkloadPowerHistory,
    ledger: PendingBindLedger,
    resolver: IpNodeResolver,
    cluster: Arc<dyn ClusterApi>,
    config: SelectorConfig,
}

impl NodeSelector {
    pub fn new(
        node_store: NodePowerStore,
        history: WorkloadPowerHistory,
        ledger: PendingBindLedger,
        resolver: IpNodeResolver,
        cluster: Arc<dyn ClusterApi>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            node_store,
            history,
            ledger,
            resolver,
            cluster,
            config,
        }
    }

    /// Choose the node to place `pod_name` on
    pub async fn select_node(&self, candidates: &[NodeInfo], pod_name: &str) -> Result<NodeInfo> {
        self.select(candidates, pod_name).await.map(|s| s.node)
    }

    /// Like [`select_node`](Self::select_node) but also reports the winning wattage
    pub async fn select(&self, candidates: &[NodeInfo], pod_name: &str) -> Result<Selection> {
        let measured = self.measured_by_node().await?;

        let pods = self.cluster.list_pods().await?;
        let seen_labels = self.history.seen_labels().await;
        let corrections = compute_corrections(&pods, &seen_labels, &self.history).await;

        debug!(
            pod = %pod_name,
            measured_nodes = measured.len(),
            candidates = candidates.len(),
            "Selecting node"
        );

        let mut best: Option<Selection> = None;

        for node in candidates {
            if is_control_plane(node, &self.config.control_plane_marker) {
                debug!(node = %node.name, "Skipping control-plane node");
                continue;
            }

            let Some(&micro_watts) = measured.get(node.name.as_str()) else {
                debug!(node = %node.name, "No telemetry for candidate node");
                continue;
            };

            let unmeasured = correction_for_node(&corrections, &node.name);
            let pending = self.ledger.correction_for(&node.name, &self.history).await;
            let corrected = micro_watts + unmeasured + pending;

            debug!(
                node = %node.name,
                measured = micro_watts,
                unmeasured = unmeasured,
                pending = pending,
                corrected = corrected,
                "Evaluated candidate node"
            );

            let replace = match &best {
                None => true,
                Some(current) => self
                    .config
                    .tie_break
                    .replaces(corrected, current.corrected_micro_watts),
            };
            if replace {
                best = Some(Selection {
                    node: node.clone(),
                    corrected_micro_watts: corrected,
                });
            }
        }

        match best {
            Some(selection) => {
                info!(
                    pod = %pod_name,
                    node = %selection.node.name,
                    corrected_micro_watts = selection.corrected_micro_watts,
                    "Selected node"
                );
                Ok(selection)
            }
            None => Err(SchedulerError::NoNodeFound(pod_name.to_string())),
        }
    }

    /// Measured wattage keyed by node name; the first reading per node wins
    async fn measured_by_node(&self) -> Result<HashMap<String, i64>> {
        let mut measured = HashMap::new();

        for reading in self.node_store.snapshot().await {
            match self.resolver.resolve(&reading.ip).await {
                Ok(node_name) => {
                    measured.entry(node_name).or_insert(reading.micro_watts);
                }
                Err(SchedulerError::UnknownAddress(ip)) => {
                    debug!(ip = %ip, "Could not correlate telemetry address with a node");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(measured)
    }
}
