//! Corrections for bound pods that telemetry has not measured yet

use crate::models::{NodeCorrection, PodInfo};
use crate::state::WorkloadPowerHistory;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Estimate the unmeasured wattage each node carries
///
/// A bound pod whose name is missing from `seen_labels` has no telemetry
/// row yet. Its draw is estimated from its workload's history, or from the
/// fleet average when the workload has never been measured.
pub async fn compute_corrections(
    pods: &[PodInfo],
    seen_labels: &HashSet<String>,
    history: &WorkloadPowerHistory,
) -> Vec<NodeCorrection> {
    let fleet_average = history.fleet_average().await;
    let mut per_node: BTreeMap<&str, i64> = BTreeMap::new();

    for pod in pods {
        let Some(node_name) = pod.node_name.as_deref().filter(|n| !n.is_empty()) else {
            continue;
        };
        if seen_labels.contains(&pod.name) {
            continue;
        }

        let workload = pod.workload_name();
        let micro_watts = match history.value_of(workload).await {
            Some(value) => {
                debug!(pod = %pod.name, workload = %workload, micro_watts = value, "Estimated unmeasured pod from history");
                value
            }
            None => {
                debug!(pod = %pod.name, workload = %workload, micro_watts = fleet_average, "Estimated unmeasured pod from fleet average");
                fleet_average
            }
        };

        *per_node.entry(node_name).or_default() += micro_watts;
    }

    per_node
        .into_iter()
        .map(|(node_name, extra_micro_watts)| NodeCorrection {
            node_name: node_name.to_string(),
            extra_micro_watts,
        })
        .collect()
}

/// Correction for one node, zero when none applies
pub fn correction_for_node(corrections: &[NodeCorrection], node_name: &str) -> i64 {
    corrections
        .iter()
        .find(|c| c.node_name == node_name)
        .map(|c| c.extra_micro_watts)
        .unwrap_or(0)
}
