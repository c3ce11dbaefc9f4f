//! Core data models for the scheduler

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label carrying the workload (job) name on process samples
pub const JOB_LABEL: &str = "job";
/// Label carrying the pod name on process samples
pub const POD_LABEL: &str = "pod";
/// Label carrying the `ip[:port]` of the exporter on host samples
pub const INSTANCE_LABEL: &str = "instance";
/// Pod label naming the template a replica was created from
pub const APP_LABEL: &str = "app";

/// One telemetry reading with its value already parsed to micro-watts
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSample {
    pub labels: BTreeMap<String, String>,
    pub timestamp: f64,
    pub micro_watts: i64,
}

impl PowerSample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Latest wattage of a single host as reported by telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReading {
    pub ip: String,
    /// `None` when the instance label carried no port
    pub port: Option<u16>,
    pub micro_watts: i64,
    pub timestamp: f64,
}

/// Smoothed wattage of a logical workload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadAverage {
    pub name: String,
    pub micro_watts: i64,
    /// Ingest cycle in which this workload was last observed
    pub last_seen_cycle: u64,
}

/// Placement decision not yet visible in telemetry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBind {
    pub workload: String,
    pub node_name: String,
    /// Unix seconds at which the bind was recorded
    pub recorded_at: i64,
}

/// Extra predicted wattage for a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCorrection {
    pub node_name: String,
    pub extra_micro_watts: i64,
}

/// Scheduler view of a pod
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: Option<String>,
    pub pod_ip: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub node_selector: BTreeMap<String, String>,
    pub scheduler_name: Option<String>,
}

impl PodInfo {
    /// Template name of the pod, falling back to the pod name itself
    pub fn workload_name(&self) -> &str {
        self.labels
            .get(APP_LABEL)
            .map(String::as_str)
            .unwrap_or(&self.name)
    }

    /// Whether the pod is assigned to a node
    pub fn is_bound(&self) -> bool {
        self.node_name.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// Scheduler view of a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ready: bool,
    pub unschedulable: bool,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            ready: true,
            unschedulable: false,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}
