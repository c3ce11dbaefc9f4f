//! Power telemetry ingestion
//!
//! Fetches Scaphandre metrics through the Prometheus query API and converts
//! them into node readings and workload samples.

mod client;
mod parser;

pub use client::PrometheusClient;
pub use parser::{parse_response, split_instance, MetricResult, QueryData, QueryResponse};

use crate::error::Result;
use crate::models::{NodeReading, INSTANCE_LABEL};
use async_trait::async_trait;
use serde::Deserialize;

/// Source of power telemetry
#[async_trait]
pub trait PowerSource: Send + Sync {
    /// Run an instant query for the named metric
    async fn query(&self, metric: &str) -> Result<QueryResponse>;
}

/// Metric names exported by Scaphandre
#[derive(Debug, Clone, Deserialize)]
pub struct MetricNames {
    #[serde(default = "default_host_watts")]
    pub host_watts: String,
    #[serde(default = "default_host_joules")]
    pub host_joules: String,
    #[serde(default = "default_process_watts")]
    pub process_watts: String,
    #[serde(default = "default_process_cpu")]
    pub process_cpu_percent: String,
}

fn default_host_watts() -> String {
    "scaph_host_power_microwatts".to_string()
}

fn default_host_joules() -> String {
    "scaph_host_energy_microjoules".to_string()
}

fn default_process_watts() -> String {
    "scaph_process_power_consumption_microwatts".to_string()
}

fn default_process_cpu() -> String {
    "scaph_process_cpu_usage_percentage".to_string()
}

impl Default for MetricNames {
    fn default() -> Self {
        Self {
            host_watts: default_host_watts(),
            host_joules: default_host_joules(),
            process_watts: default_process_watts(),
            process_cpu_percent: default_process_cpu(),
        }
    }
}

/// Build node readings from a host wattage response
///
/// Returns the readings and the shared scrape timestamp, or `None` when the
/// response carried no series at all.
pub fn node_readings(response: &QueryResponse) -> Option<(Vec<NodeReading>, f64)> {
    let timestamp = response.timestamp()?;

    let readings = response
        .samples()
        .into_iter()
        .map(|sample| {
            let (ip, port) = split_instance(sample.label(INSTANCE_LABEL).unwrap_or_default());
            NodeReading {
                ip,
                port,
                micro_watts: sample.micro_watts,
                timestamp: sample.timestamp,
            }
        })
        .collect();

    Some((readings, timestamp))
}
