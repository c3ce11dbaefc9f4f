//! Scheduler configuration

use anyhow::{ensure, Result};
use scheduler_lib::orchestrator::OrchestratorConfig;
use scheduler_lib::selector::{SelectorConfig, TieBreak};
use scheduler_lib::telemetry::MetricNames;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Prometheus server that scrapes Scaphandre
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    /// `spec.schedulerName` of the pods this scheduler places
    #[serde(default = "default_scheduler_name")]
    pub scheduler_name: String,

    /// Kubeconfig path; in-cluster credentials when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Wait before placing a pod seen on the watch
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    #[serde(default = "default_pending_bind_max_age")]
    pub pending_bind_max_age_secs: u64,

    #[serde(default)]
    pub tie_break: TieBreak,

    #[serde(default = "default_control_plane_marker")]
    pub control_plane_marker: String,

    /// Rebuild the address-to-node cache when older than this
    #[serde(default)]
    pub resolver_max_age_secs: Option<u64>,

    /// Forget workloads unseen for this many refresh cycles
    #[serde(default)]
    pub workload_evict_after_cycles: Option<u64>,

    #[serde(default)]
    pub metrics: MetricNames,
}

fn default_prometheus_url() -> String {
    "http://192.168.221.2:9090".to_string()
}

fn default_scheduler_name() -> String {
    "kubepower".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_refresh_interval() -> u64 {
    1
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_settle_delay() -> u64 {
    2
}

fn default_pending_bind_max_age() -> u64 {
    14
}

fn default_control_plane_marker() -> String {
    "controller".to_string()
}

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(5);

impl SchedulerConfig {
    /// Load configuration from `KUBEPOWER_*` environment variables
    ///
    /// Nested metric names use a double underscore, e.g.
    /// `KUBEPOWER_METRICS__HOST_WATTS`.
    pub fn load() -> Result<Self> {
        Self::from_source(
            config::Environment::with_prefix("KUBEPOWER")
                .prefix_separator("_")
                .separator("__"),
        )
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder().add_source(source).build()?;
        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.refresh_interval_secs > 0,
            "refresh_interval_secs must be at least 1"
        );
        ensure!(
            self.sweep_interval_secs > 0,
            "sweep_interval_secs must be at least 1"
        );
        Ok(())
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            tie_break: self.tie_break,
            control_plane_marker: self.control_plane_marker.clone(),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            resubscribe_backoff: RESUBSCRIBE_BACKOFF,
        }
    }

    pub fn pending_bind_max_age(&self) -> Duration {
        Duration::from_secs(self.pending_bind_max_age_secs)
    }

    pub fn resolver_max_age(&self) -> Option<Duration> {
        self.resolver_max_age_secs.map(Duration::from_secs)
    }
}
