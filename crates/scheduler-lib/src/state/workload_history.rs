//! Exponentially averaged wattage per workload
//!
//! Every ingest cycle folds the cycle's per-workload average into the
//! stored value as `(cycle + previous) / 2`. A long-lived workload's value
//! therefore weighs the latest cycle 50%, the one before 25%, then 12.5%
//! and so on. Replicas of one workload observed in the same cycle are
//! averaged before that merge.

use crate::models::{PowerSample, WorkloadAverage, JOB_LABEL, POD_LABEL};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct HistoryInner {
    workloads: HashMap<String, WorkloadAverage>,
    seen_labels: HashSet<String>,
    fleet_average: i64,
    last_timestamp: f64,
    cycle: u64,
}

/// Per-cycle accumulator for one workload
#[derive(Debug, Default)]
struct CycleSum {
    total: i64,
    count: i64,
}

/// Table of smoothed per-workload wattage
#[derive(Debug, Clone, Default)]
pub struct WorkloadPowerHistory {
    inner: Arc<RwLock<HistoryInner>>,
    evict_after_cycles: Option<u64>,
}

impl WorkloadPowerHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop workloads that have not been observed for more than `cycles` ingests
    pub fn with_eviction(cycles: u64) -> Self {
        Self {
            inner: Arc::default(),
            evict_after_cycles: Some(cycles),
        }
    }

    /// Fold one cycle of process samples into the history
    ///
    /// Returns whether the sample timestamp advanced. A stalled or backward
    /// timestamp is logged; the samples are still merged.
    pub async fn ingest(&self, samples: &[PowerSample], timestamp: f64) -> bool {
        let mut per_cycle: HashMap<&str, CycleSum> = HashMap::new();
        let mut seen_labels = HashSet::new();
        let mut fleet_total: i64 = 0;

        for sample in samples {
            if let Some(pod) = sample.label(POD_LABEL) {
                seen_labels.insert(pod.to_string());
            }

            fleet_total += sample.micro_watts;

            let Some(job) = sample.label(JOB_LABEL) else {
                debug!(labels = ?sample.labels, "Sample has no job label");
                continue;
            };
            let sum = per_cycle.entry(job).or_default();
            sum.total += sample.micro_watts;
            sum.count += 1;
        }

        let mut inner = self.inner.write().await;

        let progressed = timestamp > inner.last_timestamp;
        if progressed {
            debug!(
                previous = inner.last_timestamp,
                current = timestamp,
                "Workload telemetry advanced"
            );
            inner.last_timestamp = timestamp;
        } else if timestamp == inner.last_timestamp {
            warn!(timestamp = timestamp, "Workload telemetry did not progress");
        } else {
            error!(
                previous = inner.last_timestamp,
                current = timestamp,
                "Workload telemetry time moved backward"
            );
        }

        inner.cycle += 1;
        let cycle = inner.cycle;

        for (job, sum) in per_cycle {
            let cycle_average = sum.total / sum.count;
            match inner.workloads.entry(job.to_string()) {
                Entry::Occupied(mut entry) => {
                    let entry = entry.get_mut();
                    entry.micro_watts = (cycle_average + entry.micro_watts) / 2;
                    entry.last_seen_cycle = cycle;
                    debug!(workload = %job, micro_watts = entry.micro_watts, "Updated workload average");
                }
                Entry::Vacant(slot) => {
                    info!(workload = %job, micro_watts = cycle_average, "Observed workload for the first time");
                    slot.insert(WorkloadAverage {
                        name: job.to_string(),
                        micro_watts: cycle_average,
                        last_seen_cycle: cycle,
                    });
                }
            }
        }

        if samples.is_empty() {
            warn!("Workload cycle had no samples, keeping previous fleet average");
        } else {
            inner.fleet_average = fleet_total / samples.len() as i64;
        }

        inner.seen_labels = seen_labels;

        if let Some(max_idle) = self.evict_after_cycles {
            let before = inner.workloads.len();
            inner
                .workloads
                .retain(|_, w| cycle.saturating_sub(w.last_seen_cycle) <= max_idle);
            let evicted = before - inner.workloads.len();
            if evicted > 0 {
                info!(evicted = evicted, "Evicted idle workloads from history");
            }
        }

        progressed
    }

    /// Smoothed wattage of a workload, if it has been observed
    pub async fn value_of(&self, workload: &str) -> Option<i64> {
        self.inner
            .read()
            .await
            .workloads
            .get(workload)
            .map(|w| w.micro_watts)
    }

    /// Average wattage over all samples of the last non-empty cycle
    pub async fn fleet_average(&self) -> i64 {
        self.inner.read().await.fleet_average
    }

    /// Pod labels present in the last ingested cycle
    pub async fn seen_labels(&self) -> HashSet<String> {
        self.inner.read().await.seen_labels.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.workloads.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.workloads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample(job: &str, pod: &str, micro_watts: i64) -> PowerSample {
        let mut labels = BTreeMap::new();
        labels.insert(JOB_LABEL.to_string(), job.to_string());
        labels.insert(POD_LABEL.to_string(), pod.to_string());
        PowerSample {
            labels,
            timestamp: 0.0,
            micro_watts,
        }
    }

    #[tokio::test]
    async fn test_first_observation_stored_as_is() {
        let history = WorkloadPowerHistory::new();
        history.ingest(&[sample("web", "web-1", 4000)], 1.0).await;

        assert_eq!(history.value_of("web").await, Some(4000));
        assert_eq!(history.value_of("db").await, None);
    }

    #[tokio::test]
    async fn test_exponential_merge() {
        let history = WorkloadPowerHistory::new();
        history.ingest(&[sample("web", "web-1", 1000)], 1.0).await;
        history.ingest(&[sample("web", "web-1", 2000)], 2.0).await;
        assert_eq!(history.value_of("web").await, Some(1500));

        history.ingest(&[sample("web", "web-1", 3001)], 3.0).await;
        // (3001 + 1500) / 2 truncates
        assert_eq!(history.value_of("web").await, Some(2250));
    }

    #[tokio::test]
    async fn test_constant_input_converges_without_overshoot() {
        let history = WorkloadPowerHistory::new();
        for t in 1..=30 {
            history
                .ingest(&[sample("batch", "batch-1", 100_000)], t as f64)
                .await;
            let value = history.value_of("batch").await.unwrap();
            assert!(value <= 100_000);
        }
        assert_eq!(history.value_of("batch").await, Some(100_000));
    }

    #[tokio::test]
    async fn test_convergence_from_lower_start_is_monotone() {
        let history = WorkloadPowerHistory::new();
        history.ingest(&[sample("batch", "batch-1", 0)], 1.0).await;

        let mut previous = 0;
        for t in 2..=25 {
            history
                .ingest(&[sample("batch", "batch-1", 100_000)], t as f64)
                .await;
            let value = history.value_of("batch").await.unwrap();
            assert!(value >= previous);
            assert!(value <= 100_000);
            previous = value;
        }
        assert!(previous > 99_990);
    }

    #[tokio::test]
    async fn test_replicas_merge_within_cycle() {
        let history = WorkloadPowerHistory::new();
        history
            .ingest(&[sample("web", "web-1", 100), sample("web", "web-2", 300)], 1.0)
            .await;
        assert_eq!(history.value_of("web").await, Some(200));

        // Per-cycle average (200) merges with prior value (200)
        history
            .ingest(&[sample("web", "web-1", 100), sample("web", "web-2", 300)], 2.0)
            .await;
        assert_eq!(history.value_of("web").await, Some(200));
    }

    #[tokio::test]
    async fn test_fleet_average_and_seen_labels() {
        let history = WorkloadPowerHistory::new();
        history
            .ingest(
                &[
                    sample("web", "web-1", 100),
                    sample("web", "web-2", 300),
                    sample("db", "db-0", 800),
                ],
                1.0,
            )
            .await;

        assert_eq!(history.fleet_average().await, 400);
        let seen = history.seen_labels().await;
        assert_eq!(seen.len(), 3);
        assert!(seen.contains("db-0"));

        // Empty cycle keeps the fleet average, clears the label set
        history.ingest(&[], 2.0).await;
        assert_eq!(history.fleet_average().await, 400);
        assert!(history.seen_labels().await.is_empty());
    }

    #[tokio::test]
    async fn test_time_progress_flag() {
        let history = WorkloadPowerHistory::new();
        assert!(history.ingest(&[sample("a", "a-1", 1)], 5.0).await);
        assert!(!history.ingest(&[sample("a", "a-1", 1)], 5.0).await);
        assert!(!history.ingest(&[sample("a", "a-1", 1)], 4.0).await);
        assert!(history.ingest(&[sample("a", "a-1", 1)], 6.0).await);
    }

    #[tokio::test]
    async fn test_eviction_of_idle_workloads() {
        let history = WorkloadPowerHistory::with_eviction(2);
        history.ingest(&[sample("short", "short-1", 10)], 1.0).await;
        history.ingest(&[sample("long", "long-1", 10)], 2.0).await;
        history.ingest(&[sample("long", "long-1", 10)], 3.0).await;
        assert_eq!(history.len().await, 2);

        history.ingest(&[sample("long", "long-1", 10)], 4.0).await;
        assert_eq!(history.value_of("short").await, None);
        assert_eq!(history.value_of("long").await, Some(10));
    }

    #[tokio::test]
    async fn test_no_eviction_by_default() {
        let history = WorkloadPowerHistory::new();
        history.ingest(&[sample("short", "short-1", 10)], 1.0).await;
        for t in 2..50 {
            history.ingest(&[sample("long", "long-1", 10)], t as f64).await;
        }
        assert_eq!(history.value_of("short").await, Some(10));
    }
}
