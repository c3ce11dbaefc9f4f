//! Latest per-node wattage snapshot

use crate::models::NodeReading;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

#[derive(Debug, Default)]
struct NodeStoreInner {
    readings: Vec<NodeReading>,
    last_timestamp: f64,
}

/// Holds the most recent set of node readings
///
/// The reading set and its timestamp are replaced together under one write
/// lock, so readers never pair new readings with a stale timestamp.
#[derive(Debug, Clone, Default)]
pub struct NodePowerStore {
    inner: Arc<RwLock<NodeStoreInner>>,
}

impl NodePowerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored readings, returning whether time progressed
    ///
    /// A timestamp older than the stored one is rejected and the previous
    /// readings are kept.
    pub async fn refresh(&self, readings: Vec<NodeReading>, timestamp: f64) -> bool {
        let mut inner = self.inner.write().await;

        if timestamp > inner.last_timestamp {
            debug!(
                previous = inner.last_timestamp,
                current = timestamp,
                nodes = readings.len(),
                "Node telemetry advanced"
            );
            inner.readings = readings;
            inner.last_timestamp = timestamp;
            true
        } else if timestamp == inner.last_timestamp {
            warn!(timestamp = timestamp, "Node telemetry did not progress");
            inner.readings = readings;
            false
        } else {
            error!(
                previous = inner.last_timestamp,
                current = timestamp,
                "Node telemetry time moved backward, keeping previous readings"
            );
            false
        }
    }

    /// Copy of the current readings
    pub async fn snapshot(&self) -> Vec<NodeReading> {
        self.inner.read().await.readings.clone()
    }

    pub async fn last_timestamp(&self) -> f64 {
        self.inner.read().await.last_timestamp
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.readings.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.readings.is_empty()
    }
}
