//! Correlates telemetry host addresses with node names
//!
//! Scaphandre reports each host by the address its exporter pod listens
//! on. The exporter runs as a DaemonSet, so listing every pod and mapping
//! pod IP to assigned node gives the address-to-node table.

use crate::cluster::ClusterApi;
use crate::error::{Result, SchedulerError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ResolverCache {
    map: HashMap<String, String>,
    built_at: Option<Instant>,
    rebuilds: u64,
}

/// Lazily built address → node name cache
#[derive(Clone)]
pub struct IpNodeResolver {
    cluster: Arc<dyn ClusterApi>,
    cache: Arc<Mutex<ResolverCache>>,
    max_age: Option<Duration>,
}

impl IpNodeResolver {
    /// Resolver that rebuilds only when its cache is empty or invalidated
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            cache: Arc::new(Mutex::new(ResolverCache::default())),
            max_age: None,
        }
    }

    /// Also rebuild when the cache is older than `max_age`
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    /// Node name for a telemetry address
    pub async fn resolve(&self, address: &str) -> Result<String> {
        let mut cache = self.cache.lock().await;

        if self.needs_rebuild(&cache) {
            self.rebuild(&mut cache).await?;
        }

        cache
            .map
            .get(address)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownAddress(address.to_string()))
    }

    /// Clear the cache so the next lookup rebuilds it
    pub async fn invalidate(&self) {
        let mut cache = self.cache.lock().await;
        cache.map.clear();
        cache.built_at = None;
        debug!("Invalidated address-to-node cache");
    }

    /// Number of rebuilds performed so far
    pub async fn rebuild_count(&self) -> u64 {
        self.cache.lock().await.rebuilds
    }

    fn needs_rebuild(&self, cache: &ResolverCache) -> bool {
        if cache.map.is_empty() {
            return true;
        }
        match (self.max_age, cache.built_at) {
            (Some(max_age), Some(built_at)) => built_at.elapsed() >= max_age,
            _ => false,
        }
    }

    async fn rebuild(&self, cache: &mut ResolverCache) -> Result<()> {
        let pods = self.cluster.list_pods().await?;
        let mut map = HashMap::new();

        for pod in pods {
            let (Some(ip), Some(node)) = (pod.pod_ip, pod.node_name) else {
                continue;
            };
            if let Some(previous) = map.get(&ip) {
                if previous != &node {
                    warn!(ip = %ip, previous = %previous, node = %node, "Remapping address to a different node");
                }
            }
            map.insert(ip, node);
        }

        info!(entries = map.len(), "Rebuilt address-to-node cache");
        cache.map = map;
        cache.built_at = Some(Instant::now());
        cache.rebuilds += 1;
        Ok(())
    }
}
