//! Cluster API access
//!
//! The engine talks to the cluster only through [`ClusterApi`]. The
//! production implementation is [`KubeCluster`]; tests use in-memory mocks.

mod kube_cluster;

pub use kube_cluster::{init_kube_client, node_fits, KubeCluster};

use crate::error::Result;
use crate::models::{NodeInfo, PodInfo};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Operations the scheduler needs from the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List every pod in the cluster
    async fn list_pods(&self) -> Result<Vec<PodInfo>>;

    /// List pods assigned to this scheduler that have no node yet
    async fn unscheduled_pods(&self) -> Result<Vec<PodInfo>>;

    /// Stream pods that become unscheduled
    ///
    /// The stream ends when the underlying watch ends; callers re-subscribe.
    async fn watch_unscheduled(&self) -> Result<BoxStream<'static, Result<PodInfo>>>;

    /// Candidate nodes that satisfy the pod's placement constraints
    async fn fit(&self, pod: &PodInfo) -> Result<Vec<NodeInfo>>;

    /// Bind the pod to the node
    async fn bind(&self, pod: &PodInfo, node: &NodeInfo) -> Result<()>;
}
