//! [`ClusterApi`] backed by the Kubernetes API server

use super::ClusterApi;
use crate::error::{Result, SchedulerError};
use crate::models::{NodeInfo, PodInfo};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Config};
use std::path::PathBuf;
use tracing::{debug, info};

/// Build a client from an explicit kubeconfig, or from the in-cluster
/// service account / default kubeconfig when none is given
pub async fn init_kube_client(kubeconfig: Option<PathBuf>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
                SchedulerError::Cluster(format!(
                    "failed to read kubeconfig {}: {e}",
                    path.display()
                ))
            })?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    SchedulerError::Cluster(format!(
                        "failed to create config from kubeconfig {}: {e}",
                        path.display()
                    ))
                })?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

/// Kubernetes-backed cluster access for a named scheduler
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    scheduler_name: String,
}

impl KubeCluster {
    pub fn new(client: Client, scheduler_name: impl Into<String>) -> Self {
        Self {
            client,
            scheduler_name: scheduler_name.into(),
        }
    }

    fn unscheduled_selector(&self) -> String {
        format!("spec.nodeName=,spec.schedulerName={}", self.scheduler_name)
    }

    fn all_pods(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_pods(&self) -> Result<Vec<PodInfo>> {
        let pods = self.all_pods().list(&ListParams::default()).await?;
        Ok(pods.items.into_iter().map(pod_info).collect())
    }

    async fn unscheduled_pods(&self) -> Result<Vec<PodInfo>> {
        let params = ListParams::default().fields(&self.unscheduled_selector());
        let pods = self.all_pods().list(&params).await?;
        debug!(count = pods.items.len(), "Listed unscheduled pods");
        Ok(pods.items.into_iter().map(pod_info).collect())
    }

    async fn watch_unscheduled(&self) -> Result<BoxStream<'static, Result<PodInfo>>> {
        let config = watcher::Config::default().fields(&self.unscheduled_selector());
        info!(scheduler = %self.scheduler_name, "Watching for unscheduled pods");

        Ok(pod_events(watcher::watcher(self.all_pods(), config)))
    }

    async fn fit(&self, pod: &PodInfo) -> Result<Vec<NodeInfo>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let nodes = nodes.list(&ListParams::default()).await?;

        Ok(nodes
            .items
            .into_iter()
            .map(node_info)
            .filter(|node| node_fits(pod, node))
            .collect())
    }

    async fn bind(&self, pod: &PodInfo, node: &NodeInfo) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);

        let binding = Binding {
            metadata: ObjectMeta {
                name: Some(pod.name.clone()),
                namespace: Some(pod.namespace.clone()),
                ..Default::default()
            },
            target: ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("Node".to_string()),
                name: Some(node.name.clone()),
                ..Default::default()
            },
        };
        let data = serde_json::to_vec(&binding)
            .map_err(|e| SchedulerError::Cluster(format!("failed to encode binding: {e}")))?;

        match pods
            .create_subresource::<serde_json::Value>("binding", &pod.name, &PostParams::default(), data)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Err(SchedulerError::BindConflict {
                    pod: pod.name.clone(),
                    node: node.name.clone(),
                    reason: response.message,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Shape raw watcher events into pods, backing off between failures
///
/// The watcher re-lists immediately after an error, so a persistent failure
/// would otherwise spin against the API server.
fn pod_events<S>(events: S) -> BoxStream<'static, Result<PodInfo>>
where
    S: Stream<Item = watcher::Result<watcher::Event<Pod>>> + Send + 'static,
{
    events
        .default_backoff()
        .applied_objects()
        .map(|event| {
            event
                .map(pod_info)
                .map_err(|e| SchedulerError::Cluster(format!("watch stream error: {e}")))
        })
        .boxed()
}

/// Convert an API pod into the scheduler's view
pub(crate) fn pod_info(pod: Pod) -> PodInfo {
    let metadata = pod.metadata;
    let spec = pod.spec.unwrap_or_default();

    PodInfo {
        name: metadata.name.unwrap_or_default(),
        namespace: metadata.namespace.unwrap_or_else(|| "default".to_string()),
        node_name: spec.node_name.filter(|n| !n.is_empty()),
        pod_ip: pod.status.and_then(|s| s.pod_ip).filter(|ip| !ip.is_empty()),
        labels: metadata.labels.unwrap_or_default(),
        node_selector: spec.node_selector.unwrap_or_default(),
        scheduler_name: spec.scheduler_name,
    }
}

/// Convert an API node into the scheduler's view
pub(crate) fn node_info(node: Node) -> NodeInfo {
    let ready = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false);

    NodeInfo {
        name: node.metadata.name.unwrap_or_default(),
        labels: node.metadata.labels.unwrap_or_default(),
        ready,
        unschedulable: node.spec.and_then(|s| s.unschedulable).unwrap_or(false),
    }
}

/// Whether the node is ready, schedulable and satisfies the pod's node selector
pub fn node_fits(pod: &PodInfo, node: &NodeInfo) -> bool {
    node.ready
        && !node.unschedulable
        && pod
            .node_selector
            .iter()
            .all(|(key, value)| node.labels.get(key) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeSpec, NodeStatus, PodSpec, PodStatus};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn api_node(name: &str, ready: &str, unschedulable: Option<bool>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([("disk".to_string(), "ssd".to_string())])),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable,
                ..Default::default()
            }),
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_pod_info_conversion() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-7c9f-x2k4p".to_string()),
                namespace: Some("shop".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("worker-2".to_string()),
                scheduler_name: Some("kubepower".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.244.1.17".to_string()),
                ..Default::default()
            }),
        };

        let info = pod_info(pod);
        assert_eq!(info.name, "web-7c9f-x2k4p");
        assert_eq!(info.namespace, "shop");
        assert_eq!(info.node_name.as_deref(), Some("worker-2"));
        assert_eq!(info.pod_ip.as_deref(), Some("10.244.1.17"));
        assert_eq!(info.workload_name(), "web");
        assert_eq!(info.scheduler_name.as_deref(), Some("kubepower"));
    }

    #[test]
    fn test_pod_info_defaults_for_pending_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("job-1".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(String::new()),
                ..Default::default()
            }),
            status: None,
        };

        let info = pod_info(pod);
        assert_eq!(info.namespace, "default");
        assert!(info.node_name.is_none());
        assert!(info.pod_ip.is_none());
        assert!(!info.is_bound());
    }

    #[test]
    fn test_node_info_readiness() {
        assert!(node_info(api_node("worker-1", "True", None)).ready);
        assert!(!node_info(api_node("worker-1", "False", None)).ready);
        assert!(node_info(api_node("worker-1", "True", Some(true))).unschedulable);
    }

    #[test]
    fn test_node_fits() {
        let node = node_info(api_node("worker-1", "True", None));
        let mut pod = PodInfo::default();
        assert!(node_fits(&pod, &node));

        pod.node_selector
            .insert("disk".to_string(), "ssd".to_string());
        assert!(node_fits(&pod, &node));

        pod.node_selector
            .insert("gpu".to_string(), "true".to_string());
        assert!(!node_fits(&pod, &node));

        let cordoned = node_info(api_node("worker-2", "True", Some(true)));
        assert!(!node_fits(&PodInfo::default(), &cordoned));

        let not_ready = node_info(api_node("worker-3", "Unknown", None));
        assert!(!node_fits(&PodInfo::default(), &not_ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_errors_are_backed_off() {
        let forbidden = futures::stream::repeat_with(|| {
            Err::<watcher::Event<Pod>, _>(watcher::Error::WatchError(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "pods is forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            }))
        });
        let mut stream = pod_events(forbidden);

        let started = tokio::time::Instant::now();
        for _ in 0..10 {
            assert!(matches!(
                stream.next().await,
                Some(Err(SchedulerError::Cluster(_)))
            ));
        }
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_watch_events_become_pods() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let events = futures::stream::iter(vec![Ok(watcher::Event::Applied(pod))]);

        let pods: Vec<_> = pod_events(events).collect().await;
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].as_ref().unwrap().name, "web-1");
    }
}
