//! In-memory cluster and telemetry doubles for unit tests

use crate::cluster::{node_fits, ClusterApi};
use crate::error::{Result, SchedulerError};
use crate::models::{NodeInfo, NodeReading, PodInfo, APP_LABEL};
use crate::telemetry::{parse_response, PowerSource, QueryResponse};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub fn pod(name: &str, app: &str) -> PodInfo {
    PodInfo {
        name: name.to_string(),
        namespace: "default".to_string(),
        labels: BTreeMap::from([(APP_LABEL.to_string(), app.to_string())]),
        scheduler_name: Some("kubepower".to_string()),
        ..Default::default()
    }
}

pub fn bound_pod(name: &str, app: &str, node: &str, ip: Option<&str>) -> PodInfo {
    PodInfo {
        node_name: Some(node.to_string()),
        pod_ip: ip.map(str::to_string),
        ..pod(name, app)
    }
}

/// Exporter pod whose IP identifies `node` in telemetry
pub fn exporter_pod(node: &str, ip: &str) -> PodInfo {
    bound_pod(&format!("scaphandre-{node}"), "scaphandre", node, Some(ip))
}

pub fn reading(ip: &str, micro_watts: i64) -> NodeReading {
    NodeReading {
        ip: ip.to_string(),
        port: Some(8080),
        micro_watts,
        timestamp: 1.0,
    }
}

#[derive(Default)]
pub struct MockCluster {
    pub pods: Mutex<Vec<PodInfo>>,
    pub unscheduled: Mutex<Vec<PodInfo>>,
    pub nodes: Mutex<Vec<NodeInfo>>,
    pub binds: Mutex<Vec<(String, String)>>,
    pub conflict_pods: Mutex<Vec<String>>,
    pub watch_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<PodInfo>>>>,
    pub list_calls: AtomicUsize,
    pub fail_listing: Mutex<bool>,
}

impl MockCluster {
    pub fn new(pods: Vec<PodInfo>, nodes: Vec<NodeInfo>) -> Self {
        Self {
            pods: Mutex::new(pods),
            nodes: Mutex::new(nodes),
            ..Default::default()
        }
    }

    pub fn set_unscheduled(&self, pods: Vec<PodInfo>) {
        *self.unscheduled.lock().unwrap() = pods;
    }

    pub fn reject_bind_of(&self, pod_name: &str) {
        self.conflict_pods.lock().unwrap().push(pod_name.to_string());
    }

    /// Returns the sender that feeds the next watch stream
    pub fn watch_channel(&self) -> mpsc::UnboundedSender<Result<PodInfo>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.watch_rx.lock().unwrap() = Some(rx);
        tx
    }

    pub fn bound(&self) -> Vec<(String, String)> {
        self.binds.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_pods(&self) -> Result<Vec<PodInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_listing.lock().unwrap() {
            return Err(SchedulerError::Transport("api server unreachable".into()));
        }
        Ok(self.pods.lock().unwrap().clone())
    }

    async fn unscheduled_pods(&self) -> Result<Vec<PodInfo>> {
        if *self.fail_listing.lock().unwrap() {
            return Err(SchedulerError::Transport("api server unreachable".into()));
        }
        Ok(self.unscheduled.lock().unwrap().clone())
    }

    async fn watch_unscheduled(&self) -> Result<BoxStream<'static, Result<PodInfo>>> {
        let rx = self.watch_rx.lock().unwrap().take();
        match rx {
            Some(rx) => Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
            None => Err(SchedulerError::Cluster("no watch configured".into())),
        }
    }

    async fn fit(&self, pod: &PodInfo) -> Result<Vec<NodeInfo>> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| node_fits(pod, n))
            .cloned()
            .collect())
    }

    async fn bind(&self, pod: &PodInfo, node: &NodeInfo) -> Result<()> {
        if self.conflict_pods.lock().unwrap().contains(&pod.name) {
            return Err(SchedulerError::BindConflict {
                pod: pod.name.clone(),
                node: node.name.clone(),
                reason: "pod already assigned".into(),
            });
        }
        self.binds
            .lock()
            .unwrap()
            .push((pod.name.clone(), node.name.clone()));

        self.unscheduled
            .lock()
            .unwrap()
            .retain(|p| p.name != pod.name);

        let mut pods = self.pods.lock().unwrap();
        let mut bound = pod.clone();
        bound.node_name = Some(node.name.clone());
        pods.push(bound);
        Ok(())
    }
}

/// Telemetry source serving canned response bodies per metric
#[derive(Default)]
pub struct MockPowerSource {
    bodies: Mutex<HashMap<String, String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockPowerSource {
    pub fn set(&self, metric: &str, body: impl Into<String>) {
        self.bodies
            .lock()
            .unwrap()
            .insert(metric.to_string(), body.into());
    }

    pub fn calls(&self, metric: &str) -> usize {
        self.calls.lock().unwrap().get(metric).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PowerSource for MockPowerSource {
    async fn query(&self, metric: &str) -> Result<QueryResponse> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(metric.to_string())
            .or_default() += 1;

        let body = self.bodies.lock().unwrap().get(metric).cloned();
        match body {
            Some(body) => parse_response(body.as_bytes()),
            None => Err(SchedulerError::Transport(format!("no response for {metric}"))),
        }
    }
}

/// Response body in Prometheus vector format
pub fn vector_body(timestamp: f64, series: &[(&[(&str, &str)], &str)]) -> String {
    let result: Vec<serde_json::Value> = series
        .iter()
        .map(|(labels, value)| {
            let metric: serde_json::Map<String, serde_json::Value> = labels
                .iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect();
            serde_json::json!({ "metric": metric, "value": [timestamp, value] })
        })
        .collect();

    serde_json::json!({
        "status": "success",
        "data": { "resultType": "vector", "result": result }
    })
    .to_string()
}
