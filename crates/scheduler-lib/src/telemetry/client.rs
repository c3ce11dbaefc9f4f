//! HTTP client for the Prometheus query API

use super::parser::{parse_response, QueryResponse};
use super::PowerSource;
use crate::error::{Result, SchedulerError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Client for `GET <host>/api/v1/query?query=<metric>`
pub struct PrometheusClient {
    client: Client,
    base_url: Url,
}

impl PrometheusClient {
    /// Create a new client for the given Prometheus base URL
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SchedulerError::Transport(format!("failed to create HTTP client: {e}")))?;

        let base_url = Url::parse(base_url)
            .map_err(|e| SchedulerError::Transport(format!("invalid Prometheus URL: {e}")))?;

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl PowerSource for PrometheusClient {
    async fn query(&self, metric: &str) -> Result<QueryResponse> {
        let url = self
            .base_url
            .join("api/v1/query")
            .map_err(|e| SchedulerError::Transport(format!("invalid query path: {e}")))?;

        let response = self
            .client
            .get(url)
            .query(&[("query", metric)])
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(format!("query '{metric}' failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchedulerError::Transport(format!(
                "query '{metric}' returned status {status}"
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            SchedulerError::Transport(format!("query '{metric}' failed to read body: {e}"))
        })?;
        debug!(query = %metric, bytes = body.len(), "Received query response");

        parse_response(&body)
    }
}
