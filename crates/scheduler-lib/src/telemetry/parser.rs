//! Decoding of Prometheus instant-query responses
//!
//! The envelope is `{status, data: {resultType, result: [{metric, value}]}}`
//! where `value` is a `[timestamp, "<integer>"]` pair. Decoding the envelope
//! and parsing sample values are separate steps: a bad value only drops
//! that one sample.

use crate::error::{Result, SchedulerError};
use crate::models::PowerSample;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use tracing::warn;

/// Top-level query response
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<MetricResult>,
}

/// A single labelled series with its current value
#[derive(Debug, Clone, Deserialize)]
pub struct MetricResult {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// `(epoch seconds, value as string)`
    pub value: (f64, String),
}

impl MetricResult {
    pub fn timestamp(&self) -> f64 {
        self.value.0
    }

    /// Parse the raw value into integer micro-watts
    pub fn micro_watts(&self) -> Result<i64> {
        let raw = self.value.1.trim();
        raw.parse::<i64>().map_err(|e| SchedulerError::Parse {
            value: raw.to_string(),
            reason: e.to_string(),
        })
    }
}

impl QueryResponse {
    /// Timestamp of the response; all series share the scrape timestamp
    pub fn timestamp(&self) -> Option<f64> {
        self.data.result.first().map(MetricResult::timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.data.result.is_empty()
    }

    /// Convert every series into a [`PowerSample`], skipping unparseable values
    pub fn samples(&self) -> Vec<PowerSample> {
        self.data
            .result
            .iter()
            .filter_map(|series| match series.micro_watts() {
                Ok(micro_watts) => Some(PowerSample {
                    labels: series.metric.clone(),
                    timestamp: series.timestamp(),
                    micro_watts,
                }),
                Err(e) => {
                    warn!(labels = ?series.metric, error = %e, "Skipping unparseable sample");
                    None
                }
            })
            .collect()
    }
}

/// Decode a raw response body, validating the envelope
pub fn parse_response(bytes: &[u8]) -> Result<QueryResponse> {
    let response: QueryResponse = serde_json::from_slice(bytes)
        .map_err(|e| SchedulerError::MalformedResponse(e.to_string()))?;

    if response.status != "success" {
        return Err(SchedulerError::MalformedResponse(format!(
            "unexpected status '{}'",
            response.status
        )));
    }

    if response.data.result_type != "vector" {
        return Err(SchedulerError::MalformedResponse(format!(
            "unexpected result type '{}'",
            response.data.result_type
        )));
    }

    Ok(response)
}

/// Split an `ip[:port]` instance label into its parts
///
/// IPv6 addresses come bracketed when a port is present (`[fd00::1]:8080`)
/// and bare otherwise. Host names fall back to a split on the last `:`.
pub fn split_instance(instance: &str) -> (String, Option<u16>) {
    if let Ok(addr) = instance.parse::<SocketAddr>() {
        return (addr.ip().to_string(), Some(addr.port()));
    }
    if let Ok(ip) = instance.parse::<IpAddr>() {
        return (ip.to_string(), None);
    }

    match instance.rsplit_once(':') {
        Some((host, port)) => {
            let port = match port.parse::<u16>() {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(instance = %instance, error = %e, "Could not parse instance port");
                    None
                }
            };
            (host.trim_start_matches('[').trim_end_matches(']').to_string(), port)
        }
        None => (instance.to_string(), None),
    }
}
