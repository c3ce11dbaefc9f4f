//! Error taxonomy for the scheduling engine

use thiserror::Error;

/// Errors produced by the scheduling engine and its adapters
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Network or HTTP failure reaching telemetry or the cluster API
    #[error("transport error: {0}")]
    Transport(String),

    /// Response payload did not match the expected envelope
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A single sample value could not be parsed
    #[error("failed to parse sample value '{value}': {reason}")]
    Parse { value: String, reason: String },

    /// The resolver has no node for the reported address
    #[error("no node known for address {0}")]
    UnknownAddress(String),

    /// The candidate filter returned no nodes for the pod
    #[error("no node fulfils the criteria for pod {0}")]
    NoEligibleNodes(String),

    /// None of the candidate nodes has a power measurement
    #[error("no measured node found for pod {0}")]
    NoNodeFound(String),

    /// The bind call was rejected by the cluster
    #[error("bind of pod {pod} to node {node} rejected: {reason}")]
    BindConflict {
        pod: String,
        node: String,
        reason: String,
    },

    /// Any other cluster API failure
    #[error("cluster api error: {0}")]
    Cluster(String),
}

impl SchedulerError {
    /// Errors that only mean "try again next cycle"
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Transport(_)
                | SchedulerError::NoEligibleNodes(_)
                | SchedulerError::NoNodeFound(_)
        )
    }

    /// Short stable name, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::Transport(_) => "transport",
            SchedulerError::MalformedResponse(_) => "malformed_response",
            SchedulerError::Parse { .. } => "parse",
            SchedulerError::UnknownAddress(_) => "unknown_address",
            SchedulerError::NoEligibleNodes(_) => "no_eligible_nodes",
            SchedulerError::NoNodeFound(_) => "no_node_found",
            SchedulerError::BindConflict { .. } => "bind_conflict",
            SchedulerError::Cluster(_) => "cluster",
        }
    }
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        SchedulerError::Transport(err.to_string())
    }
}

impl From<kube::Error> for SchedulerError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::HyperError(e) => SchedulerError::Transport(e.to_string()),
            kube::Error::Service(e) => SchedulerError::Transport(e.to_string()),
            other => SchedulerError::Cluster(other.to_string()),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SchedulerError>;
