/// Error types for flow execution
///
/// Every variant that originates inside a node carries the node id so a failed
/// traversal can be traced back to the exact step in the authored graph.
/// Store and service layers keep using `anyhow::Result`; the engine surface
/// returns `FlowError` so callers can match on what went wrong.

use thiserror::Error;

/// Boxed error source used for failures coming from pluggable stores and sinks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced while traversing a flow graph
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("node '{node_id}': invalid url '{url}': {source}")]
    InvalidUrl {
        node_id: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("node '{node_id}': invalid HTTP method '{method}'")]
    InvalidMethod { node_id: String, method: String },

    #[error("node '{node_id}': request timed out after {timeout_ms}ms")]
    Timeout { node_id: String, timeout_ms: u64 },

    #[error("node '{node_id}': request failed: {source}")]
    Http {
        node_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("node '{node_id}': response body is not valid JSON: {source}")]
    InvalidResponse {
        node_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The suspend sink failed to persist the paused execution
    #[error("node '{node_id}': failed to persist suspension: {source}")]
    Suspend {
        node_id: String,
        #[source]
        source: BoxError,
    },

    #[error("node '{node_id}': conversation store error: {source}")]
    Store {
        node_id: String,
        #[source]
        source: BoxError,
    },

    #[error("node '{node_id}' has unknown type '{type_name}'")]
    UnknownNodeType { node_id: String, type_name: String },

    #[error("node '{node_id}' ({node_type}) is missing required field '{field}'")]
    InvalidConfig {
        node_id: String,
        node_type: String,
        field: String,
    },

    #[error("node '{node_id}': unknown condition operator '{op}'")]
    UnknownOperator { node_id: String, op: String },

    #[error("edge '{from}' -> '{to}' points at a node that does not exist")]
    DanglingEdge { from: String, to: String },

    #[error("traversal from '{start}' exceeded {limit} steps")]
    StepLimitExceeded { start: String, limit: usize },
}

impl FlowError {
    /// Wrap a suspend sink failure for the given delay node
    pub fn suspend(node_id: &str, source: anyhow::Error) -> Self {
        Self::Suspend {
            node_id: node_id.to_string(),
            source: source.into(),
        }
    }

    /// Wrap a conversation store failure for the given node
    pub fn store(node_id: &str, source: anyhow::Error) -> Self {
        Self::Store {
            node_id: node_id.to_string(),
            source: source.into(),
        }
    }

    /// Classify a reqwest failure, separating timeouts from other transport errors
    pub fn http(node_id: &str, timeout_ms: u64, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                node_id: node_id.to_string(),
                timeout_ms,
            }
        } else {
            Self::Http {
                node_id: node_id.to_string(),
                source,
            }
        }
    }

    /// Node id the error is attributed to, when there is one
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::InvalidUrl { node_id, .. }
            | Self::InvalidMethod { node_id, .. }
            | Self::Timeout { node_id, .. }
            | Self::Http { node_id, .. }
            | Self::InvalidResponse { node_id, .. }
            | Self::Suspend { node_id, .. }
            | Self::Store { node_id, .. }
            | Self::UnknownNodeType { node_id, .. }
            | Self::InvalidConfig { node_id, .. }
            | Self::UnknownOperator { node_id, .. } => Some(node_id),
            Self::DanglingEdge { .. } | Self::StepLimitExceeded { .. } => None,
        }
    }
}
