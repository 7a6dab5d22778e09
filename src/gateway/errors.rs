//! Error taxonomy for the protocol query gateway.

use thiserror::Error;

/// Errors surfaced by the protocol query gateway.
///
/// The split that matters operationally: transport-level failures are
/// retried on the same node and then failed over, while an application-level
/// rejection is a terminal outcome for the whole call — the operation was
/// refused, not the node.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Network-level failure talking to one node (connect error, timeout,
    /// non-2xx with no parseable error body).
    #[error("transport error (node: {node}): {message}")]
    Transport { node: String, message: String },

    /// The node answered with a well-formed application error. Carries the
    /// remote message verbatim; never failed over and never retried.
    #[error("compose rejected by {node}: {message}")]
    Application { node: String, message: String },

    /// A node answered 2xx but the payload was not usable.
    #[error("malformed response from {node}: {message}")]
    MalformedResponse { node: String, message: String },

    /// Every configured node was exhausted without a terminal outcome.
    #[error("all {total} provider nodes unavailable after {attempts_per_node} attempts each")]
    AllNodesUnavailable { total: usize, attempts_per_node: u32 },

    /// Invalid gateway construction or request parameters.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Whether retrying the whole call might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { .. } => true,
            GatewayError::MalformedResponse { .. } => true,
            GatewayError::AllNodesUnavailable { .. } => true,
            GatewayError::Application { .. } => false,
            GatewayError::Configuration(_) => false,
        }
    }

    /// Error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::Transport { .. } => "transport",
            GatewayError::Application { .. } => "application",
            GatewayError::MalformedResponse { .. } => "malformed",
            GatewayError::AllNodesUnavailable { .. } => "exhausted",
            GatewayError::Configuration(_) => "config",
        }
    }

    /// The node associated with this error, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            GatewayError::Transport { node, .. } => Some(node),
            GatewayError::Application { node, .. } => Some(node),
            GatewayError::MalformedResponse { node, .. } => Some(node),
            _ => None,
        }
    }
}
