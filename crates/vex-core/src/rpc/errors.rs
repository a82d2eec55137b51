use thiserror::Error;

/// Daemon is still loading its block index (`RPC_IN_WARMUP`).
pub const RPC_IN_WARMUP: i32 = -28;
/// Invalid address or key; also returned for unknown identities and transactions.
pub const RPC_INVALID_ADDRESS_OR_KEY: i32 = -5;
/// Invalid parameter; returned for block heights beyond the tip.
pub const RPC_INVALID_PARAMETER: i32 = -8;

/// Errors from a call to the full node.
///
/// Only [`RpcError::Unavailable`] is retried. A node error is a deterministic answer
/// and repeating the call returns the same answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RpcError {
    /// Connection refused, reset, or timed out, or the node answered 5xx without a
    /// JSON-RPC body.
    #[error("node unavailable: {0}")]
    Unavailable(String),

    /// Well-formed error response from the node.
    #[error("node error {code}: {message}")]
    NodeError { code: i32, message: String },

    /// Response body was not a JSON-RPC envelope, or the result did not decode.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl RpcError {
    /// Returns `true` if this error is transient and the call should be retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Returns `true` if the node reported that the requested object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NodeError { code: RPC_INVALID_ADDRESS_OR_KEY | RPC_INVALID_PARAMETER, .. }
        )
    }

    /// Classifies an error object from a JSON-RPC envelope.
    #[must_use]
    pub fn from_node(code: i32, message: String) -> Self {
        if code == RPC_IN_WARMUP {
            Self::Unavailable(format!("node warming up: {message}"))
        } else {
            Self::NodeError { code, message }
        }
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::NodeError { .. } => "node_error",
            Self::MalformedResponse(_) => "malformed",
        }
    }
}
