//! Proxy-level error types.

use crate::types::RequestError;

/// Terminal failure of one coalesced dispatch attempt.
///
/// Cloneable so the coalescer can broadcast the same failure to every
/// awaiter. Upstream JSON-RPC *error envelopes* are not represented here -
/// they are forwarded to callers as responses.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// Primary and fallback (or primary alone) exhausted.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// A bug-shaped failure inside the proxy itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors surfaced to the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] DispatchError),
}

impl ProxyError {
    /// JSON-RPC error code for this failure. `UnknownNetwork` is an HTTP-level
    /// 404 and maps to the invalid-request code inside the JSON body. An
    /// exhausted upstream is `-32000`; a failure inside the proxy itself is
    /// `-32603`.
    #[must_use]
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) | Self::UnknownNetwork(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Upstream(DispatchError::Unavailable(_)) => -32000,
            Self::Upstream(DispatchError::Internal(_)) => -32603,
        }
    }
}

impl From<RequestError> for ProxyError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::BadParams => Self::InvalidParams(err.to_string()),
            RequestError::BadVersion | RequestError::EmptyMethod => {
                Self::InvalidRequest(err.to_string())
            }
        }
    }
}
