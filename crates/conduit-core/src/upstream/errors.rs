//! Upstream error taxonomy.
//!
//! The dispatcher's retry and failover decisions all hang off this
//! classification:
//!
//! - **Transport-fatal** (DNS, connection refused, TLS): not retryable,
//!   forces fallback consideration.
//! - **Transport-transient** (timeout, 5xx, 429): retryable.
//! - **Client error** (other 4xx): not retryable; a configured fallback may
//!   still be tried.
//! - **RPC error** (HTTP 200 with an `error` field): carried as a parsed
//!   envelope and inspected by the dispatcher, never classified here.

use crate::types::JsonRpcError;
use thiserror::Error;

/// Failures raised by the upstream HTTP client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured timeout.
    #[error("request timeout")]
    Timeout,

    /// Connection could not be established (DNS, refused, TLS).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Non-success HTTP status from the upstream.
    #[error("http status {0}: {1}")]
    HttpStatus(u16, String),

    /// Body was not a parseable JSON-RPC envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Per-network concurrency budget exhausted.
    #[error("upstream concurrency limit reached for network {0}")]
    ConcurrencyLimit(String),
}

impl UpstreamError {
    /// Transient errors are worth retrying on the fallback.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::HttpStatus(status, _) => (500..=599).contains(status) || *status == 429,
            Self::ConnectionFailed(_)
            | Self::InvalidResponse(_)
            | Self::ConcurrencyLimit(_) => false,
        }
    }

    /// Transport-fatal errors: the endpoint itself is unreachable.
    #[must_use]
    pub fn is_transport_fatal(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_))
    }

    /// Static label for metrics.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpStatus(_, _) => "http_status",
            Self::InvalidResponse(_) => "invalid_response",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
        }
    }
}

/// Message substrings signalling that a node lacks the requested archival
/// state. Matched case-insensitively.
const HISTORICAL_STATE_MARKERS: &[&str] = &[
    "missing trie node",
    "header not found",
    "unknown block",
    "state not available",
    "historical state",
    "is not available",
];

/// True when an RPC error indicates missing historical state - the signature
/// that makes a fallback attempt worthwhile even though the primary answered.
#[must_use]
pub fn is_historical_state_error(error: &JsonRpcError) -> bool {
    if error.code == -32801 {
        return true;
    }
    let message = error.message.to_lowercase();
    if error.code == -32000 && message.contains("network error") {
        return true;
    }
    HISTORICAL_STATE_MARKERS.iter().any(|marker| message.contains(marker))
}
