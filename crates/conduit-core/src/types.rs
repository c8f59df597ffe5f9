//! Core JSON-RPC 2.0 protocol types.
//!
//! # Type Categories
//!
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: protocol conformance
//! - [`CacheOutcome`]: how a request was served (never serialized into the body,
//!   so cached responses stay bit-compatible with a direct upstream call)
//!
//! # Performance Notes
//!
//! - `jsonrpc` uses `Cow<'static, str>` so constructing envelopes with the static
//!   `"2.0"` version string never allocates.
//! - `id` uses `Arc<serde_json::Value>` so request ids can be copied into
//!   responses (including error responses) with a reference-count bump instead
//!   of a deep clone.

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc, sync::LazyLock};

/// JSON-RPC protocol version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the JSON-RPC version - zero allocation for static usage.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// Methods the proxy knows how to classify for caching and quality checks.
///
/// Methods outside this set are still proxied, they just never enter the cache.
pub const KNOWN_METHODS: &[&str] = &[
    "net_version",
    "eth_chainId",
    "eth_blockNumber",
    "eth_gasPrice",
    "eth_call",
    "eth_getBalance",
    "eth_getCode",
    "eth_getStorageAt",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockReceipts",
    "eth_getLogs",
    "eth_getTransactionByHash",
    "eth_getTransactionReceipt",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
];

static KNOWN_METHODS_SET: LazyLock<AHashSet<&'static str>> =
    LazyLock::new(|| KNOWN_METHODS.iter().copied().collect());

/// Check if a method belongs to the classified set (O(1) lookup).
#[inline]
#[must_use]
pub fn is_known_method(method: &str) -> bool {
    KNOWN_METHODS_SET.contains(method)
}

/// How a request was ultimately served.
///
/// Travels out-of-band (the `x-cache-status` response header and metrics
/// labels); the JSON-RPC body itself carries no proxy-specific extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from the memory or persistent tier without upstream contact.
    Hit,
    /// Cacheable request that had to go upstream (or join an in-flight fetch).
    Miss,
    /// Request the policy never caches; always forwarded.
    Bypass,
}

impl CacheOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Miss => "MISS",
            CacheOutcome::Bypass => "BYPASS",
        }
    }
}

impl std::fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural problems with an incoming request, detected before any upstream
/// contact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("jsonrpc version must be \"2.0\"")]
    BadVersion,
    #[error("method must be a non-empty string")]
    EmptyMethod,
    #[error("params must be an array or object")]
    BadParams,
}

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default = "default_id")]
    pub id: Arc<serde_json::Value>,
}

fn default_id() -> Arc<serde_json::Value> {
    Arc::new(serde_json::Value::Null)
}

impl JsonRpcRequest {
    /// Creates a new request with zero allocation for the version string.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, method: method.into(), params, id: Arc::new(id) }
    }

    /// Validates the envelope per the JSON-RPC 2.0 structural rules.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] when the version is wrong, the method is empty,
    /// or `params` is a primitive (JSON-RPC 2.0 only allows arrays and objects).
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(RequestError::BadVersion);
        }
        if self.method.trim().is_empty() {
            return Err(RequestError::EmptyMethod);
        }
        match &self.params {
            None => Ok(()),
            Some(serde_json::Value::Array(_) | serde_json::Value::Object(_)) => Ok(()),
            Some(_) => Err(RequestError::BadParams),
        }
    }

    /// Returns the params as an array slice, treating absent params as empty.
    #[must_use]
    pub fn param_slice(&self) -> &[serde_json::Value] {
        match &self.params {
            Some(serde_json::Value::Array(items)) => items.as_slice(),
            _ => &[],
        }
    }
}

/// JSON-RPC 2.0 response structure.
///
/// Exactly one of `result`/`error` is meaningful. The serialized form contains
/// no fields beyond the protocol triple plus `id`, so a cached body is
/// byte-equal to what the upstream produced apart from the rewritten id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Arc<serde_json::Value>,
}

impl JsonRpcResponse {
    /// Creates a successful response.
    #[must_use]
    pub fn success(result: serde_json::Value, id: Arc<serde_json::Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, result: Some(result), error: None, id }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(code: i32, message: String, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
            id,
        }
    }

    /// Creates an error response carrying supplementary `data`.
    #[must_use]
    pub fn error_with_data(
        code: i32,
        message: String,
        data: serde_json::Value,
        id: Arc<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: None,
            error: Some(JsonRpcError { code, message, data: Some(data) }),
            id,
        }
    }

    /// Returns a copy of this response with the id replaced.
    ///
    /// Used whenever a stored or coalesced envelope is served to a caller whose
    /// request id differs from the one the envelope was produced under.
    #[must_use]
    pub fn with_id(&self, id: Arc<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            result: self.result.clone(),
            error: self.error.clone(),
            id,
        }
    }

    /// True when the envelope carries a `result` and no `error`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

/// JSON-RPC 2.0 error object.
///
/// Standard codes: `-32700` parse error, `-32600` invalid request, `-32601`
/// method not found, `-32602` invalid params, `-32603` internal error,
/// `-32000..=-32099` server-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
