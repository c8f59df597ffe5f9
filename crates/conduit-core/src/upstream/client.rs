//! HTTP client for upstream JSON-RPC endpoints.
//!
//! One keep-alive connection pool per network key, bounded idle sockets,
//! rustls transport. A request is a single POST of one envelope with a
//! per-call timeout; transport failures map into the [`UpstreamError`]
//! taxonomy while well-formed envelopes (including JSON-RPC errors) are
//! returned parsed for the dispatcher to inspect.

use crate::{
    network::UpstreamSpec,
    types::{JsonRpcRequest, JsonRpcResponse},
    upstream::errors::UpstreamError,
};
use dashmap::DashMap;
use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::trace;

/// Idle sockets kept alive per host.
const POOL_MAX_IDLE_PER_HOST: usize = 50;
/// Idle pools are garbage-collected after this.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

pub struct UpstreamClient {
    pools: DashMap<String, Client>,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    #[must_use]
    pub fn new() -> Self {
        Self { pools: DashMap::new() }
    }

    /// POSTs one envelope to one upstream and returns the parsed response.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Timeout`] when the round trip exceeds `timeout`
    /// - [`UpstreamError::ConnectionFailed`] on DNS/connect/TLS failures
    /// - [`UpstreamError::HttpStatus`] for non-2xx statuses
    /// - [`UpstreamError::InvalidResponse`] when the body is not a JSON-RPC envelope
    pub async fn post(
        &self,
        network_key: &str,
        upstream: &UpstreamSpec,
        request: &JsonRpcRequest,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, UpstreamError> {
        let client = self.pool_for(network_key)?;

        let mut builder = client
            .post(&upstream.url)
            .header("content-type", "application/json")
            .json(request)
            .timeout(timeout);
        for (name, value) in &upstream.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let truncated = if body.len() > 256 {
                format!("{}... (truncated)", &body[..256])
            } else {
                body
            };
            trace!(network = network_key, status = status.as_u16(), "upstream returned http error");
            return Err(UpstreamError::HttpStatus(status.as_u16(), truncated));
        }

        response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|err| UpstreamError::InvalidResponse(sanitize(&err)))
    }

    fn pool_for(&self, network_key: &str) -> Result<Client, UpstreamError> {
        if let Some(existing) = self.pools.get(network_key) {
            return Ok(existing.clone());
        }
        let built = build_client()
            .map_err(|err| UpstreamError::ConnectionFailed(format!("client build failed: {err}")))?;
        // A racing insert is harmless; both values wrap the same socket policy.
        Ok(self.pools.entry(network_key.to_string()).or_insert(built).clone())
    }
}

fn build_client() -> reqwest::Result<Client> {
    ClientBuilder::new()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        .tcp_nodelay(true)
        .use_rustls_tls()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("conduit/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn classify_reqwest_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout
    } else {
        // DNS, refused connections and TLS handshakes all surface here.
        UpstreamError::ConnectionFailed(sanitize(&err))
    }
}

/// Keeps upstream URLs and key material out of error strings.
fn sanitize(err: &dyn std::fmt::Display) -> String {
    let text = err.to_string();
    match text.split(':').next() {
        Some(head) if !head.is_empty() => head.to_string(),
        _ => "network error".to_string(),
    }
}
