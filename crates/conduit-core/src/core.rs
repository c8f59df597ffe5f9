//! The long-lived [`Core`] value.
//!
//! Owns every piece of process-wide state - the two-tier cache, the inflight
//! map, the per-network connection pools - and wires them into the request
//! path. The HTTP layer holds one `Arc<Core>` and calls [`Core::serve`] per
//! classified request.

use crate::{
    cache::{CacheManager, CacheSettings, CacheStats, SqliteStore},
    clock::Clock,
    config::AppConfig,
    network::NetworkRouter,
    proxy::{errors::ProxyError, ProxyEngine},
    types::{CacheOutcome, JsonRpcRequest, JsonRpcResponse},
    upstream::UpstreamClient,
};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Timeout for the `/health` upstream liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Startup failures.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),
}

pub struct Core {
    cache: Arc<CacheManager>,
    client: Arc<UpstreamClient>,
    engine: Arc<ProxyEngine>,
    router: NetworkRouter,
    shutdown_tx: broadcast::Sender<()>,
}

impl Core {
    /// Builds the core from validated configuration.
    ///
    /// The persistent tier is best-effort at startup too: if the SQLite file
    /// cannot be opened the proxy runs memory-only rather than refusing to
    /// start.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] when the network table is unusable.
    pub async fn new(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self, CoreError> {
        let router = NetworkRouter::from_config(config).map_err(CoreError::Config)?;

        let store = if config.cache.enable_db {
            match SqliteStore::open(Path::new(&config.cache.db_file)).await {
                Ok(store) => Some(store),
                Err(err) => {
                    warn!(error = %err, "persistent cache unavailable, running memory-only");
                    None
                }
            }
        } else {
            None
        };

        let settings = CacheSettings {
            max_age: config.cache_max_age(),
            max_size: config.cache_capacity(),
        };
        let cache = Arc::new(CacheManager::new(settings, store, clock));

        let (shutdown_tx, _) = broadcast::channel(1);
        cache.start_sweeper(shutdown_tx.subscribe());

        let client = Arc::new(UpstreamClient::new());
        let engine = Arc::new(ProxyEngine::new(Arc::clone(&cache), Arc::clone(&client)));

        info!(
            networks = router.keys().len(),
            default = router.default_key(),
            "core initialized"
        );

        Ok(Self { cache, client, engine, router, shutdown_tx })
    }

    /// Serves one request on the network selected by `network_segment`
    /// (`None` = default network).
    ///
    /// # Errors
    ///
    /// - [`ProxyError::UnknownNetwork`] for an unconfigured path segment
    /// - [`ProxyError::InvalidRequest`] / [`ProxyError::InvalidParams`] /
    ///   [`ProxyError::MethodNotFound`] for structural problems
    /// - [`ProxyError::Upstream`] when no upstream produced a response
    pub async fn serve(
        &self,
        network_segment: Option<&str>,
        request: JsonRpcRequest,
    ) -> Result<(JsonRpcResponse, CacheOutcome), ProxyError> {
        let network = self
            .router
            .resolve(network_segment)
            .ok_or_else(|| ProxyError::UnknownNetwork(network_segment.unwrap_or("").to_string()))?;

        request.validate()?;
        if !is_method_shaped(&request.method) {
            return Err(ProxyError::MethodNotFound(request.method.clone()));
        }

        let result = self.engine.dispatch(network, request).await?;
        Ok(result)
    }

    /// Upstream liveness probe for `/health`: a `net_version` round trip
    /// against the default network's primary with a short timeout.
    pub async fn probe_upstream(&self) -> bool {
        let Some(network) = self.router.resolve(None) else { return false };
        let request = JsonRpcRequest::new("net_version", None, serde_json::Value::from(1));
        match self
            .client
            .post(&network.key, &network.primary, &request, PROBE_TIMEOUT)
            .await
        {
            Ok(response) => response.error.is_none(),
            Err(_) => false,
        }
    }

    pub async fn cache_stats(&self) -> CacheStats {
        let stats = self.cache.stats().await;
        crate::metrics::record_cache_sizes(
            stats.memory_entries,
            stats.persistent.map(|p| p.entries),
        );
        stats
    }

    /// Clears both cache tiers (`POST /cache/clear`).
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// In-flight fetch count, for `/stats`.
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.engine.inflight()
    }

    #[must_use]
    pub fn network_keys(&self) -> Vec<String> {
        self.router.keys()
    }

    #[must_use]
    pub fn default_network(&self) -> &str {
        self.router.default_key()
    }

    /// Stops background tasks and closes the persistent tier.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(());
        self.cache.close().await;
        info!("core shut down");
    }
}

/// RPC method names are `namespace_camelCase`; anything else cannot name an
/// existing method and is rejected with `-32601` before upstream contact.
fn is_method_shaped(method: &str) -> bool {
    let mut chars = method.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{EndpointConfig, NetworkConfig};
    use serde_json::json;

    fn config(url: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.cache.enable_db = false;
        config.rpc.networks.insert(
            "testnet".to_string(),
            NetworkConfig {
                primary: EndpointConfig {
                    url: url.to_string(),
                    headers: std::collections::HashMap::new(),
                },
                fallback: None,
            },
        );
        config
    }

    async fn core(url: &str) -> Core {
        Core::new(&config(url), Arc::new(SystemClock)).await.unwrap()
    }

    #[test]
    fn test_method_shape() {
        assert!(is_method_shaped("eth_getLogs"));
        assert!(is_method_shaped("net_version"));
        assert!(!is_method_shaped("eth getLogs"));
        assert!(!is_method_shaped("1eth"));
        assert!(!is_method_shaped(""));
    }

    #[tokio::test]
    async fn test_unknown_network_rejected() {
        let core = core("http://127.0.0.1:1").await;
        let request = JsonRpcRequest::new("eth_chainId", None, json!(1));
        let err = core.serve(Some("ghost"), request).await.unwrap_err();
        assert!(matches!(err, ProxyError::UnknownNetwork(_)));
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_upstream() {
        // Upstream is unreachable; a validation failure must not try it.
        let core = core("http://127.0.0.1:1").await;

        let mut request = JsonRpcRequest::new("eth_chainId", None, json!(1));
        request.jsonrpc = std::borrow::Cow::Borrowed("1.0");
        let err = core.serve(None, request).await.unwrap_err();
        assert_eq!(err.json_rpc_code(), -32600);

        let request = JsonRpcRequest::new("eth_call", Some(json!("scalar")), json!(1));
        let err = core.serve(None, request).await.unwrap_err();
        assert_eq!(err.json_rpc_code(), -32602);

        let request = JsonRpcRequest::new("bad method name", None, json!(1));
        let err = core.serve(None, request).await.unwrap_err();
        assert_eq!(err.json_rpc_code(), -32601);
    }

    #[tokio::test]
    async fn test_serve_roundtrip_and_stats() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","result":"0x1","id":1}"#)
            .create_async()
            .await;

        let core = core(&server.url()).await;
        let request = JsonRpcRequest::new("eth_chainId", None, json!(1));
        let (response, outcome) = core.serve(None, request).await.unwrap();
        assert_eq!(response.result, Some(json!("0x1")));
        assert_eq!(outcome, CacheOutcome::Miss);

        let stats = core.cache_stats().await;
        assert_eq!(stats.memory_entries, 1);

        core.clear_cache().await;
        assert_eq!(core.cache_stats().await.memory_entries, 0);
        core.close().await;
    }

    #[tokio::test]
    async fn test_probe_upstream() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"jsonrpc":"2.0","result":"1","id":1}"#)
            .create_async()
            .await;

        let core = core(&server.url()).await;
        assert!(core.probe_upstream().await);

        let dead = Core::new(&config("http://127.0.0.1:1"), Arc::new(SystemClock)).await.unwrap();
        assert!(!dead.probe_upstream().await);
    }
}
