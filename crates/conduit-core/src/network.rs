//! Logical network routing.
//!
//! Each configured network maps a URL path segment to a primary upstream and
//! an optional fallback. `POST /` resolves to the default network.

use crate::config::{AppConfig, NetworkConfig};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// One upstream endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamSpec {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Dispatch parameters for one logical network.
#[derive(Debug, Clone)]
pub struct NetworkSpec {
    pub key: Arc<str>,
    pub primary: UpstreamSpec,
    pub fallback: Option<UpstreamSpec>,
    pub request_timeout: Duration,
    pub max_fallback_retries: u32,
    pub initial_backoff: Duration,
    /// Concurrent upstream requests allowed for this network.
    pub max_concurrency: usize,
}

/// Resolves URL path segments to network specs.
pub struct NetworkRouter {
    networks: HashMap<String, Arc<NetworkSpec>>,
    default_key: String,
}

impl NetworkRouter {
    /// Builds the router from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message when no networks are configured or the
    /// configured default does not exist.
    pub fn from_config(config: &AppConfig) -> Result<Self, String> {
        if config.rpc.networks.is_empty() {
            return Err("no RPC networks configured".to_string());
        }

        let networks: HashMap<String, Arc<NetworkSpec>> = config
            .rpc
            .networks
            .iter()
            .map(|(key, net)| (key.clone(), Arc::new(to_spec(key, net, config))))
            .collect();

        let default_key = match &config.rpc.default_network {
            Some(key) => {
                if !networks.contains_key(key) {
                    return Err(format!("default network '{key}' is not configured"));
                }
                key.clone()
            }
            // Deterministic choice when unset: alphabetically first.
            None => {
                let mut keys: Vec<&String> = networks.keys().collect();
                keys.sort_unstable();
                (*keys[0]).clone()
            }
        };

        Ok(Self { networks, default_key })
    }

    /// Resolves a path segment, falling back to the default network when the
    /// segment is absent. Unknown segments return `None` (HTTP 404 upstream).
    #[must_use]
    pub fn resolve(&self, segment: Option<&str>) -> Option<Arc<NetworkSpec>> {
        match segment {
            Some(key) => self.networks.get(key).cloned(),
            None => self.networks.get(&self.default_key).cloned(),
        }
    }

    #[must_use]
    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Configured network keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.networks.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }
}

fn to_spec(key: &str, net: &NetworkConfig, config: &AppConfig) -> NetworkSpec {
    NetworkSpec {
        key: Arc::from(key),
        primary: to_upstream(&net.primary),
        fallback: net.fallback.as_ref().map(to_upstream),
        request_timeout: Duration::from_millis(config.rpc.timeout_ms),
        max_fallback_retries: config.rpc.retries,
        initial_backoff: Duration::from_millis(config.rpc.initial_backoff_ms),
        max_concurrency: config.rpc.concurrency,
    }
}

fn to_upstream(endpoint: &crate::config::EndpointConfig) -> UpstreamSpec {
    UpstreamSpec {
        url: endpoint.url.clone(),
        headers: endpoint
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, EndpointConfig, NetworkConfig};

    fn endpoint(url: &str) -> EndpointConfig {
        EndpointConfig { url: url.to_string(), headers: std::collections::HashMap::new() }
    }

    fn config_with(networks: &[(&str, bool)]) -> AppConfig {
        let mut config = AppConfig::default();
        for (key, with_fallback) in networks {
            config.rpc.networks.insert(
                (*key).to_string(),
                NetworkConfig {
                    primary: endpoint("http://primary.example"),
                    fallback: with_fallback.then(|| endpoint("http://fallback.example")),
                },
            );
        }
        config
    }

    #[test]
    fn test_resolve_named_network() {
        let router = NetworkRouter::from_config(&config_with(&[("mainnet", true), ("base", false)]))
            .unwrap();

        let spec = router.resolve(Some("mainnet")).unwrap();
        assert_eq!(spec.key.as_ref(), "mainnet");
        assert!(spec.fallback.is_some());

        let spec = router.resolve(Some("base")).unwrap();
        assert!(spec.fallback.is_none());

        assert!(router.resolve(Some("nope")).is_none());
    }

    #[test]
    fn test_default_network_is_alphabetical_when_unset() {
        let router = NetworkRouter::from_config(&config_with(&[("zeta", false), ("alpha", false)]))
            .unwrap();
        assert_eq!(router.default_key(), "alpha");
        assert_eq!(router.resolve(None).unwrap().key.as_ref(), "alpha");
    }

    #[test]
    fn test_explicit_default_network() {
        let mut config = config_with(&[("zeta", false), ("alpha", false)]);
        config.rpc.default_network = Some("zeta".to_string());
        let router = NetworkRouter::from_config(&config).unwrap();
        assert_eq!(router.resolve(None).unwrap().key.as_ref(), "zeta");
    }

    #[test]
    fn test_errors() {
        assert!(NetworkRouter::from_config(&AppConfig::default()).is_err());

        let mut config = config_with(&[("mainnet", false)]);
        config.rpc.default_network = Some("missing".to_string());
        assert!(NetworkRouter::from_config(&config).is_err());
    }

    #[test]
    fn test_spec_carries_rpc_settings() {
        let mut config = config_with(&[("mainnet", false)]);
        config.rpc.timeout_ms = 1_234;
        config.rpc.retries = 7;
        config.rpc.initial_backoff_ms = 55;
        config.rpc.concurrency = 3;

        let router = NetworkRouter::from_config(&config).unwrap();
        let spec = router.resolve(None).unwrap();
        assert_eq!(spec.request_timeout, Duration::from_millis(1_234));
        assert_eq!(spec.max_fallback_retries, 7);
        assert_eq!(spec.initial_backoff, Duration::from_millis(55));
        assert_eq!(spec.max_concurrency, 3);
    }
}
