//! Application configuration with layered loading.
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: hardcoded in `Default` implementations
//! 2. **Config file**: YAML file specified by `CONDUIT_CONFIG` env var
//! 3. **Environment variables**: `CONDUIT__*` overrides with `__` separators
//!
//! Validation runs at load time; invalid configurations (no networks, bad
//! URLs, zero sizes) return errors rather than failing at first request.
//!
//! ```yaml
//! cache:
//!   max_age_seconds: 10
//!   max_size: 10000
//!   enable_db: true
//!   db_file: data/cache.db
//! rpc:
//!   timeout_ms: 15000
//!   retries: 2
//!   networks:
//!     mainnet:
//!       primary: { url: "https://eth.example.com" }
//!       fallback: { url: "https://eth-backup.example.com" }
//! ```

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, num::NonZeroUsize, path::Path, time::Duration};

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on. Defaults to `8545`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Concurrent in-flight HTTP requests. Defaults to `1000`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Largest accepted request body in bytes. Defaults to 1 MiB.
    #[serde(default = "default_request_body_limit")]
    pub request_body_limit_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    8545
}

fn default_max_concurrent_requests() -> usize {
    1000
}

fn default_request_body_limit() -> usize {
    1024 * 1024
}

/// Cache sizing and retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Retention for volatile entries in seconds; `0` means infinite
    /// retention and disables the TTL sweeper. Defaults to `10`.
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,

    /// Memory tier capacity in entries. Defaults to `10000`.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Whether the persistent SQLite tier is enabled. Defaults to `true`.
    #[serde(default = "default_enable_db")]
    pub enable_db: bool,

    /// Path of the SQLite file; its directory is created on startup.
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

fn default_max_age_seconds() -> u64 {
    10
}

fn default_max_size() -> usize {
    10_000
}

fn default_enable_db() -> bool {
    true
}

fn default_db_file() -> String {
    "data/cache.db".to_string()
}

/// One upstream endpoint definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// HTTP(S) URL of the JSON-RPC endpoint.
    pub url: String,

    /// Extra request headers (API keys and the like).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// One logical network: primary plus optional fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub primary: EndpointConfig,
    #[serde(default)]
    pub fallback: Option<EndpointConfig>,
}

/// Upstream dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Per-request upstream timeout in milliseconds. Defaults to `15000`.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Fallback retry attempts after the initial fallback try. Defaults to `2`.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// First retry backoff in milliseconds; doubles per retry with jitter.
    /// Defaults to `300`.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Concurrent upstream requests allowed per network. Defaults to `20`.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Network used for `POST /`; alphabetically first when unset.
    #[serde(default)]
    pub default_network: Option<String>,

    /// Logical networks keyed by their URL path segment.
    #[serde(default)]
    pub networks: HashMap<String, NetworkConfig>,
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    300
}

fn default_concurrency() -> usize {
    20
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_body_limit_bytes: default_request_body_limit(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: default_max_age_seconds(),
            max_size: default_max_size(),
            enable_db: default_enable_db(),
            db_file: default_db_file(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            concurrency: default_concurrency(),
            default_network: None,
            networks: HashMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            cache: CacheConfig::default(),
            rpc: RpcConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a YAML file with environment overrides.
    ///
    /// Environment variables with the `CONDUIT__` prefix override any field,
    /// using `__` as the nesting separator
    /// (e.g. `CONDUIT__CACHE__MAX_AGE_SECONDS=0`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file exists but cannot be parsed or
    /// deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("CONDUIT").separator("__"));
        builder.build()?.try_deserialize()
    }

    /// Loads from the path in `CONDUIT_CONFIG`, defaulting to `config.yaml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONDUIT_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
        Self::from_file(&path)
    }

    /// Validates the configuration for startup.
    ///
    /// # Errors
    ///
    /// Returns a descriptive string; the caller exits with status 1.
    pub fn validate(&self) -> Result<(), String> {
        if self.rpc.networks.is_empty() {
            return Err("no RPC networks configured".to_string());
        }
        for (key, network) in &self.rpc.networks {
            for endpoint in
                std::iter::once(&network.primary).chain(network.fallback.as_ref())
            {
                if !endpoint.url.starts_with("http") {
                    return Err(format!("invalid URL for network {key}: {}", endpoint.url));
                }
            }
        }
        if let Some(default) = &self.rpc.default_network {
            if !self.rpc.networks.contains_key(default) {
                return Err(format!("default network '{default}' is not configured"));
            }
        }
        if self.cache.max_size == 0 {
            return Err("cache.max_size must be greater than 0".to_string());
        }
        if self.rpc.timeout_ms == 0 {
            return Err("rpc.timeout_ms must be greater than 0".to_string());
        }
        if self.rpc.concurrency == 0 {
            return Err("rpc.concurrency must be greater than 0".to_string());
        }
        if self.server.bind_port == 0 {
            return Err("server.bind_port must be greater than 0".to_string());
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("logging.format must be 'json' or 'pretty'".to_string());
        }
        Ok(())
    }

    /// The socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string when the address does not parse.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    /// Volatile cache TTL as a duration (zero = infinite).
    #[must_use]
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache.max_age_seconds)
    }

    /// Memory tier capacity, clamped to at least one entry.
    #[must_use]
    pub fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.cache.max_size).unwrap_or(NonZeroUsize::MIN)
    }
}
