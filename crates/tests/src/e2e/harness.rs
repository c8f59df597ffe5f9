//! Shared test fixtures: manual clock, config builders, request helpers.

use conduit_core::{
    clock::Clock,
    config::{AppConfig, EndpointConfig, NetworkConfig},
    types::JsonRpcRequest,
    Core,
};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    sync::Arc,
};

/// Test clock driven by hand.
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn at(ms: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(ms)))
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Config with one network named `testnet`, memory-only cache.
pub fn config(primary_url: &str, fallback_url: Option<&str>) -> AppConfig {
    let mut config = AppConfig::default();
    config.cache.enable_db = false;
    config.rpc.initial_backoff_ms = 10;
    config.rpc.networks.insert(
        "testnet".to_string(),
        NetworkConfig {
            primary: endpoint(primary_url),
            fallback: fallback_url.map(endpoint),
        },
    );
    config
}

/// Same, with the persistent tier enabled at `db_file`.
pub fn config_with_db(primary_url: &str, db_file: &str) -> AppConfig {
    let mut config = config(primary_url, None);
    config.cache.enable_db = true;
    config.cache.db_file = db_file.to_string();
    config
}

fn endpoint(url: &str) -> EndpointConfig {
    EndpointConfig { url: url.to_string(), headers: HashMap::new() }
}

pub async fn core(config: &AppConfig, clock: Arc<dyn Clock>) -> Core {
    Core::new(config, clock).await.expect("core should initialize")
}

pub fn request(method: &str, params: Option<Value>, id: i64) -> JsonRpcRequest {
    JsonRpcRequest::new(method, params, json!(id))
}

/// A unique SQLite path under the system temp dir.
pub fn temp_db_path(tag: &str) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir()
        .join(format!("conduit-e2e-{}-{tag}-{seq}.db", std::process::id()))
        .to_string_lossy()
        .into_owned()
}

/// JSON-RPC success body with the given serialized result.
pub fn rpc_body(result: &str) -> String {
    format!(r#"{{"jsonrpc":"2.0","result":{result},"id":1}}"#)
}
