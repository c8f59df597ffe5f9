//! Prometheus metrics.
//!
//! Counters and histograms are recorded through the lock-free `metrics`
//! facade on every request; the exporter handle renders the exposition text
//! for `GET /metrics`. Method names map to static label strings for the
//! known set so the hot path stays allocation-free.

use crate::types::CacheOutcome;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::borrow::Cow;
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder (once per process) and returns the
/// render handle.
///
/// # Errors
///
/// Returns an error string when the recorder cannot be installed and no
/// earlier installation exists.
pub fn init_prometheus() -> Result<PrometheusHandle, String> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| format!("failed to install metrics recorder: {err}"))?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());
    Ok(handle)
}

#[inline]
fn method_label(method: &str) -> Cow<'static, str> {
    match method {
        "net_version" => Cow::Borrowed("net_version"),
        "eth_chainId" => Cow::Borrowed("eth_chainId"),
        "eth_blockNumber" => Cow::Borrowed("eth_blockNumber"),
        "eth_call" => Cow::Borrowed("eth_call"),
        "eth_getBalance" => Cow::Borrowed("eth_getBalance"),
        "eth_getCode" => Cow::Borrowed("eth_getCode"),
        "eth_getStorageAt" => Cow::Borrowed("eth_getStorageAt"),
        "eth_getBlockByHash" => Cow::Borrowed("eth_getBlockByHash"),
        "eth_getBlockByNumber" => Cow::Borrowed("eth_getBlockByNumber"),
        "eth_getBlockReceipts" => Cow::Borrowed("eth_getBlockReceipts"),
        "eth_getLogs" => Cow::Borrowed("eth_getLogs"),
        "eth_getTransactionByHash" => Cow::Borrowed("eth_getTransactionByHash"),
        "eth_getTransactionReceipt" => Cow::Borrowed("eth_getTransactionReceipt"),
        other => Cow::Owned(other.to_string()),
    }
}

/// One finished request: outcome, success flag, and latency.
pub fn record_request(method: &str, outcome: CacheOutcome, success: bool, latency_ms: u64) {
    counter!(
        "conduit_requests_total",
        "method" => method_label(method),
        "outcome" => outcome.as_str(),
        "status" => if success { "ok" } else { "error" }
    )
    .increment(1);
    #[allow(clippy::cast_precision_loss)]
    histogram!("conduit_request_latency_ms", "method" => method_label(method))
        .record(latency_ms as f64);
}

/// One upstream transport failure.
pub fn record_upstream_error(network: &str, kind: &'static str) {
    counter!(
        "conduit_upstream_errors_total",
        "network" => network.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// One failover to the fallback upstream.
pub fn record_fallback(network: &str) {
    counter!("conduit_fallback_total", "network" => network.to_string()).increment(1);
}

/// Current cache sizes, refreshed when stats are collected.
pub fn record_cache_sizes(memory_entries: usize, persistent_entries: Option<i64>) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("conduit_cache_entries", "tier" => "memory").set(memory_entries as f64);
    if let Some(persistent) = persistent_entries {
        #[allow(clippy::cast_precision_loss)]
        gauge!("conduit_cache_entries", "tier" => "persistent").set(persistent as f64);
    }
}
