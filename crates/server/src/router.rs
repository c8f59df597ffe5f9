//! HTTP handlers.
//!
//! JSON-RPC requests (single objects and batch arrays) are accepted on
//! `POST /` (default network) and `POST /{network}`. Batch sub-requests run
//! through the same core path concurrently and are answered in order.
//! Operational endpoints: `/health`, `/stats`, `/cache/stats`,
//! `/cache/clear`, `/metrics`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use conduit_core::{
    metrics,
    proxy::ProxyError,
    types::{CacheOutcome, JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION_COW},
    Core,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
    pub prometheus: Option<PrometheusHandle>,
}

type RpcHttpResponse = (StatusCode, [(&'static str, String); 1], Json<Value>);

pub async fn handle_rpc_default(State(state): State<AppState>, body: String) -> RpcHttpResponse {
    handle_rpc(state, None, &body).await
}

pub async fn handle_rpc_network(
    State(state): State<AppState>,
    Path(network): Path<String>,
    body: String,
) -> RpcHttpResponse {
    handle_rpc(state, Some(network), &body).await
}

async fn handle_rpc(state: AppState, network: Option<String>, body: &str) -> RpcHttpResponse {
    let payload: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(err) => {
            let response = error_envelope(-32700, format!("Parse error: {err}"), None);
            return (StatusCode::BAD_REQUEST, miss_header(), Json(to_json(&response)));
        }
    };

    if payload.is_array() {
        handle_batch(state, network, payload).await
    } else {
        handle_single(state, network, payload).await
    }
}

async fn handle_single(state: AppState, network: Option<String>, payload: Value) -> RpcHttpResponse {
    let request: JsonRpcRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(err) => {
            let response = error_envelope(-32600, format!("Invalid Request: {err}"), None);
            return (StatusCode::BAD_REQUEST, miss_header(), Json(to_json(&response)));
        }
    };

    let method = request.method.clone();
    let start = Instant::now();
    let result = state.core.serve(network.as_deref(), request).await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok((response, outcome)) => {
            metrics::record_request(&method, outcome, response.error.is_none(), latency_ms);
            debug!(method = %method, outcome = %outcome, latency_ms, "request served");
            (StatusCode::OK, [("x-cache-status", outcome.to_string())], Json(to_json(&response)))
        }
        Err(err) => {
            metrics::record_request(&method, CacheOutcome::Miss, false, latency_ms);
            proxy_error_response(&err)
        }
    }
}

async fn handle_batch(state: AppState, network: Option<String>, payload: Value) -> RpcHttpResponse {
    let Value::Array(items) = payload else {
        let response = error_envelope(-32600, "Invalid Request".to_string(), None);
        return (StatusCode::BAD_REQUEST, miss_header(), Json(to_json(&response)));
    };
    if items.is_empty() {
        let response = error_envelope(-32600, "Invalid Request: empty batch".to_string(), None);
        return (StatusCode::BAD_REQUEST, miss_header(), Json(to_json(&response)));
    }

    let futures = items.into_iter().map(|item| {
        let state = state.clone();
        let network = network.clone();
        async move { process_batch_item(state, network, item).await }
    });
    let results = futures::future::join_all(futures).await;

    let any_hit = results.iter().any(|(_, hit)| *hit);
    let values: Vec<Value> = results.into_iter().map(|(value, _)| value).collect();

    (
        StatusCode::OK,
        [("x-cache-status", if any_hit { "HIT".to_string() } else { "MISS".to_string() })],
        Json(Value::Array(values)),
    )
}

/// One batch sub-request; returns `(response_value, was_cache_hit)`.
async fn process_batch_item(
    state: AppState,
    network: Option<String>,
    item: Value,
) -> (Value, bool) {
    let request: JsonRpcRequest = match serde_json::from_value(item) {
        Ok(request) => request,
        Err(err) => {
            let response = error_envelope(-32600, format!("Invalid Request: {err}"), None);
            return (to_json(&response), false);
        }
    };

    let method = request.method.clone();
    let start = Instant::now();
    match state.core.serve(network.as_deref(), request).await {
        Ok((response, outcome)) => {
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            metrics::record_request(&method, outcome, response.error.is_none(), latency_ms);
            (to_json(&response), outcome == CacheOutcome::Hit)
        }
        Err(err) => {
            let (_, _, Json(body)) = proxy_error_response(&err);
            (body, false)
        }
    }
}

fn proxy_error_response(err: &ProxyError) -> RpcHttpResponse {
    use conduit_core::proxy::DispatchError;

    let status = match err {
        ProxyError::UnknownNetwork(_) => StatusCode::NOT_FOUND,
        ProxyError::Upstream(DispatchError::Unavailable(_)) => StatusCode::BAD_GATEWAY,
        ProxyError::Upstream(DispatchError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    let response = match err {
        ProxyError::Upstream(inner) => {
            let message = match inner {
                DispatchError::Unavailable(_) => "Upstream error",
                DispatchError::Internal(_) => "Internal error",
            };
            error_envelope(
                err.json_rpc_code(),
                message.to_string(),
                Some(json!(inner.to_string())),
            )
        }
        other => error_envelope(other.json_rpc_code(), other.to_string(), None),
    };
    (status, miss_header(), Json(to_json(&response)))
}

fn error_envelope(code: i32, message: String, data: Option<Value>) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION_COW,
        result: None,
        error: Some(JsonRpcError { code, message, data }),
        id: Arc::new(Value::Null),
    }
}

fn miss_header() -> [(&'static str, String); 1] {
    [("x-cache-status", "MISS".to_string())]
}

fn to_json(response: &JsonRpcResponse) -> Value {
    serde_json::to_value(response).expect("JsonRpcResponse serialization cannot fail")
}

/// `GET /health`: static envelope plus an upstream liveness probe.
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let upstream_reachable = state.core.probe_upstream().await;
    Json(json!({
        "status": "ok",
        "upstream": { "reachable": upstream_reachable },
    }))
}

/// `GET /stats`: dispatcher and network overview.
pub async fn handle_stats(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.core.cache_stats().await;
    Json(json!({
        "networks": state.core.network_keys(),
        "default_network": state.core.default_network(),
        "inflight": state.core.inflight(),
        "cache": cache,
    }))
}

/// `GET /cache/stats`.
pub async fn handle_cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::to_value(state.core.cache_stats().await).unwrap_or(Value::Null))
}

/// `POST /cache/clear`.
pub async fn handle_cache_clear(State(state): State<AppState>) -> impl IntoResponse {
    state.core.clear_cache().await;
    Json(json!({"cleared": true}))
}

/// `GET /metrics`: Prometheus exposition.
pub async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed\n".to_string()),
    }
}
