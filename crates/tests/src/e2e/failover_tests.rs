//! Failover behavior: historical-data errors, quality-check fallbacks, and
//! total upstream failure.

use super::harness::{config, core, request, rpc_body, ManualClock};
use conduit_core::{proxy::ProxyError, types::CacheOutcome};
use serde_json::json;

#[tokio::test]
async fn test_fallback_on_historical_error_and_forever_cache() {
    let mut server = mockito::Server::new_async().await;
    let primary = server
        .mock("POST", "/primary")
        .with_status(200)
        .with_body(r#"{"jsonrpc":"2.0","error":{"code":-32000,"message":"missing trie node"},"id":1}"#)
        .expect(1)
        .create_async()
        .await;
    let fallback = server
        .mock("POST", "/fallback")
        .with_status(200)
        .with_body(rpc_body("\"0x56bc75e2d63100000\""))
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::at(1_000);
    let primary_url = format!("{}/primary", server.url());
    let fallback_url = format!("{}/fallback", server.url());
    let core = core(
        &config(&primary_url, Some(&fallback_url)),
        clock.clone(),
    )
    .await;

    let params = json!(["0x0000000000000000000000000000000000000000", "0xE4E1C0"]);
    let (resp, _) = core
        .serve(None, request("eth_getBalance", Some(params.clone()), 1))
        .await
        .unwrap();
    assert_eq!(resp.result, Some(json!("0x56bc75e2d63100000")));
    assert!(resp.error.is_none());

    // Historical-fixed: the entry never expires. A lookup far in the future
    // still hits the cache without touching either upstream again.
    clock.advance(1_000 * 3600 * 24 * 365);
    let (resp, outcome) = core
        .serve(None, request("eth_getBalance", Some(params), 2))
        .await
        .unwrap();
    assert_eq!(outcome, CacheOutcome::Hit);
    assert_eq!(resp.result, Some(json!("0x56bc75e2d63100000")));

    primary.assert_async().await;
    fallback.assert_async().await;
}

#[tokio::test]
async fn test_quality_check_fallback_and_no_null_cache() {
    let mut server = mockito::Server::new_async().await;
    let primary = server
        .mock("POST", "/primary")
        .with_status(200)
        .with_body(rpc_body("null"))
        .expect(1)
        .create_async()
        .await;
    let fallback = server
        .mock("POST", "/fallback")
        .with_status(200)
        .with_body(rpc_body("\"0x0000000000000000000000000000000000000000000000000000000000000001\""))
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::at(1_000);
    let primary_url = format!("{}/primary", server.url());
    let fallback_url = format!("{}/fallback", server.url());
    let core = core(&config(&primary_url, Some(&fallback_url)), clock).await;

    let params = json!([{"to": "0x0000000000000000000000000000000000000000", "data": "0x"}, "0xE4E1C0"]);
    let (resp, _) = core.serve(None, request("eth_call", Some(params.clone()), 1)).await.unwrap();
    assert_eq!(
        resp.result,
        Some(json!("0x0000000000000000000000000000000000000000000000000000000000000001"))
    );

    // The fallback's answer was cached; the primary's null never was.
    let (resp, outcome) = core.serve(None, request("eth_call", Some(params), 2)).await.unwrap();
    assert_eq!(outcome, CacheOutcome::Hit);
    assert!(resp.result.is_some());
    assert_ne!(resp.result, Some(json!(null)));

    primary.assert_async().await;
    fallback.assert_async().await;
}

#[tokio::test]
async fn test_both_upstreams_failing_returns_upstream_error() {
    let clock = ManualClock::at(1_000);
    let core = core(
        &config("http://127.0.0.1:1", Some("http://127.0.0.1:1")),
        clock,
    )
    .await;

    let err = core.serve(None, request("eth_blockNumber", None, 1)).await.unwrap_err();
    assert!(matches!(err, ProxyError::Upstream(_)));
    assert_eq!(err.json_rpc_code(), -32000);
}

#[tokio::test]
async fn test_fallback_retry_budget_on_transient_errors() {
    let mut server = mockito::Server::new_async().await;
    // Primary is down; the fallback 500s persistently. With rpc.retries = 2
    // the fallback sees exactly three attempts: one initial plus two retries.
    let flaky = server
        .mock("POST", "/fallback")
        .with_status(500)
        .with_body("overloaded")
        .expect(3)
        .create_async()
        .await;

    let clock = ManualClock::at(1_000);
    let fallback_url = format!("{}/fallback", server.url());
    let core = core(&config("http://127.0.0.1:1", Some(&fallback_url)), clock).await;

    let err = core.serve(None, request("eth_blockNumber", None, 9)).await.unwrap_err();
    assert_eq!(err.json_rpc_code(), -32000);

    flaky.assert_async().await;
}

#[tokio::test]
async fn test_unknown_network_is_rejected() {
    let clock = ManualClock::at(1_000);
    let core = core(&config("http://127.0.0.1:1", None), clock).await;
    let err = core.serve(Some("ghostnet"), request("eth_chainId", None, 1)).await.unwrap_err();
    assert!(matches!(err, ProxyError::UnknownNetwork(_)));
}
