//! Cache behavior: immutable hits, id transparency, TTL expiry, and
//! write-through across a cold memory tier.

use super::harness::{config, config_with_db, core, request, rpc_body, temp_db_path, ManualClock};
use conduit_core::types::CacheOutcome;
use serde_json::json;

#[tokio::test]
async fn test_immutable_hit_serves_second_request_from_memory() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(rpc_body("\"0x1\""))
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::at(1_000);
    let core = core(&config(&server.url(), None), clock).await;

    let (first, outcome) = core.serve(None, request("eth_chainId", None, 1)).await.unwrap();
    assert_eq!(outcome, CacheOutcome::Miss);
    assert_eq!(first.result, Some(json!("0x1")));

    let (second, outcome) = core.serve(None, request("eth_chainId", None, 2)).await.unwrap();
    assert_eq!(outcome, CacheOutcome::Hit);
    assert_eq!(serde_json::to_value(&second).unwrap(), json!({
        "jsonrpc": "2.0",
        "id": 2,
        "result": "0x1",
    }));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_historical_fixed_request_cached_with_id_echo() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(rpc_body(r#"[{"transactionHash":"0xaa","status":"0x1"}]"#))
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::at(1_000);
    let core = core(&config(&server.url(), None), clock).await;
    let params = json!(["0x1000000"]);

    let (first, _) = core
        .serve(None, request("eth_getBlockReceipts", Some(params.clone()), 100))
        .await
        .unwrap();
    let (second, outcome) = core
        .serve(None, request("eth_getBlockReceipts", Some(params), 200))
        .await
        .unwrap();

    assert_eq!(outcome, CacheOutcome::Hit);
    assert_eq!(*second.id, json!(200));

    // Identical top-level keys, identical result.
    let first = serde_json::to_value(&first).unwrap();
    let second = serde_json::to_value(&second).unwrap();
    let keys = |v: &serde_json::Value| {
        let mut k: Vec<String> = v.as_object().unwrap().keys().cloned().collect();
        k.sort();
        k
    };
    assert_eq!(keys(&first), keys(&second));
    assert_eq!(first["result"], second["result"]);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_latest_tick_ttl() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(rpc_body("\"0x100\""))
        .expect(2)
        .create_async()
        .await;

    let clock = ManualClock::at(1_000);
    // cache.max_age_seconds defaults to 10.
    let core = core(&config(&server.url(), None), clock.clone()).await;

    let (_, outcome) = core.serve(None, request("eth_blockNumber", None, 3)).await.unwrap();
    assert_eq!(outcome, CacheOutcome::Miss);

    // 5 seconds later: still fresh.
    clock.advance(5_000);
    let (_, outcome) = core.serve(None, request("eth_blockNumber", None, 4)).await.unwrap();
    assert_eq!(outcome, CacheOutcome::Hit);

    // 12 seconds after insertion: expired, upstream re-queried.
    clock.advance(7_000);
    let (_, outcome) = core.serve(None, request("eth_blockNumber", None, 5)).await.unwrap();
    assert_eq!(outcome, CacheOutcome::Miss);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_write_through_survives_cold_memory_tier() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(rpc_body("\"0x2a\""))
        .expect(1)
        .create_async()
        .await;

    let db_path = temp_db_path("write-through");
    let config = config_with_db(&server.url(), &db_path);

    // First process lifetime: populate both tiers.
    {
        let clock = ManualClock::at(1_000);
        let core = core(&config, clock).await;
        let (resp, _) = core.serve(None, request("eth_chainId", None, 1)).await.unwrap();
        assert_eq!(resp.result, Some(json!("0x2a")));
        core.close().await;
    }

    // Second lifetime: cold memory, the persistent tier must answer.
    {
        let clock = ManualClock::at(2_000);
        let core = core(&config, clock).await;
        let (resp, outcome) = core.serve(None, request("eth_chainId", None, 2)).await.unwrap();
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(resp.result, Some(json!("0x2a")));
        assert_eq!(*resp.id, json!(2));
        core.close().await;
    }

    mock.assert_async().await;
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn test_cache_clear_forces_refetch() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_body(rpc_body("\"0x1\""))
        .expect(2)
        .create_async()
        .await;

    let clock = ManualClock::at(1_000);
    let core = core(&config(&server.url(), None), clock).await;

    let _ = core.serve(None, request("eth_chainId", None, 1)).await.unwrap();
    core.clear_cache().await;
    let (_, outcome) = core.serve(None, request("eth_chainId", None, 2)).await.unwrap();
    assert_eq!(outcome, CacheOutcome::Miss);

    mock.assert_async().await;
}
