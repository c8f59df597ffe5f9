//! Single-flight coalescing under concurrency.

use super::harness::{config, core, request, ManualClock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fifty_concurrent_identical_requests_make_one_upstream_call() {
    let mut server = mockito::Server::new_async().await;
    let body = r#"{"jsonrpc":"2.0","result":[{"address":"0xaa","topics":["0xt0"],"blockNumber":"0x15","logIndex":"0x0"}],"id":1}"#;
    // The slow body keeps the leader in flight long enough for every other
    // caller to join it.
    let mock = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_chunked_body(move |writer| {
            std::thread::sleep(Duration::from_millis(300));
            writer.write_all(body.as_bytes())
        })
        .expect(1)
        .create_async()
        .await;

    let clock = ManualClock::at(1_000);
    let core = Arc::new(core(&config(&server.url(), None), clock).await);
    let params = json!([{"fromBlock": "0x10", "toBlock": "0x20", "address": "0xaa"}]);

    let mut handles = Vec::new();
    for id in 0..50i64 {
        let core = Arc::clone(&core);
        let params = params.clone();
        handles.push(tokio::spawn(async move {
            core.serve(None, request("eth_getLogs", Some(params), id)).await
        }));
    }

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap().unwrap());
    }

    // All 50 responses are structurally equal apart from the id.
    let reference = &responses[0].0;
    for (idx, (response, _)) in responses.iter().enumerate() {
        assert_eq!(response.result, reference.result, "response {idx} diverged");
        assert!(response.error.is_none());
        assert_eq!(*response.id, json!(idx as i64));
    }

    mock.assert_async().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_coalesced_error_reaches_every_caller() {
    let clock = ManualClock::at(1_000);
    let core = Arc::new(core(&config("http://127.0.0.1:1", None), clock).await);
    let params = json!([{"fromBlock": "0x10", "toBlock": "0x20"}]);

    let mut handles = Vec::new();
    for id in 0..8i64 {
        let core = Arc::clone(&core);
        let params = params.clone();
        handles.push(tokio::spawn(async move {
            core.serve(None, request("eth_getLogs", Some(params), id)).await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_err(), "every coalesced caller observes the failure");
    }
}
