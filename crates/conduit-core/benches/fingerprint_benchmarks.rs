use conduit_core::fingerprint::fingerprint;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

fn bench_fast_paths(c: &mut Criterion) {
    let no_params = None;
    let single = json!(["0x1000000"]);
    let call = json!([{"to": "0x6b175474e89094c44da98b954eedeac495271d0f", "data": "0x70a08231"}, "0xE4E1C0"]);
    let logs = json!([{
        "address": "0x6b175474e89094c44da98b954eedeac495271d0f",
        "fromBlock": "0x10",
        "toBlock": "0x20",
        "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"]
    }]);

    c.bench_function("fingerprint_no_params", |b| {
        b.iter(|| fingerprint(black_box("mainnet"), black_box("eth_chainId"), no_params));
    });
    c.bench_function("fingerprint_single_primitive", |b| {
        b.iter(|| fingerprint(black_box("mainnet"), "eth_getBlockReceipts", Some(black_box(&single))));
    });
    c.bench_function("fingerprint_eth_call", |b| {
        b.iter(|| fingerprint(black_box("mainnet"), "eth_call", Some(black_box(&call))));
    });
    c.bench_function("fingerprint_eth_getLogs", |b| {
        b.iter(|| fingerprint(black_box("mainnet"), "eth_getLogs", Some(black_box(&logs))));
    });
}

fn bench_hash_fallback(c: &mut Criterion) {
    let nested = json!([{
        "filters": [{"a": 1, "b": [1, 2, 3]}, {"z": null}],
        "options": {"tracer": "callTracer", "timeout": "5s"}
    }]);

    c.bench_function("fingerprint_hash_fallback", |b| {
        b.iter(|| fingerprint(black_box("mainnet"), "debug_traceCall", Some(black_box(&nested))));
    });
}

criterion_group!(benches, bench_fast_paths, bench_hash_fallback);
criterion_main!(benches);
