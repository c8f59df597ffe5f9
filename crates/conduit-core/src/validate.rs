//! Pre-cache response validation.
//!
//! Protects the cache against buggy or out-of-sync upstreams: a response only
//! enters the cache when it structurally matches the request that produced
//! it. A rejected response is still returned to the caller - validation
//! gates caching, not serving.
//!
//! For `eth_getLogs` a bounded sample of entries is checked against the
//! filter (address, leading topic, block range), keeping the cost sub-linear
//! for large log responses. Everything else just requires a non-null result.

use crate::types::JsonRpcRequest;
use serde_json::Value;
use tracing::{debug, warn};

/// Decides whether `result` may be cached for `request`.
#[must_use]
pub fn acceptable_for_cache(request: &JsonRpcRequest, result: Option<&Value>) -> bool {
    let Some(result) = result else { return false };
    if result.is_null() {
        return false;
    }

    if request.method == "eth_getLogs" {
        if let Some(logs) = result.as_array() {
            let filter = request.param_slice().first().and_then(Value::as_object);
            return logs_match_filter(logs, filter);
        }
        warn!("eth_getLogs result is not an array, rejecting for cache");
        return false;
    }

    true
}

fn logs_match_filter(logs: &[Value], filter: Option<&serde_json::Map<String, Value>>) -> bool {
    // An empty result is always structurally consistent.
    if logs.is_empty() {
        return true;
    }
    let Some(filter) = filter else { return true };

    let wanted_address = filter.get("address");
    let wanted_topic0 = filter
        .get("topics")
        .and_then(Value::as_array)
        .and_then(|topics| topics.first());
    let range = fixed_range(filter);

    for idx in sample_indices(logs.len()) {
        let log = &logs[idx];

        if let Some(wanted) = wanted_address {
            if !address_matches(wanted, log.get("address")) {
                warn!(log_index = idx, "log address does not match filter, rejecting for cache");
                return false;
            }
        }

        if let Some(wanted) = wanted_topic0 {
            if !topic_matches(wanted, log.get("topics").and_then(Value::as_array)) {
                warn!(log_index = idx, "log topic0 does not match filter, rejecting for cache");
                return false;
            }
        }

        if let Some((from, to)) = range {
            match log.get("blockNumber").and_then(Value::as_str).and_then(parse_hex_u64) {
                Some(block) if block >= from && block <= to => {}
                Some(block) => {
                    warn!(
                        log_index = idx,
                        block, from, to, "log outside requested range, rejecting for cache"
                    );
                    return false;
                }
                None => {
                    warn!(log_index = idx, "log has no parseable blockNumber, rejecting for cache");
                    return false;
                }
            }
        }
    }

    debug!(sampled = sample_indices(logs.len()).len(), total = logs.len(), "log sample validated");
    true
}

/// Sampled positions: the full set for tiny results, first+last for small
/// ones, first/middle/last for large ones.
fn sample_indices(len: usize) -> Vec<usize> {
    match len {
        0 => Vec::new(),
        1 => vec![0],
        2..=4 => vec![0, len - 1],
        _ => vec![0, len / 2, len - 1],
    }
}

/// The filter's `address` may be a single address or a list of them.
fn address_matches(wanted: &Value, actual: Option<&Value>) -> bool {
    let Some(actual) = actual.and_then(Value::as_str) else { return false };
    let actual = actual.to_ascii_lowercase();
    match wanted {
        Value::String(s) => s.to_ascii_lowercase() == actual,
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.to_ascii_lowercase() == actual),
        _ => true,
    }
}

/// The filter's topic slot may be a single topic, a list of alternatives, or
/// null (wildcard).
fn topic_matches(wanted: &Value, actual_topics: Option<&Vec<Value>>) -> bool {
    if wanted.is_null() {
        return true;
    }
    let Some(actual) = actual_topics.and_then(|t| t.first()).and_then(Value::as_str) else {
        return false;
    };
    match wanted {
        Value::String(s) => s.eq_ignore_ascii_case(actual),
        Value::Array(alternatives) => alternatives
            .iter()
            .filter_map(Value::as_str)
            .any(|s| s.eq_ignore_ascii_case(actual)),
        _ => true,
    }
}

/// Block range check applies only when both bounds are fixed hex tags.
fn fixed_range(filter: &serde_json::Map<String, Value>) -> Option<(u64, u64)> {
    let from = filter.get("fromBlock").and_then(Value::as_str).and_then(parse_hex_u64)?;
    let to = filter.get("toBlock").and_then(Value::as_str).and_then(parse_hex_u64)?;
    Some((from, to))
}

fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}
