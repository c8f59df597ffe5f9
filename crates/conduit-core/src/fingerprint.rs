//! Cache key derivation.
//!
//! A fingerprint is a deterministic, bounded-length string identifying a
//! logical RPC request for cache and coalescing purposes. It depends only on
//! `(network, method, params)` - never on the request id - so equivalent
//! requests land on the same key.
//!
//! Common request shapes get readable fast-path keys; everything else falls
//! back to a truncated SHA-256 over the method plus canonical JSON params.
//! Canonical here means object keys are recursively sorted, so two params
//! objects that differ only in key order hash identically.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Fast-path keys longer than this fall back to the hash form so stored keys
/// stay bounded (large `eth_call` calldata would otherwise leak into keys).
const MAX_FAST_PATH_LEN: usize = 512;

/// Hex chars kept from the fallback digest.
const HASH_KEY_LEN: usize = 16;

/// Derives the cache key for `(network, method, params)`.
#[must_use]
pub fn fingerprint(network: &str, method: &str, params: Option<&Value>) -> String {
    if let Some(key) = fast_path(network, method, params) {
        if key.len() <= MAX_FAST_PATH_LEN {
            return key;
        }
    }
    hashed_key(network, method, params)
}

fn fast_path(network: &str, method: &str, params: Option<&Value>) -> Option<String> {
    let items = match params {
        None => &[][..],
        Some(Value::Array(items)) => items.as_slice(),
        // By-name params have no positional shape; hash them.
        Some(_) => return None,
    };

    if items.is_empty() {
        return Some(format!("{network}:{method}"));
    }

    if method == "eth_getLogs" {
        if let [Value::Object(filter)] = items {
            return Some(logs_key(network, filter));
        }
    }

    if method == "eth_call" {
        if let [Value::Object(call), block_tag] = items {
            let (to, data) = (call.get("to").and_then(Value::as_str), call.get("data").and_then(Value::as_str));
            if let (Some(to), Some(data)) = (to, data) {
                let tag = match block_tag.as_str() {
                    Some(s) => s.to_string(),
                    None => canonical_json(block_tag),
                };
                return Some(format!("{network}:eth_call:{to}:{data}:{tag}"));
            }
        }
    }

    // Single-primitive params: block/receipt lookups, eth_getBlockReceipts, etc.
    if let [only] = items {
        if let Some(rendered) = render_primitive(only) {
            return Some(format!("{network}:{method}:{rendered}"));
        }
    }

    None
}

fn logs_key(network: &str, filter: &serde_json::Map<String, Value>) -> String {
    let address = match filter.get("address") {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => canonical_json(other),
    };
    let from_block = filter
        .get("fromBlock")
        .and_then(Value::as_str)
        .unwrap_or("0x0");
    let to_block = filter.get("toBlock").and_then(Value::as_str).unwrap_or("latest");
    let topics = match filter.get("topics") {
        None => "[]".to_string(),
        Some(t) => canonical_json(t),
    };
    format!("{network}:eth_getLogs:{address}:{from_block}:{to_block}:{topics}")
}

fn render_primitive(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn hashed_key(network: &str, method: &str, params: Option<&Value>) -> String {
    let canonical = params.map_or_else(|| "null".to_string(), canonical_json);
    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{network}:h:{}", &digest[..HASH_KEY_LEN])
}

/// Serializes a JSON value with recursively sorted object keys.
///
/// Key order in incoming params is arbitrary; sorting before serialization is
/// what makes the hash fallback stable across equivalent requests.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::with_capacity(64);
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => {
            let _ = write!(out, "{value}");
        }
        Value::String(s) => {
            // serde_json's Display for Value::String produces the quoted,
            // escaped form we need.
            let _ = write!(out, "{}", Value::String(s.clone()));
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}
