//! Response-quality inspection.
//!
//! A primary upstream can answer with HTTP 200 and a structurally valid
//! envelope that is still useless - `null` for a block it has pruned, `[]`
//! from a node that is behind the chain tip, `"0x"` where real bytecode
//! exists. For the critical read methods, such a response warrants one more
//! try against the fallback before it is accepted.

use crate::cache::is_historical_fixed;
use ahash::AHashSet;
use serde_json::Value;
use std::sync::LazyLock;

/// Methods whose responses get the quality inspection.
const CRITICAL_METHODS: &[&str] = &[
    "eth_call",
    "eth_getLogs",
    "eth_getBlockByNumber",
    "eth_getBlockByHash",
    "eth_getBlockReceipts",
    "eth_getTransactionReceipt",
    "eth_getStorageAt",
    "eth_getBalance",
    "eth_getCode",
    "eth_getTransactionByHash",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
];

static CRITICAL_SET: LazyLock<AHashSet<&'static str>> =
    LazyLock::new(|| CRITICAL_METHODS.iter().copied().collect());

/// Decides whether a JSON-RPC *success* from the primary still warrants a
/// fallback attempt. The primary response stays around as a recovery
/// candidate either way.
#[must_use]
pub fn fallback_worthy(method: &str, params: Option<&Value>, result: Option<&Value>) -> bool {
    if !CRITICAL_SET.contains(method) {
        return false;
    }

    let Some(result) = result else { return true };
    if result.is_null() {
        return true;
    }

    match result {
        Value::String(s) if s.is_empty() => true,
        // "0x" is a legitimate answer for eth_call/eth_getCode (empty return
        // data, no bytecode); everywhere else it smells like a stub.
        Value::String(s) if s == "0x" => !matches!(method, "eth_call" | "eth_getCode"),
        Value::Array(items) if items.is_empty() => {
            if method != "eth_getLogs" {
                return true;
            }
            // Empty logs over a pinned historical range: the primary may be
            // missing archival data rather than reporting a true absence.
            is_historical_fixed(method, params)
        }
        _ => false,
    }
}
