//! Per-method cacheability classification.
//!
//! Given `(method, params)` the policy decides whether a response may enter
//! the cache and for how long:
//!
//! | Class | Rule |
//! |---|---|
//! | Immutable | cacheable forever (`eth_chainId`, receipts, tx-by-hash, ...) |
//! | Latest-tick | cacheable for the configured TTL (`eth_blockNumber`) |
//! | Historical-conditional | forever when the request pins a fixed past block, otherwise TTL or uncacheable |
//! | Other | never cached |
//!
//! A request is "historical-fixed" when its result cannot change once
//! produced because it references a specific past block. The ambiguous tags
//! `earliest`, `safe` and `finalized` are treated as *not* fixed: they move
//! (or can, across reorgs), so pinning them forever would risk stale data.

use serde_json::Value;
use std::time::Duration;

/// Retention bound for a cacheable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Never expires (immutable data).
    Forever,
    /// Expires once the entry is older than the duration.
    Finite(Duration),
}

impl Ttl {
    /// The TTL expressed in milliseconds, `None` meaning no expiry.
    #[must_use]
    pub fn as_millis(self) -> Option<u64> {
        match self {
            Ttl::Forever => None,
            Ttl::Finite(d) => Some(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

/// Caching plan for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePlan {
    /// Response must not enter the cache.
    Bypass,
    /// Response may be cached with the given retention.
    Cache(Ttl),
}

impl CachePlan {
    #[must_use]
    pub fn is_cacheable(self) -> bool {
        matches!(self, CachePlan::Cache(_))
    }
}

/// Classifies a request into its caching plan.
///
/// `volatile_ttl` is the operator-configured TTL used for latest-tick and
/// non-fixed historical methods; a zero duration means infinite retention,
/// matching the `cache.max_age = 0` config convention.
#[must_use]
pub fn classify(method: &str, params: Option<&Value>, volatile_ttl: Duration) -> CachePlan {
    let ttl = if volatile_ttl.is_zero() { Ttl::Forever } else { Ttl::Finite(volatile_ttl) };

    match method {
        // Immutable: chain identity never changes, receipts and transactions
        // are content-addressed by hash.
        "eth_chainId" | "net_version" | "eth_getTransactionReceipt" | "eth_getTransactionByHash" => {
            CachePlan::Cache(Ttl::Forever)
        }

        "eth_blockNumber" => CachePlan::Cache(ttl),

        "eth_call" | "eth_getLogs" => {
            if is_historical_fixed(method, params) {
                CachePlan::Cache(Ttl::Forever)
            } else {
                CachePlan::Cache(ttl)
            }
        }

        "eth_getBlockByNumber" | "eth_getBlockReceipts" | "eth_getStorageAt"
        | "eth_getBalance" => {
            if is_historical_fixed(method, params) {
                CachePlan::Cache(Ttl::Forever)
            } else {
                CachePlan::Bypass
            }
        }

        _ => CachePlan::Bypass,
    }
}

/// True when the request pins a fixed historical point.
#[must_use]
pub fn is_historical_fixed(method: &str, params: Option<&Value>) -> bool {
    let items = match params {
        Some(Value::Array(items)) => items.as_slice(),
        _ => return false,
    };

    match method {
        "eth_call" => {
            // Either an explicit hex block tag in position 1, or the call
            // pins a block hash inside the call object.
            let tagged = items.get(1).and_then(Value::as_str).is_some_and(is_hex_tag);
            let hash_pinned = items
                .first()
                .and_then(Value::as_object)
                .is_some_and(|call| call.contains_key("blockHash"));
            tagged || hash_pinned
        }
        "eth_getBlockByNumber" | "eth_getBlockReceipts" => {
            items.first().and_then(Value::as_str).is_some_and(is_hex_tag)
        }
        "eth_getLogs" => items
            .first()
            .and_then(Value::as_object)
            .and_then(|filter| filter.get("toBlock"))
            .and_then(Value::as_str)
            .is_some_and(is_hex_tag),
        // The trailing param is the block tag; earlier params (address,
        // storage slot) are hex too and must not be mistaken for one.
        "eth_getStorageAt" | "eth_getBalance" => {
            items.last().and_then(Value::as_str).is_some_and(is_hex_tag)
        }
        _ => false,
    }
}

/// A concrete `0x`-prefixed block tag.
///
/// Named tags (`latest`, `pending`, `earliest`, `safe`, `finalized`) all fail
/// this test and therefore never mark a request historical-fixed.
fn is_hex_tag(tag: &str) -> bool {
    tag.strip_prefix("0x")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_hexdigit()))
}
