//! # Conduit Core
//!
//! Core library for the Conduit caching, failover-aware JSON-RPC reverse
//! proxy for EVM nodes.
//!
//! - **[`fingerprint`]**: deterministic cache keys from
//!   `(network, method, params)` with fast paths for common request shapes.
//!
//! - **[`cache`]**: two-tier storage - bounded memory LRU in front of a
//!   persistent SQLite key/value store - plus the per-method cacheability
//!   policy and the duplicate-window throttle.
//!
//! - **[`proxy`]**: the dispatcher - single-flight coalescing, primary
//!   attempt, response-quality inspection, retrying fallback with jittered
//!   backoff, and write-through.
//!
//! - **[`upstream`]**: per-network HTTP connection pools and the error
//!   taxonomy the dispatcher's decisions hang off.
//!
//! - **[`network`]**: path-segment routing to `NetworkSpec`s.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────┐
//! │ NetworkRouter│ ─── unknown ──► 404
//! └──────┬──────┘
//!        ▼
//! ┌─────────────┐
//! │ Cache Lookup │ ─── hit ──► Cached envelope (id rewritten)
//! └──────┬──────┘
//!        │ miss
//!        ▼
//! ┌─────────────┐    joiner
//! │  Coalescer  │ ─────────► await shared result
//! └──────┬──────┘
//!        │ leader
//!        ▼
//! Duplicate throttle → Primary (1 attempt) → quality / error inspection
//!        │                                        │
//!        │                            fallback-worthy? historical error?
//!        │                                        ▼
//!        │                         Fallback (retries, backoff ± jitter)
//!        ▼
//! Validator → write-through (both tiers) → broadcast to awaiters
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod core;
pub mod fingerprint;
pub mod metrics;
pub mod network;
pub mod proxy;
pub mod types;
pub mod upstream;
pub mod validate;

pub use crate::core::{Core, CoreError};
