//! Single-flight request coalescing.
//!
//! At most one upstream attempt exists per fingerprint at any instant. The
//! first caller for a key becomes the *leader* and runs the producer in a
//! detached task; later callers *join* and await the same shared result. The
//! leader task always runs to completion - a joiner (or the leader's own
//! caller) timing out or disconnecting never cancels the upstream attempt,
//! so remaining awaiters and the cache still benefit.
//!
//! Entries are removed from the map by the leader task itself, after the
//! producer (including its write-through) has finished, which is what makes
//! cache population happen-before in-flight release.

use crate::proxy::errors::DispatchError;
use crate::types::JsonRpcResponse;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Result broadcast to every awaiter of one in-flight fetch.
pub type SharedOutcome = Arc<Result<JsonRpcResponse, DispatchError>>;

/// Future every awaiter of a key holds.
pub type OutcomeFuture = Shared<BoxFuture<'static, SharedOutcome>>;

/// Whether this caller started the fetch or joined an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Joiner,
}

struct InflightEntry {
    started_at: Instant,
    awaiters: Arc<AtomicUsize>,
    future: OutcomeFuture,
}

/// The single-flight map. Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct Coalescer {
    inflight: Arc<DashMap<String, InflightEntry>>,
}

impl Coalescer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins (or starts) the in-flight fetch for `key`.
    ///
    /// The producer only runs when this caller is the leader; for joiners it
    /// is dropped unexecuted. The returned future is cheap to clone and safe
    /// to abandon.
    pub fn join<F>(&self, key: &str, producer: F) -> (OutcomeFuture, Role)
    where
        F: std::future::Future<Output = Result<JsonRpcResponse, DispatchError>> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;

        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().awaiters.fetch_add(1, Ordering::Relaxed);
                (entry.get().future.clone(), Role::Joiner)
            }
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel::<SharedOutcome>();
                let future: OutcomeFuture = async move {
                    match rx.await {
                        Ok(outcome) => outcome,
                        // The leader task can only vanish without sending if
                        // it panicked.
                        Err(_) => Arc::new(Err(DispatchError::Internal(
                            "in-flight fetch aborted".to_string(),
                        ))),
                    }
                }
                .boxed()
                .shared();

                slot.insert(InflightEntry {
                    started_at: Instant::now(),
                    awaiters: Arc::new(AtomicUsize::new(1)),
                    future: future.clone(),
                });

                let map = Arc::clone(&self.inflight);
                let key = key.to_string();
                tokio::spawn(async move {
                    let outcome = Arc::new(producer.await);
                    // Release the entry only after the producer (and its
                    // write-through) completed.
                    map.remove(&key);
                    let _ = tx.send(outcome);
                });

                (future, Role::Leader)
            }
        }
    }

    /// Number of fetches currently in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }

    /// Age of the oldest in-flight fetch, for diagnostics.
    #[must_use]
    pub fn oldest_age(&self) -> Option<std::time::Duration> {
        self.inflight.iter().map(|entry| entry.started_at.elapsed()).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn ok_response(result: serde_json::Value) -> Result<JsonRpcResponse, DispatchError> {
        Ok(JsonRpcResponse::success(result, Arc::new(json!(1))))
    }

    #[tokio::test]
    async fn test_single_producer_for_concurrent_joins() {
        let coalescer = Coalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut futures = Vec::new();
        for _ in 0..50 {
            let calls = Arc::clone(&calls);
            let (future, _) = coalescer.join("k", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                ok_response(json!("0x1"))
            });
            futures.push(future);
        }

        let results = futures::future::join_all(futures).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "exactly one upstream attempt");
        for outcome in results {
            assert_eq!(outcome.as_ref().as_ref().unwrap().result, Some(json!("0x1")));
        }
        assert!(coalescer.is_empty(), "entry released after completion");
    }

    #[tokio::test]
    async fn test_roles() {
        let coalescer = Coalescer::new();
        let (f1, role1) = coalescer.join("k", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ok_response(json!(1))
        });
        let (f2, role2) = coalescer.join("k", async { ok_response(json!(2)) });

        assert_eq!(role1, Role::Leader);
        assert_eq!(role2, Role::Joiner);

        // Both observe the leader's value; the joiner's producer never ran.
        assert_eq!(f1.await.as_ref().as_ref().unwrap().result, Some(json!(1)));
        assert_eq!(f2.await.as_ref().as_ref().unwrap().result, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_errors_broadcast_to_all_awaiters() {
        let coalescer = Coalescer::new();
        let (f1, _) = coalescer.join("k", async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(DispatchError::Unavailable("boom".to_string()))
        });
        let (f2, _) = coalescer.join("k", async { ok_response(json!("never")) });

        for f in [f1, f2] {
            match f.await.as_ref() {
                Err(DispatchError::Unavailable(msg)) => assert_eq!(msg, "boom"),
                other => panic!("expected Unavailable, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_leader_survives_cancelled_awaiters() {
        let coalescer = Coalescer::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_clone = Arc::clone(&ran);
        let (future, _) = coalescer.join("k", async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            ran_clone.fetch_add(1, Ordering::SeqCst);
            ok_response(json!("done"))
        });

        // Every awaiter handle dropped before completion.
        drop(future);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1, "leader ran to completion anyway");
        assert!(coalescer.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let coalescer = Coalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&calls);
        let (f1, _) = coalescer.join("a", async move {
            c1.fetch_add(1, Ordering::SeqCst);
            ok_response(json!("a"))
        });
        let c2 = Arc::clone(&calls);
        let (f2, _) = coalescer.join("b", async move {
            c2.fetch_add(1, Ordering::SeqCst);
            ok_response(json!("b"))
        });

        let _ = f1.await;
        let _ = f2.await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_fetches_do_not_coalesce() {
        let coalescer = Coalescer::new();

        let (f1, role1) = coalescer.join("k", async { ok_response(json!(1)) });
        let _ = f1.await;

        let (f2, role2) = coalescer.join("k", async { ok_response(json!(2)) });
        assert_eq!(role1, Role::Leader);
        assert_eq!(role2, Role::Leader, "entry was released, second call leads again");
        assert_eq!(f2.await.as_ref().as_ref().unwrap().result, Some(json!(2)));
    }
}
