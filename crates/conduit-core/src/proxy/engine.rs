//! The dispatcher.
//!
//! Orchestrates a single classified request:
//!
//! ```text
//! Start → LookupCache → Hit
//!                     → Miss → JoinInflight → Joiner → Await
//!                                           → Leader → Throttle → Primary
//!                                                      → Final
//!                                                      → FallbackDecision → Fallback (retries) → Final
//!                              Finalize: validate → write-through → broadcast
//! ```
//!
//! Rules encoded here:
//! - the primary gets exactly one attempt, never a retry;
//! - a primary JSON-RPC error with a historical-data signature triggers the
//!   fallback, keeping the primary envelope as a recovery candidate;
//! - a primary *success* that fails the quality check also triggers the
//!   fallback, again with the primary kept for recovery;
//! - the fallback retries with exponential backoff (doubling, ±10% jitter);
//! - write-through happens inside the in-flight critical section.

use crate::{
    cache::{classify, CacheManager, CachePlan},
    fingerprint::fingerprint,
    metrics,
    network::NetworkSpec,
    proxy::{
        coalesce::{Coalescer, Role},
        errors::DispatchError,
        quality,
    },
    types::{CacheOutcome, JsonRpcRequest, JsonRpcResponse},
    upstream::{is_historical_state_error, UpstreamClient, UpstreamError},
    validate,
};
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// How long a request may wait for a per-network upstream permit before the
/// overflow policy rejects it.
const PERMIT_WAIT: Duration = Duration::from_millis(500);

/// What the last failed fallback attempt looked like.
enum LastFailure {
    /// A parsed JSON-RPC error envelope, forwardable verbatim.
    Rpc(JsonRpcResponse),
    /// A transport-level failure.
    Transport(String),
}

pub struct ProxyEngine {
    cache: Arc<CacheManager>,
    client: Arc<UpstreamClient>,
    coalescer: Coalescer,
    /// Per-network upstream concurrency budgets.
    permits: DashMap<Arc<str>, Arc<Semaphore>>,
}

impl ProxyEngine {
    #[must_use]
    pub fn new(cache: Arc<CacheManager>, client: Arc<UpstreamClient>) -> Self {
        Self { cache, client, coalescer: Coalescer::new(), permits: DashMap::new() }
    }

    /// Dispatches one request on one network.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] only when no upstream produced any response
    /// at all; upstream JSON-RPC errors come back as `Ok` envelopes.
    pub async fn dispatch(
        self: &Arc<Self>,
        network: Arc<NetworkSpec>,
        request: JsonRpcRequest,
    ) -> Result<(JsonRpcResponse, CacheOutcome), DispatchError> {
        let key = fingerprint(&network.key, &request.method, request.params.as_ref());
        let plan = classify(&request.method, request.params.as_ref(), self.cache.volatile_ttl());

        if let CachePlan::Cache(ttl) = plan {
            if let Some(hit) = self.cache.lookup(&key, ttl, &request.id).await {
                debug!(key, method = %request.method, "cache hit");
                return Ok((hit, CacheOutcome::Hit));
            }
        }
        let outcome =
            if plan.is_cacheable() { CacheOutcome::Miss } else { CacheOutcome::Bypass };

        let caller_id = Arc::clone(&request.id);
        let engine = Arc::clone(self);
        let leader_key = key.clone();
        let (future, role) = self.coalescer.join(&key, async move {
            engine.lead_fetch(network, request, leader_key, plan).await
        });
        if role == Role::Joiner {
            debug!(key, "joined in-flight fetch");
        }

        match future.await.as_ref() {
            Ok(response) => Ok((response.with_id(caller_id), outcome)),
            Err(err) => Err(err.clone()),
        }
    }

    /// Number of fetches currently in flight (diagnostics).
    #[must_use]
    pub fn inflight(&self) -> usize {
        self.coalescer.len()
    }

    /// Leader path: throttle, fetch with failover, then write-through before
    /// the in-flight entry is released.
    async fn lead_fetch(
        self: Arc<Self>,
        network: Arc<NetworkSpec>,
        request: JsonRpcRequest,
        key: String,
        plan: CachePlan,
    ) -> Result<JsonRpcResponse, DispatchError> {
        self.cache.delay_duplicate(&key).await;

        let response = self.fetch_with_failover(&network, &request).await?;

        if plan.is_cacheable()
            && response.error.is_none()
            && validate::acceptable_for_cache(&request, response.result.as_ref())
        {
            self.cache.store_response(&key, &response).await;
        }
        Ok(response)
    }

    async fn fetch_with_failover(
        &self,
        network: &NetworkSpec,
        request: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, DispatchError> {
        let _permit = self.acquire_permit(network).await?;

        let primary = self
            .client
            .post(&network.key, &network.primary, request, network.request_timeout)
            .await;

        match primary {
            Ok(response) => {
                if let Some(error) = &response.error {
                    if network.fallback.is_some() && is_historical_state_error(error) {
                        warn!(
                            network = %network.key,
                            method = %request.method,
                            code = error.code,
                            message = %error.message,
                            "primary lacks historical state, trying fallback"
                        );
                        return self.fallback_with_retry(network, request, Some(response)).await;
                    }
                    // Forwarded verbatim.
                    return Ok(response);
                }

                if network.fallback.is_some()
                    && quality::fallback_worthy(
                        &request.method,
                        request.params.as_ref(),
                        response.result.as_ref(),
                    )
                {
                    debug!(
                        network = %network.key,
                        method = %request.method,
                        "primary response failed quality check, trying fallback"
                    );
                    return self.fallback_with_retry(network, request, Some(response)).await;
                }

                Ok(response)
            }
            Err(err) => {
                metrics::record_upstream_error(&network.key, err.as_metric_str());
                warn!(network = %network.key, error = %err, "primary upstream failed");
                if network.fallback.is_some() {
                    self.fallback_with_retry(network, request, None).await
                } else {
                    Err(DispatchError::Unavailable(err.to_string()))
                }
            }
        }
    }

    /// Fallback path: initial attempt plus up to `max_fallback_retries`
    /// retries with doubling, jittered backoff. Any JSON-RPC success becomes
    /// final; when the fallback exhausts, the recovery candidate (the
    /// primary's envelope) wins over surfacing the fallback's failure.
    async fn fallback_with_retry(
        &self,
        network: &NetworkSpec,
        request: &JsonRpcRequest,
        recovery: Option<JsonRpcResponse>,
    ) -> Result<JsonRpcResponse, DispatchError> {
        let Some(fallback) = &network.fallback else {
            return recovery
                .ok_or_else(|| DispatchError::Internal("fallback path without fallback".into()));
        };
        metrics::record_fallback(&network.key);

        let mut delay = network.initial_backoff;
        let mut last: Option<LastFailure> = None;

        for attempt in 0..=network.max_fallback_retries {
            if attempt > 0 {
                tokio::time::sleep(with_jitter(delay)).await;
                delay = delay.saturating_mul(2);
            }

            match self
                .client
                .post(&network.key, fallback, request, network.request_timeout)
                .await
            {
                Ok(response) if response.error.is_none() => {
                    debug!(network = %network.key, attempt, "fallback succeeded");
                    return Ok(response);
                }
                Ok(response) => {
                    last = Some(LastFailure::Rpc(response));
                }
                Err(err) => {
                    metrics::record_upstream_error(&network.key, err.as_metric_str());
                    warn!(network = %network.key, attempt, error = %err, "fallback attempt failed");
                    let retryable = err.is_transient();
                    last = Some(LastFailure::Transport(err.to_string()));
                    if !retryable {
                        break;
                    }
                }
            }
        }

        if let Some(primary) = recovery {
            debug!(network = %network.key, "fallback exhausted, recovering primary response");
            return Ok(primary);
        }
        match last {
            Some(LastFailure::Rpc(response)) => Ok(response),
            Some(LastFailure::Transport(message)) => Err(DispatchError::Unavailable(message)),
            None => Err(DispatchError::Unavailable("fallback produced no response".into())),
        }
    }

    /// Per-network backpressure: a bounded wait for one of the network's
    /// permits; overflow rejects with a transient error so clients may retry.
    async fn acquire_permit(
        &self,
        network: &NetworkSpec,
    ) -> Result<OwnedSemaphorePermit, DispatchError> {
        let semaphore = self
            .permits
            .entry(Arc::clone(&network.key))
            .or_insert_with(|| Arc::new(Semaphore::new(network.max_concurrency)))
            .clone();

        match tokio::time::timeout(PERMIT_WAIT, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) | Err(_) => {
                warn!(network = %network.key, "upstream concurrency budget exhausted");
                Err(DispatchError::Unavailable(
                    UpstreamError::ConcurrencyLimit(network.key.to_string()).to_string(),
                ))
            }
        }
    }
}

/// ±10% jitter around the nominal backoff delay.
fn with_jitter(delay: Duration) -> Duration {
    use rand::Rng;
    let factor: f64 = rand::rng().random_range(0.9..1.1);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
