use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    Clock, CounterStore, FailureMode, FloodgateError, RateLimitDecision, RateLimitPolicy,
    StoreError,
    rate_limiter::{
        Algorithm, CONTENDED_RETRY_AFTER_MS, fixed_window, sliding_window_counter,
        sliding_window_log, token_bucket,
    },
    runtime,
};

/// Snapshot of a rate limiter's decision counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    /// Requests admitted, including degraded fail-open admissions.
    pub admitted: u64,
    /// Requests rejected, including fail-closed rejections.
    pub rejected: u64,
    /// Decisions made without the counter store.
    pub degraded: u64,
}

#[derive(Debug, Default)]
struct LimiterCounters {
    admitted: AtomicU64,
    rejected: AtomicU64,
    degraded: AtomicU64,
}

/// Admission control for one `(policy, key)` pair.
///
/// Instances are created and cached by [`ResilienceRegistry`](crate::ResilienceRegistry);
/// the per-key state itself lives in the registry's [`CounterStore`], so every decision
/// is a linearizable read-modify-write against that store.
///
/// # Failure handling
///
/// Each decision is bounded by the policy's store timeout. When the store fails or times
/// out the policy's [`FailureMode`] applies:
///
/// - [`FailureMode::FailOpen`]: admit and log a degraded-mode warning
/// - [`FailureMode::FailClosed`]: reject with `retry_after_ms = 0`
/// - [`FailureMode::FailClosedHard`]: return [`FloodgateError::StoreUnavailable`]
///
/// A key so contended that the read-modify-write keeps losing is not a store failure: the
/// request is rejected with a short retry hint whatever the failure mode.
pub struct RateLimiter<S: CounterStore, C: Clock> {
    policy_name: Arc<str>,
    key: Arc<str>,
    policy: Arc<RateLimitPolicy>,
    store: Arc<S>,
    clock: Arc<C>,
    state_key: String,
    last_used_ms: AtomicU64,
    counters: LimiterCounters,
}

impl<S: CounterStore, C: Clock> RateLimiter<S, C> {
    pub(crate) fn new(
        policy_name: Arc<str>,
        key: Arc<str>,
        policy: Arc<RateLimitPolicy>,
        store: Arc<S>,
        clock: Arc<C>,
    ) -> Self {
        let state_key = format!("rl:{}:{}:{}", policy_name, key, policy.algorithm.name());
        let now_ms = clock.now_ms();

        Self {
            policy_name,
            key,
            policy,
            store,
            clock,
            state_key,
            last_used_ms: AtomicU64::new(now_ms),
            counters: LimiterCounters::default(),
        }
    } // end constructor

    /// Policy this limiter enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Key this limiter is scoped to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Decision counters since this limiter was created.
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn last_used_ms(&self) -> u64 {
        self.last_used_ms.load(Ordering::Relaxed)
    }

    /// Admit `cost` permits or reject with a retry hint.
    ///
    /// # Errors
    ///
    /// - [`FloodgateError::InvalidCost`] when `cost` is `0` or larger than the capacity
    /// - [`FloodgateError::StoreUnavailable`] only under [`FailureMode::FailClosedHard`]
    pub async fn try_acquire(&self, cost: u64) -> Result<RateLimitDecision, FloodgateError> {
        let capacity = *self.policy.capacity;

        if cost == 0 || cost > capacity {
            return Err(FloodgateError::InvalidCost { cost, capacity });
        }

        let now_ms = self.clock.now_ms();
        self.last_used_ms.fetch_max(now_ms, Ordering::Relaxed);

        let result =
            runtime::with_timeout(self.policy.store_timeout_duration(), self.decide(now_ms, cost))
                .await;

        let decision = match result {
            Ok(decision) => decision,
            // the store is healthy, just busy: no failure mode applies
            Err(StoreError::Contention { attempts }) => {
                tracing::debug!(
                    policy = %self.policy_name,
                    key = %self.key,
                    attempts,
                    "Rate limit state contended, rejecting"
                );
                RateLimitDecision::Rejected {
                    retry_after_ms: CONTENDED_RETRY_AFTER_MS,
                }
            }
            Err(err) => return self.degraded(err),
        };

        match decision {
            RateLimitDecision::Admitted => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
            }
            RateLimitDecision::Rejected { .. } => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }

        tracing::debug!(
            policy = %self.policy_name,
            key = %self.key,
            algorithm = self.policy.algorithm.name(),
            cost,
            ?decision,
            "Rate limit decision"
        );

        Ok(decision)
    } // end method try_acquire

    async fn decide(&self, now_ms: u64, cost: u64) -> Result<RateLimitDecision, StoreError> {
        let store = self.store.as_ref();
        let state_key = self.state_key.as_str();
        let capacity = self.policy.capacity;

        match self.policy.algorithm {
            Algorithm::TokenBucket { refill_rate } => {
                let ttl = self.policy.idle_ttl();
                token_bucket::acquire(store, state_key, capacity, refill_rate, ttl, now_ms, cost)
                    .await
            }
            Algorithm::FixedWindow { window } => {
                fixed_window::acquire(store, state_key, capacity, window, now_ms, cost).await
            }
            Algorithm::SlidingWindowLog { window } => {
                sliding_window_log::acquire(store, state_key, capacity, window, now_ms, cost).await
            }
            Algorithm::SlidingWindowCounter { window } => {
                sliding_window_counter::acquire(store, state_key, capacity, window, now_ms, cost)
                    .await
            }
        }
    } // end method decide

    fn degraded(&self, err: StoreError) -> Result<RateLimitDecision, FloodgateError> {
        self.counters.degraded.fetch_add(1, Ordering::Relaxed);

        tracing::warn!(
            policy = %self.policy_name,
            key = %self.key,
            failure_mode = ?self.policy.failure_mode,
            error = ?err,
            "Counter store unavailable, rate limiter running in degraded mode"
        );

        match self.policy.failure_mode {
            FailureMode::FailOpen => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                Ok(RateLimitDecision::Admitted)
            }
            FailureMode::FailClosed => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Ok(RateLimitDecision::Rejected { retry_after_ms: 0 })
            }
            FailureMode::FailClosedHard => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(FloodgateError::StoreUnavailable(err))
            }
        }
    } // end method degraded
} // end of impl
