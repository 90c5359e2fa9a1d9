use std::time::Duration;

use crate::{
    Capacity, CounterStore, RateLimitDecision, RefillRate, StoreError, StoredState,
    common::EPSILON, rate_limiter::MAX_CAS_ATTEMPTS,
};

/// Per-key token bucket state: `[tokens, last_refill_ms]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BucketState {
    pub tokens: f64,
    pub last_refill_ms: u64,
}

impl BucketState {
    fn full(capacity: Capacity, now_ms: u64) -> Self {
        Self {
            tokens: *capacity as f64,
            last_refill_ms: now_ms,
        }
    }

    fn decode(state: &StoredState) -> Option<Self> {
        match **state {
            [tokens, last_refill_ms] if tokens.is_finite() && last_refill_ms >= 0f64 => Some(Self {
                tokens,
                last_refill_ms: last_refill_ms as u64,
            }),
            _ => None,
        }
    }

    fn encode(&self) -> StoredState {
        StoredState::new(vec![self.tokens, self.last_refill_ms as f64])
    }

    /// Add tokens accrued since the last refill, capped at `capacity`.
    ///
    /// A clock reading earlier than `last_refill_ms` accrues nothing.
    pub fn refilled(&self, capacity: Capacity, refill_rate: RefillRate, now_ms: u64) -> Self {
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        let tokens = (self.tokens + elapsed_ms as f64 * refill_rate.per_ms())
            .clamp(0f64, *capacity as f64);

        Self {
            tokens,
            last_refill_ms: self.last_refill_ms.max(now_ms),
        }
    }
}

/// Take `cost` tokens from the bucket under `state_key`, or report how long until they accrue.
///
/// Rejections leave the stored state untouched.
pub(crate) async fn acquire<S: CounterStore>(
    store: &S,
    state_key: &str,
    capacity: Capacity,
    refill_rate: RefillRate,
    ttl: Duration,
    now_ms: u64,
    cost: u64,
) -> Result<RateLimitDecision, StoreError> {
    let cost = cost as f64;

    for _ in 0..MAX_CAS_ATTEMPTS {
        let current = store.get(state_key).await?;

        let bucket = match current.as_ref() {
            None => BucketState::full(capacity, now_ms),
            Some(stored) => match BucketState::decode(stored) {
                Some(bucket) => bucket,
                None => {
                    tracing::debug!(key = state_key, ?stored, "Resetting unreadable token bucket state");
                    BucketState::full(capacity, now_ms)
                }
            },
        };

        let bucket = bucket.refilled(capacity, refill_rate, now_ms);

        if bucket.tokens + EPSILON < cost {
            let missing = cost - bucket.tokens;
            let retry_after_ms = (missing / refill_rate.per_ms()).ceil().max(1f64) as u64;

            return Ok(RateLimitDecision::Rejected { retry_after_ms });
        }

        let next = BucketState {
            tokens: (bucket.tokens - cost).max(0f64),
            last_refill_ms: bucket.last_refill_ms,
        };

        if store
            .compare_and_set(state_key, current.as_ref(), next.encode(), ttl)
            .await?
        {
            return Ok(RateLimitDecision::Admitted);
        }
    }

    Err(StoreError::Contention {
        attempts: MAX_CAS_ATTEMPTS,
    })
} // end fn acquire
