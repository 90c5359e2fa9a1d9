use std::time::Duration;

use crate::{
    Capacity, CounterStore, RateLimitDecision, StoreError, StoredState, WindowSizeMs,
    rate_limiter::MAX_CAS_ATTEMPTS,
};

/// Per-key fixed window state: `[window_id, count]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowState {
    window_id: u64,
    count: u64,
}

impl WindowState {
    /// Count held for `window_id`; a state from any other window counts as empty.
    fn count_in(stored: Option<&StoredState>, window_id: u64) -> u64 {
        match stored.map(|state| &**state) {
            Some([id, count]) if *id == window_id as f64 && *count >= 0f64 => *count as u64,
            _ => 0,
        }
    }

    fn encode(&self) -> StoredState {
        StoredState::new(vec![self.window_id as f64, self.count as f64])
    }
}

/// Count `cost` against the epoch-aligned window containing `now_ms`.
///
/// The count is only written when the request fits, so a rejection never changes what a
/// concurrent caller sees.
pub(crate) async fn acquire<S: CounterStore>(
    store: &S,
    state_key: &str,
    limit: Capacity,
    window: WindowSizeMs,
    now_ms: u64,
    cost: u64,
) -> Result<RateLimitDecision, StoreError> {
    let window_id = window.window_id(now_ms);
    let until_window_end_ms = window.window_start(now_ms) + *window - now_ms;
    let ttl = Duration::from_millis(until_window_end_ms);

    for _ in 0..MAX_CAS_ATTEMPTS {
        let current = store.get(state_key).await?;
        let count = WindowState::count_in(current.as_ref(), window_id);

        if count.saturating_add(cost) > *limit {
            return Ok(RateLimitDecision::Rejected {
                retry_after_ms: until_window_end_ms,
            });
        }

        let next = WindowState {
            window_id,
            count: count + cost,
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
