use std::time::Duration;

use crate::{
    Capacity, CounterStore, RateLimitDecision, StoreError, StoredState, WindowSizeMs,
    rate_limiter::MAX_CAS_ATTEMPTS,
};

/// Timestamps (ms) still inside the trailing window `(now - window, now]`, oldest first.
///
/// Entries newer than `now_ms` (a clock that stepped back) are kept.
fn live_entries(stored: Option<&StoredState>, window: WindowSizeMs, now_ms: u64) -> Vec<f64> {
    let Some(stored) = stored else {
        return Vec::new();
    };

    let mut entries: Vec<f64> = stored
        .iter()
        .copied()
        .filter(|&timestamp_ms| {
            timestamp_ms.is_finite() && now_ms.saturating_sub(timestamp_ms as u64) < *window
        })
        .collect();

    entries.sort_by(f64::total_cmp);
    entries
}

/// Append `cost` timestamps to the log under `state_key` if they fit in the trailing window.
///
/// Rejected requests are never appended, so the log never holds more than `limit` entries.
pub(crate) async fn acquire<S: CounterStore>(
    store: &S,
    state_key: &str,
    limit: Capacity,
    window: WindowSizeMs,
    now_ms: u64,
    cost: u64,
) -> Result<RateLimitDecision, StoreError> {
    let ttl = Duration::from_millis(*window);

    for _ in 0..MAX_CAS_ATTEMPTS {
        let current = store.get(state_key).await?;
        let mut entries = live_entries(current.as_ref(), window, now_ms);

        let needed = entries.len() as u64 + cost;

        if needed > *limit {
            // the `excess`-th oldest entry has to leave the window first
            let excess = (needed - *limit) as usize;
            let retry_after_ms = entries
                .get(excess - 1)
                .map(|&timestamp_ms| {
                    (timestamp_ms as u64 + *window)
                        .saturating_sub(now_ms)
                        .max(1)
                })
                .unwrap_or(*window);

            return Ok(RateLimitDecision::Rejected { retry_after_ms });
        }

        entries.extend(std::iter::repeat_n(now_ms as f64, cost as usize));
        entries.sort_by(f64::total_cmp);

        if store
            .compare_and_set(state_key, current.as_ref(), StoredState::new(entries), ttl)
            .await?
        {
            return Ok(RateLimitDecision::Admitted);
        }
    }

    Err(StoreError::Contention {
        attempts: MAX_CAS_ATTEMPTS,
    })
} // end fn acquire
