use std::time::Duration;

use crate::{
    Capacity, CounterStore, RateLimitDecision, StoreError, StoredState, WindowSizeMs,
    common::EPSILON, rate_limiter::MAX_CAS_ATTEMPTS,
};

/// Previous window's count scaled by how much of it still overlaps the sliding window.
///
/// Floored, so a partial request never counts.
pub(crate) fn weighted_previous(previous: f64, window: WindowSizeMs, now_ms: u64) -> f64 {
    (previous * window.previous_window_weight(now_ms) + EPSILON).floor()
}

/// Per-key sliding window counter state: `[window_id, current, previous]`, where
/// `previous` is the count of window `window_id - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CounterState {
    window_id: u64,
    current: u64,
    previous: u64,
}

impl CounterState {
    /// The stored counters as seen from `window_id`, rolling them forward as needed.
    fn at(stored: Option<&StoredState>, window_id: u64) -> Self {
        let (current, previous) = match stored.map(|state| &**state) {
            Some([id, current, previous]) if *current >= 0f64 && *previous >= 0f64 => {
                if *id == window_id as f64 {
                    (*current as u64, *previous as u64)
                } else if window_id.checked_sub(1).is_some_and(|last| *id == last as f64) {
                    (0, *current as u64)
                } else {
                    (0, 0)
                }
            }
            _ => (0, 0),
        };

        Self {
            window_id,
            current,
            previous,
        }
    }

    fn encode(&self) -> StoredState {
        StoredState::new(vec![
            self.window_id as f64,
            self.current as f64,
            self.previous as f64,
        ])
    }
}

/// Count `cost` against the current window, admitting while
/// `current + floor(previous × weight) ≤ limit`.
///
/// Both counters live under one key and are only written when the request fits.
pub(crate) async fn acquire<S: CounterStore>(
    store: &S,
    state_key: &str,
    limit: Capacity,
    window: WindowSizeMs,
    now_ms: u64,
    cost: u64,
) -> Result<RateLimitDecision, StoreError> {
    let window_id = window.window_id(now_ms);
    let window_end_ms = window.window_start(now_ms) + *window;
    let until_window_end_ms = window_end_ms - now_ms;
    // the current count is still needed as `previous` throughout the next window
    let ttl = Duration::from_millis(until_window_end_ms.saturating_add(*window));

    for _ in 0..MAX_CAS_ATTEMPTS {
        let stored = store.get(state_key).await?;
        let state = CounterState::at(stored.as_ref(), window_id);

        let current = state.current.saturating_add(cost) as f64;
        let previous = state.previous as f64;
        let estimate = current + weighted_previous(previous, window, now_ms);

        if estimate > *limit as f64 + EPSILON {
            return Ok(RateLimitDecision::Rejected {
                retry_after_ms: retry_after_ms(
                    *limit as f64 - current,
                    previous,
                    window,
                    now_ms,
                    until_window_end_ms,
                ),
            });
        }

        let next = CounterState {
            current: state.current + cost,
            ..state
        };

        if store
            .compare_and_set(state_key, stored.as_ref(), next.encode(), ttl)
            .await?
        {
            return Ok(RateLimitDecision::Admitted);
        }
    }

    Err(StoreError::Contention {
        attempts: MAX_CAS_ATTEMPTS,
    })
} // end fn acquire

/// Time until the weighted previous count fits in `room`, the space left once this
/// request's cost is counted in the current window.
fn retry_after_ms(
    room: f64,
    previous: f64,
    window: WindowSizeMs,
    now_ms: u64,
    until_window_end_ms: u64,
) -> u64 {
    if room < 0f64 || previous <= 0f64 {
        return until_window_end_ms;
    }

    // floor(previous × weight) ≤ room once weight < (room + 1) / previous,
    // i.e. strictly after target_elapsed_ms
    let target_weight = (room + 1f64) / previous;
    let target_elapsed_ms = (1f64 - target_weight) * *window as f64;
    let elapsed_ms = (now_ms - window.window_start(now_ms)) as f64;

    (((target_elapsed_ms - elapsed_ms).floor() + 1f64).max(1f64) as u64).min(until_window_end_ms)
}
