use std::time::Duration;

use crate::{
    CounterStore, StoreError, WindowSizeMs, rate_limiter::sliding_window_counter::weighted_previous,
};

/// Recency-weighted call counts over the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct WindowCounts {
    pub calls: f64,
    pub failures: f64,
}

impl WindowCounts {
    pub fn failure_rate(&self) -> f64 {
        if self.calls <= 0f64 {
            return 0f64;
        }
        (self.failures / self.calls).min(1f64)
    }
}

/// Success/failure counters for one breaker, kept in the counter store.
///
/// Uses the same two-window weighting as the sliding window counter limiter: per
/// epoch-aligned window there is one `ok` and one `err` counter, and the previous window
/// contributes `floor(count × (1 - elapsed_fraction))`.
pub(crate) struct RollingWindow {
    base_key: String,
    window: WindowSizeMs,
}

impl RollingWindow {
    pub fn new(base_key: String, window: WindowSizeMs) -> Self {
        Self { base_key, window }
    }

    fn counter_key(&self, window_id: u64, failed: bool) -> String {
        let outcome = if failed { "err" } else { "ok" };
        format!("{}:{}:{}", self.base_key, window_id, outcome)
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.window.saturating_mul(2))
    }

    async fn read<S: CounterStore>(&self, store: &S, key: &str) -> Result<f64, StoreError> {
        Ok(store
            .get(key)
            .await?
            .map(|state| state.first().max(0f64))
            .unwrap_or(0f64))
    }

    /// Count one outcome and return the window as seen right after it.
    pub async fn record<S: CounterStore>(
        &self,
        store: &S,
        now_ms: u64,
        failed: bool,
    ) -> Result<WindowCounts, StoreError> {
        let window_id = self.window.window_id(now_ms);

        let hit = store
            .increment(&self.counter_key(window_id, failed), 1, self.ttl())
            .await? as f64;
        let other = self
            .read(store, &self.counter_key(window_id, !failed))
            .await?;

        let (current_failures, current_successes) = if failed { (hit, other) } else { (other, hit) };

        let (previous_failures, previous_successes) = match window_id.checked_sub(1) {
            Some(previous_id) => (
                self.read(store, &self.counter_key(previous_id, true)).await?,
                self.read(store, &self.counter_key(previous_id, false)).await?,
            ),
            None => (0f64, 0f64),
        };

        let failures = current_failures + weighted_previous(previous_failures, self.window, now_ms);
        let successes =
            current_successes + weighted_previous(previous_successes, self.window, now_ms);

        Ok(WindowCounts {
            calls: failures + successes,
            failures,
        })
    } // end method record

    /// Drop the current and previous window counters.
    pub async fn reset<S: CounterStore>(&self, store: &S, now_ms: u64) -> Result<(), StoreError> {
        let window_id = self.window.window_id(now_ms);

        for id in [Some(window_id), window_id.checked_sub(1)].into_iter().flatten() {
            store.expire(&self.counter_key(id, true), Duration::ZERO).await?;
            store.expire(&self.counter_key(id, false), Duration::ZERO).await?;
        }

        Ok(())
    }
}
