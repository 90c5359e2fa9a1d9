use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Capacity, FailureMode, RefillRate, StoreTimeoutMs, WindowSizeMs};

/// Admission algorithm used by a [`RateLimitPolicy`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum Algorithm {
    /// Up to `capacity` tokens, refilled continuously at `refill_rate` per second.
    ///
    /// Allows bursts of up to `capacity` after a quiet period.
    TokenBucket {
        /// Tokens added per second.
        refill_rate: RefillRate,
    },

    /// At most `capacity` per epoch-aligned window of length `window`.
    ///
    /// Two bursts straddling a window boundary can admit up to `2 × capacity` within a
    /// span shorter than `window`. This is inherent to fixed windows; use
    /// [`Algorithm::SlidingWindowLog`] when that matters.
    FixedWindow {
        /// Window length.
        window: WindowSizeMs,
    },

    /// Exact: at most `capacity` within any trailing span of length `window`.
    ///
    /// Keeps one timestamp per admitted permit, so memory per key is bounded by `capacity`.
    SlidingWindowLog {
        /// Window length.
        window: WindowSizeMs,
    },

    /// Approximate sliding window built from the current and previous fixed windows.
    ///
    /// `estimate = current + floor(previous × (1 - elapsed_fraction))`.
    SlidingWindowCounter {
        /// Window length.
        window: WindowSizeMs,
    },
}

impl Algorithm {
    /// Short stable name used in store keys and log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenBucket { .. } => "token_bucket",
            Self::FixedWindow { .. } => "fixed_window",
            Self::SlidingWindowLog { .. } => "sliding_window_log",
            Self::SlidingWindowCounter { .. } => "sliding_window_counter",
        }
    }
}

/// Immutable configuration shared by every rate limiter created under one policy name.
///
/// # Examples
///
/// ```
/// use floodgate::{Capacity, FailureMode, RateLimitPolicy, RefillRate};
///
/// let policy = RateLimitPolicy::token_bucket(
///     Capacity::try_from(10).unwrap(),
///     RefillRate::try_from(1.0).unwrap(),
/// )
/// .with_failure_mode(FailureMode::FailClosed);
///
/// assert_eq!(policy.failure_mode, FailureMode::FailClosed);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RateLimitPolicy {
    /// Admission algorithm and its timing parameter.
    pub algorithm: Algorithm,

    /// Bucket size (token bucket) or maximum admitted cost per window.
    pub capacity: Capacity,

    /// What to do when the counter store fails or times out.
    #[cfg_attr(feature = "serde", serde(default))]
    pub failure_mode: FailureMode,

    /// Upper bound on each decision's time spent in the counter store.
    #[cfg_attr(feature = "serde", serde(default))]
    pub store_timeout: StoreTimeoutMs,
}

impl RateLimitPolicy {
    /// Policy with the given algorithm and capacity, failing open with the default store timeout.
    pub fn new(algorithm: Algorithm, capacity: Capacity) -> Self {
        Self {
            algorithm,
            capacity,
            failure_mode: FailureMode::default(),
            store_timeout: StoreTimeoutMs::default(),
        }
    }

    /// Token bucket of `capacity` tokens refilled at `refill_rate` per second.
    pub fn token_bucket(capacity: Capacity, refill_rate: RefillRate) -> Self {
        Self::new(Algorithm::TokenBucket { refill_rate }, capacity)
    }

    /// Fixed window admitting `limit` per `window`.
    pub fn fixed_window(limit: Capacity, window: WindowSizeMs) -> Self {
        Self::new(Algorithm::FixedWindow { window }, limit)
    }

    /// Sliding window log admitting `limit` per trailing `window`.
    pub fn sliding_window_log(limit: Capacity, window: WindowSizeMs) -> Self {
        Self::new(Algorithm::SlidingWindowLog { window }, limit)
    }

    /// Sliding window counter admitting roughly `limit` per trailing `window`.
    pub fn sliding_window_counter(limit: Capacity, window: WindowSizeMs) -> Self {
        Self::new(Algorithm::SlidingWindowCounter { window }, limit)
    }

    /// Replace the failure mode.
    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Replace the store timeout.
    pub fn with_store_timeout(mut self, store_timeout: StoreTimeoutMs) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// How long per-key state stays meaningful without traffic.
    ///
    /// After this long an idle token bucket is full again and every window has rolled
    /// over, so the state can be dropped without changing any decision.
    pub fn idle_ttl(&self) -> Duration {
        match self.algorithm {
            Algorithm::TokenBucket { refill_rate } => {
                let refill_ms = (*self.capacity as f64 / refill_rate.per_ms()).ceil();
                Duration::from_millis((refill_ms as u64).max(1))
            }
            Algorithm::FixedWindow { window } | Algorithm::SlidingWindowLog { window } => {
                Duration::from_millis(*window)
            }
            // the current window is read as "previous" during the next one
            Algorithm::SlidingWindowCounter { window } => {
                Duration::from_millis(window.saturating_mul(2))
            }
        }
    }

    pub(crate) fn store_timeout_duration(&self) -> Duration {
        Duration::from_millis(*self.store_timeout)
    }
}
