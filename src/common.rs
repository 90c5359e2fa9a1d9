use std::ops::Deref;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::FloodgateError;

/// Tolerance used when comparing fractional token or window math.
pub(crate) const EPSILON: f64 = 1e-9;

/// Maximum number of permits (token bucket) or requests per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "u64", into = "u64")
)]
pub struct Capacity(u64);

impl Deref for Capacity {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for Capacity {
    type Error = FloodgateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(FloodgateError::InvalidCapacity(
                "Capacity must be at least 1".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<Capacity> for u64 {
    fn from(value: Capacity) -> Self {
        value.0
    }
}

/// Token bucket refill rate in permits per second.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "f64", into = "f64")
)]
pub struct RefillRate(f64);

impl RefillRate {
    /// Permits refilled per millisecond.
    pub(crate) fn per_ms(&self) -> f64 {
        self.0 / 1000.0
    }
}

impl Deref for RefillRate {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for RefillRate {
    type Error = FloodgateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value <= 0f64 {
            Err(FloodgateError::InvalidRefillRate(
                "Refill rate must be a finite number greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<RefillRate> for f64 {
    fn from(value: RefillRate) -> Self {
        value.0
    }
}

/// Window length in milliseconds, used by the window algorithms and the breaker's rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "u64", into = "u64")
)]
pub struct WindowSizeMs(u64);

impl WindowSizeMs {
    /// 30 s, the circuit breaker's default rolling window.
    pub(crate) fn default_rolling_window() -> Self {
        Self(30_000)
    }

    /// Id of the epoch-aligned window containing `now_ms`.
    pub(crate) fn window_id(&self, now_ms: u64) -> u64 {
        now_ms / self.0
    }

    /// Start of the epoch-aligned window containing `now_ms`.
    pub(crate) fn window_start(&self, now_ms: u64) -> u64 {
        self.window_id(now_ms) * self.0
    }

    /// Share of the previous window that still overlaps the trailing window ending at `now_ms`.
    ///
    /// `1.0` at the first instant of a window, approaching `0.0` at its end.
    pub(crate) fn previous_window_weight(&self, now_ms: u64) -> f64 {
        let elapsed_ms = now_ms - self.window_start(now_ms);
        1f64 - elapsed_ms as f64 / self.0 as f64
    }
}

impl Deref for WindowSizeMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for WindowSizeMs {
    type Error = FloodgateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(FloodgateError::InvalidWindowSize(
                "Window size must be at least 1 ms".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<WindowSizeMs> for u64 {
    fn from(value: WindowSizeMs) -> Self {
        value.0
    }
}

/// Upper bound on how long a single counter store call may take.
///
/// Defaults to 25 ms. On expiry the policy's [`FailureMode`] decides the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "u64", into = "u64")
)]
pub struct StoreTimeoutMs(u64);

impl Default for StoreTimeoutMs {
    fn default() -> Self {
        Self(25)
    }
}

impl Deref for StoreTimeoutMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for StoreTimeoutMs {
    type Error = FloodgateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(FloodgateError::InvalidStoreTimeout(
                "Store timeout must be at least 1 ms".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<StoreTimeoutMs> for u64 {
    fn from(value: StoreTimeoutMs) -> Self {
        value.0
    }
}

/// What a rate limiter does when its counter store fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum FailureMode {
    /// Admit the request and log a degraded-mode warning.
    #[default]
    FailOpen,
    /// Reject the request.
    FailClosed,
    /// Return [`FloodgateError::StoreUnavailable`] to the caller.
    FailClosedHard,
}

/// Outcome of a rate limiter admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The request/work is admitted and its cost has been recorded.
    Admitted,
    /// The request/work is rejected. Nothing was recorded.
    Rejected {
        /// Best-effort wait before the same cost could be admitted.
        ///
        /// `0` when the store could not be consulted (fail-closed).
        retry_after_ms: u64,
    },
}

impl RateLimitDecision {
    /// Returns `true` for [`RateLimitDecision::Admitted`].
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Outcome of a circuit breaker check before a guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPermission {
    /// The call may proceed. Report its outcome afterwards.
    Allowed,
    /// The call must not be attempted.
    Rejected {
        /// Time until the breaker will allow a half-open trial, when known.
        retry_after_ms: Option<u64>,
    },
}

impl CallPermission {
    /// Returns `true` for [`CallPermission::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}
