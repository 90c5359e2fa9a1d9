use std::{ops::Deref, time::Duration};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{FloodgateError, StoreTimeoutMs, WindowSizeMs};

/// Failure rate in `(0, 1]` at or above which a closed breaker opens.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "f64", into = "f64")
)]
pub struct FailureRateThreshold(f64);

impl Default for FailureRateThreshold {
    /// 50% failures.
    fn default() -> Self {
        Self(0.5)
    }
}

impl Deref for FailureRateThreshold {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for FailureRateThreshold {
    type Error = FloodgateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !(value > 0f64 && value <= 1f64) {
            Err(FloodgateError::InvalidFailureRateThreshold(
                "Failure rate threshold must be greater than 0 and at most 1".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<FailureRateThreshold> for f64 {
    fn from(value: FailureRateThreshold) -> Self {
        value.0
    }
}

/// Calls that must be observed in the rolling window before the failure rate is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "u64", into = "u64")
)]
pub struct MinimumVolume(u64);

impl Default for MinimumVolume {
    fn default() -> Self {
        Self(10)
    }
}

impl Deref for MinimumVolume {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for MinimumVolume {
    type Error = FloodgateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(FloodgateError::InvalidMinimumVolume(
                "Minimum volume must be at least 1".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<MinimumVolume> for u64 {
    fn from(value: MinimumVolume) -> Self {
        value.0
    }
}

/// Trial calls admitted while half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "u32", into = "u32")
)]
pub struct TrialCount(u32);

impl Default for TrialCount {
    fn default() -> Self {
        Self(3)
    }
}

impl Deref for TrialCount {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u32> for TrialCount {
    type Error = FloodgateError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(FloodgateError::InvalidTrialCount(
                "Trial count must be at least 1".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<TrialCount> for u32 {
    fn from(value: TrialCount) -> Self {
        value.0
    }
}

/// How long an open breaker rejects calls before allowing half-open trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "u64", into = "u64")
)]
pub struct CooldownMs(u64);

impl Default for CooldownMs {
    fn default() -> Self {
        Self(30_000)
    }
}

impl Deref for CooldownMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for CooldownMs {
    type Error = FloodgateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(FloodgateError::InvalidCooldown(
                "Cooldown must be at least 1 ms".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl From<CooldownMs> for u64 {
    fn from(value: CooldownMs) -> Self {
        value.0
    }
}

/// Immutable configuration shared by every circuit breaker created under one policy name.
///
/// Defaults: open at ≥ 50% failures once 10 calls are seen in a 30 s rolling window,
/// stay open 30 s, then close after 3 successful half-open trials.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CircuitBreakerPolicy {
    /// Failure rate at or above which the breaker opens.
    pub failure_rate_threshold: FailureRateThreshold,
    /// Calls required in the rolling window before the rate is evaluated.
    pub minimum_volume: MinimumVolume,
    /// Length of the rolling outcome window.
    pub rolling_window: WindowSizeMs,
    /// Time spent open before half-open trials begin.
    pub cooldown: CooldownMs,
    /// Successful trials needed to close again.
    pub half_open_trial_count: TrialCount,
    /// Successful calls at least this slow count as failures.
    pub slow_call_threshold: Option<Duration>,
    /// Upper bound on the time `record_outcome` spends in the counter store.
    pub store_timeout: StoreTimeoutMs,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            failure_rate_threshold: FailureRateThreshold::default(),
            minimum_volume: MinimumVolume::default(),
            rolling_window: WindowSizeMs::default_rolling_window(),
            cooldown: CooldownMs::default(),
            half_open_trial_count: TrialCount::default(),
            slow_call_threshold: None,
            store_timeout: StoreTimeoutMs::default(),
        }
    }
}

impl CircuitBreakerPolicy {
    /// Whether an outcome counts as a failure, taking slow calls into account.
    pub(crate) fn is_failure(&self, success: bool, latency: Duration) -> bool {
        !success
            || self
                .slow_call_threshold
                .is_some_and(|threshold| latency >= threshold)
    }

    pub(crate) fn store_timeout_duration(&self) -> Duration {
        Duration::from_millis(*self.store_timeout)
    }
}
