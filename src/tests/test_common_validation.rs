use std::time::Duration;

use crate::{
    Capacity, CircuitBreakerPolicy, CooldownMs, FailureMode, FailureRateThreshold,
    FloodgateError, MinimumVolume, RateLimitPolicy, RefillRate, StoreTimeoutMs, TrialCount,
    WindowSizeMs,
};

#[test]
fn capacity_try_from_validates_min_1() {
    assert_eq!(*Capacity::try_from(1u64).unwrap(), 1u64);

    assert!(matches!(
        Capacity::try_from(0u64),
        Err(FloodgateError::InvalidCapacity(_))
    ));
}

#[test]
fn refill_rate_try_from_validates_positive_and_finite() {
    assert_eq!(*RefillRate::try_from(0.5f64).unwrap(), 0.5f64);

    for invalid in [0f64, -1f64, f64::NAN, f64::INFINITY] {
        assert!(
            matches!(
                RefillRate::try_from(invalid),
                Err(FloodgateError::InvalidRefillRate(_))
            ),
            "{invalid} should be rejected"
        );
    }
}

#[test]
fn window_size_ms_try_from_validates_min_1() {
    assert_eq!(*WindowSizeMs::try_from(1u64).unwrap(), 1u64);

    let err = WindowSizeMs::try_from(0u64).unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid window size: Window size must be at least 1 ms"
    );
}

#[test]
fn window_size_ms_aligns_windows_to_epoch() {
    let window = WindowSizeMs::try_from(1_000u64).unwrap();

    assert_eq!(window.window_id(4_999), 4);
    assert_eq!(window.window_start(4_999), 4_000);
    assert_eq!(window.previous_window_weight(4_000), 1f64);
    assert_eq!(window.previous_window_weight(4_500), 0.5f64);
}

#[test]
fn store_timeout_default_and_try_from_validate_nonzero() {
    assert_eq!(*StoreTimeoutMs::default(), 25u64);
    assert_eq!(*StoreTimeoutMs::try_from(100u64).unwrap(), 100u64);

    assert!(matches!(
        StoreTimeoutMs::try_from(0u64),
        Err(FloodgateError::InvalidStoreTimeout(_))
    ));
}

#[test]
fn failure_rate_threshold_accepts_half_open_unit_interval() {
    assert_eq!(*FailureRateThreshold::default(), 0.5f64);
    assert_eq!(*FailureRateThreshold::try_from(1f64).unwrap(), 1f64);

    for invalid in [0f64, -0.1f64, 1.01f64, f64::NAN] {
        assert!(
            matches!(
                FailureRateThreshold::try_from(invalid),
                Err(FloodgateError::InvalidFailureRateThreshold(_))
            ),
            "{invalid} should be rejected"
        );
    }
}

#[test]
fn breaker_counts_validate_min_1() {
    assert!(matches!(
        MinimumVolume::try_from(0u64),
        Err(FloodgateError::InvalidMinimumVolume(_))
    ));
    assert!(matches!(
        TrialCount::try_from(0u32),
        Err(FloodgateError::InvalidTrialCount(_))
    ));
    assert!(matches!(
        CooldownMs::try_from(0u64),
        Err(FloodgateError::InvalidCooldown(_))
    ));

    assert_eq!(*MinimumVolume::try_from(1u64).unwrap(), 1u64);
    assert_eq!(*TrialCount::try_from(1u32).unwrap(), 1u32);
    assert_eq!(*CooldownMs::try_from(1u64).unwrap(), 1u64);
}

#[test]
fn circuit_breaker_policy_defaults() {
    let policy = CircuitBreakerPolicy::default();

    assert_eq!(*policy.failure_rate_threshold, 0.5f64);
    assert_eq!(*policy.minimum_volume, 10u64);
    assert_eq!(*policy.rolling_window, 30_000u64);
    assert_eq!(*policy.cooldown, 30_000u64);
    assert_eq!(*policy.half_open_trial_count, 3u32);
    assert_eq!(policy.slow_call_threshold, None);
}

#[test]
fn slow_successes_count_as_failures() {
    let policy = CircuitBreakerPolicy {
        slow_call_threshold: Some(Duration::from_millis(100)),
        ..CircuitBreakerPolicy::default()
    };

    assert!(!policy.is_failure(true, Duration::from_millis(99)));
    assert!(policy.is_failure(true, Duration::from_millis(100)));
    assert!(policy.is_failure(false, Duration::ZERO));
}

#[test]
fn rate_limit_policy_defaults_to_fail_open() {
    let policy = RateLimitPolicy::fixed_window(
        Capacity::try_from(5).unwrap(),
        WindowSizeMs::try_from(60_000).unwrap(),
    );

    assert_eq!(policy.failure_mode, FailureMode::FailOpen);
    assert_eq!(policy.store_timeout, StoreTimeoutMs::default());
}

#[test]
fn rate_limit_policy_idle_ttl_covers_refill_and_windows() {
    let capacity = Capacity::try_from(10).unwrap();
    let window = WindowSizeMs::try_from(1_000).unwrap();

    let bucket = RateLimitPolicy::token_bucket(capacity, RefillRate::try_from(2.0).unwrap());
    assert_eq!(bucket.idle_ttl(), Duration::from_secs(5));

    assert_eq!(
        RateLimitPolicy::fixed_window(capacity, window).idle_ttl(),
        Duration::from_secs(1)
    );
    assert_eq!(
        RateLimitPolicy::sliding_window_log(capacity, window).idle_ttl(),
        Duration::from_secs(1)
    );
    assert_eq!(
        RateLimitPolicy::sliding_window_counter(capacity, window).idle_ttl(),
        Duration::from_secs(2)
    );
}
