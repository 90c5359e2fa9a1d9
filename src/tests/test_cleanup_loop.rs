use std::{sync::Arc, time::Duration};

use crate::{Capacity, CircuitBreakerPolicy, RateLimitPolicy, RefillRate};

use super::fixtures::local_registry;

fn bucket() -> RateLimitPolicy {
    RateLimitPolicy::token_bucket(
        Capacity::try_from(10).unwrap(),
        RefillRate::try_from(10.0).unwrap(),
    )
}

#[tokio::test(start_paused = true)]
async fn cleanup_loop_drops_idle_limiters_and_expired_state() {
    let (registry, clock) = local_registry(0);
    registry.register_policy("api", bucket()).unwrap();
    let registry = Arc::new(registry);

    for key in ["key1", "key2", "key3"] {
        registry.try_acquire("api", key, 1).await.unwrap();
    }
    assert_eq!(registry.rate_limiter_count(), 3);
    assert_eq!(registry.store().len(), 3);

    registry.run_cleanup_loop_with_config(100, 50);

    // the bucket is full again after 1 s, so its state has expired as well
    clock.advance(Duration::from_secs(2));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(registry.rate_limiter_count(), 0);
    assert!(registry.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cleanup_loop_keeps_active_limiters() {
    let (registry, clock) = local_registry(0);
    registry.register_policy("api", bucket()).unwrap();
    let registry = Arc::new(registry);

    registry.try_acquire("api", "busy", 1).await.unwrap();
    registry.try_acquire("api", "idle", 1).await.unwrap();

    registry.run_cleanup_loop_with_config(500, 100);

    for _ in 0..10 {
        clock.advance(Duration::from_millis(100));
        registry.try_acquire("api", "busy", 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(registry.rate_limiter_count(), 1);
    assert_eq!(registry.rate_limiter("api", "busy").unwrap().key(), "busy");
}

#[tokio::test(start_paused = true)]
async fn cleanup_loop_never_evicts_breakers() {
    let (registry, clock) = local_registry(0);
    registry
        .register_policy("payments", CircuitBreakerPolicy::default())
        .unwrap();
    let registry = Arc::new(registry);

    let breaker = registry.circuit_breaker("payments", "psp").unwrap();
    breaker.force_open();

    registry.run_cleanup_loop_with_config(100, 50);

    clock.advance(Duration::from_secs(3600));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(registry.circuit_breaker_count(), 1);
    assert!(
        registry
            .circuit_breaker("payments", "psp")
            .unwrap()
            .state()
            .is_open()
    );
}

#[tokio::test(start_paused = true)]
async fn stop_cleanup_loop_prevents_future_cleanup() {
    let (registry, clock) = local_registry(0);
    registry.register_policy("api", bucket()).unwrap();
    let registry = Arc::new(registry);

    registry.try_acquire("api", "key1", 1).await.unwrap();

    registry.run_cleanup_loop_with_config(100, 50);
    registry.stop_cleanup_loop();

    clock.advance(Duration::from_secs(2));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(registry.rate_limiter_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cleanup_loop_start_and_stop_are_idempotent() {
    let (registry, clock) = local_registry(0);
    registry.register_policy("api", bucket()).unwrap();
    let registry = Arc::new(registry);

    registry.stop_cleanup_loop();

    registry.try_acquire("api", "key1", 1).await.unwrap();

    // the second start is ignored, so the 1 h staleness stays in effect
    registry.run_cleanup_loop_with_config(3_600_000, 50);
    registry.run_cleanup_loop_with_config(100, 50);

    clock.advance(Duration::from_secs(2));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.rate_limiter_count(), 1);

    registry.stop_cleanup_loop();
    registry.stop_cleanup_loop();

    // a fresh loop can be started after stopping
    registry.run_cleanup_loop_with_config(100, 50);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.rate_limiter_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cleanup_loop_ends_when_registry_is_dropped() {
    let (registry, _clock) = local_registry(0);
    let registry = Arc::new(registry);
    let weak = Arc::downgrade(&registry);

    registry.run_cleanup_loop_with_config(100, 50);
    drop(registry);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(weak.upgrade().is_none());
}
