use std::{sync::Arc, time::Duration};

use crate::{Capacity, RateLimitDecision, RateLimitPolicy, StoreTimeoutMs, WindowSizeMs};

use super::fixtures::{YieldingStore, local_registry, wrapped_local_registry};

fn counter(limit: u64, window_ms: u64) -> RateLimitPolicy {
    RateLimitPolicy::sliding_window_counter(
        Capacity::try_from(limit).unwrap(),
        WindowSizeMs::try_from(window_ms).unwrap(),
    )
}

#[tokio::test]
async fn previous_window_is_weighted_by_remaining_overlap() {
    let (registry, clock) = local_registry(5_000);
    registry.register_policy("feed", counter(10, 1_000)).unwrap();

    for _ in 0..10 {
        assert!(registry.try_acquire("feed", "k", 1).await.unwrap().is_admitted());
    }
    assert!(!registry.try_acquire("feed", "k", 1).await.unwrap().is_admitted());

    // a quarter into the next window the previous 10 weigh floor(7.5) = 7
    clock.set(6_250);

    for _ in 0..3 {
        assert!(registry.try_acquire("feed", "k", 1).await.unwrap().is_admitted());
    }

    let RateLimitDecision::Rejected { retry_after_ms } =
        registry.try_acquire("feed", "k", 1).await.unwrap()
    else {
        panic!("estimate is at the limit");
    };

    // the weighted count has to drop to 6, which happens strictly after 6_300
    assert_eq!(retry_after_ms, 51);

    clock.advance(Duration::from_millis(retry_after_ms - 1));
    assert!(!registry.try_acquire("feed", "k", 1).await.unwrap().is_admitted());

    clock.advance(Duration::from_millis(1));
    assert!(registry.try_acquire("feed", "k", 1).await.unwrap().is_admitted());
}

#[tokio::test]
async fn empty_previous_window_waits_for_window_end() {
    let (registry, clock) = local_registry(2_000);
    registry.register_policy("feed", counter(2, 1_000)).unwrap();

    clock.set(2_400);
    assert!(registry.try_acquire("feed", "k", 2).await.unwrap().is_admitted());

    assert_eq!(
        registry.try_acquire("feed", "k", 1).await.unwrap(),
        RateLimitDecision::Rejected {
            retry_after_ms: 600
        }
    );
}

#[tokio::test]
async fn old_windows_stop_counting() {
    let (registry, clock) = local_registry(1_000);
    registry.register_policy("feed", counter(4, 1_000)).unwrap();

    assert!(registry.try_acquire("feed", "k", 4).await.unwrap().is_admitted());

    // two windows later neither counter overlaps the trailing window
    clock.advance(Duration::from_millis(2_000));
    assert!(registry.try_acquire("feed", "k", 4).await.unwrap().is_admitted());
}

#[tokio::test]
async fn rejected_request_does_not_crowd_out_a_concurrent_one() {
    let (registry, _clock) = wrapped_local_registry(0, YieldingStore);
    registry.register_policy("feed", counter(2, 60_000)).unwrap();

    assert!(registry.try_acquire("feed", "k", 1).await.unwrap().is_admitted());

    // either order admits the single permit and rejects the pair
    let (pair, single) = tokio::join!(
        registry.try_acquire("feed", "k", 2),
        registry.try_acquire("feed", "k", 1)
    );

    assert!(!pair.unwrap().is_admitted());
    assert!(single.unwrap().is_admitted());
    assert!(!registry.try_acquire("feed", "k", 1).await.unwrap().is_admitted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_admit_exactly_limit() {
    let (registry, _clock) = local_registry(5_000);
    registry
        .register_policy(
            "feed",
            counter(100, 60_000).with_store_timeout(StoreTimeoutMs::try_from(10_000).unwrap()),
        )
        .unwrap();

    let registry = Arc::new(registry);

    let handles: Vec<_> = (0..1_000)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.try_acquire("feed", "hot", 1).await.unwrap() })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().is_admitted() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 100);

    let stats = registry.rate_limiter("feed", "hot").unwrap().stats();
    assert_eq!(stats.admitted, 100);
    assert_eq!(stats.rejected, 900);
    assert_eq!(stats.degraded, 0);
}
