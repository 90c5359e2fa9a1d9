use std::{hint::black_box, sync::Arc};

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use floodgate::{
    Capacity, LocalCounterStore, RateLimitPolicy, RefillRate, ResilienceRegistry, SystemClock,
    WindowSizeMs,
};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn registry() -> Arc<ResilienceRegistry> {
    let registry = ResilienceRegistry::new(LocalCounterStore::new(), SystemClock::new());
    let capacity = Capacity::try_from(1_000_000_000).unwrap();
    let window = WindowSizeMs::try_from(60_000).unwrap();

    registry
        .register_policy(
            "bucket",
            RateLimitPolicy::token_bucket(capacity, RefillRate::try_from(1e9).unwrap()),
        )
        .unwrap();
    registry
        .register_policy("fixed", RateLimitPolicy::fixed_window(capacity, window))
        .unwrap();
    registry
        .register_policy(
            "counter",
            RateLimitPolicy::sliding_window_counter(capacity, window),
        )
        .unwrap();

    Arc::new(registry)
}

fn bench_hot_key_admitted(c: &mut Criterion) {
    let rt = runtime();
    let registry = registry();

    let mut group = c.benchmark_group("local/hot_key_admitted");
    group.sample_size(200);

    for policy in ["bucket", "fixed", "counter"] {
        group.bench_function(format!("try_acquire/{policy}"), |b| {
            b.iter(|| {
                rt.block_on(async {
                    black_box(
                        registry
                            .try_acquire(black_box(policy), black_box("k"), black_box(1))
                            .await
                            .unwrap(),
                    )
                })
            });
        });
    }

    group.finish();
}

fn bench_many_keys(c: &mut Criterion) {
    let rt = runtime();

    let mut group = c.benchmark_group("local/many_keys");
    group.sample_size(100);

    for key_space in [1_000_usize, 100_000] {
        group.bench_function(format!("try_acquire/bucket/keys={key_space}"), |b| {
            let registry = registry();
            let keys: Vec<String> = (0..key_space).map(|i| format!("user_{i}")).collect();
            let mut i = 0usize;

            b.iter_batched(
                || {
                    i = (i + 1) % key_space;
                    keys[i].clone()
                },
                |key| {
                    rt.block_on(async {
                        black_box(registry.try_acquire("bucket", &key, 1).await.unwrap())
                    })
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_hot_key_admitted, bench_many_keys);
criterion_main!(benches);
