use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::time::Duration;
use tokio::runtime::Runtime;
use tower_governance::{FetchError, SlidingWindowRateLimiter, TtlCache};

fn bench_cache_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cache: TtlCache<u64, String> = TtlCache::new(Duration::from_secs(3600));
    rt.block_on(async {
        for key in 0..1_000u64 {
            cache
                .get(key, || async move { Ok::<_, FetchError>(format!("value-{key}")) })
                .await
                .unwrap();
        }
    });

    c.bench_function("cache_hit", |b| {
        b.to_async(&rt).iter(|| async {
            cache
                .get(500, || async { Ok::<_, FetchError>(String::new()) })
                .await
                .unwrap()
        })
    });
}

fn bench_limiter_admission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("limiter_admit_under_limit", |b| {
        b.to_async(&rt).iter_batched(
            || SlidingWindowRateLimiter::new(1_000, Duration::from_secs(60)).unwrap(),
            |limiter| async move {
                for _ in 0..100 {
                    limiter.wait_if_needed().await;
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_cache_hit, bench_limiter_admission);
criterion_main!(benches);
