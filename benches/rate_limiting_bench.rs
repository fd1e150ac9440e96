//! # Rate Limiting Benchmarks
//!
//! Admission checks against the in-memory counter store.
//!
//! ## Running Benchmarks
//! ```bash
//! cargo bench --bench rate_limiting_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use ticketing_gateway::core::config::RateLimitConfig;
use ticketing_gateway::middleware::rate_limiting::{InMemoryStorage, RateLimiter};
use ticketing_gateway::observability::Telemetry;
use tokio::runtime::Runtime;

fn bench_limiter(burst: u32) -> RateLimiter {
    let config = RateLimitConfig {
        rate: burst,
        burst,
        period: Duration::from_secs(60),
        ..RateLimitConfig::default()
    };
    RateLimiter::new(
        Arc::new(InMemoryStorage::new()),
        &config,
        "bench",
        Arc::new(Telemetry::new()),
    )
}

fn bench_single_client(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let limiter = bench_limiter(u32::MAX);
    let identity = limiter.identity("10.0.0.1:5000", "/events");

    c.bench_function("check_single_client", |b| {
        b.iter(|| rt.block_on(async { black_box(limiter.check(&identity, "/events").await) }))
    });
}

fn bench_many_clients(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("check_many_clients");

    for clients in [10usize, 1_000, 10_000] {
        let limiter = bench_limiter(u32::MAX);
        let identities: Vec<_> = (0..clients)
            .map(|i| limiter.identity(&format!("10.0.{}.{}:5000", i / 256, i % 256), "/events"))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(clients), &identities, |b, ids| {
            let mut next = 0usize;
            b.iter(|| {
                let identity = &ids[next % ids.len()];
                next += 1;
                rt.block_on(async { black_box(limiter.check(identity, "/events").await) })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_single_client, bench_many_clients);
criterion_main!(benches);
