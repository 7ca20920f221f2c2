// Benchmarks for notification fan-out
// Measures registry broadcast and circuit breaker bookkeeping on the hot path

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use tokio::sync::mpsc;

use horn_api::build_update;
use horn_api::subscribe::{TwinEventType, UpdateStatus};
use horn_core::{CircuitBreaker, ConnectionRegistry};

fn bench_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_broadcast");
    let update = build_update(
        TwinEventType::TwinUpdate,
        UpdateStatus::Success,
        vec!["twin-1".to_string()],
        "",
    );

    for streams in [1usize, 10, 100] {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut receivers = Vec::with_capacity(streams);
        for _ in 0..streams {
            let (tx, rx) = mpsc::channel(1024);
            registry.add("client-a", tx);
            receivers.push(rx);
        }

        group.bench_with_input(BenchmarkId::from_parameter(streams), &streams, |b, _| {
            b.iter(|| {
                let outcome = registry.broadcast("client-a", black_box(&update));
                // Keep the channels from filling up
                for rx in receivers.iter_mut() {
                    while rx.try_recv().is_ok() {}
                }
                black_box(outcome)
            })
        });
    }
    group.finish();
}

fn bench_circuit_breaker(c: &mut Criterion) {
    let breaker = CircuitBreaker::new();

    c.bench_function("allow_request_closed", |b| {
        b.iter(|| black_box(breaker.allow_request()))
    });

    c.bench_function("record_success", |b| b.iter(|| breaker.record_success()));
}

criterion_group!(benches, bench_broadcast, bench_circuit_breaker);
criterion_main!(benches);
