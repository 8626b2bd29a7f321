//! Benchmarks for the ingestion and flush hot paths.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tallyd_lib::core::{Metric, MetricKind};
use tallyd_lib::metrics::{compute_points, summarize_timer, MetricStore, StatsSettings};
use tallyd_lib::protocol::parse_line;

fn bench_parse_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_line");

    group.bench_function("counter", |b| {
        b.iter(|| parse_line(black_box("api.requests:1|c")));
    });

    group.bench_function("timer", |b| {
        b.iter(|| parse_line(black_box("db.query_time:12.75|ms")));
    });

    group.bench_function("malformed", |b| {
        b.iter(|| parse_line(black_box("api.requests1|c")));
    });

    group.finish();
}

fn bench_store_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_set");

    group.bench_function("same_key", |b| {
        let store = MetricStore::new();
        b.iter(|| store.set(black_box("hits"), MetricKind::Counter, 1.0));
    });

    group.bench_function("1000_keys", |b| {
        let store = MetricStore::new();
        let names: Vec<String> = (0..1000).map(|i| format!("service.{i}.latency")).collect();
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % names.len();
            store.set(&names[i], MetricKind::Timer, i as f64);
        });
    });

    group.finish();
}

fn bench_timer_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_summary");

    for size in [10usize, 1_000, 100_000] {
        let samples: Vec<f64> = (0..size).map(|i| ((i * 7919) % size) as f64).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &samples, |b, samples| {
            b.iter(|| summarize_timer(black_box(samples), 90));
        });
    }

    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let settings = StatsSettings::default();

    c.bench_function("snapshot_and_compute_1000_metrics", |b| {
        b.iter_batched(
            || {
                let store = MetricStore::new();
                for i in 0..1000 {
                    let kind = match i % 3 {
                        0 => MetricKind::Counter,
                        1 => MetricKind::Gauge,
                        _ => MetricKind::Timer,
                    };
                    let name = format!("metric.{i}");
                    for v in 0..10 {
                        store.set(&name, kind, f64::from(v));
                    }
                }
                store
            },
            |store| {
                let snapshot: Vec<Metric> = store.snapshot_and_reset(1_700_000_000);
                for metric in &snapshot {
                    black_box(compute_points(metric, &settings).ok());
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_parse_line, bench_store_set, bench_timer_summary, bench_flush);
criterion_main!(benches);
