//! Microbenchmarks for the `push()` ingestion path and queries.
//!
//! Run with: `cargo bench -p podmetrics -- push`

#![allow(missing_docs, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use podmetrics::{MetricPoint, MetricsStore, StoreConfig, TimeRange};

const BASE: i64 = 1_700_000_000;

fn point(ts: i64, cpu: f64) -> MetricPoint {
    MetricPoint {
        cpu_percent: cpu,
        memory_used_bytes: 128.0 * 1024.0 * 1024.0,
        memory_limit_bytes: 1024.0 * 1024.0 * 1024.0,
        ..MetricPoint::empty(ts)
    }
}

/// Container ids shaped like the runtime's 64-hex-char ids.
fn container_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{i:064x}")).collect()
}

fn bench_push_single(c: &mut Criterion) {
    let store = MetricsStore::open(StoreConfig::default()).unwrap();
    let mut ts = BASE;

    c.bench_function("push/single_container", |b| {
        b.iter(|| {
            ts += 5;
            store.push(black_box("web"), black_box(point(ts, 42.5)));
        });
    });
}

fn bench_push_many_containers(c: &mut Criterion) {
    let mut group = c.benchmark_group("push/container_count");

    for count in [1, 10, 50, 200] {
        let store = MetricsStore::open(StoreConfig::default()).unwrap();
        let ids = container_ids(count);
        let mut ts = BASE;

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                ts += 5;
                for (i, id) in ids.iter().enumerate() {
                    store.push(black_box(id), black_box(point(ts, f64::from(i as u32))));
                }
            });
        });
    }

    group.finish();
}

fn bench_push_with_subscriber(c: &mut Criterion) {
    let store = MetricsStore::open(StoreConfig::default()).unwrap();
    let (_sub, mut rx) = store.subscribe_channel(1024);
    let mut ts = BASE;

    c.bench_function("push/with_channel_subscriber", |b| {
        b.iter(|| {
            ts += 5;
            store.push(black_box("web"), black_box(point(ts, 1.0)));
            while rx.try_recv().is_ok() {}
        });
    });
}

fn bench_query_full_hour(c: &mut Criterion) {
    let store = MetricsStore::open(StoreConfig::default()).unwrap();
    let ids = container_ids(20);
    for i in 0..720 {
        for id in &ids {
            store.push(id, point(BASE + i * 5, 1.0));
        }
    }
    let prefix = &ids[7][..12];

    c.bench_function("query/one_hour_by_prefix", |b| {
        b.iter(|| black_box(store.query(black_box(prefix), TimeRange::OneHour)));
    });
}

criterion_group!(
    benches,
    bench_push_single,
    bench_push_many_containers,
    bench_push_with_subscriber,
    bench_query_full_hour,
);
criterion_main!(benches);
