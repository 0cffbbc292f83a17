//! Integration tests for the store: ingestion, retention, key resolution,
//! reconciliation and subscribers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use podmetrics::{MetricPoint, MetricsStore, StoreConfig, TimeRange};

/// A day boundary, so every tier's buckets line up with it.
const BASE: i64 = 1_699_920_000;

fn store() -> MetricsStore {
    MetricsStore::open(StoreConfig::default()).unwrap()
}

fn sample(ts: i64, cpu: f64) -> MetricPoint {
    MetricPoint {
        cpu_percent: cpu,
        memory_used_bytes: 64.0 * 1024.0 * 1024.0,
        memory_limit_bytes: 512.0 * 1024.0 * 1024.0,
        ..MetricPoint::empty(ts)
    }
}

#[test]
fn test_one_hour_of_raw_points() {
    let store = store();
    for i in 0..720 {
        store.push("c1", sample(BASE + i * 5, 20.0));
    }

    let points = store.query("c1", TimeRange::OneHour);
    assert_eq!(points.len(), 720);
    assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(points[0].timestamp, BASE);
    assert_eq!(points[719].timestamp, BASE + 3595);
}

#[test]
fn test_raw_retention_evicts_oldest_first() {
    let store = store();
    for i in 0..1440 {
        store.push("c1", sample(BASE + i * 5, 20.0));
    }

    // Last maintenance ran at BASE + 7140, so everything before BASE + 3540 is gone.
    let points = store.query("c1", TimeRange::OneHour);
    assert_eq!(points[0].timestamp, BASE + 3540);
    assert_eq!(points.last().unwrap().timestamp, BASE + 7195);
    assert_eq!(points.len(), 732);
}

#[test]
fn test_minute_rollup_mean_and_max() {
    let store = store();
    for i in 0..12 {
        let point = MetricPoint {
            memory_limit_bytes: if i == 3 { 2048.0 } else { 1024.0 },
            ..sample(BASE + i * 5, i as f64)
        };
        store.push("c1", point);
    }
    assert!(store.query("c1", TimeRange::OneDay).is_empty());

    // Next minute: maintenance is due and the first bucket is complete.
    store.push("c1", sample(BASE + 60, 0.0));

    let m1 = store.query("c1", TimeRange::OneDay);
    assert_eq!(m1.len(), 1);
    assert_eq!(m1[0].timestamp, BASE);
    assert!((m1[0].cpu_percent - 5.5).abs() < 1e-9);
    assert_eq!(m1[0].memory_limit_bytes, 2048.0);
}

#[test]
fn test_exact_id_beats_prefix() {
    let store = store();
    store.push("foo", sample(BASE, 1.0));
    store.push("foobar", sample(BASE, 2.0));

    let exact = store.query("foo", TimeRange::OneHour);
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].cpu_percent, 1.0);

    let prefixed = store.query("foob", TimeRange::OneHour);
    assert_eq!(prefixed[0].cpu_percent, 2.0);

    assert_eq!(store.resolve("fo"), None);
    assert_eq!(store.resolve("foob").as_deref(), Some("foobar"));
}

#[test]
fn test_unknown_container_queries_are_empty() {
    let store = store();
    for range in TimeRange::ALL {
        assert!(store.query("nope", range).is_empty());
    }
    assert!(store.latest_all().is_empty());
}

#[test]
fn test_purge_removes_only_absent_ids() {
    let store = store();
    for id in ["a", "b", "c"] {
        store.push(id, sample(BASE, 1.0));
    }

    let active: HashSet<String> = ["a", "b"].into_iter().map(String::from).collect();
    assert_eq!(store.purge_containers(&active), 1);
    assert_eq!(store.containers(), vec!["a".to_string(), "b".to_string()]);
    assert!(store.query("c", TimeRange::OneHour).is_empty());
}

#[test]
fn test_subscribers_are_isolated() {
    let store = store();
    store.push("c1", sample(BASE, 1.0));

    let _faulty = store.subscribe(|_, _| panic!("subscriber bug"));

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let sub = store.subscribe(move |id, point| {
        sink.lock().unwrap().push((id.to_string(), point.timestamp));
    });

    store.push("c1", sample(BASE + 5, 1.0));
    store.push("c2", sample(BASE + 5, 1.0));
    sub.unsubscribe();
    store.push("c1", sample(BASE + 10, 1.0));

    let received = received.lock().unwrap();
    assert_eq!(
        *received,
        vec![("c1".to_string(), BASE + 5), ("c2".to_string(), BASE + 5)]
    );
    assert_eq!(store.query("c1", TimeRange::OneHour).len(), 3);
    assert_eq!(store.subscriber_count(), 1);
}

#[test]
fn test_channel_subscriber_receives_in_order() {
    let store = store();
    let (_sub, mut rx) = store.subscribe_channel(64);

    for i in 0..10 {
        store.push("c1", sample(BASE + i * 5, 1.0));
    }

    let mut timestamps = Vec::new();
    while let Ok((_, point)) = rx.try_recv() {
        timestamps.push(point.timestamp);
    }
    let expected: Vec<i64> = (0..10).map(|i| BASE + i * 5).collect();
    assert_eq!(timestamps, expected);
}

#[test]
fn test_concurrent_pushes_and_reads() {
    let store = Arc::new(store());
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _sub = store.subscribe(move |_, _| {
        counter.fetch_add(1, Ordering::Relaxed);
    });

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = store.clone();
            thread::spawn(move || {
                let id = format!("container-{w}");
                for i in 0..200 {
                    store.push(&id, sample(BASE + i * 5, 1.0));
                }
            })
        })
        .collect();

    let reader = {
        let store = store.clone();
        thread::spawn(move || {
            for _ in 0..100 {
                let _ = store.latest_all();
                let _ = store.query("container-0", TimeRange::OneHour);
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    reader.join().unwrap();

    assert_eq!(seen.load(Ordering::Relaxed), 800);
    for stats in store.container_stats() {
        assert_eq!(stats.points_per_tier[0], 200);
    }
}
