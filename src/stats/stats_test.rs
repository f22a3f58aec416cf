use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;

#[test]
fn test_snapshot_starts_at_zero() {
    let stats = Stats::new().unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.key_watch_count, 0);
    assert_eq!(snapshot.key_new_value_detected, 0);
    assert_eq!(snapshot.key_fetch_duration.count, 0);
    assert_eq!(snapshot.key_fetch_duration.mean(), None);
}

#[test]
fn test_concurrent_increments_are_not_lost() {
    let stats = Arc::new(Stats::new().unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let stats = stats.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.inc_watch();
                    stats.inc_new_value();
                    stats.observe_fetch(Duration::from_millis(3));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.key_watch_count, 8000);
    assert_eq!(snapshot.key_new_value_detected, 8000);
    assert_eq!(snapshot.key_fetch_duration.count, 8000);
}

#[test]
fn test_snapshot_is_a_copy() {
    let stats = Stats::new().unwrap();
    stats.inc_closed_by_cancellation();

    let before = stats.snapshot();
    stats.inc_closed_by_cancellation();
    stats.inc_closed_by_watcher_close();

    assert_eq!(before.watcher_closed_by_cancellation, 1);
    assert_eq!(before.watcher_closed_by_watcher_close, 0);
    assert_eq!(stats.snapshot().watcher_closed_by_cancellation, 2);
}

#[test]
fn test_durations_are_recorded_in_milliseconds() {
    let stats = Stats::new().unwrap();
    stats.observe_close(Duration::from_millis(10));
    stats.observe_close(Duration::from_millis(30));

    let close = stats.snapshot().watcher_close_duration;
    assert_eq!(close.count, 2);
    assert!((close.sum - 40.0).abs() < 1e-6);
    assert!((close.mean().unwrap() - 20.0).abs() < 1e-6);
}

#[test]
fn test_histogram_quantile_uses_bucket_upper_bounds() {
    let histogram = PrometheusHistogram::new("test_latency_ms", "test").unwrap();
    for v in [0.5, 0.7, 3.0, 100.0] {
        histogram.update(v);
    }

    let snapshot = histogram.snapshot();
    assert_eq!(snapshot.quantile(0.5), Some(1.0));
    assert_eq!(snapshot.quantile(0.75), Some(4.0));
    assert_eq!(snapshot.quantile(1.0), Some(128.0));
    assert_eq!(snapshot.quantile(1.5), None);
}

#[test]
fn test_histogram_quantile_beyond_last_bucket_is_infinite() {
    let histogram = PrometheusHistogram::new("test_huge_ms", "test").unwrap();
    histogram.update(1_000_000.0);

    assert_eq!(histogram.snapshot().quantile(0.99), Some(f64::INFINITY));
}

#[test]
fn test_closure_collector_receives_snapshot() {
    let stats = Stats::new().unwrap();
    stats.inc_watch();
    stats.inc_fetch_error();

    let seen = Mutex::new(None);
    let collector = |s: StatsSnapshot| {
        *seen.lock() = Some(s);
    };
    collector.collect(stats.snapshot());

    let got = seen.lock().take().unwrap();
    assert_eq!(got.key_watch_count, 1);
    assert_eq!(got.key_fetch_error_count, 1);
}

struct CountingHistogram {
    updates: Arc<Mutex<Vec<f64>>>,
}

impl Histogram for CountingHistogram {
    fn update(
        &self,
        value: f64,
    ) {
        self.updates.lock().push(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let updates = self.updates.lock();
        HistogramSnapshot {
            count: updates.len() as u64,
            sum: updates.iter().sum(),
            buckets: Vec::new(),
        }
    }
}

#[test]
fn test_custom_histograms_are_used() {
    let fetches = Arc::new(Mutex::new(Vec::new()));
    let stats = Stats::with_histograms(
        Box::new(CountingHistogram {
            updates: fetches.clone(),
        }),
        Box::new(CountingHistogram {
            updates: Arc::new(Mutex::new(Vec::new())),
        }),
    );

    stats.observe_fetch(Duration::from_millis(2));

    assert_eq!(fetches.lock().as_slice(), &[2.0]);
    assert_eq!(stats.snapshot().key_fetch_duration.count, 1);
}

#[test]
fn test_registered_histogram_is_gathered() {
    let registry = prometheus::Registry::new();
    let histogram = PrometheusHistogram::new("kvwatch_fetch_ms", "test").unwrap();
    histogram.register(&registry).unwrap();

    histogram.update(3.0);

    let family = registry
        .gather()
        .into_iter()
        .find(|m| m.get_name() == "kvwatch_fetch_ms")
        .expect("registered");
    assert_eq!(family.get_metric()[0].get_histogram().get_sample_count(), 1);
    assert!(histogram.register(&registry).is_err());
}
