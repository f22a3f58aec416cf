//! Runtime statistics of a [`Watcher`](crate::Watcher).
//!
//! Counters are plain atomics bumped from any poll loop; durations go into
//! [`Histogram`]s. [`Stats::snapshot`] copies everything into a
//! [`StatsSnapshot`] which is what a [`StatsCollector`] receives.

mod histogram;
pub use histogram::*;

#[cfg(test)]
mod stats_test;

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::Result;

/// Sink for statistics snapshots, e.g. a metrics exporter.
pub trait StatsCollector {
    fn collect(
        &self,
        stats: StatsSnapshot,
    );
}

impl<F> StatsCollector for F
where
    F: Fn(StatsSnapshot),
{
    fn collect(
        &self,
        stats: StatsSnapshot,
    ) {
        self(stats)
    }
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Number of `watch()` calls
    pub key_watch_count: u64,
    /// Number of key entries created, i.e. poll loops started
    pub key_new_watch_count: u64,
    /// Number of detected value changes, initial fetches included
    pub key_new_value_detected: u64,
    /// Number of failed fetches
    pub key_fetch_error_count: u64,
    /// Fetch latency in milliseconds
    pub key_fetch_duration: HistogramSnapshot,

    /// Poll loops stopped because their last subscriber went away
    pub watcher_closed_by_cancellation: u64,
    /// Poll loops stopped by `Watcher::close()`
    pub watcher_closed_by_watcher_close: u64,
    /// `Watcher::close()` latency in milliseconds
    pub watcher_close_duration: HistogramSnapshot,
}

pub(crate) struct Stats {
    key_watch_count: AtomicU64,
    key_new_watch_count: AtomicU64,
    key_new_value_detected: AtomicU64,
    key_fetch_error_count: AtomicU64,
    key_fetch_duration: Box<dyn Histogram>,

    watcher_closed_by_cancellation: AtomicU64,
    watcher_closed_by_watcher_close: AtomicU64,
    watcher_close_duration: Box<dyn Histogram>,
}

impl std::fmt::Debug for Stats {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Stats").field("snapshot", &self.snapshot()).finish()
    }
}

impl Stats {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self::with_histograms(
            Box::new(PrometheusHistogram::new(
                "key_fetch_duration_ms",
                "Store fetch latency in milliseconds",
            )?),
            Box::new(PrometheusHistogram::new(
                "watcher_close_duration_ms",
                "Watcher close latency in milliseconds",
            )?),
        ))
    }

    pub(crate) fn with_histograms(
        key_fetch_duration: Box<dyn Histogram>,
        watcher_close_duration: Box<dyn Histogram>,
    ) -> Self {
        Self {
            key_watch_count: AtomicU64::new(0),
            key_new_watch_count: AtomicU64::new(0),
            key_new_value_detected: AtomicU64::new(0),
            key_fetch_error_count: AtomicU64::new(0),
            key_fetch_duration,
            watcher_closed_by_cancellation: AtomicU64::new(0),
            watcher_closed_by_watcher_close: AtomicU64::new(0),
            watcher_close_duration,
        }
    }

    pub(crate) fn inc_watch(&self) {
        inc(&self.key_watch_count);
    }

    pub(crate) fn inc_new_watch(&self) {
        inc(&self.key_new_watch_count);
    }

    pub(crate) fn inc_new_value(&self) {
        inc(&self.key_new_value_detected);
    }

    pub(crate) fn inc_fetch_error(&self) {
        inc(&self.key_fetch_error_count);
    }

    pub(crate) fn inc_closed_by_cancellation(&self) {
        inc(&self.watcher_closed_by_cancellation);
    }

    pub(crate) fn inc_closed_by_watcher_close(&self) {
        inc(&self.watcher_closed_by_watcher_close);
    }

    pub(crate) fn observe_fetch(
        &self,
        elapsed: Duration,
    ) {
        self.key_fetch_duration.update(as_millis_f64(elapsed));
    }

    pub(crate) fn observe_close(
        &self,
        elapsed: Duration,
    ) {
        self.watcher_close_duration.update(as_millis_f64(elapsed));
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            key_watch_count: load(&self.key_watch_count),
            key_new_watch_count: load(&self.key_new_watch_count),
            key_new_value_detected: load(&self.key_new_value_detected),
            key_fetch_error_count: load(&self.key_fetch_error_count),
            key_fetch_duration: self.key_fetch_duration.snapshot(),
            watcher_closed_by_cancellation: load(&self.watcher_closed_by_cancellation),
            watcher_closed_by_watcher_close: load(&self.watcher_closed_by_watcher_close),
            watcher_close_duration: self.watcher_close_duration.snapshot(),
        }
    }
}

fn inc(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

fn load(c: &AtomicU64) -> u64 {
    c.load(Ordering::Relaxed)
}

fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
