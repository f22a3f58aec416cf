//! Prometheus export of watcher statistics.
//!
//! [`PrometheusCollector`] is a [`StatsCollector`] that mirrors every snapshot
//! it receives into gauges on a caller-owned [`Registry`]. Call
//! `watcher.collect_stats(&collector)` before each scrape.


use prometheus::Gauge;
use prometheus::GaugeVec;
use prometheus::IntGauge;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;

use crate::Result;
use crate::StatsCollector;
use crate::StatsSnapshot;

pub struct PrometheusCollector {
    key_watch_count: IntGauge,
    key_new_watch_count: IntGauge,
    key_new_value_detected: IntGauge,
    key_fetch_error_count: IntGauge,
    watcher_closed: IntGaugeVec,
    duration_count: IntGaugeVec,
    duration_sum: GaugeVec,
    close_duration_mean: Gauge,
}

impl PrometheusCollector {
    /// Creates the gauges and registers them on `registry`.
    pub fn new(
        registry: &Registry,
        namespace: &str,
    ) -> Result<Self> {
        let opts = |name: &str, help: &str| Opts::new(name, help).namespace(namespace);

        let collector = Self {
            key_watch_count: IntGauge::with_opts(opts("key_watch_count", "Number of watch calls"))?,
            key_new_watch_count: IntGauge::with_opts(opts(
                "key_new_watch_count",
                "Number of poll loops started",
            ))?,
            key_new_value_detected: IntGauge::with_opts(opts(
                "key_new_value_detected",
                "Number of detected value changes",
            ))?,
            key_fetch_error_count: IntGauge::with_opts(opts(
                "key_fetch_error_count",
                "Number of failed store fetches",
            ))?,
            watcher_closed: IntGaugeVec::new(
                opts("watcher_closed", "Number of stopped poll loops by reason"),
                &["reason"],
            )?,
            duration_count: IntGaugeVec::new(
                opts("duration_ms_count", "Number of timed operations"),
                &["operation"],
            )?,
            duration_sum: GaugeVec::new(
                opts("duration_ms_sum", "Total time of timed operations in ms"),
                &["operation"],
            )?,
            close_duration_mean: Gauge::with_opts(opts(
                "close_duration_ms_mean",
                "Mean watcher close latency in ms",
            ))?,
        };

        registry.register(Box::new(collector.key_watch_count.clone()))?;
        registry.register(Box::new(collector.key_new_watch_count.clone()))?;
        registry.register(Box::new(collector.key_new_value_detected.clone()))?;
        registry.register(Box::new(collector.key_fetch_error_count.clone()))?;
        registry.register(Box::new(collector.watcher_closed.clone()))?;
        registry.register(Box::new(collector.duration_count.clone()))?;
        registry.register(Box::new(collector.duration_sum.clone()))?;
        registry.register(Box::new(collector.close_duration_mean.clone()))?;

        Ok(collector)
    }
}

impl StatsCollector for PrometheusCollector {
    fn collect(
        &self,
        stats: StatsSnapshot,
    ) {
        self.key_watch_count.set(stats.key_watch_count as i64);
        self.key_new_watch_count.set(stats.key_new_watch_count as i64);
        self.key_new_value_detected.set(stats.key_new_value_detected as i64);
        self.key_fetch_error_count.set(stats.key_fetch_error_count as i64);

        self.watcher_closed
            .with_label_values(&["cancellation"])
            .set(stats.watcher_closed_by_cancellation as i64);
        self.watcher_closed
            .with_label_values(&["watcher_close"])
            .set(stats.watcher_closed_by_watcher_close as i64);

        for (operation, histogram) in [
            ("fetch", &stats.key_fetch_duration),
            ("close", &stats.watcher_close_duration),
        ] {
            self.duration_count
                .with_label_values(&[operation])
                .set(histogram.count as i64);
            self.duration_sum.with_label_values(&[operation]).set(histogram.sum);
        }

        self.close_duration_mean
            .set(stats.watcher_close_duration.mean().unwrap_or_default());
    }
}
