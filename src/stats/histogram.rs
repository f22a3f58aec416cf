use prometheus::core::Metric;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::Registry;

use crate::Result;

/// Distribution of observed values.
///
/// The watcher only ever calls [`Histogram::update`]; how values are bucketed
/// or summarised is up to the implementation.
pub trait Histogram: Send + Sync + 'static {
    fn update(
        &self,
        value: f64,
    );

    fn snapshot(&self) -> HistogramSnapshot;
}

/// Copy of a histogram's state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    /// `(upper_bound, cumulative_count)` pairs in ascending bound order
    pub buckets: Vec<(f64, u64)>,
}

impl HistogramSnapshot {
    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }

    /// Upper bound of the first bucket holding the `q` quantile.
    ///
    /// Values beyond the last bucket report `f64::INFINITY`.
    pub fn quantile(
        &self,
        q: f64,
    ) -> Option<f64> {
        if self.count == 0 || !(0.0..=1.0).contains(&q) {
            return None;
        }
        let rank = (q * self.count as f64).ceil().max(1.0) as u64;
        let bound = self
            .buckets
            .iter()
            .find(|(_, cumulative)| *cumulative >= rank)
            .map(|(upper, _)| *upper)
            .unwrap_or(f64::INFINITY);
        Some(bound)
    }
}

/// [`Histogram`] backed by a Prometheus histogram with exponential buckets
/// (1ms doubling up to ~65s).
#[derive(Clone)]
pub struct PrometheusHistogram {
    inner: prometheus::Histogram,
}

impl PrometheusHistogram {
    pub fn new(
        name: &str,
        help: &str,
    ) -> Result<Self> {
        let opts = HistogramOpts::new(name, help).buckets(exponential_buckets(1.0, 2.0, 17)?);
        Ok(Self {
            inner: prometheus::Histogram::with_opts(opts)?,
        })
    }

    /// Exposes this histogram on `registry`, e.g. before passing it to
    /// `WatcherBuilder::histograms`.
    pub fn register(
        &self,
        registry: &Registry,
    ) -> Result<()> {
        registry.register(Box::new(self.inner.clone()))?;
        Ok(())
    }
}

impl Histogram for PrometheusHistogram {
    fn update(
        &self,
        value: f64,
    ) {
        self.inner.observe(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let metric = self.inner.metric();
        let proto = metric.get_histogram();
        HistogramSnapshot {
            count: proto.get_sample_count(),
            sum: proto.get_sample_sum(),
            buckets: proto
                .get_bucket()
                .iter()
                .map(|b| (b.get_upper_bound(), b.get_cumulative_count()))
                .collect(),
        }
    }
}
