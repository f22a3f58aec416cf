//! # kv-watcher
//!
//! Polling change-notification engine for key/value stores.
//!
//! A [`Watcher`] runs one poll loop per watched key, fetches the key's raw
//! value from a [`Store`] at a fixed interval and pushes every change to all
//! [`Subscription`]s of that key. Keys missing at the backend are reported as
//! an empty payload.
//!
//! ```ignore
//! let cfg = WatcherConfig::new()?.validate()?;
//! let watcher = Watcher::consul(&cfg)?;
//!
//! let mut sub = watcher.watch(CancellationToken::new(), "service/limits");
//! while let Some(value) = sub.recv().await {
//!     apply_limits(&value);
//! }
//! watcher.close().await?;
//! ```

mod config;
mod errors;
mod metrics;
mod stats;
mod store;
mod watch;

pub use config::*;
pub use errors::*;
pub use metrics::*;
pub use stats::Histogram;
pub use stats::HistogramSnapshot;
pub use stats::PrometheusHistogram;
pub use stats::StatsCollector;
pub use stats::StatsSnapshot;
pub use store::*;
pub use tokio_util::sync::CancellationToken;
pub use watch::*;
