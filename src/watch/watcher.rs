//! The [`Watcher`] facade and its [`WatcherBuilder`].
//!
//! ## Example
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let watcher = WatcherBuilder::new("local", WatchConfig::default())
//!     .store(store.clone())
//!     .build()?;
//!
//! let mut sub = watcher.watch(CancellationToken::new(), "feature/flags");
//! while let Some(value) = sub.recv().await {
//!     println!("flags = {:?}", value);
//! }
//!
//! watcher.close().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::poll_loop::PollLoop;
use super::registry::Subscriber;
use super::registry::SubscriptionRegistry;
use super::registry::WatchEntry;
use super::Subscription;
use crate::stats::Stats;
use crate::Error;
use crate::Histogram;
use crate::Result;
use crate::StatsCollector;
use crate::Store;
use crate::WatchConfig;

/// Builder for [`Watcher`]. Validation happens in [`WatcherBuilder::build`].
pub struct WatcherBuilder {
    name: String,
    config: WatchConfig,
    store: Option<Arc<dyn Store>>,
    histograms: Option<(Box<dyn Histogram>, Box<dyn Histogram>)>,
}

impl WatcherBuilder {
    /// `name` identifies the watcher in logs, e.g. the backend kind.
    pub fn new(
        name: impl Into<String>,
        config: WatchConfig,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store: None,
            histograms: None,
        }
    }

    /// Sets the backend every poll loop fetches from
    pub fn store(
        mut self,
        store: Arc<dyn Store>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the default Prometheus-backed duration histograms
    pub fn histograms(
        mut self,
        fetch_duration: Box<dyn Histogram>,
        close_duration: Box<dyn Histogram>,
    ) -> Self {
        self.histograms = Some((fetch_duration, close_duration));
        self
    }

    /// # Errors
    /// - [`Error::Config`] when the poll interval is zero
    /// - [`Error::InvalidStore`] when no store was set
    pub fn build(self) -> Result<Watcher> {
        self.config.validate()?;
        let store = self.store.ok_or(Error::InvalidStore)?;
        let stats = match self.histograms {
            Some((fetch, close)) => Stats::with_histograms(fetch, close),
            None => Stats::new()?,
        };

        Ok(Watcher {
            inner: Arc::new(WatcherInner {
                name: Arc::from(self.name),
                config: self.config,
                store,
                registry: Arc::new(SubscriptionRegistry::new()),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                stats: Arc::new(stats),
            }),
        })
    }
}

struct WatcherInner {
    name: Arc<str>,
    config: WatchConfig,
    store: Arc<dyn Store>,
    registry: Arc<SubscriptionRegistry>,
    /// Outstanding poll loops
    tracker: TaskTracker,
    shutdown: CancellationToken,
    stats: Arc<Stats>,
}

/// Polls a [`Store`] for the keys it is asked to watch and fans every change
/// out to the key's subscribers.
///
/// Cloning is cheap; all clones share the same poll loops.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("watched_keys", &self.inner.registry.len())
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn builder(
        name: impl Into<String>,
        config: WatchConfig,
    ) -> WatcherBuilder {
        WatcherBuilder::new(name, config)
    }

    /// Watcher over the Consul KV store described by `config`.
    #[cfg(feature = "consul")]
    pub fn consul(config: &crate::WatcherConfig) -> Result<Self> {
        let request_timeout = config.consul.request_timeout(config.watch.poll_interval());
        let store = crate::ConsulStore::new(&config.consul, request_timeout)?;
        WatcherBuilder::new("consul", config.watch.clone())
            .store(Arc::new(store))
            .build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Subscribes to changes of `key`.
    ///
    /// The first call for a key starts its poll loop; later calls share that
    /// loop and immediately receive the last fetched value. A key missing at
    /// the backend is reported as an empty payload.
    ///
    /// The subscription ends when `cancel` fires, when it is dropped, or when
    /// the watcher closes. The key's poll loop stops once its last
    /// subscription ended. After [`Watcher::close`] this returns an already
    /// ended subscription.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn watch(
        &self,
        cancel: CancellationToken,
        key: impl Into<String>,
    ) -> Subscription {
        let key = key.into();
        let inner = &self.inner;
        inner.stats.inc_watch();

        let id = inner.registry.next_subscriber_id();
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = cancel.child_token();

        let lookup = inner.registry.lookup_or_create(
            &key,
            Subscriber::new(id, sender),
            &inner.shutdown,
            |entry| {
                inner.stats.inc_new_watch();
                self.spawn_poll_loop(entry.clone());
            },
        );
        let Some((entry, is_new)) = lookup else {
            warn!(watcher = %inner.name, key = %key, "watch called on a closed watcher");
            return Subscription::new(key, id, receiver, token);
        };

        self.spawn_departure(entry, id, token.clone());

        debug!(watcher = %inner.name, key = %key, subscriber = id, new_key = is_new, "watch registered");
        Subscription::new(key, id, receiver, token)
    }

    fn spawn_poll_loop(
        &self,
        entry: Arc<WatchEntry>,
    ) {
        let inner = &self.inner;
        let poll_loop = PollLoop {
            watcher: inner.name.clone(),
            entry,
            store: inner.store.clone(),
            stats: inner.stats.clone(),
            poll_interval: inner.config.poll_interval(),
            shutdown: inner.shutdown.clone(),
        };
        inner.tracker.spawn(poll_loop.run());
    }

    /// Detaches subscriber `id` once its token fires. Ends on its own when
    /// the entry is torn down first.
    fn spawn_departure(
        &self,
        entry: Arc<WatchEntry>,
        id: u64,
        token: CancellationToken,
    ) {
        let registry = self.inner.registry.clone();
        let name = self.inner.name.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    if registry.detach(&entry, id) {
                        debug!(watcher = %name, key = %entry.key(), "last subscriber left");
                    }
                }
                _ = entry.token().cancelled() => {}
            }
        });
    }

    /// Stops every poll loop and waits up to the configured close timeout.
    pub async fn close(&self) -> Result<()> {
        let timeout = self.inner.config.close_timeout().unwrap_or(Duration::ZERO);
        self.close_with_timeout(timeout).await
    }

    /// Stops every poll loop and waits for them to exit.
    ///
    /// A zero `timeout` waits indefinitely. On [`Error::CloseTimeout`] the
    /// loops still running are left alone and finish in the background.
    /// Calling it again waits for whatever is still running.
    pub async fn close_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<()> {
        let inner = &self.inner;
        let started = Instant::now();

        inner.tracker.close();
        inner.shutdown.cancel();
        // Waits out any watch() still inside the registry, so its loop is
        // already tracked below.
        let drained = inner.registry.drain();
        debug!(watcher = %inner.name, keys = drained, "close requested");

        let result = if timeout.is_zero() {
            inner.tracker.wait().await;
            Ok(())
        } else {
            tokio::time::timeout(timeout, inner.tracker.wait())
                .await
                .map_err(|_| Error::CloseTimeout(timeout))
        };
        inner.stats.observe_close(started.elapsed());

        match &result {
            Ok(()) => info!(watcher = %inner.name, "watcher closed"),
            Err(e) => warn!(
                watcher = %inner.name,
                running = inner.tracker.len(),
                "{}", e
            ),
        }
        result
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Pushes a snapshot of the current statistics to `collector`.
    pub fn collect_stats<C>(
        &self,
        collector: &C,
    ) where
        C: StatsCollector + ?Sized,
    {
        collector.collect(self.inner.stats.snapshot());
    }

    /// Number of keys with a live entry
    pub fn watched_key_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of subscriptions attached to `key`
    pub fn subscriber_count(
        &self,
        key: &str,
    ) -> usize {
        self.inner.registry.get(key).map(|e| e.subscriber_count()).unwrap_or(0)
    }

    /// Poll loops that have not exited yet
    pub fn active_loops(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Last value fetched for `key`, `None` if not fetched yet or not watched
    pub fn last_value(
        &self,
        key: &str,
    ) -> Option<bytes::Bytes> {
        self.inner.registry.get(key).and_then(|e| e.last_value())
    }
}
