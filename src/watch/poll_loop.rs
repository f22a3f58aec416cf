//! Poll Loop
//!
//! One task per watched key. It fetches the key once right away, then on
//! every tick of a fixed interval, and hands each successful result to
//! [`WatchEntry::publish`] for change detection and fan-out.
//!
//! ```text
//! Started ──fetch──▶ Polling ──tick──▶ fetch ──▶ Polling ...
//!                       │
//!                       ├── entry cancelled, watcher open   ─▶ Cancelled
//!                       └── entry cancelled, watcher closed ─▶ WatcherClosed
//! ```
//!
//! A failed fetch is logged and skipped; the next tick is the retry. The
//! fetch receives the entry's cancellation token; a store that ignores it
//! delays the loop's exit until the call returns.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::registry::WatchEntry;
use crate::stats::Stats;
use crate::Store;
use crate::StoreError;

/// Why a poll loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// Every subscriber of the key went away
    Cancelled,
    /// `Watcher::close()` was called
    WatcherClosed,
}

pub(crate) struct PollLoop {
    pub(crate) watcher: Arc<str>,
    pub(crate) entry: Arc<WatchEntry>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) stats: Arc<Stats>,
    pub(crate) poll_interval: Duration,
    pub(crate) shutdown: CancellationToken,
}

impl PollLoop {
    pub(crate) async fn run(self) -> LoopExit {
        debug!(watcher = %self.watcher, key = %self.entry.key(), "poll loop started");

        // Initial value, without waiting a full interval
        self.poll_once().await;

        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                biased;
                _ = self.entry.token().cancelled() => {
                    break self.exit_reason();
                }
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        };

        self.entry.close_subscribers();
        match exit {
            LoopExit::Cancelled => {
                self.stats.inc_closed_by_cancellation();
                debug!(watcher = %self.watcher, key = %self.entry.key(), "watch cancelled");
            }
            LoopExit::WatcherClosed => {
                self.stats.inc_closed_by_watcher_close();
                debug!(watcher = %self.watcher, key = %self.entry.key(), "watcher closed");
            }
        }
        exit
    }

    fn exit_reason(&self) -> LoopExit {
        if self.shutdown.is_cancelled() {
            LoopExit::WatcherClosed
        } else {
            LoopExit::Cancelled
        }
    }

    /// One fetch-and-detect cycle
    pub(crate) async fn poll_once(&self) {
        let key = self.entry.key();

        let started = Instant::now();
        let result = self.store.fetch(self.entry.token(), key).await;
        self.stats.observe_fetch(started.elapsed());

        let value = match result {
            Ok(value) => value,
            Err(StoreError::NotFound(_)) => Bytes::new(),
            Err(StoreError::Cancelled(_)) => {
                debug!(watcher = %self.watcher, key = %key, "fetch abandoned");
                return;
            }
            Err(e) => {
                self.stats.inc_fetch_error();
                warn!(watcher = %self.watcher, key = %key, error = %e, "watch error");
                return;
            }
        };

        if let Some(notified) = self.entry.publish(value) {
            self.stats.inc_new_value();
            trace!(watcher = %self.watcher, key = %key, subscribers = notified, "new value detected");
        }
    }
}
