//! Subscription Registry
//!
//! Maps each watched key to its [`WatchEntry`]: the last observed value and
//! the subscribers currently attached. Lookup-or-create and detach run under
//! one mutex so concurrent `watch()` calls for a new key end up on the same
//! entry, and an entry whose last subscriber left is never handed out again.
//! A new entry's poll loop is started inside the same critical section.
//!
//! Lock order is always registry map, then entry state.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Fan-out end of one subscription
#[derive(Debug)]
pub(crate) struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl Subscriber {
    pub(crate) fn new(
        id: u64,
        sender: mpsc::UnboundedSender<Bytes>,
    ) -> Self {
        Self { id, sender }
    }
}

#[derive(Debug, Default)]
struct EntryState {
    /// `None` until the first fetch completed
    last_value: Option<Bytes>,
    /// In `watch()` call order
    subscribers: Vec<Subscriber>,
}

/// Per-key state shared by the poll loop and the registry
#[derive(Debug)]
pub(crate) struct WatchEntry {
    key: String,
    state: Mutex<EntryState>,
    /// Stops the key's poll loop. Child of the watcher's shutdown token.
    token: CancellationToken,
}

impl WatchEntry {
    pub(crate) fn new(
        key: impl Into<String>,
        token: CancellationToken,
    ) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(EntryState::default()),
            token,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn last_value(&self) -> Option<Bytes> {
        self.state.lock().last_value.clone()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Adds a subscriber, replaying the current value if one was fetched.
    fn attach(
        &self,
        subscriber: Subscriber,
    ) {
        let mut state = self.state.lock();
        if let Some(value) = &state.last_value {
            let _ = subscriber.sender.send(value.clone());
        }
        state.subscribers.push(subscriber);
    }

    /// Returns the number of subscribers left
    fn remove_subscriber(
        &self,
        id: u64,
    ) -> usize {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| s.id != id);
        state.subscribers.len()
    }

    /// Stores `value` and delivers it to every subscriber if it differs from
    /// the last observed value, or if nothing was observed yet.
    ///
    /// Returns the number of subscribers notified, `None` when unchanged.
    pub(crate) fn publish(
        &self,
        value: Bytes,
    ) -> Option<usize> {
        let mut state = self.state.lock();
        if !has_changed(state.last_value.as_ref(), &value) {
            return None;
        }

        for subscriber in &state.subscribers {
            // Unbounded: never blocks the loop or the other subscribers.
            if subscriber.sender.send(value.clone()).is_err() {
                trace!(key = %self.key, subscriber = subscriber.id, "subscriber already gone");
            }
        }
        state.last_value = Some(value);
        Some(state.subscribers.len())
    }

    /// Drops every subscriber sender, ending their streams.
    pub(crate) fn close_subscribers(&self) {
        self.state.lock().subscribers.clear();
    }
}

pub(crate) fn has_changed(
    last_value: Option<&Bytes>,
    value: &Bytes,
) -> bool {
    match last_value {
        None => true,
        Some(last) => last != value,
    }
}

#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, Arc<WatchEntry>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_subscriber_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Attaches `subscriber` to the entry for `key`, creating the entry when
    /// the key is not watched yet. The returned flag is `true` for a new
    /// entry.
    ///
    /// `start` runs for a new entry before the registry lock is released, so
    /// a concurrent close either refuses this call or sees the started loop.
    ///
    /// Returns `None` once `shutdown` was cancelled; the subscriber is dropped.
    pub(crate) fn lookup_or_create(
        &self,
        key: &str,
        subscriber: Subscriber,
        shutdown: &CancellationToken,
        start: impl FnOnce(&Arc<WatchEntry>),
    ) -> Option<(Arc<WatchEntry>, bool)> {
        let mut entries = self.entries.lock();
        if shutdown.is_cancelled() {
            return None;
        }

        if let Some(entry) = entries.get(key) {
            entry.attach(subscriber);
            return Some((entry.clone(), false));
        }

        let entry = Arc::new(WatchEntry::new(key, shutdown.child_token()));
        entry.attach(subscriber);
        entries.insert(key.to_string(), entry.clone());
        start(&entry);
        Some((entry, true))
    }

    /// Removes one subscriber. When it was the last one, the entry leaves the
    /// registry and its poll loop is cancelled. Returns `true` in that case.
    pub(crate) fn detach(
        &self,
        entry: &Arc<WatchEntry>,
        subscriber_id: u64,
    ) -> bool {
        let mut entries = self.entries.lock();
        if entry.remove_subscriber(subscriber_id) > 0 {
            return false;
        }

        if entries.get(entry.key()).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            entries.remove(entry.key());
        }
        entry.token().cancel();
        true
    }

    /// Empties the registry and ends every subscription.
    pub(crate) fn drain(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (_, entry) in &drained {
            entry.close_subscribers();
        }
        drained.len()
    }

    pub(crate) fn get(
        &self,
        key: &str,
    ) -> Option<Arc<WatchEntry>> {
        self.entries.lock().get(key).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.entries.is_locked()
    }
}
