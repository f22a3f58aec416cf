//! Watch Engine
//!
//! ```text
//! watch(cancel, key)
//!     │
//!     ▼
//! SubscriptionRegistry ──new key──▶ PollLoop (one task per key)
//!     │                                  │ fetch every poll interval
//!     │ attach subscriber                ▼
//!     ▼                              WatchEntry::publish
//! Subscription ◀──── unbounded mpsc ─────┘ (only on change)
//! ```
//!
//! A key's poll loop lives as long as at least one subscription is attached
//! to it, or until [`Watcher::close`] is called.

mod poll_loop;
mod registry;
mod subscription;
mod watcher;

pub use subscription::*;
pub use watcher::*;

#[cfg(test)]
mod registry_test;
