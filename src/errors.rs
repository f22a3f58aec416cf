//! Watcher Error Hierarchy
//!
//! Construction-time and close-time failures are returned to the caller as
//! [`Error`]. Failures of a single poll cycle are [`StoreError`]s: they are
//! logged by the poll loop and never reach subscribers.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failures (e.g. a zero poll interval)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The watcher was built without a backend store
    #[error("kv-watcher: store cannot be empty")]
    InvalidStore,

    /// Not every poll loop stopped before the close deadline
    #[error("kv-watcher: close timeout after {0:?}")]
    CloseTimeout(Duration),

    /// Backend failures surfaced outside of a poll loop
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Metric construction or registration failures
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Errors returned by a [`Store`](crate::Store) for a single fetch.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The key does not exist at the backend. The poll loop maps this to an
    /// empty payload instead of treating it as a failure.
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key can not be empty")]
    EmptyKey,

    /// The fetch was abandoned because its poll loop is stopping
    #[error("fetch of {0} cancelled")]
    Cancelled(String),

    /// Backend answered with a status the store does not understand
    #[error("unexpected status {status} while fetching {key}")]
    UnexpectedStatus { key: String, status: u16 },

    #[cfg(feature = "consul")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}
