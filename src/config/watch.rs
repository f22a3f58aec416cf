use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Poll loop and shutdown parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Sleep between two fetches of the same key (milliseconds)
    ///
    /// Must be greater than zero, otherwise the watcher cannot be built.
    /// The fixed interval is also the only retry policy for failed fetches.
    ///
    /// **Default**: 1000
    #[serde(default = "default_poll_interval")]
    pub poll_interval_in_ms: u64,

    /// How long `Watcher::close()` waits for poll loops to stop (milliseconds)
    ///
    /// A value of zero waits indefinitely.
    ///
    /// **Default**: 1000
    #[serde(default = "default_close_timeout")]
    pub close_timeout_in_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_in_ms: default_poll_interval(),
            close_timeout_in_ms: default_close_timeout(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "kv-watcher: poll interval cannot be 0".into(),
            )));
        }

        if self.close_timeout_in_ms != 0 && self.close_timeout_in_ms < self.poll_interval_in_ms {
            // A loop blocked in a fetch keeps running until the fetch returns.
            warn!(
                "watch.close_timeout_in_ms ({}) is shorter than watch.poll_interval_in_ms ({}); \
                 close() may time out while a fetch is in flight",
                self.close_timeout_in_ms, self.poll_interval_in_ms
            );
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_in_ms)
    }

    /// `None` means wait indefinitely.
    pub fn close_timeout(&self) -> Option<Duration> {
        match self.close_timeout_in_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}
fn default_close_timeout() -> u64 {
    1000
}
