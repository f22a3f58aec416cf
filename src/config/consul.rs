use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Consul KV backend parameters
#[derive(Serialize, Deserialize, Clone)]
pub struct ConsulConfig {
    /// Agent address, scheme included
    #[serde(default = "default_address")]
    pub address: String,

    /// Datacenter to read from; the agent's own datacenter when unset
    #[serde(default)]
    pub datacenter: Option<String>,

    /// ACL token sent as `X-Consul-Token`
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request HTTP timeout (milliseconds).
    /// Falls back to the poll interval when unset.
    #[serde(default)]
    pub request_timeout_in_ms: Option<u64>,
}

impl std::fmt::Debug for ConsulConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConsulConfig")
            .field("address", &self.address)
            .field("datacenter", &self.datacenter)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_in_ms", &self.request_timeout_in_ms)
            .finish()
    }
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            datacenter: None,
            token: None,
            request_timeout_in_ms: None,
        }
    }
}

impl ConsulConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.address.starts_with("http://") || self.address.starts_with("https://")) {
            return Err(Error::Config(ConfigError::Message(format!(
                "consul.address must start with http:// or https://, got {}",
                self.address
            ))));
        }

        if self.request_timeout_in_ms == Some(0) {
            return Err(Error::Config(ConfigError::Message(
                "consul.request_timeout_in_ms must be greater than 0".into(),
            )));
        }

        Ok(())
    }

    pub fn request_timeout(
        &self,
        poll_interval: Duration,
    ) -> Duration {
        self.request_timeout_in_ms.map(Duration::from_millis).unwrap_or(poll_interval)
    }
}

fn default_address() -> String {
    "http://127.0.0.1:8500".to_string()
}
