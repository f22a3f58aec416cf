use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use config::ConfigError;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::Url;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::Store;
use crate::ConsulConfig;
use crate::Error;
use crate::Result;
use crate::StoreError;

const TOKEN_HEADER: &str = "X-Consul-Token";

/// [`Store`] backed by the Consul KV HTTP API.
///
/// Every fetch is one `GET /v1/kv/<key>?raw` against the configured agent.
/// Each `/`-separated segment of the key is percent-encoded, so keys holding
/// `#`, `?` or `%` address exactly that key.
#[derive(Clone)]
pub struct ConsulStore {
    client: Client,
    address: Url,
    datacenter: Option<String>,
    token: Option<String>,
}

impl std::fmt::Debug for ConsulStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConsulStore")
            .field("address", &self.address.as_str())
            .field("datacenter", &self.datacenter)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConsulStore {
    pub fn new(
        config: &ConsulConfig,
        request_timeout: Duration,
    ) -> Result<Self> {
        let address = Url::parse(&config.address).map_err(|e| {
            Error::Config(ConfigError::Message(format!(
                "consul.address {} is not a valid URL: {}",
                config.address, e
            )))
        })?;
        if address.cannot_be_a_base() {
            return Err(Error::Config(ConfigError::Message(format!(
                "consul.address {} cannot carry a path",
                config.address
            ))));
        }

        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::from)?;

        Ok(Self {
            client,
            address,
            datacenter: config.datacenter.clone(),
            token: config.token.clone(),
        })
    }

    pub(crate) fn key_url(
        &self,
        key: &str,
    ) -> std::result::Result<Url, StoreError> {
        let mut url = self.address.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Backend(format!("{} cannot carry a path", self.address)))?
            .pop_if_empty()
            .extend(["v1", "kv"])
            .extend(key.trim_start_matches('/').split('/'));
        Ok(url)
    }
}

#[async_trait]
impl Store for ConsulStore {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> std::result::Result<Bytes, StoreError> {
        if key.is_empty() {
            // An empty key would list the whole KV root.
            return Err(StoreError::EmptyKey);
        }

        let mut request = self.client.get(self.key_url(key)?).query(&[("raw", "true")]);
        if let Some(dc) = &self.datacenter {
            request = request.query(&[("dc", dc.as_str())]);
        }
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled(key.to_string())),
            response = request.send() => response?,
        };
        let status = response.status();
        trace!(key, status = status.as_u16(), "consul kv response");

        match status {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.to_string())),
            s if s.is_success() => Ok(response.bytes().await?),
            s => Err(StoreError::UnexpectedStatus {
                key: key.to_string(),
                status: s.as_u16(),
            }),
        }
    }
}
