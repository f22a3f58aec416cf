//! Store
//!
//! Backend abstraction the poll loops read from. A store answers one question:
//! what is the current raw value of a key. It must be safe to call
//! concurrently for different keys; a single key is only ever fetched by its
//! own poll loop.

#[cfg(feature = "consul")]
mod consul;
mod memory;

#[cfg(feature = "consul")]
pub use consul::*;
pub use memory::*;


use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;

use tokio_util::sync::CancellationToken;

use crate::StoreError;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Fetch the current value of `key`.
    ///
    /// Return [`StoreError::NotFound`] when the key does not exist; the poll
    /// loop treats it as an empty payload. Any other error skips the cycle.
    ///
    /// `cancel` fires when the key's poll loop is stopping. A store that can
    /// abort an in-flight request should return [`StoreError::Cancelled`].
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> std::result::Result<Bytes, StoreError>;
}
