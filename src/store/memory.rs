use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::Store;
use crate::StoreError;

/// In-memory [`Store`], mostly useful for tests and local development.
///
/// Values can be changed at any time with [`MemoryStore::set`]; watchers pick
/// the change up on their next tick.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &self,
        key: impl Into<String>,
        value: impl Into<Bytes>,
    ) {
        self.values.insert(key.into(), value.into());
    }

    /// Returns the removed value, if any
    pub fn remove(
        &self,
        key: &str,
    ) -> Option<Bytes> {
        self.values.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(
        &self,
        _cancel: &CancellationToken,
        key: &str,
    ) -> std::result::Result<Bytes, StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        self.values
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
