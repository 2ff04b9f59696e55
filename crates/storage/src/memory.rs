use std::collections::HashMap;

use snafu::ensure;
use tokio::sync::RwLock;

use super::error::{EmptyKeySnafu, StorageResult};
use super::types::CacheEntry;
use super::{BoxFuture, KeyValueStore};

/// Process-local cache. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl KeyValueStore for MemoryCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<CacheEntry>>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            Ok(entries.get(key).cloned())
        })
    }

    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<CacheEntry>> {
        Box::pin(async move {
            ensure!(
                !key.trim().is_empty(),
                EmptyKeySnafu {
                    stage: "memory-cache-put"
                }
            );

            let entry = CacheEntry::new(key, value);
            let mut entries = self.entries.write().await;
            entries.insert(key.to_string(), entry.clone());
            Ok(entry)
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<bool>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            Ok(entries.remove(key).is_some())
        })
    }
}
