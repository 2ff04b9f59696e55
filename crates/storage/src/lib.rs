//! Local key-value cache used to prime chat state before the backend answers.

use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryCache;
pub use sqlite::SqliteCache;
pub use types::{CacheEntry, HISTORY_CACHE_KEY};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<Option<CacheEntry>>>;
    /// Inserts or replaces the value stored under `key`.
    fn put<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, StorageResult<CacheEntry>>;
    /// Returns whether a value was present.
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StorageResult<bool>>;
}
