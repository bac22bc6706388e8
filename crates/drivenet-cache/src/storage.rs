//! Backing store interface and the in-process implementation

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::CacheResult;

/// Content store behind an [`LruCache`](crate::LruCache).
///
/// The cache never persists anything itself beyond its in-memory ledger;
/// every byte of content goes through this interface.
#[async_trait]
pub trait CacheStorage<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;

    async fn set(&self, key: &str, value: T, size: u64) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    async fn has(&self, key: &str) -> CacheResult<bool>;

    /// Size recorded for `key`, or `None` if the store does not hold it.
    async fn size_of(&self, key: &str) -> CacheResult<Option<u64>>;
}

#[async_trait]
impl<T, S> CacheStorage<T> for Arc<S>
where
    T: Send + 'static,
    S: CacheStorage<T> + ?Sized,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: T, size: u64) -> CacheResult<()> {
        (**self).set(key, value, size).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        (**self).delete(key).await
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        (**self).has(key).await
    }

    async fn size_of(&self, key: &str) -> CacheResult<Option<u64>> {
        (**self).size_of(key).await
    }
}

/// Thread-safe in-memory store, keyed by string with a recorded size per entry.
pub struct MemoryStorage<T> {
    entries: Mutex<HashMap<String, (T, u64)>>,
}

impl<T> MemoryStorage<T> {
    pub fn new() -> Self {
        MemoryStorage {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sum of recorded sizes across all stored entries.
    pub fn total_size(&self) -> u64 {
        self.lock().values().map(|(_, size)| *size).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (T, u64)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Default for MemoryStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> CacheStorage<T> for MemoryStorage<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        Ok(self.lock().get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: T, size: u64) -> CacheResult<()> {
        self.lock().insert(key.to_string(), (value, size));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.lock().contains_key(key))
    }

    async fn size_of(&self, key: &str) -> CacheResult<Option<u64>> {
        Ok(self.lock().get(key).map(|(_, size)| *size))
    }
}
