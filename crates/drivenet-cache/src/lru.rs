//! Byte-budgeted LRU cache.
//!
//! The ledger is an ordered key list, least-recently-used at the head, plus
//! the aggregate size of everything it tracks. It is the only source of
//! truth for eviction order and total size; the backing store is the source
//! of truth for content and per-entry size.
//!
//! Every operation holds the ledger lock for its whole duration, including
//! the backing-store calls, so no two mutations interleave and a key is
//! never appended twice.

use std::collections::VecDeque;
use std::marker::PhantomData;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CacheResult;
use crate::snapshot::LedgerSnapshot;
use crate::storage::CacheStorage;

#[derive(Debug, Default)]
struct Ledger {
    keys: VecDeque<String>,
    current_size: u64,
}

impl Ledger {
    fn position(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Move `key` to the most-recently-used end. Returns false if untracked.
    fn promote(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(i) => {
                if let Some(k) = self.keys.remove(i) {
                    self.keys.push_back(k);
                }
                true
            }
            None => false,
        }
    }

    /// Pop the least-recently-used key other than `protect`.
    fn pop_lru(&mut self, protect: Option<&str>) -> Option<String> {
        let i = self
            .keys
            .iter()
            .position(|k| Some(k.as_str()) != protect)?;
        self.keys.remove(i)
    }
}

pub struct LruCache<T, S> {
    storage: S,
    capacity: u64,
    ledger: Mutex<Ledger>,
    _value: PhantomData<fn() -> T>,
}

impl<T, S> LruCache<T, S>
where
    T: Send + 'static,
    S: CacheStorage<T>,
{
    /// Create an empty cache holding at most `capacity` bytes.
    pub fn new(storage: S, capacity: u64) -> Self {
        Self::restore(storage, capacity, LedgerSnapshot::default())
    }

    /// Rebuild a cache from a ledger saved by a previous process.
    ///
    /// Duplicate keys in the snapshot are dropped, keeping the most recent.
    pub fn restore(storage: S, capacity: u64, snapshot: LedgerSnapshot) -> Self {
        let mut keys: VecDeque<String> = VecDeque::with_capacity(snapshot.keys.len());
        for key in snapshot.keys {
            if let Some(i) = keys.iter().position(|k| *k == key) {
                keys.remove(i);
            }
            keys.push_back(key);
        }
        LruCache {
            storage,
            capacity,
            ledger: Mutex::new(Ledger {
                keys,
                current_size: snapshot.current_size,
            }),
            _value: PhantomData,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Aggregate size of all tracked entries.
    pub async fn current_size(&self) -> u64 {
        self.ledger.lock().await.current_size
    }

    /// Number of tracked keys.
    pub async fn len(&self) -> usize {
        self.ledger.lock().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ledger.lock().await.keys.is_empty()
    }

    /// Whether `key` is tracked. Does not affect recency.
    pub async fn contains(&self, key: &str) -> bool {
        self.ledger.lock().await.position(key).is_some()
    }

    /// Tracked keys from least to most recently used.
    pub async fn keys(&self) -> Vec<String> {
        self.ledger.lock().await.keys.iter().cloned().collect()
    }

    /// Export the ledger so it can be restored with [`LruCache::restore`].
    pub async fn snapshot(&self) -> LedgerSnapshot {
        let ledger = self.ledger.lock().await;
        LedgerSnapshot {
            keys: ledger.keys.iter().cloned().collect(),
            current_size: ledger.current_size,
        }
    }

    /// Look up `key`, promoting it to most-recently-used on a hit.
    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let mut ledger = self.ledger.lock().await;
        if ledger.position(key).is_none() {
            return Ok(None);
        }

        match self.storage.get(key).await? {
            Some(value) => {
                ledger.promote(key);
                Ok(Some(value))
            }
            None => {
                debug!(key, "tracked key missing from backing store");
                Ok(None)
            }
        }
    }

    /// Insert or replace `key`.
    ///
    /// Returns `false` without touching anything when `size >= capacity`.
    /// Re-setting a tracked key adjusts the aggregate by the difference
    /// between the new size and the size the store held for it.
    pub async fn set(&self, key: &str, value: T, size: u64) -> CacheResult<bool> {
        if size >= self.capacity {
            debug!(key, size, capacity = self.capacity, "not caching oversized entry");
            return Ok(false);
        }

        let mut ledger = self.ledger.lock().await;

        if ledger.position(key).is_some() {
            let previous = self.storage.size_of(key).await?.unwrap_or(0);
            self.storage.set(key, value, size).await?;
            ledger.promote(key);
            ledger.current_size = ledger
                .current_size
                .saturating_sub(previous)
                .saturating_add(size);
            self.evict(&mut ledger, 0, Some((key, size))).await?;
        } else {
            self.evict(&mut ledger, size, None).await?;
            self.storage.set(key, value, size).await?;
            ledger.keys.push_back(key.to_string());
            ledger.current_size += size;
        }

        debug!(key, size, current = ledger.current_size, "cached");
        Ok(true)
    }

    /// Remove `key`, trusting `size` to be the size it was stored with.
    ///
    /// Returns `false` if the key was not tracked.
    pub async fn delete(&self, key: &str, size: u64) -> CacheResult<bool> {
        let mut ledger = self.ledger.lock().await;
        let Some(i) = ledger.position(key) else {
            return Ok(false);
        };

        self.storage.delete(key).await?;
        ledger.keys.remove(i);
        ledger.current_size = ledger.current_size.saturating_sub(size);
        Ok(true)
    }

    /// Evict from the head until `incoming` more bytes fit.
    ///
    /// `protect` is a tracked key (with its size) that must survive. Entries
    /// the store no longer holds count as zero bytes. If the ledger runs dry
    /// while still over budget, the aggregate was stale and is reset to what
    /// remains.
    async fn evict(
        &self,
        ledger: &mut Ledger,
        incoming: u64,
        protect: Option<(&str, u64)>,
    ) -> CacheResult<()> {
        let protect_key = protect.map(|(k, _)| k);

        while ledger.current_size.saturating_add(incoming) > self.capacity {
            let Some(victim) = ledger.pop_lru(protect_key) else {
                let remaining = protect.map(|(_, size)| size).unwrap_or(0);
                warn!(
                    current = ledger.current_size,
                    remaining, "ledger size out of sync with tracked keys, resetting"
                );
                ledger.current_size = remaining;
                break;
            };

            let victim_size = match self.storage.size_of(&victim).await {
                Ok(Some(size)) => size,
                Ok(None) => {
                    debug!(key = %victim, "evicting key missing from backing store");
                    0
                }
                Err(e) => {
                    ledger.keys.push_front(victim);
                    return Err(e);
                }
            };

            if let Err(e) = self.storage.delete(&victim).await {
                ledger.keys.push_front(victim);
                return Err(e);
            }

            ledger.current_size = ledger.current_size.saturating_sub(victim_size);
            debug!(key = %victim, size = victim_size, "evicted");
        }

        Ok(())
    }
}
