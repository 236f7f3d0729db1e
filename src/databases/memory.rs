//! In-memory adapter.
//!
//! The smallest backend: the adapter core's cache *is* the store. Useful
//! for tests and for deployments that want the capability surface without
//! durability.

use serde_json::Value;

use crate::base::{AdapterCore, NoBackendTransaction, OperationTiming};
use crate::config::MemoryConfig;
use crate::error::StorageResult;
use crate::traits::storage::{validate_key, BatchStorage, Storage, StorageIter};

/// Volatile key-value store backed by the shared adapter core.
pub struct MemoryStore<V = Value> {
    core: AdapterCore<V>,
}

impl<V: Clone + Send + Sync> MemoryStore<V> {
    pub fn new(config: MemoryConfig) -> Self {
        let store = Self { core: AdapterCore::new(config.performance) };
        // Nothing to load; the cache starts ready.
        let _ = store.core.ensure_loaded(|cache| {
            cache.reserve(config.initial_capacity);
            Ok(())
        });
        store
    }

    /// Run `f` inside a logical transaction: the cache snapshot is
    /// restored if `f` fails at any nesting depth.
    pub fn transaction<R>(&self, f: impl FnOnce() -> StorageResult<R>) -> StorageResult<R> {
        self.core.transaction(&NoBackendTransaction, f)
    }

    /// Recorded operation timings (empty unless monitoring is enabled).
    pub fn performance_stats(&self) -> Vec<OperationTiming> {
        self.core.performance_stats()
    }
}

impl<V: Clone + Send + Sync> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl<V: Clone + Send + Sync> Storage<V> for MemoryStore<V> {
    fn get(&self, key: &str) -> StorageResult<Option<V>> {
        validate_key(key)?;
        Ok(self.core.time_op("get", || self.core.cache_get(key)))
    }

    fn set(&self, key: &str, value: V) -> StorageResult<()> {
        validate_key(key)?;
        self.core.time_op("set", || self.core.cache_set(key.to_owned(), value));
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.core.time_op("delete", || self.core.cache_delete(key)))
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.core.cache_contains(key))
    }

    fn clear(&self) -> StorageResult<()> {
        self.core.cache_clear();
        Ok(())
    }

    fn size(&self) -> StorageResult<usize> {
        Ok(self.core.cache_len())
    }

    fn keys(&self) -> StorageResult<StorageIter<'_, String>> {
        Ok(Box::new(self.core.cache_keys().into_iter().map(Ok)))
    }

    fn values(&self) -> StorageResult<StorageIter<'_, V>> {
        let snapshot = self.core.cache_snapshot();
        Ok(Box::new(snapshot.into_values().map(Ok)))
    }

    fn entries(&self) -> StorageResult<StorageIter<'_, (String, V)>> {
        let snapshot = self.core.cache_snapshot();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }
}

impl<V: Clone + Send + Sync> BatchStorage<V> for MemoryStore<V> {}
