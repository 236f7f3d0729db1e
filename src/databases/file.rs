//! JSON-file adapter.
//!
//! The whole store is a single serialized mapping of keys to values,
//! loaded into the adapter core's cache on first use and persisted
//! atomically: serialize to a sibling temp file, fsync, then rename over
//! the target. With `auto_save` off, mutations stay in memory until
//! [`SaveableStorage::save`] flushes them.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::base::{AdapterCore, NoBackendTransaction, OperationTiming};
use crate::config::FileConfig;
use crate::error::{StorageError, StorageResult};
use crate::traits::storage::{
    validate_key, BatchStorage, SaveableStorage, Storage, StorageIter,
};

/// Key-value store persisted as one JSON document.
pub struct FileStore<V = Value> {
    config: FileConfig,
    core: AdapterCore<V>,
}

impl<V> FileStore<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned,
{
    pub fn new(config: FileConfig) -> Self {
        let core = AdapterCore::new(config.performance.clone());
        Self { config, core }
    }

    fn ensure_loaded(&self) -> StorageResult<()> {
        let path = self.config.path.clone();
        self.core.ensure_loaded(|cache| {
            if !path.exists() {
                return Ok(());
            }
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                return Ok(());
            }
            let loaded: HashMap<String, V> = serde_json::from_str(&text).map_err(|err| {
                StorageError::serialization_failed("snapshot file is not a JSON mapping")
                    .with_database(path.display().to_string())
                    .with_source(err)
            })?;
            cache.extend(loaded);
            Ok(())
        })
    }

    fn write_snapshot(path: &Path, pretty: bool, entries: &HashMap<String, V>) -> StorageResult<()> {
        let payload = if pretty {
            serde_json::to_vec_pretty(entries)?
        } else {
            serde_json::to_vec(entries)?
        };
        let temp = temp_sibling(path);
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&temp, path)?;
        Ok(())
    }

    fn persist(&self) -> StorageResult<()> {
        self.core.with_persist_gate(|| {
            if self.config.auto_create {
                if let Some(parent) = self.config.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
            }
            let snapshot = self.core.cache_snapshot();
            Self::write_snapshot(&self.config.path, self.config.pretty, &snapshot)
        })
    }

    fn persist_if_auto(&self) -> StorageResult<()> {
        // Inside a transaction the file is rewritten once, on outer
        // commit; a rollback must leave the snapshot untouched.
        if self.config.auto_save && !self.core.in_transaction() {
            self.persist()?;
        }
        Ok(())
    }

    /// Run `f` inside a logical transaction; the file is rewritten once on
    /// outer commit when `auto_save` is on.
    pub fn transaction<R>(&self, f: impl FnOnce() -> StorageResult<R>) -> StorageResult<R> {
        self.ensure_loaded()?;
        let value = self.core.transaction(&NoBackendTransaction, f)?;
        self.persist_if_auto()?;
        Ok(value)
    }

    pub fn performance_stats(&self) -> Vec<OperationTiming> {
        self.core.performance_stats()
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl<V> Storage<V> for FileStore<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned,
{
    fn get(&self, key: &str) -> StorageResult<Option<V>> {
        validate_key(key)?;
        self.ensure_loaded()?;
        Ok(self.core.time_op("get", || self.core.cache_get(key)))
    }

    fn set(&self, key: &str, value: V) -> StorageResult<()> {
        validate_key(key)?;
        self.ensure_loaded()?;
        self.core.time_op("set", || self.core.cache_set(key.to_owned(), value));
        self.persist_if_auto()
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.ensure_loaded()?;
        let removed = self.core.time_op("delete", || self.core.cache_delete(key));
        if removed {
            self.persist_if_auto()?;
        }
        Ok(removed)
    }

    fn clear(&self) -> StorageResult<()> {
        self.ensure_loaded()?;
        self.core.cache_clear();
        self.persist_if_auto()
    }

    fn size(&self) -> StorageResult<usize> {
        self.ensure_loaded()?;
        Ok(self.core.cache_len())
    }

    fn keys(&self) -> StorageResult<StorageIter<'_, String>> {
        self.ensure_loaded()?;
        Ok(Box::new(self.core.cache_keys().into_iter().map(Ok)))
    }

    fn values(&self) -> StorageResult<StorageIter<'_, V>> {
        self.ensure_loaded()?;
        Ok(Box::new(self.core.cache_snapshot().into_values().map(Ok)))
    }

    fn entries(&self) -> StorageResult<StorageIter<'_, (String, V)>> {
        self.ensure_loaded()?;
        Ok(Box::new(self.core.cache_snapshot().into_iter().map(Ok)))
    }
}

impl<V> BatchStorage<V> for FileStore<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned,
{
    /// One rewrite for the whole batch instead of one per entry.
    fn set_many(&self, entries: Vec<(String, V)>) -> StorageResult<()> {
        self.ensure_loaded()?;
        for (key, value) in entries {
            validate_key(&key)?;
            self.core.cache_set(key, value);
        }
        self.persist_if_auto()
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<usize> {
        self.ensure_loaded()?;
        let mut deleted = 0;
        for key in keys {
            if self.core.cache_delete(key) {
                deleted += 1;
            }
        }
        if deleted > 0 {
            self.persist_if_auto()?;
        }
        Ok(deleted)
    }
}

impl<V> SaveableStorage for FileStore<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned,
{
    fn save(&self) -> StorageResult<()> {
        self.ensure_loaded()?;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_at(dir: &TempDir, auto_save: bool) -> FileStore {
        FileStore::new(
            FileConfig::builder()
                .path(dir.path().join("store.json"))
                .auto_save(auto_save)
                .build(),
        )
    }

    #[test]
    fn persists_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let store = store_at(&dir, true);
            store.set("alpha", json!([1, 2, 3])).unwrap();
            store.set("beta", json!("text")).unwrap();
        }
        let reopened = store_at(&dir, true);
        assert_eq!(reopened.get("alpha").unwrap(), Some(json!([1, 2, 3])));
        assert_eq!(reopened.size().unwrap(), 2);
    }

    #[test]
    fn manual_save_defers_writes() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir, false);
        store.set("k", json!(1)).unwrap();
        // Nothing on disk yet.
        assert!(!dir.path().join("store.json").exists());
        store.save().unwrap();
        assert!(dir.path().join("store.json").exists());

        let reopened = store_at(&dir, false);
        assert_eq!(reopened.get("k").unwrap(), Some(json!(1)));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir, true);
        store.set("k", json!(1)).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn pretty_snapshot_is_indented() {
        let dir = TempDir::new().unwrap();
        let store: FileStore = FileStore::new(
            FileConfig::builder()
                .path(dir.path().join("store.json"))
                .pretty(true)
                .build(),
        );
        store.set("k", json!({"nested": true})).unwrap();
        let text = fs::read_to_string(dir.path().join("store.json")).unwrap();
        assert!(text.contains('\n'));
    }

    #[test]
    fn corrupt_snapshot_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("store.json"), "not json at all").unwrap();
        let store = store_at(&dir, true);
        let err = store.get("k").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SerializationFailed);
    }

    #[test]
    fn quote_heavy_payloads_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir, true);
        let value = json!({"name": "O'Reilly; DROP TABLE users;"});
        store.set("O'Reilly", value.clone()).unwrap();
        assert_eq!(store.get("O'Reilly").unwrap(), Some(value));
        assert_eq!(store.size().unwrap(), 1);
    }
}
