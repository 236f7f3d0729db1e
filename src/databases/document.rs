//! Sled-backed document store with deterministic partitioning.
//!
//! Documents are bincode-encoded records routed into partition trees by
//! the djb2 hash of their storage key, so equal keys always live in the
//! same tree and a lookup touches exactly one partition. The underlying
//! sled database allows one open handle per path per process; handles are
//! shared through the process-wide connection registry.
//!
//! Batch semantics here are best-effort sequential: a failing
//! sub-operation is recorded and the batch continues. This is the
//! documented divergence from the SQL backends, whose `set_many` runs in a
//! real engine transaction.

use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::base::{AdapterCore, OperationTiming};
use crate::config::{ConsistencyLevel, DocumentConfig};
use crate::connection::ConnectionRegistry;
use crate::error::{StorageError, StorageResult};
use crate::partition::PartitionHasher;
use crate::sql::types::validate_storage_text;
use crate::traits::storage::{
    validate_key, BatchStorage, SaveableStorage, Storage, StorageIter,
};

/// One shared handle per sled path per process.
static SLED_DATABASES: Lazy<ConnectionRegistry<sled::Db>> =
    Lazy::new(ConnectionRegistry::default);

/// The persisted document record.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct Document {
    pub id: String,
    pub key: String,
    /// JSON text of the stored value.
    pub value: String,
    /// Partition identifier, `partition_<n>`.
    pub entity_type: String,
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    pub version_tag: Option<String>,
}

fn encode_document(document: &Document) -> StorageResult<Vec<u8>> {
    bincode::encode_to_vec(document, bincode::config::standard()).map_err(|err| {
        StorageError::serialization_failed("document encoding failed")
            .with_key(document.key.clone())
            .with_source(err)
    })
}

fn decode_document(bytes: &[u8]) -> StorageResult<Document> {
    let (document, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|err| {
            StorageError::serialization_failed("document decoding failed").with_source(err)
        })?;
    Ok(document)
}

/// Partitioned document store over sled.
pub struct DocumentStore {
    config: DocumentConfig,
    hasher: PartitionHasher,
    db: Arc<sled::Db>,
    core: AdapterCore<Value>,
}

impl DocumentStore {
    /// Open (or join) the sled database at the configured path.
    ///
    /// # Errors
    ///
    /// `InvalidValue` for a bad container name, `ConnectionFailed` when the
    /// engine cannot open the path.
    pub fn new(config: DocumentConfig) -> StorageResult<Self> {
        config.validate()?;
        let hasher = PartitionHasher::new(config.partition_count);
        let address = config.database.display().to_string();
        let auto_save = config.auto_save;
        let path = config.database.clone();
        let db = SLED_DATABASES.get_or_open(&address, || open_sled(&path, auto_save))?;
        Ok(Self {
            core: AdapterCore::new(config.performance.clone()),
            hasher,
            db,
            config,
        })
    }

    pub fn consistency_level(&self) -> ConsistencyLevel {
        self.config.consistency_level
    }

    pub fn partition_count(&self) -> u32 {
        self.hasher.count()
    }

    /// The partition identifier a key routes to.
    pub fn partition_for(&self, key: &str) -> String {
        self.hasher.partition_id(key)
    }

    fn tree_name(&self, partition_id: &str) -> String {
        format!("{}_{partition_id}", self.config.container)
    }

    fn tree_for_key(&self, key: &str) -> StorageResult<sled::Tree> {
        let name = self.tree_name(&self.hasher.partition_id(key));
        self.db.open_tree(name).map_err(|err| {
            StorageError::connection_failed("cannot open partition tree")
                .with_key(key.to_owned())
                .with_source(err)
        })
    }

    fn all_trees(&self) -> StorageResult<Vec<sled::Tree>> {
        let mut trees = Vec::with_capacity(self.hasher.count() as usize);
        for partition in 0..self.hasher.count() {
            let name = self.tree_name(&format!("partition_{partition}"));
            let tree = self.db.open_tree(name).map_err(|err| {
                StorageError::connection_failed("cannot open partition tree").with_source(err)
            })?;
            trees.push(tree);
        }
        Ok(trees)
    }

    fn make_document(&self, key: &str, value: &Value) -> StorageResult<Document> {
        // Recognize tagged records from dynamic producers so that the
        // persisted form round-trips their structure.
        let processed = crate::value::preprocess(value.clone());
        let text = serde_json::to_string(&processed)?;
        validate_storage_text(&text)?;
        Ok(Document {
            id: key.to_owned(),
            key: key.to_owned(),
            value: text,
            entity_type: self.hasher.partition_id(key),
            timestamp: chrono::Utc::now().timestamp_millis(),
            version_tag: None,
        })
    }

    /// Flush this instance's pending writes and mark it closed. The next
    /// operation reconnects automatically.
    pub fn close(&self) -> StorageResult<()> {
        self.save()?;
        self.core.mark_closed();
        Ok(())
    }

    /// Flush and evict this database from the process-wide registry.
    /// Instances still holding the handle keep it alive.
    pub fn close_database(&self) -> StorageResult<()> {
        self.save()?;
        self.core.mark_closed();
        SLED_DATABASES.evict(&self.config.database.display().to_string());
        Ok(())
    }

    /// Flush and evict every cached sled handle in the process.
    pub fn clear_connection_cache() -> StorageResult<()> {
        for db in SLED_DATABASES.clear() {
            db.flush().map_err(|err| {
                StorageError::io("flush during cache teardown failed").with_source(err)
            })?;
        }
        Ok(())
    }

    pub fn performance_stats(&self) -> Vec<OperationTiming> {
        self.core.performance_stats()
    }
}

fn open_sled(path: &Path, auto_save: bool) -> StorageResult<sled::Db> {
    let mut config = sled::Config::new().path(path);
    if !auto_save {
        config = config.flush_every_ms(None);
    }
    config.open().map_err(|err| {
        StorageError::connection_failed("cannot open document database")
            .with_database(path.display().to_string())
            .with_source(err)
    })
}

impl Storage for DocumentStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        self.core.time_op("get", || {
            let tree = self.tree_for_key(key)?;
            let Some(bytes) = tree.get(key.as_bytes()).map_err(|err| {
                StorageError::query_failed("document read failed")
                    .with_key(key.to_owned())
                    .with_source(err)
            })?
            else {
                return Ok(None);
            };
            let document = decode_document(&bytes)?;
            Ok(Some(serde_json::from_str(&document.value)?))
        })
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        validate_key(key)?;
        self.core.time_op("set", || {
            let document = self.make_document(key, &value)?;
            let bytes = encode_document(&document)?;
            let tree = self.tree_for_key(key)?;
            tree.insert(key.as_bytes(), bytes).map_err(|err| {
                StorageError::write_failed("document upsert failed")
                    .with_key(key.to_owned())
                    .with_source(err)
            })?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.core.time_op("delete", || {
            let tree = self.tree_for_key(key)?;
            let removed = tree.remove(key.as_bytes()).map_err(|err| {
                StorageError::delete_failed("document delete failed")
                    .with_key(key.to_owned())
                    .with_source(err)
            })?;
            Ok(removed.is_some())
        })
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let tree = self.tree_for_key(key)?;
        tree.contains_key(key.as_bytes()).map_err(|err| {
            StorageError::query_failed("document lookup failed")
                .with_key(key.to_owned())
                .with_source(err)
        })
    }

    fn clear(&self) -> StorageResult<()> {
        for tree in self.all_trees()? {
            tree.clear().map_err(|err| {
                StorageError::delete_failed("partition clear failed").with_source(err)
            })?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<usize> {
        let mut total = 0;
        for tree in self.all_trees()? {
            total += tree.len();
        }
        Ok(total)
    }

    fn keys(&self) -> StorageResult<StorageIter<'_, String>> {
        let mut keys = Vec::new();
        for tree in self.all_trees()? {
            for entry in tree.iter() {
                let (key, _) = entry.map_err(|err| {
                    StorageError::query_failed("partition scan failed").with_source(err)
                })?;
                keys.push(String::from_utf8_lossy(&key).into_owned());
            }
        }
        Ok(Box::new(keys.into_iter().map(Ok)))
    }

    fn values(&self) -> StorageResult<StorageIter<'_, Value>> {
        let mut values = Vec::new();
        for tree in self.all_trees()? {
            for entry in tree.iter() {
                let (_, bytes) = entry.map_err(|err| {
                    StorageError::query_failed("partition scan failed").with_source(err)
                })?;
                let document = decode_document(&bytes)?;
                values.push(serde_json::from_str(&document.value)?);
            }
        }
        Ok(Box::new(values.into_iter().map(Ok)))
    }

    fn entries(&self) -> StorageResult<StorageIter<'_, (String, Value)>> {
        let mut entries = Vec::new();
        for tree in self.all_trees()? {
            for entry in tree.iter() {
                let (_, bytes) = entry.map_err(|err| {
                    StorageError::query_failed("partition scan failed").with_source(err)
                })?;
                let document = decode_document(&bytes)?;
                let value = serde_json::from_str(&document.value)?;
                entries.push((document.key, value));
            }
        }
        Ok(Box::new(entries.into_iter().map(Ok)))
    }
}

impl BatchStorage for DocumentStore {
    /// Group entries by partition and apply one sled batch per tree.
    fn set_many(&self, entries: Vec<(String, Value)>) -> StorageResult<()> {
        use std::collections::HashMap;
        let mut by_tree: HashMap<String, sled::Batch> = HashMap::new();
        for (key, value) in &entries {
            validate_key(key)?;
            let document = self.make_document(key, value)?;
            let bytes = encode_document(&document)?;
            by_tree
                .entry(self.tree_name(&document.entity_type))
                .or_default()
                .insert(key.as_bytes(), bytes);
        }
        for (tree_name, batch) in by_tree {
            let tree = self.db.open_tree(&tree_name).map_err(|err| {
                StorageError::connection_failed("cannot open partition tree").with_source(err)
            })?;
            tree.apply_batch(batch).map_err(|err| {
                StorageError::write_failed("partition batch failed")
                    .with_table(tree_name.clone())
                    .with_source(err)
            })?;
        }
        Ok(())
    }
}

impl SaveableStorage for DocumentStore {
    fn save(&self) -> StorageResult<()> {
        self.db
            .flush()
            .map(|_| ())
            .map_err(|err| StorageError::io("document flush failed").with_source(err))
    }
}
