//! Key-value capability interfaces.
//!
//! [`Storage`] is the basic contract every adapter implements;
//! [`BatchStorage`] layers bulk operations on top with default fan-out
//! implementations, and [`SaveableStorage`] marks backends with a
//! manual-save mode. Backends implement the subset they support and
//! compose freely — there is no inheritance tree, only capability traits.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{StorageError, StorageResult};

/// A boxed fallible iterator, the return shape of the iteration methods.
pub type StorageIter<'a, T> = Box<dyn Iterator<Item = StorageResult<T>> + 'a>;

/// Reject the empty key before it reaches any backend.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_value("storage key must not be empty"));
    }
    Ok(())
}

/// Basic key-value storage.
///
/// The base invariant: `get` after a completed `set` returns the stored
/// value; keys are case-sensitive and never mutated once written (updates
/// rewrite the value).
pub trait Storage<V = Value>: Send + Sync {
    /// Fetch the value stored under `key`.
    fn get(&self, key: &str) -> StorageResult<Option<V>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: V) -> StorageResult<()>;

    /// Remove `key`. Returns whether a value was present.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Whether `key` currently has a value.
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove every entry.
    fn clear(&self) -> StorageResult<()>;

    /// Number of stored entries.
    fn size(&self) -> StorageResult<usize>;

    /// Iterate over keys.
    fn keys(&self) -> StorageResult<StorageIter<'_, String>>;

    /// Iterate over values.
    fn values(&self) -> StorageResult<StorageIter<'_, V>>;

    /// Iterate over `(key, value)` pairs.
    fn entries(&self) -> StorageResult<StorageIter<'_, (String, V)>>;
}

/// A single operation inside a [`BatchStorage::batch`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation<V = Value> {
    Set { key: String, value: V },
    Delete { key: String },
    Clear,
}

/// Outcome of a batch: `success` is false as soon as any sub-operation
/// failed; failures are collected rather than aborting the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub success: bool,
    pub operations: usize,
    pub errors: Vec<String>,
}

impl BatchResult {
    /// Fold one sub-operation outcome into the result.
    pub fn record<T>(&mut self, outcome: StorageResult<T>) {
        self.operations += 1;
        if let Err(err) = outcome {
            self.errors.push(err.to_string());
        }
    }

    /// Finalize: success iff no error was recorded.
    pub fn finish(mut self) -> Self {
        self.success = self.errors.is_empty();
        self
    }
}

/// Bulk key-value storage.
///
/// The defaults fan out to the single-item operations one by one (program
/// order within an adapter instance); backends with a native bulk path
/// override them.
pub trait BatchStorage<V = Value>: Storage<V>
where
    V: Clone,
{
    /// Fetch many keys; absent keys are simply missing from the result map.
    fn get_many(&self, keys: &[String]) -> StorageResult<HashMap<String, V>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key)? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Store many entries. Fails on the first error; prefer [`Self::batch`]
    /// for error accumulation.
    fn set_many(&self, entries: Vec<(String, V)>) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Delete many keys, returning how many were present.
    fn delete_many(&self, keys: &[String]) -> StorageResult<usize> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Execute a sequence of operations, accumulating per-operation errors
    /// into the result instead of aborting.
    fn batch(&self, operations: Vec<Operation<V>>) -> StorageResult<BatchResult> {
        let mut result = BatchResult::default();
        for op in operations {
            match op {
                Operation::Set { key, value } => result.record(self.set(&key, value)),
                Operation::Delete { key } => result.record(self.delete(&key)),
                Operation::Clear => result.record(self.clear()),
            }
        }
        Ok(result.finish())
    }
}

/// Storage with a manual-save mode: mutations may stay in memory or in the
/// engine's write cache until `save()` flushes them.
pub trait SaveableStorage {
    /// Flush pending writes to durable storage.
    fn save(&self) -> StorageResult<()>;
}
