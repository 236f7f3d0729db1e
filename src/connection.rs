//! Process-wide connection caching and schema-creation serialization.
//!
//! Adapter instances that address the same database share one engine
//! handle. The cache is keyed by the canonical database address and lives
//! for the duration of the process unless explicitly evicted; sled in
//! particular allows only one open handle per path per process, so the
//! registry is load-bearing there, not an optimization.
//!
//! Schema creation is serialized across instances by a process-wide mutex
//! keyed by `(database, table)`. Waiters block on the same entry; the
//! entry is removed once the last waiter releases it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use once_cell::sync::Lazy;

use crate::error::StorageResult;

/// A process-wide registry of shared engine handles, keyed by database
/// address. One registry exists per engine type.
pub struct ConnectionRegistry<H> {
    inner: Mutex<HashMap<String, Arc<H>>>,
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }
}

impl<H> ConnectionRegistry<H> {
    /// Fetch the cached handle for `address`, opening it with `open` if
    /// absent. The registry lock is held across `open`, which serializes
    /// the first open of every address — required for engines that permit
    /// a single open handle per path.
    pub fn get_or_open(
        &self,
        address: &str,
        open: impl FnOnce() -> StorageResult<H>,
    ) -> StorageResult<Arc<H>> {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.get(address) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(open()?);
        inner.insert(address.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Remove `address` from the registry, returning the handle so the
    /// caller can close it. Instances still holding the `Arc` keep it
    /// alive; the handle's lifetime equals its longest holder.
    pub fn evict(&self, address: &str) -> Option<Arc<H>> {
        self.inner.lock().remove(address)
    }

    /// Evict every handle, returning them for teardown.
    pub fn clear(&self) -> Vec<Arc<H>> {
        self.inner.lock().drain().map(|(_, handle)| handle).collect()
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

type TableKey = (String, String);

static TABLE_CREATION_LOCKS: Lazy<Mutex<HashMap<TableKey, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Serialize schema creation for `(database, table)` across every adapter
/// instance in the process. Concurrent callers block until the in-flight
/// operation completes; the lock entry is dropped once the last waiter is
/// done with it.
pub fn with_table_creation_lock<R>(database: &str, table: &str, f: impl FnOnce() -> R) -> R {
    let key = (database.to_owned(), table.to_owned());
    let gate = {
        let mut locks = TABLE_CREATION_LOCKS.lock();
        Arc::clone(locks.entry(key.clone()).or_default())
    };
    let out = {
        let _guard = gate.lock();
        f()
    };
    drop(gate);
    let mut locks = TABLE_CREATION_LOCKS.lock();
    if let Some(entry) = locks.get(&key) {
        // Only the map's own reference left: no waiter is attached.
        if Arc::strong_count(entry) == 1 {
            locks.remove(&key);
        }
    }
    out
}
