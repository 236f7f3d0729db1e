//! Shared adapter core: in-memory cache, initialization and persistence
//! gates, nested logical transactions, and operation timing.
//!
//! Backends do not inherit from a base class; they own an [`AdapterCore`]
//! and inject their `ensure_loaded` / `persist` behavior as closures, plus
//! optional [`TransactionHooks`] for engines with real transactions. The
//! core guarantees the serialization points of the storage layer:
//!
//! - loading is exclusive — concurrent callers block on the load gate and
//!   observe the one completed outcome (`new → loading → ready → closed`);
//! - persisting is serialized behind a distinct gate; parking_lot locks do
//!   not poison, so a failed persist leaves the gate immediately reusable;
//! - nested logical transactions snapshot the cache per level and restore
//!   on failure at any depth, while backend begin/commit/rollback fire only
//!   at the outermost level.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::config::PerformanceMonitoring;
use crate::error::StorageResult;

/// Lifecycle of an adapter's backing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    New,
    Loading,
    Ready,
    Closed,
}

/// One recorded operation timing.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationTiming {
    pub operation: String,
    pub elapsed_ms: u64,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Backend transaction hooks. `begin`/`commit`/`rollback` fire only at
/// transaction depth zero; the savepoint hooks fire for nested levels on
/// engines that support partial rollback (the defaults are no-ops, in
/// which case nested failure restores the cache snapshot only).
pub trait TransactionHooks {
    fn begin(&self) -> StorageResult<()> {
        Ok(())
    }
    fn commit(&self) -> StorageResult<()> {
        Ok(())
    }
    fn rollback(&self) -> StorageResult<()> {
        Ok(())
    }
    fn savepoint(&self, depth: u32) -> StorageResult<()> {
        let _ = depth;
        Ok(())
    }
    fn release_savepoint(&self, depth: u32) -> StorageResult<()> {
        let _ = depth;
        Ok(())
    }
    fn rollback_to_savepoint(&self, depth: u32) -> StorageResult<()> {
        let _ = depth;
        Ok(())
    }
}

/// Hooks for adapters whose transactions are cache-only.
pub struct NoBackendTransaction;

impl TransactionHooks for NoBackendTransaction {}

#[derive(Debug, Default)]
struct TxLedger<V> {
    depth: u32,
    snapshots: Vec<HashMap<String, V>>,
}

/// The shared core owned by every adapter.
pub struct AdapterCore<V> {
    cache: RwLock<HashMap<String, V>>,
    state: Mutex<LoadState>,
    load_gate: Mutex<()>,
    persist_gate: Mutex<()>,
    tx: Mutex<TxLedger<V>>,
    timings: Mutex<VecDeque<OperationTiming>>,
    performance: PerformanceMonitoring,
}

impl<V: Clone> AdapterCore<V> {
    pub fn new(performance: PerformanceMonitoring) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            state: Mutex::new(LoadState::New),
            load_gate: Mutex::new(()),
            persist_gate: Mutex::new(()),
            tx: Mutex::new(TxLedger { depth: 0, snapshots: Vec::new() }),
            timings: Mutex::new(VecDeque::new()),
            performance,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoadState {
        *self.state.lock()
    }

    /// Mark the adapter closed. The next operation reloads.
    pub fn mark_closed(&self) {
        *self.state.lock() = LoadState::Closed;
    }

    /// Ensure the cache is loaded, running `load` at most once per
    /// lifecycle. Readiness is monotone: once this returns `Ok`, no later
    /// call re-runs the loader until [`Self::mark_closed`]. A failed load
    /// returns the adapter to `New` so the next caller retries.
    pub fn ensure_loaded(
        &self,
        load: impl FnOnce(&mut HashMap<String, V>) -> StorageResult<()>,
    ) -> StorageResult<()> {
        if *self.state.lock() == LoadState::Ready {
            return Ok(());
        }
        let _gate = self.load_gate.lock();
        {
            let mut state = self.state.lock();
            if *state == LoadState::Ready {
                return Ok(());
            }
            *state = LoadState::Loading;
        }
        let mut staging = HashMap::new();
        match load(&mut staging) {
            Ok(()) => {
                *self.cache.write() = staging;
                *self.state.lock() = LoadState::Ready;
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = LoadState::New;
                Err(err)
            }
        }
    }

    /// Whether a logical transaction is currently open. Adapters that
    /// persist on write defer persistence until the outer commit.
    pub fn in_transaction(&self) -> bool {
        self.tx.lock().depth > 0
    }

    /// Run `persist` behind the write gate.
    pub fn with_persist_gate<R>(
        &self,
        persist: impl FnOnce() -> StorageResult<R>,
    ) -> StorageResult<R> {
        let _gate = self.persist_gate.lock();
        persist()
    }

    // Cache accessors. Readers take the shared lock; the snapshot-based
    // transaction machinery is the only writer that replaces the whole map.

    pub fn cache_get(&self, key: &str) -> Option<V> {
        self.cache.read().get(key).cloned()
    }

    pub fn cache_contains(&self, key: &str) -> bool {
        self.cache.read().contains_key(key)
    }

    pub fn cache_set(&self, key: String, value: V) {
        self.cache.write().insert(key, value);
    }

    pub fn cache_delete(&self, key: &str) -> bool {
        self.cache.write().remove(key).is_some()
    }

    pub fn cache_clear(&self) {
        self.cache.write().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn cache_keys(&self) -> Vec<String> {
        self.cache.read().keys().cloned().collect()
    }

    pub fn cache_snapshot(&self) -> HashMap<String, V> {
        self.cache.read().clone()
    }

    /// Run `f` inside a logical transaction. Each level snapshots the
    /// cache; failure at any depth restores that level's snapshot. The
    /// backend hooks fire only when depth crosses zero, and the depth
    /// counter is restored on every exit path.
    pub fn transaction<R>(
        &self,
        hooks: &dyn TransactionHooks,
        f: impl FnOnce() -> StorageResult<R>,
    ) -> StorageResult<R> {
        let level = {
            let mut tx = self.tx.lock();
            tx.snapshots.push(self.cache.read().clone());
            tx.depth += 1;
            tx.depth
        };
        let enter = if level == 1 { hooks.begin() } else { hooks.savepoint(level) };
        if let Err(err) = enter {
            let mut tx = self.tx.lock();
            tx.snapshots.pop();
            tx.depth -= 1;
            return Err(err);
        }
        match f() {
            Ok(value) => {
                {
                    let mut tx = self.tx.lock();
                    tx.snapshots.pop();
                    tx.depth -= 1;
                }
                if level == 1 {
                    hooks.commit()?;
                } else {
                    hooks.release_savepoint(level)?;
                }
                Ok(value)
            }
            Err(err) => {
                let snapshot = {
                    let mut tx = self.tx.lock();
                    let snapshot = tx.snapshots.pop();
                    tx.depth -= 1;
                    snapshot
                };
                if let Some(snapshot) = snapshot {
                    *self.cache.write() = snapshot;
                }
                // Unwind failure must not mask the original error.
                if level == 1 {
                    let _ = hooks.rollback();
                } else {
                    let _ = hooks.rollback_to_savepoint(level);
                }
                Err(err)
            }
        }
    }

    /// Time `f`, log it when it exceeds the slow threshold, and record it
    /// in the bounded history when monitoring is enabled.
    pub fn time_op<R>(&self, operation: &str, f: impl FnOnce() -> R) -> R {
        if !self.performance.enabled {
            return f();
        }
        let started = Instant::now();
        let out = f();
        let elapsed_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
        if elapsed_ms >= self.performance.slow_threshold_ms {
            debug!(
                operation,
                elapsed_ms,
                threshold_ms = self.performance.slow_threshold_ms,
                "slow storage operation"
            );
        }
        if self.performance.max_history == 0 {
            return out;
        }
        let mut timings = self.timings.lock();
        while timings.len() >= self.performance.max_history {
            timings.pop_front();
        }
        timings.push_back(OperationTiming {
            operation: operation.to_owned(),
            elapsed_ms,
            at: chrono::Utc::now(),
        });
        out
    }

    /// Recorded timings, oldest first. Empty unless monitoring is enabled.
    pub fn performance_stats(&self) -> Vec<OperationTiming> {
        self.timings.lock().iter().cloned().collect()
    }
}

/// Iterator that pulls items from a backend in fixed-size pages, issuing
/// one query per page. Used by the SQL-backed adapters to drive
/// `keys`/`entries` without materializing the whole table.
pub struct Paged<T, F> {
    fetch: F,
    buffer: VecDeque<T>,
    offset: u64,
    page_size: u64,
    done: bool,
    failed: bool,
}

impl<T, F> Paged<T, F>
where
    F: FnMut(u64, u64) -> StorageResult<Vec<T>>,
{
    /// `fetch(offset, limit)` returns one page; a short page ends the scan.
    pub fn new(page_size: u64, fetch: F) -> Self {
        Self {
            fetch,
            buffer: VecDeque::new(),
            offset: 0,
            page_size,
            done: false,
            failed: false,
        }
    }
}

impl<T, F> Iterator for Paged<T, F>
where
    F: FnMut(u64, u64) -> StorageResult<Vec<T>>,
{
    type Item = StorageResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.buffer.is_empty() && !self.done {
            match (self.fetch)(self.offset, self.page_size) {
                Ok(page) => {
                    if (page.len() as u64) < self.page_size {
                        self.done = true;
                    }
                    self.offset += page.len() as u64;
                    self.buffer.extend(page);
                }
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
