//! Deterministic partition hashing for the sharded document backend.
//!
//! Storage keys map to partition identifiers through a djb2 hash over the
//! key's UTF-16 code units, wrapped to 32 bits and reduced modulo the
//! configured partition count. Equal keys always land in the same
//! partition, and the partition index is stable across processes and
//! platforms.

use tracing::warn;

use crate::config::{MAX_PARTITION_COUNT, MIN_PARTITION_COUNT};

/// Maps storage keys into a fixed partition range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionHasher {
    count: u32,
}

impl PartitionHasher {
    /// Create a hasher over `requested` partitions. Out-of-range counts are
    /// clamped into `[10, 1000]` and a warning is emitted.
    pub fn new(requested: u32) -> Self {
        let count = requested.clamp(MIN_PARTITION_COUNT, MAX_PARTITION_COUNT);
        if count != requested {
            warn!(requested, effective = count, "partition count out of range, clamped");
        }
        Self { count }
    }

    /// The effective partition count after clamping.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The partition index of `key`, in `[0, count)`.
    pub fn partition_index(&self, key: &str) -> u32 {
        let mut hash: i32 = 5381;
        for unit in key.encode_utf16() {
            // h = h * 33 + c, wrapped to 32 bits
            hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(i32::from(unit));
        }
        hash.unsigned_abs() % self.count
    }

    /// The partition identifier of `key`, rendered as `partition_<n>`.
    pub fn partition_id(&self, key: &str) -> String {
        format!("partition_{}", self.partition_index(key))
    }
}
