//! Partitioning behavior of the document backend: determinism, range
//! bounds, and the out-of-range clamping scenario.

#![cfg(feature = "document")]

mod common;

use polystore::prelude::*;
use serde_json::json;
use tempfile::TempDir;

/// Scenario: a partition count below the minimum clamps to 10 and the
/// partition identifier renders as `partition_<n>` with `n` in range.
#[test]
fn partition_count_clamps_to_minimum() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::new(
        DocumentConfig::builder()
            .database(dir.path().join("clamped"))
            .partition_count(5)
            .build(),
    )
    .unwrap();
    assert_eq!(store.partition_count(), 10);

    let partition = store.partition_for("x");
    let n: u32 = partition.strip_prefix("partition_").unwrap().parse().unwrap();
    assert!(n < 10);
}

#[test]
fn partitioning_is_a_pure_function() {
    let dir = TempDir::new().unwrap();
    let store = common::document_store(&dir);
    for key in ["a", "user:42", "O'Reilly", "\u{1F680}"] {
        assert_eq!(store.partition_for(key), store.partition_for(key));
    }
    let hasher = PartitionHasher::new(store.partition_count());
    assert_eq!(store.partition_for("a"), hasher.partition_id("a"));
}

#[test]
fn lookups_only_touch_the_owning_partition() {
    let dir = TempDir::new().unwrap();
    let store = common::document_store(&dir);
    for i in 0..40 {
        store.set(&format!("doc_{i}"), json!({"i": i})).unwrap();
    }
    // Every key remains reachable and counts once.
    assert_eq!(store.size().unwrap(), 40);
    for i in 0..40 {
        assert_eq!(store.get(&format!("doc_{i}")).unwrap(), Some(json!({"i": i})));
    }
}

#[test]
fn save_flushes_manual_mode() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::new(
        DocumentConfig::builder()
            .database(dir.path().join("manual"))
            .auto_save(false)
            .build(),
    )
    .unwrap();
    store.set("k", json!(1)).unwrap();
    store.save().unwrap();
    assert_eq!(store.get("k").unwrap(), Some(json!(1)));
}

#[test]
fn consistency_level_is_recorded() {
    let dir = TempDir::new().unwrap();
    let store = DocumentStore::new(
        DocumentConfig::builder()
            .database(dir.path().join("session"))
            .consistency_level(ConsistencyLevel::Eventual)
            .build(),
    )
    .unwrap();
    assert_eq!(store.consistency_level(), ConsistencyLevel::Eventual);
}
