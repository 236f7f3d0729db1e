//! Universal key-value invariants, exercised against every backend that
//! implements the storage capability:
//!
//! 1. Round-trip: `set` then `get` yields the stored value.
//! 2. Delete semantics: `delete` is observable and idempotent-by-result.
//! 3. Size tracks the number of distinct surviving keys.
//! 4. Batch operations are observationally equivalent to their loops.
//! 5. Identifier safety: hostile quote/comment payloads round-trip
//!    unchanged with no side effects on other rows.

mod common;

use polystore::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

/// The hostile payloads of the identifier-safety invariant.
fn hostile_strings() -> Vec<&'static str> {
    vec!["O'Reilly", "x\"; DROP TABLE users; --", "a/*comment*/b", "semi;colon"]
}

fn exercise_round_trip<S: BatchStorage>(store: &S) {
    let value = json!({"name": "first", "tags": [1, 2, 3], "nested": {"ok": true}});
    store.set("alpha", value.clone()).unwrap();
    assert_eq!(store.get("alpha").unwrap(), Some(value));

    // Updates rewrite the value.
    store.set("alpha", json!({"name": "second"})).unwrap();
    assert_eq!(store.get("alpha").unwrap(), Some(json!({"name": "second"})));

    assert_eq!(store.get("never-written").unwrap(), None);
}

fn exercise_delete_semantics<S: BatchStorage>(store: &S) {
    store.set("doomed", json!(1)).unwrap();
    assert!(store.has("doomed").unwrap());
    assert!(store.delete("doomed").unwrap());
    assert!(!store.has("doomed").unwrap());
    // A second delete reports absence.
    assert!(!store.delete("doomed").unwrap());
}

fn exercise_size<S: BatchStorage>(store: &S) {
    store.clear().unwrap();
    assert_eq!(store.size().unwrap(), 0);
    for i in 0..10 {
        store.set(&format!("size_{i}"), json!(i)).unwrap();
    }
    // Overwrites do not create keys.
    store.set("size_3", json!("updated")).unwrap();
    assert_eq!(store.size().unwrap(), 10);
    store.delete("size_0").unwrap();
    store.delete("size_1").unwrap();
    assert_eq!(store.size().unwrap(), 8);
}

fn exercise_batch_equivalence<S: BatchStorage>(store: &S) {
    store.clear().unwrap();
    let entries: Vec<(String, Value)> =
        (0..8).map(|i| (format!("bulk_{i}"), json!({"i": i}))).collect();
    store.set_many(entries.clone()).unwrap();
    for (key, value) in &entries {
        assert_eq!(store.get(key).unwrap().as_ref(), Some(value));
    }

    let fetched = store
        .get_many(&entries.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>())
        .unwrap();
    assert_eq!(fetched.len(), entries.len());

    let deleted = store
        .delete_many(&["bulk_0".to_owned(), "bulk_1".to_owned(), "missing".to_owned()])
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(store.size().unwrap(), 6);

    let result = store
        .batch(vec![
            Operation::Set { key: "batch_a".into(), value: json!(1) },
            Operation::Delete { key: "bulk_2".into() },
            Operation::Delete { key: "missing".into() },
        ])
        .unwrap();
    assert!(result.success);
    assert_eq!(result.operations, 3);
    assert!(store.has("batch_a").unwrap());
    assert!(!store.has("bulk_2").unwrap());
}

fn exercise_identifier_safety<S: BatchStorage>(store: &S) {
    store.clear().unwrap();
    store.set("innocent", json!("untouched")).unwrap();
    for hostile in hostile_strings() {
        let value = json!({"payload": hostile});
        store.set(hostile, value.clone()).unwrap();
        assert_eq!(store.get(hostile).unwrap(), Some(value), "{hostile}");
        assert!(store.delete(hostile).unwrap());
    }
    // No side effects on other rows.
    assert_eq!(store.get("innocent").unwrap(), Some(json!("untouched")));
    assert_eq!(store.size().unwrap(), 1);
}

fn exercise_iteration<S: BatchStorage>(store: &S) {
    store.clear().unwrap();
    for i in 0..5 {
        store.set(&format!("iter_{i}"), json!(i)).unwrap();
    }
    let mut keys: Vec<String> = store.keys().unwrap().map(Result::unwrap).collect();
    keys.sort();
    assert_eq!(keys, ["iter_0", "iter_1", "iter_2", "iter_3", "iter_4"]);

    let mut entries: Vec<(String, Value)> =
        store.entries().unwrap().map(Result::unwrap).collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(entries[0], ("iter_0".to_owned(), json!(0)));
    assert_eq!(store.values().unwrap().count(), 5);
}

fn exercise_all<S: BatchStorage>(store: &S) {
    exercise_round_trip(store);
    exercise_delete_semantics(store);
    exercise_size(store);
    exercise_batch_equivalence(store);
    exercise_identifier_safety(store);
    exercise_iteration(store);
}

#[test]
fn memory_store_invariants() {
    let store: MemoryStore = MemoryStore::default();
    exercise_all(&store);
}

#[test]
fn file_store_invariants() {
    let dir = TempDir::new().unwrap();
    let store: FileStore = FileStore::new(
        FileConfig::builder().path(dir.path().join("kv.json")).build(),
    );
    exercise_all(&store);
}

#[cfg(feature = "document")]
#[test]
fn document_store_invariants() {
    let dir = TempDir::new().unwrap();
    let store = common::document_store(&dir);
    exercise_all(&store);
}

#[cfg(feature = "relational")]
#[test]
fn relational_store_invariants() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    exercise_all(&store);
}

#[cfg(feature = "columnar")]
#[test]
fn columnar_store_invariants() {
    let dir = TempDir::new().unwrap();
    let store = common::columnar_store(&dir);
    exercise_all(&store);
}

/// Scenario: a key with a SQL-quote payload round-trips exactly and the
/// introspection count matches the pre-state.
#[cfg(feature = "relational")]
#[test]
fn quote_payload_scenario() {
    let dir = TempDir::new().unwrap();
    let store = common::relational_store(&dir);
    let value = json!({"name": "O'Reilly; DROP TABLE users;"});
    store.set("O'Reilly", value.clone()).unwrap();
    assert_eq!(store.get("O'Reilly").unwrap(), Some(value));
    assert_eq!(store.size().unwrap(), 1);

    // The data table still exists and holds exactly one row.
    let envelope = store.execute_sql("SELECT COUNT(*) AS n FROM kv_data", &[]);
    assert!(envelope.is_ok(), "{:?}", envelope.errors);
    assert_eq!(envelope.data[0]["n"], json!(1));
}

/// Round-trip holds for arbitrary generated keys and values.
#[test]
fn randomized_round_trip() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let store: MemoryStore = MemoryStore::default();
    let mut expected = std::collections::HashMap::new();
    for _ in 0..200 {
        let len = rng.gen_range(1..24);
        let key: String = (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
        let value = json!({
            "n": rng.gen_range(-1_000_000i64..1_000_000),
            "f": rng.gen_range(-1.0f64..1.0),
            "flag": rng.gen_bool(0.5),
        });
        store.set(&key, value.clone()).unwrap();
        expected.insert(key, value);
    }
    assert_eq!(store.size().unwrap(), expected.len());
    for (key, value) in &expected {
        assert_eq!(store.get(key).unwrap().as_ref(), Some(value));
    }
}

/// Empty keys are rejected up front on every backend.
#[test]
fn empty_keys_rejected_everywhere() {
    let store: MemoryStore = MemoryStore::default();
    assert_eq!(store.set("", json!(1)).unwrap_err().kind(), ErrorKind::InvalidValue);

    let dir = TempDir::new().unwrap();
    let file: FileStore = FileStore::new(
        FileConfig::builder().path(dir.path().join("kv.json")).build(),
    );
    assert_eq!(file.get("").unwrap_err().kind(), ErrorKind::InvalidValue);
}
