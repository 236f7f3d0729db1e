// Common test utilities and helpers

#![allow(dead_code)]

use polystore::prelude::*;
use serde_json::json;
use tempfile::TempDir;

/// Opt-in log output for debugging test runs (`RUST_LOG=debug`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A relational store in its own scratch directory.
#[cfg(feature = "relational")]
pub fn relational_store(dir: &TempDir) -> RelationalStore {
    init_tracing();
    RelationalStore::new(
        RelationalConfig::builder()
            .database(dir.path().join("relational.db"))
            .build(),
    )
    .expect("relational store should open")
}

/// A columnar store in its own scratch directory.
#[cfg(feature = "columnar")]
pub fn columnar_store(dir: &TempDir) -> ColumnarStore {
    ColumnarStore::new(
        ColumnarConfig::builder()
            .database(dir.path().join("columnar.db"))
            .build(),
    )
    .expect("columnar store should open")
}

/// A columnar store with parquet I/O enabled.
#[cfg(feature = "columnar")]
pub fn columnar_store_with_export(dir: &TempDir) -> ColumnarStore {
    ColumnarStore::new(
        ColumnarConfig::builder()
            .database(dir.path().join("columnar.db"))
            .enable_columnar_export(true)
            .build(),
    )
    .expect("columnar store should open")
}

/// A document store in its own scratch directory.
#[cfg(feature = "document")]
pub fn document_store(dir: &TempDir) -> DocumentStore {
    DocumentStore::new(
        DocumentConfig::builder()
            .database(dir.path().join("docs"))
            .build(),
    )
    .expect("document store should open")
}

/// Seed the canonical test graph:
///
/// ```text
///   A --CONNECTS--> B --CONNECTS--> C
///   A --CONNECTS--> D --CONNECTS--> C
/// ```
#[cfg(feature = "relational")]
pub fn seed_diamond_graph(store: &RelationalStore) {
    for id in ["A", "B", "C", "D"] {
        store
            .add_node(GraphNode::new(id, "Station").with_property("label", json!(id)))
            .unwrap();
    }
    for (from, to) in [("A", "B"), ("B", "C"), ("A", "D"), ("D", "C")] {
        store.add_edge(GraphEdge::new(from, to, "CONNECTS")).unwrap();
    }
}
