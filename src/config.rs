//! Unified configuration system for all storage backends.
//!
//! Every backend adapter is configured through a value-typed record built
//! with the builder pattern via `typed-builder`. Unknown options cannot be
//! expressed (the records are closed structs), and invalid combinations are
//! rejected with [`StorageError::InvalidValue`] when the adapter is
//! constructed, never later.
//!
//! # Examples
//!
//! ```
//! use polystore::config::{DocumentConfig, FileConfig};
//!
//! let files = FileConfig::builder()
//!     .path("/data/store.json")
//!     .pretty(true)
//!     .build();
//!
//! let docs = DocumentConfig::builder()
//!     .database("/data/documents")
//!     .partition_count(64)
//!     .build();
//! assert_eq!(docs.container, "documents");
//! ```
//!
//! [`StorageError::InvalidValue`]: crate::error::StorageError

use std::path::PathBuf;

use typed_builder::TypedBuilder;

use crate::error::{StorageError, StorageResult};
use crate::sql::ident;
use crate::traits::vector::{DistanceMetric, VectorIndexKind};

/// Bounds for the configurable partition count of the document backend.
pub const MIN_PARTITION_COUNT: u32 = 10;
pub const MAX_PARTITION_COUNT: u32 = 1000;

/// Performance-monitoring options shared by every adapter.
///
/// When `enabled`, operations slower than `slow_threshold_ms` emit a
/// debug-level `tracing` event, and the adapter keeps a bounded in-memory
/// history of recent operation timings (at most `max_history` entries).
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
#[builder(doc)]
pub struct PerformanceMonitoring {
    /// Master switch for timing capture and slow-operation logging.
    #[builder(default = false)]
    pub enabled: bool,

    /// Operations slower than this many milliseconds are logged.
    #[builder(default = 100)]
    pub slow_threshold_ms: u64,

    /// Maximum number of retained timing samples.
    #[builder(default = 100)]
    pub max_history: usize,
}

impl Default for PerformanceMonitoring {
    fn default() -> Self {
        Self {
            enabled: false,
            slow_threshold_ms: 100,
            max_history: 100,
        }
    }
}

/// Consistency level requested from the document backend.
///
/// A single-node embedded engine satisfies every level trivially; the value
/// is validated and recorded so deployments can express intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ConsistencyLevel {
    Strong,
    BoundedStaleness,
    #[default]
    Session,
    Eventual,
}

/// Configuration for the JSON-file adapter.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct FileConfig {
    /// Path of the snapshot file.
    #[builder(setter(into))]
    pub path: PathBuf,

    /// When false, writes stay in memory until `save()` is called.
    #[builder(default = true)]
    pub auto_save: bool,

    /// Pretty-print the snapshot for human inspection.
    #[builder(default = false)]
    pub pretty: bool,

    /// Create parent directories on first persist.
    #[builder(default = true)]
    pub auto_create: bool,

    #[builder(default)]
    pub performance: PerformanceMonitoring,
}

/// Configuration for the in-memory adapter.
#[derive(Debug, Clone, Default, TypedBuilder)]
#[builder(doc)]
pub struct MemoryConfig {
    /// Initial capacity hint for the underlying map.
    #[builder(default = 0)]
    pub initial_capacity: usize,

    #[builder(default)]
    pub performance: PerformanceMonitoring,
}

/// Configuration for the sled-backed document store.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct DocumentConfig {
    /// Directory of the sled database.
    #[builder(setter(into))]
    pub database: PathBuf,

    /// Logical container name, prefixed onto partition tree names.
    #[builder(default = String::from("documents"), setter(into))]
    pub container: String,

    /// Document field recorded as the partition key (informational; the
    /// physical partition is always derived from the storage key).
    #[builder(default, setter(strip_option, into))]
    pub partition_key: Option<String>,

    /// Number of partitions; clamped into `[10, 1000]` with a warning.
    #[builder(default = MIN_PARTITION_COUNT)]
    pub partition_count: u32,

    #[builder(default)]
    pub consistency_level: ConsistencyLevel,

    /// When false, `save()` must be called to flush to disk.
    #[builder(default = true)]
    pub auto_save: bool,

    #[builder(default)]
    pub performance: PerformanceMonitoring,
}

impl DocumentConfig {
    pub(crate) fn validate(&self) -> StorageResult<()> {
        ident::validate(&self.container)?;
        Ok(())
    }
}

/// Configuration for the duckdb-backed columnar store.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct ColumnarConfig {
    /// Path of the database file.
    #[builder(setter(into))]
    pub database: PathBuf,

    /// Primary key-value table name.
    #[builder(default = String::from("kv_store"), setter(into))]
    pub table: String,

    /// Worker threads for the engine (`PRAGMA threads`).
    #[builder(default, setter(strip_option))]
    pub threads: Option<u32>,

    /// Engine memory limit in bytes (`PRAGMA memory_limit`).
    #[builder(default, setter(strip_option))]
    pub buffer_pool_bytes: Option<u64>,

    /// Gate for parquet export/import; disabled calls fail with
    /// `InvalidValue`.
    #[builder(default = false)]
    pub enable_columnar_export: bool,

    /// Create the database file and schema on first use.
    #[builder(default = true)]
    pub auto_create: bool,

    #[builder(default = false)]
    pub read_only: bool,

    #[builder(default)]
    pub performance: PerformanceMonitoring,
}

impl ColumnarConfig {
    pub(crate) fn validate(&self) -> StorageResult<()> {
        ident::validate(&self.table)?;
        Ok(())
    }
}

/// Vector-index tuning for the relational backend.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct VectorConfig {
    #[builder(default)]
    pub distance_metric: DistanceMetric,

    /// Expected embedding dimensionality; inserts with a different length
    /// fail with `InvalidValue`.
    #[builder(default = 384)]
    pub vector_dimensions: usize,

    #[builder(default)]
    pub index_type: VectorIndexKind,

    #[builder(default = 100)]
    pub ivf_lists: u32,

    #[builder(default = 10)]
    pub ivf_probes: u32,

    #[builder(default = 16)]
    pub hnsw_m: u32,

    #[builder(default = 64)]
    pub hnsw_ef_construction: u32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Configuration for the rusqlite-backed relational store.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct RelationalConfig {
    /// Path of the database file.
    #[builder(setter(into))]
    pub database: PathBuf,

    #[builder(default = String::from("nodes"), setter(into))]
    pub nodes_table: String,

    #[builder(default = String::from("edges"), setter(into))]
    pub edges_table: String,

    #[builder(default = String::from("kv_data"), setter(into))]
    pub data_table: String,

    /// Busy timeout applied to every connection.
    #[builder(default, setter(strip_option))]
    pub timeout_ms: Option<u64>,

    #[builder(default = true)]
    pub auto_create: bool,

    #[builder(default = false)]
    pub read_only: bool,

    #[builder(default)]
    pub vector: VectorConfig,

    #[builder(default)]
    pub performance: PerformanceMonitoring,
}

impl RelationalConfig {
    pub(crate) fn validate(&self) -> StorageResult<()> {
        for name in [&self.nodes_table, &self.edges_table, &self.data_table] {
            ident::validate(name)?;
        }
        if self.nodes_table == self.edges_table
            || self.nodes_table == self.data_table
            || self.edges_table == self.data_table
        {
            return Err(StorageError::invalid_value(
                "nodes_table, edges_table and data_table must be distinct",
            ));
        }
        Ok(())
    }
}

/// Configuration for the native-graph client adapter.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(doc)]
pub struct GraphClientConfig {
    /// Endpoint or address of the graph engine.
    #[builder(setter(into))]
    pub database: String,

    #[builder(default)]
    pub performance: PerformanceMonitoring,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_config_defaults() {
        let config = FileConfig::builder().path("/tmp/store.json").build();
        assert!(config.auto_save);
        assert!(!config.pretty);
        assert!(config.auto_create);
    }

    #[test]
    fn document_config_rejects_bad_container() {
        let config = DocumentConfig::builder()
            .database("/tmp/docs")
            .container("users; DROP TABLE x")
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn relational_config_requires_distinct_tables() {
        let config = RelationalConfig::builder()
            .database("/tmp/rel.db")
            .nodes_table("shared")
            .edges_table("shared")
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn performance_defaults() {
        let perf = PerformanceMonitoring::default();
        assert!(!perf.enabled);
        assert_eq!(perf.slow_threshold_ms, 100);
        assert_eq!(perf.max_history, 100);
    }
}
