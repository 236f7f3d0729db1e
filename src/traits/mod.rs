//! Capability interfaces composed by the backend adapters.
//!
//! Each trait describes one slice of behavior; a backend implements the
//! subset it supports. Unsupported semantic operations answer
//! `NotImplemented` through their default bodies rather than failing at
//! compile time.

pub mod graph;
pub mod semantic;
pub mod storage;
pub mod vector;

pub use graph::{
    Direction, GraphEdge, GraphNode, GraphOperation, GraphPath, GraphPattern, GraphStats,
    GraphStorage, TraversalPattern,
};
pub use semantic::{
    AggregateOp, Aggregation, ColumnDef, ColumnType, ExportSource, Filter, FilterOperator,
    OrderBy, QueryEnvelope, QueryMetadata, Row, SemanticQuery, SemanticStorage,
};
pub use storage::{BatchResult, BatchStorage, Operation, SaveableStorage, Storage, StorageIter};
pub use vector::{DistanceMetric, VectorIndexKind, VectorSearchOptions, VectorStorage};
