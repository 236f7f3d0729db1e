//! One-stop imports for the common surface of the crate.

pub use crate::config::{
    ColumnarConfig, ConsistencyLevel, DocumentConfig, FileConfig, GraphClientConfig,
    MemoryConfig, PerformanceMonitoring, RelationalConfig, VectorConfig,
};
pub use crate::databases::{FileStore, GraphClient, GraphClientStore, MemoryStore};
pub use crate::error::{ErrorKind, StorageError, StorageResult};
pub use crate::partition::PartitionHasher;
pub use crate::traits::{
    AggregateOp, Aggregation, BatchResult, BatchStorage, ColumnDef, ColumnType, Direction,
    DistanceMetric, ExportSource, Filter, FilterOperator, GraphEdge, GraphNode, GraphOperation,
    GraphPath, GraphPattern, GraphStats, GraphStorage, Operation, OrderBy, QueryEnvelope,
    QueryMetadata, Row, SaveableStorage, SemanticQuery, SemanticStorage, Storage,
    TraversalPattern, VectorIndexKind, VectorSearchOptions, VectorStorage,
};

#[cfg(feature = "columnar")]
pub use crate::databases::ColumnarStore;
#[cfg(feature = "document")]
pub use crate::databases::{Document, DocumentStore};
#[cfg(feature = "relational")]
pub use crate::databases::RelationalStore;
