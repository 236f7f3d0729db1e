//! Vector-search capability interface.
//!
//! Implemented by the relational backend, where embeddings live alongside
//! rows and the distance metrics are registered as SQL scalar functions.

use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::traits::semantic::{Filter, Row};

/// Distance metric used for similarity search.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    InnerProduct,
}

/// Physical index family requested for a vector column.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VectorIndexKind {
    IvfFlat,
    #[default]
    Hnsw,
}

impl VectorIndexKind {
    /// The alternative kind, used when the requested one is unavailable.
    pub fn fallback(self) -> Self {
        match self {
            VectorIndexKind::IvfFlat => VectorIndexKind::Hnsw,
            VectorIndexKind::Hnsw => VectorIndexKind::IvfFlat,
        }
    }
}

/// Options for a similarity search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorSearchOptions {
    /// Maximum number of rows returned; defaults to 10.
    pub limit: Option<usize>,
    /// Overrides the configured metric for this search.
    pub metric: Option<DistanceMetric>,
    /// Keep only rows whose distance is at most this value.
    pub threshold: Option<f64>,
    /// Parameterized row filters applied before ranking.
    pub filters: Vec<Filter>,
}

/// Vector storage capability.
pub trait VectorStorage: Send + Sync {
    /// Create a vector index of the requested kind on `table.column`,
    /// falling back to the other kind (with a warning) when the requested
    /// one is unavailable. Returns the index name.
    fn create_vector_index(
        &self,
        table: &str,
        column: &str,
        kind: VectorIndexKind,
    ) -> StorageResult<String>;

    /// Rank rows of `table` by distance to `query_vector`. Each returned
    /// row carries a `distance` column.
    fn vector_search(
        &self,
        table: &str,
        query_vector: &[f64],
        options: &VectorSearchOptions,
    ) -> StorageResult<Vec<Row>>;

    /// Insert a row together with its embedding; the embedding length must
    /// match the configured dimensionality.
    fn insert_with_embedding(
        &self,
        table: &str,
        row: Row,
        embedding: &[f64],
    ) -> StorageResult<()>;
}
