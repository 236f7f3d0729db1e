//! Graph capability interface and the shared graph data model.
//!
//! Every graph-capable backend — the relational engine with its recursive
//! traversal and the native-graph client adapter — speaks the same shapes:
//! [`GraphNode`], [`GraphEdge`], [`GraphPath`], and [`TraversalPattern`].
//! Depth and result-limit governance lives here too, so that both query
//! builders enforce identical bounds.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};
use crate::traits::semantic::QueryEnvelope;
use crate::traits::storage::BatchResult;

/// Default traversal depth when a pattern does not name one.
pub const DEFAULT_MAX_DEPTH: u32 = 10;
/// Absolute cap on traversal depth.
pub const ABSOLUTE_MAX_DEPTH: u32 = 50;
/// Default result limit for `traverse`.
pub const DEFAULT_TRAVERSAL_LIMIT: usize = 100;
/// Default result limit for `find_connected`.
pub const DEFAULT_CONNECTED_LIMIT: usize = 1000;
/// Default result limit for `shortest_path`.
pub const DEFAULT_SHORTEST_PATH_LIMIT: usize = 1;
/// Absolute cap on any graph result limit.
pub const MAX_RESULT_LIMIT: usize = 10_000;

/// Validate a traversal depth: strictly positive and at most
/// [`ABSOLUTE_MAX_DEPTH`].
pub fn validate_depth(depth: u32) -> StorageResult<u32> {
    if depth == 0 || depth > ABSOLUTE_MAX_DEPTH {
        return Err(StorageError::invalid_value(format!(
            "traversal depth {depth} outside [1, {ABSOLUTE_MAX_DEPTH}]"
        )));
    }
    Ok(depth)
}

/// Validate a result limit: strictly positive and at most
/// [`MAX_RESULT_LIMIT`].
pub fn validate_result_limit(limit: usize) -> StorageResult<usize> {
    if limit == 0 || limit > MAX_RESULT_LIMIT {
        return Err(StorageError::invalid_value(format!(
            "result limit {limit} outside [1, {MAX_RESULT_LIMIT}]"
        )));
    }
    Ok(limit)
}

/// Traversal direction, a closed enum. Only these three values ever render
/// into a statement; no user input reaches the direction clause.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

/// A graph node: identified, typed, carrying a property map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }
}

/// A directed edge, unique per `(from, to, type)` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphEdge {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        edge_type: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge_type: edge_type.into(),
            properties: Map::new(),
        }
    }
}

/// An ordered walk: `k + 1` nodes interleaved with `k` edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphPath {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl GraphPath {
    /// Path length in edges.
    pub fn length(&self) -> usize {
        self.edges.len()
    }

    /// The node ids along the walk, in order.
    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }
}

/// Declarative description of a variable-length traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalPattern {
    pub start_node: String,
    #[serde(default)]
    pub direction: Direction,
    pub max_depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_types: Option<Vec<String>>,
    /// Overrides [`DEFAULT_TRAVERSAL_LIMIT`] when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_limit: Option<usize>,
}

impl TraversalPattern {
    pub fn new(start_node: impl Into<String>, direction: Direction, max_depth: u32) -> Self {
        Self {
            start_node: start_node.into(),
            direction,
            max_depth,
            edge_types: None,
            result_limit: None,
        }
    }

    /// Validate bounds, resolving the effective result limit.
    pub fn validated_bounds(&self) -> StorageResult<(u32, usize)> {
        let depth = validate_depth(self.max_depth)?;
        let limit = validate_result_limit(self.result_limit.unwrap_or(DEFAULT_TRAVERSAL_LIMIT))?;
        Ok((depth, limit))
    }
}

/// Structural pattern for `find_by_pattern`: any combination of node type,
/// edge type, and node-property equality constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_limit: Option<usize>,
}

/// A single operation inside `batch_graph_operations`.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOperation {
    AddNode(GraphNode),
    UpdateNode { id: String, properties: Map<String, Value> },
    DeleteNode { id: String },
    AddEdge(GraphEdge),
    DeleteEdge { from: String, to: String, edge_type: String },
}

/// Node/edge counts with per-type breakdowns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: u64,
    pub edge_count: u64,
    pub nodes_by_type: Map<String, Value>,
    pub edges_by_type: Map<String, Value>,
}

/// Graph storage capability.
///
/// Traversal failures in non-debug deployments surface as empty results
/// (logged at debug level); `shortest_path` returns `None` when the target
/// is unreachable; deleting an absent node returns `false` rather than an
/// error.
pub trait GraphStorage: Send + Sync {
    // Node CRUD
    fn add_node(&self, node: GraphNode) -> StorageResult<()>;
    fn get_node(&self, id: &str) -> StorageResult<Option<GraphNode>>;
    fn update_node(&self, id: &str, properties: Map<String, Value>) -> StorageResult<bool>;
    fn delete_node(&self, id: &str) -> StorageResult<bool>;
    /// Nodes matching a type and/or property equality filters.
    fn query_nodes(
        &self,
        node_type: Option<&str>,
        filters: &Map<String, Value>,
    ) -> StorageResult<Vec<GraphNode>>;

    // Edge CRUD
    fn add_edge(&self, edge: GraphEdge) -> StorageResult<()>;
    fn get_edge(&self, from: &str, to: &str, edge_type: &str) -> StorageResult<Option<GraphEdge>>;
    /// Bidirectional adjacency of `node_id`, optionally filtered by type.
    fn get_edges(&self, node_id: &str, edge_types: Option<&[String]>) -> StorageResult<Vec<GraphEdge>>;
    fn update_edge(
        &self,
        from: &str,
        to: &str,
        edge_type: &str,
        properties: Map<String, Value>,
    ) -> StorageResult<bool>;
    fn delete_edge(&self, from: &str, to: &str, edge_type: &str) -> StorageResult<bool>;

    // Traversal
    fn traverse(&self, pattern: &TraversalPattern) -> StorageResult<Vec<GraphPath>>;
    fn find_connected(&self, node_id: &str, depth: u32) -> StorageResult<Vec<GraphNode>>;
    fn shortest_path(
        &self,
        from: &str,
        to: &str,
        max_depth: Option<u32>,
    ) -> StorageResult<Option<GraphPath>>;
    fn find_by_pattern(&self, pattern: &GraphPattern) -> StorageResult<Vec<GraphPath>>;
    /// Structural pattern matching; equivalent to [`Self::find_by_pattern`].
    fn pattern_match(&self, pattern: &GraphPattern) -> StorageResult<Vec<GraphPath>> {
        self.find_by_pattern(pattern)
    }

    // Bulk entry points
    fn batch_graph_operations(&self, operations: Vec<GraphOperation>) -> StorageResult<BatchResult> {
        let mut result = BatchResult::default();
        for op in operations {
            match op {
                GraphOperation::AddNode(node) => result.record(self.add_node(node)),
                GraphOperation::UpdateNode { id, properties } => {
                    result.record(self.update_node(&id, properties));
                }
                GraphOperation::DeleteNode { id } => result.record(self.delete_node(&id)),
                GraphOperation::AddEdge(edge) => result.record(self.add_edge(edge)),
                GraphOperation::DeleteEdge { from, to, edge_type } => {
                    result.record(self.delete_edge(&from, &to, &edge_type));
                }
            }
        }
        Ok(result.finish())
    }

    /// Store an entity node together with its outgoing relationships.
    fn store_entity(&self, node: GraphNode, edges: Vec<GraphEdge>) -> StorageResult<()> {
        self.add_node(node)?;
        for edge in edges {
            self.add_edge(edge)?;
        }
        Ok(())
    }

    /// Append a sequence of episode nodes, linking each to its predecessor
    /// with a `FOLLOWS` edge. Returns the ids in insertion order.
    fn stream_episodes(
        &self,
        node_type: &str,
        episodes: Vec<Map<String, Value>>,
    ) -> StorageResult<Vec<String>>;

    // Indexing and introspection
    fn create_index(&self, node_type: &str, property: &str) -> StorageResult<String>;
    fn list_indexes(&self) -> StorageResult<Vec<String>>;
    fn get_graph_stats(&self) -> StorageResult<GraphStats>;

    /// Execute a raw parameterized statement against the graph engine.
    fn execute_query(&self, query: &str, params: &[Value]) -> QueryEnvelope;

    /// Run `f` inside a logical transaction; on failure the caches and the
    /// backend are restored to the pre-transaction snapshot.
    fn transaction(&self, f: &mut dyn FnMut() -> StorageResult<()>) -> StorageResult<()>;
}
