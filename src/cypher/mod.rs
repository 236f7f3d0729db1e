//! Parameterized graph-statement construction for the native-graph
//! backend.
//!
//! Statements are Cypher-dialect text plus a named parameter map. The
//! safety rule mirrors the SQL side: node ids, edge types, and property
//! payloads always bind as parameters; the only literals spliced into the
//! text are integer depth/limit bounds that passed validation and the
//! direction clause, which is chosen from a closed enum. Node and edge
//! kinds travel as `type` properties rather than labels precisely so that
//! they can stay parameterized.

use serde_json::{Map, Value, json};

use crate::error::StorageResult;
use crate::traits::graph::{
    Direction, DEFAULT_CONNECTED_LIMIT, DEFAULT_SHORTEST_PATH_LIMIT, DEFAULT_TRAVERSAL_LIMIT,
    validate_depth, validate_result_limit,
};

/// A graph statement plus its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherStatement {
    pub text: String,
    pub params: Map<String, Value>,
}

impl CypherStatement {
    /// A statement with no parameters yet.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), params: Map::new() }
    }

    /// Bind one named parameter.
    pub fn bind(mut self, name: &str, value: Value) -> Self {
        self.params.insert(name.to_owned(), value);
        self
    }
}

/// Render a variable-length relationship pattern for `direction` with a
/// validated literal depth bound.
fn relationship_pattern(direction: Direction, max_depth: u32) -> String {
    match direction {
        Direction::Outgoing => format!("-[rels*1..{max_depth}]->"),
        Direction::Incoming => format!("<-[rels*1..{max_depth}]-"),
        Direction::Both => format!("-[rels*1..{max_depth}]-"),
    }
}

/// Optional edge-type restriction over every relationship of the path.
fn edge_type_clause(edge_types: Option<&[String]>) -> (&'static str, Option<Value>) {
    match edge_types {
        Some(types) if !types.is_empty() => (
            " AND ALL(rel IN rels WHERE rel.type IN $edge_types)",
            Some(json!(types)),
        ),
        _ => ("", None),
    }
}

/// Upsert a node by id, recording its type and data as properties, and
/// maintain the auxiliary storage-key → entity-id mapping.
pub fn store_node(key: &str, id: &str, node_type: &str, data: &Value) -> CypherStatement {
    CypherStatement::new(
        "MERGE (n {id: $id}) \
         SET n.type = $type, n.data = $data \
         MERGE (k {storage_key: $key}) \
         SET k.entity_id = $id",
    )
    .bind("id", json!(id))
    .bind("type", json!(node_type))
    .bind("data", data.clone())
    .bind("key", json!(key))
}

/// Detach-delete a node by id.
pub fn delete_node(id: &str) -> CypherStatement {
    CypherStatement::new("MATCH (n {id: $id}) DETACH DELETE n").bind("id", json!(id))
}

/// Create an edge between two existing nodes; a missing endpoint makes the
/// statement match nothing.
pub fn create_edge(from: &str, to: &str, edge_type: &str, data: &Value) -> CypherStatement {
    CypherStatement::new(
        "MATCH (a {id: $from}) \
         MATCH (b {id: $to}) \
         CREATE (a)-[r:RELATES]->(b) \
         SET r.type = $type, r.data = $data",
    )
    .bind("from", json!(from))
    .bind("to", json!(to))
    .bind("type", json!(edge_type))
    .bind("data", data.clone())
}

/// Bidirectional adjacency of a node, optionally restricted by edge type.
pub fn get_edges(node_id: &str, edge_types: Option<&[String]>) -> CypherStatement {
    let (text, types_param) = match edge_types {
        Some(types) if !types.is_empty() => (
            "MATCH (n {id: $id})-[r]-(m) \
             WHERE r.type IN $edge_types \
             RETURN r, startNode(r).id AS from, endNode(r).id AS to",
            Some(json!(types)),
        ),
        _ => (
            "MATCH (n {id: $id})-[r]-(m) \
             RETURN r, startNode(r).id AS from, endNode(r).id AS to",
            None,
        ),
    };
    let mut statement = CypherStatement::new(text).bind("id", json!(node_id));
    if let Some(types) = types_param {
        statement = statement.bind("edge_types", types);
    }
    statement
}

/// Variable-length traversal from a start node.
///
/// # Errors
///
/// `InvalidValue` when the depth is outside `[1, 50]` or the limit is
/// outside `[1, 10000]`.
pub fn traversal(
    start: &str,
    direction: Direction,
    max_depth: u32,
    edge_types: Option<&[String]>,
    result_limit: Option<usize>,
) -> StorageResult<CypherStatement> {
    let depth = validate_depth(max_depth)?;
    let limit = validate_result_limit(result_limit.unwrap_or(DEFAULT_TRAVERSAL_LIMIT))?;
    let pattern = relationship_pattern(direction, depth);
    let (type_clause, types_param) = edge_type_clause(edge_types);
    let text = format!(
        "MATCH p = (start {{id: $start}}){pattern}(finish) \
         WHERE finish.id <> $start{type_clause} \
         RETURN p, length(p) AS path_length \
         ORDER BY path_length \
         LIMIT {limit}"
    );
    let mut statement = CypherStatement::new(text).bind("start", json!(start));
    if let Some(types) = types_param {
        statement = statement.bind("edge_types", types);
    }
    Ok(statement)
}

/// Every node connected to `node` within `depth` hops, in any direction,
/// excluding the start node itself.
pub fn connected(
    node: &str,
    depth: u32,
    result_limit: Option<usize>,
) -> StorageResult<CypherStatement> {
    let depth = validate_depth(depth)?;
    let limit = validate_result_limit(result_limit.unwrap_or(DEFAULT_CONNECTED_LIMIT))?;
    let text = format!(
        "MATCH (start {{id: $start}})-[*1..{depth}]-(other) \
         WHERE other.id <> $start \
         RETURN DISTINCT other \
         LIMIT {limit}"
    );
    Ok(CypherStatement::new(text).bind("start", json!(node)))
}

/// Shortest path between two nodes with a bounded search depth.
pub fn shortest_path(
    from: &str,
    to: &str,
    max_depth: u32,
    result_limit: Option<usize>,
) -> StorageResult<CypherStatement> {
    let depth = validate_depth(max_depth)?;
    let limit = validate_result_limit(result_limit.unwrap_or(DEFAULT_SHORTEST_PATH_LIMIT))?;
    let text = format!(
        "MATCH p = shortestPath((a {{id: $from}})-[*1..{depth}]-(b {{id: $to}})) \
         RETURN p, length(p) AS path_length \
         ORDER BY path_length \
         LIMIT {limit}"
    );
    Ok(CypherStatement::new(text)
        .bind("from", json!(from))
        .bind("to", json!(to)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_node_binds_everything() {
        let statement = store_node("key:1", "n1", "Person", &json!({"name": "Ada"}));
        assert_eq!(statement.params["id"], json!("n1"));
        assert_eq!(statement.params["type"], json!("Person"));
        assert_eq!(statement.params["key"], json!("key:1"));
        // Values never appear in the text.
        assert!(!statement.text.contains("Ada"));
        assert!(!statement.text.contains("n1"));
    }

    #[test]
    fn direction_renders_fixed_patterns() {
        assert_eq!(relationship_pattern(Direction::Outgoing, 3), "-[rels*1..3]->");
        assert_eq!(relationship_pattern(Direction::Incoming, 3), "<-[rels*1..3]-");
        assert_eq!(relationship_pattern(Direction::Both, 3), "-[rels*1..3]-");
    }

    #[test]
    fn traversal_embeds_only_validated_bounds() {
        let statement = traversal(
            "a'); MATCH (m) DETACH DELETE m; //",
            Direction::Outgoing,
            2,
            Some(&["CONNECTS".to_owned()]),
            None,
        )
        .unwrap();
        assert!(statement.text.contains("*1..2"));
        assert!(statement.text.contains("LIMIT 100"));
        // Hostile start id stays in the parameter map.
        assert!(!statement.text.contains("DETACH DELETE m"));
        assert_eq!(statement.params["edge_types"], json!(["CONNECTS"]));
    }

    #[test]
    fn traversal_rejects_bad_bounds() {
        assert!(traversal("a", Direction::Both, 0, None, None).is_err());
        assert!(traversal("a", Direction::Both, 51, None, None).is_err());
        assert!(traversal("a", Direction::Both, 2, None, Some(0)).is_err());
        assert!(traversal("a", Direction::Both, 2, None, Some(10_001)).is_err());
    }

    #[test]
    fn connected_uses_bidirectional_pattern_and_default_limit() {
        let statement = connected("x", 4, None).unwrap();
        assert!(statement.text.contains("-[*1..4]-"));
        assert!(statement.text.contains("LIMIT 1000"));
        assert!(statement.text.contains("DISTINCT"));
    }

    #[test]
    fn shortest_path_defaults_to_one_result() {
        let statement = shortest_path("a", "b", 10, None).unwrap();
        assert!(statement.text.contains("shortestPath"));
        assert!(statement.text.ends_with("LIMIT 1"));
        assert_eq!(statement.params["from"], json!("a"));
        assert_eq!(statement.params["to"], json!("b"));
    }

    #[test]
    fn get_edges_without_types_has_no_filter() {
        let statement = get_edges("n", None);
        assert!(!statement.text.contains("edge_types"));
        let statement = get_edges("n", Some(&["KNOWS".to_owned()]));
        assert!(statement.text.contains("r.type IN $edge_types"));
    }
}
