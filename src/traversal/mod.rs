//! Recursive-CTE graph traversal over the relational backend.
//!
//! Traversal, shortest path, and connected-within-depth are expressed as
//! recursive set unions: the base relation is the start node, and the step
//! relation joins the current frontier to its neighbors through the edge
//! table, carrying a JSON path-node accumulator (and, for traversal, a
//! path-edge accumulator) that provides both cycle avoidance and result
//! assembly. Depth bounds and result caps are validated integers embedded
//! literally; every id binds as a parameter.
//!
//! Result assembly eliminates the N+1 pattern: after the recursive query
//! returns paths as arrays of node ids, the union of ids across all paths
//! is fetched with a single `IN`-list query, and shortest-path edges with
//! a single OR-list query over the consecutive pairs. Paths are then built
//! by map lookup.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::sql::ident;
use crate::sql::types::SqlParam;
use crate::sql::SqlStatement;
use crate::traits::graph::{
    Direction, GraphEdge, GraphNode, GraphPath, TraversalPattern,
    DEFAULT_CONNECTED_LIMIT, DEFAULT_SHORTEST_PATH_LIMIT,
    validate_depth, validate_result_limit,
};

/// One row produced by a recursive walk: the JSON accumulators plus the
/// depth at which the row was emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkRow {
    pub path_nodes: String,
    pub path_edges: Option<String>,
    pub depth: i64,
}

/// Join condition and neighbor expression for each direction. These are
/// the only direction-dependent fragments, and they come from a closed
/// enum — never from input.
fn step_expressions(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Outgoing => ("e.from_id = w.node_id", "e.to_id"),
        Direction::Incoming => ("e.to_id = w.node_id", "e.from_id"),
        Direction::Both => (
            "(e.from_id = w.node_id OR e.to_id = w.node_id)",
            "CASE WHEN e.from_id = w.node_id THEN e.to_id ELSE e.from_id END",
        ),
    }
}

fn edge_type_filter(edge_types: Option<&[String]>) -> (String, Vec<SqlParam>) {
    match edge_types {
        Some(types) if !types.is_empty() => {
            let placeholders = vec!["?"; types.len()].join(", ");
            (
                format!(" AND e.edge_type IN ({placeholders})"),
                types.iter().map(|t| SqlParam::Text(t.clone())).collect(),
            )
        }
        _ => (String::new(), Vec::new()),
    }
}

/// Statement factory for the recursive traversal queries, keyed to
/// validated node and edge table names.
#[derive(Debug, Clone)]
pub struct TraversalEngine {
    nodes_table: String,
    edges_table: String,
}

impl TraversalEngine {
    pub fn new(nodes_table: &str, edges_table: &str) -> StorageResult<Self> {
        ident::validate(nodes_table)?;
        ident::validate(edges_table)?;
        Ok(Self {
            nodes_table: nodes_table.to_owned(),
            edges_table: edges_table.to_owned(),
        })
    }

    /// The variable-length traversal query. Returns one row per distinct
    /// path, ordered by depth, capped at the pattern's result limit.
    pub fn traverse_sql(&self, pattern: &TraversalPattern) -> StorageResult<SqlStatement> {
        let (max_depth, limit) = pattern.validated_bounds()?;
        let (join, next) = step_expressions(pattern.direction);
        let (type_filter, type_params) = edge_type_filter(pattern.edge_types.as_deref());
        let sql = format!(
            "WITH RECURSIVE walk(node_id, depth, path_nodes, path_edges) AS ( \
               SELECT id, 0, json_array(id), json_array() \
                 FROM {nodes} WHERE id = ?1 \
               UNION ALL \
               SELECT {next}, w.depth + 1, \
                      json_insert(w.path_nodes, '$[#]', {next}), \
                      json_insert(w.path_edges, '$[#]', json_object( \
                        'from', e.from_id, 'to', e.to_id, \
                        'type', e.edge_type, 'properties', json(e.properties))) \
                 FROM walk w \
                 JOIN {edges} e ON {join} \
                WHERE w.depth < {max_depth} \
                  AND NOT EXISTS (SELECT 1 FROM json_each(w.path_nodes) visited \
                                   WHERE visited.value = {next}){type_filter} \
             ) \
             SELECT DISTINCT path_nodes, path_edges, depth \
               FROM walk \
              WHERE depth > 0 \
              ORDER BY depth, path_nodes \
              LIMIT {limit}",
            nodes = self.nodes_table,
            edges = self.edges_table,
        );
        let mut params = vec![SqlParam::Text(pattern.start_node.clone())];
        params.extend(type_params);
        Ok(SqlStatement::new(sql, params))
    }

    /// The connected-within-depth query: distinct node ids reachable in at
    /// most `depth` bidirectional hops, excluding the start node.
    pub fn connected_sql(
        &self,
        start: &str,
        depth: u32,
        result_limit: Option<usize>,
    ) -> StorageResult<SqlStatement> {
        let depth = validate_depth(depth)?;
        let limit = validate_result_limit(result_limit.unwrap_or(DEFAULT_CONNECTED_LIMIT))?;
        let (join, next) = step_expressions(Direction::Both);
        let sql = format!(
            "WITH RECURSIVE reach(node_id, depth, path_nodes) AS ( \
               SELECT id, 0, json_array(id) \
                 FROM {nodes} WHERE id = ?1 \
               UNION ALL \
               SELECT {next}, w.depth + 1, \
                      json_insert(w.path_nodes, '$[#]', {next}) \
                 FROM reach w \
                 JOIN {edges} e ON {join} \
                WHERE w.depth < {depth} \
                  AND NOT EXISTS (SELECT 1 FROM json_each(w.path_nodes) visited \
                                   WHERE visited.value = {next}) \
             ) \
             SELECT DISTINCT node_id \
               FROM reach \
              WHERE node_id <> ?1 \
              LIMIT {limit}",
            nodes = self.nodes_table,
            edges = self.edges_table,
        );
        Ok(SqlStatement::new(sql, vec![SqlParam::Text(start.to_owned())]))
    }

    /// The shortest-path query: the same recursive construction restricted
    /// to the target endpoint, ordered by depth. Carries only the node
    /// accumulator; edges are fetched afterwards in one batched query.
    pub fn shortest_path_sql(
        &self,
        from: &str,
        to: &str,
        max_depth: u32,
        result_limit: Option<usize>,
    ) -> StorageResult<SqlStatement> {
        let depth = validate_depth(max_depth)?;
        let limit = validate_result_limit(result_limit.unwrap_or(DEFAULT_SHORTEST_PATH_LIMIT))?;
        let (join, next) = step_expressions(Direction::Both);
        let sql = format!(
            "WITH RECURSIVE walk(node_id, depth, path_nodes) AS ( \
               SELECT id, 0, json_array(id) \
                 FROM {nodes} WHERE id = ?1 \
               UNION ALL \
               SELECT {next}, w.depth + 1, \
                      json_insert(w.path_nodes, '$[#]', {next}) \
                 FROM walk w \
                 JOIN {edges} e ON {join} \
                WHERE w.depth < {depth} \
                  AND NOT EXISTS (SELECT 1 FROM json_each(w.path_nodes) visited \
                                   WHERE visited.value = {next}) \
             ) \
             SELECT path_nodes, depth \
               FROM walk \
              WHERE depth > 0 AND node_id = ?2 \
              ORDER BY depth, path_nodes \
              LIMIT {limit}",
            nodes = self.nodes_table,
            edges = self.edges_table,
        );
        Ok(SqlStatement::new(
            sql,
            vec![SqlParam::Text(from.to_owned()), SqlParam::Text(to.to_owned())],
        ))
    }

    /// Batched node fetch for every id collected from a set of paths.
    pub fn nodes_by_ids_sql(&self, ids: &[String]) -> StorageResult<SqlStatement> {
        if ids.is_empty() {
            return Err(StorageError::invalid_value("node fetch requires at least one id"));
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        Ok(SqlStatement::new(
            format!(
                "SELECT id, node_type, properties FROM {} WHERE id IN ({placeholders})",
                self.nodes_table
            ),
            ids.iter().map(|id| SqlParam::Text(id.clone())).collect(),
        ))
    }

    /// Batched edge fetch for consecutive node pairs of a path, matching
    /// either orientation of each pair.
    pub fn edges_for_pairs_sql(&self, pairs: &[(String, String)]) -> StorageResult<SqlStatement> {
        if pairs.is_empty() {
            return Err(StorageError::invalid_value("edge fetch requires at least one pair"));
        }
        let clause = vec!["((from_id = ? AND to_id = ?) OR (from_id = ? AND to_id = ?))"; pairs.len()]
            .join(" OR ");
        let mut params = Vec::with_capacity(pairs.len() * 4);
        for (a, b) in pairs {
            params.push(SqlParam::Text(a.clone()));
            params.push(SqlParam::Text(b.clone()));
            params.push(SqlParam::Text(b.clone()));
            params.push(SqlParam::Text(a.clone()));
        }
        Ok(SqlStatement::new(
            format!(
                "SELECT from_id, to_id, edge_type, properties FROM {} WHERE {clause}",
                self.edges_table
            ),
            params,
        ))
    }
}

fn parse_id_array(raw: &str) -> StorageResult<Vec<String>> {
    let ids: Vec<String> = serde_json::from_str(raw).map_err(|err| {
        StorageError::query_failed("malformed path-node accumulator").with_source(err)
    })?;
    Ok(ids)
}

fn parse_edge_array(raw: &str) -> StorageResult<Vec<GraphEdge>> {
    #[derive(serde::Deserialize)]
    struct RawEdge {
        from: String,
        to: String,
        #[serde(rename = "type")]
        edge_type: String,
        #[serde(default)]
        properties: Value,
    }
    let raw_edges: Vec<RawEdge> = serde_json::from_str(raw).map_err(|err| {
        StorageError::query_failed("malformed path-edge accumulator").with_source(err)
    })?;
    Ok(raw_edges
        .into_iter()
        .map(|edge| GraphEdge {
            from: edge.from,
            to: edge.to,
            edge_type: edge.edge_type,
            properties: match edge.properties {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        })
        .collect())
}

/// Assemble traversal rows into paths with a single batched node fetch.
///
/// `fetch_nodes` receives the deduplicated union of node ids across every
/// path and returns an id → node map; paths are then built by lookup.
pub fn assemble_paths(
    rows: &[WalkRow],
    fetch_nodes: impl FnOnce(&[String]) -> StorageResult<HashMap<String, GraphNode>>,
) -> StorageResult<Vec<GraphPath>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let mut parsed = Vec::with_capacity(rows.len());
    let mut id_union = BTreeSet::new();
    for row in rows {
        let ids = parse_id_array(&row.path_nodes)?;
        let edges = match &row.path_edges {
            Some(raw) => parse_edge_array(raw)?,
            None => Vec::new(),
        };
        id_union.extend(ids.iter().cloned());
        parsed.push((ids, edges));
    }
    let id_union: Vec<String> = id_union.into_iter().collect();
    let node_map = fetch_nodes(&id_union)?;

    let mut paths = Vec::with_capacity(parsed.len());
    for (ids, edges) in parsed {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in &ids {
            let node = node_map.get(id).ok_or_else(|| {
                StorageError::query_failed("traversal returned an id missing from the node table")
                    .with_key(id.clone())
            })?;
            nodes.push(node.clone());
        }
        paths.push(GraphPath { nodes, edges, weight: None });
    }
    Ok(paths)
}

/// Assemble one shortest-path row: one batched node fetch plus one OR-list
/// edge fetch over the consecutive pairs.
pub fn assemble_shortest_path(
    row: &WalkRow,
    fetch_nodes: impl FnOnce(&[String]) -> StorageResult<HashMap<String, GraphNode>>,
    fetch_edges: impl FnOnce(&[(String, String)]) -> StorageResult<Vec<GraphEdge>>,
) -> StorageResult<Option<GraphPath>> {
    let ids = parse_id_array(&row.path_nodes)?;
    if ids.is_empty() {
        return Ok(None);
    }
    let unique: Vec<String> = ids
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let node_map = fetch_nodes(&unique)?;

    let pairs: Vec<(String, String)> = ids
        .windows(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let available = if pairs.is_empty() { Vec::new() } else { fetch_edges(&pairs)? };

    let mut nodes = Vec::with_capacity(ids.len());
    for id in &ids {
        let node = node_map.get(id).ok_or_else(|| {
            StorageError::query_failed("shortest path returned an id missing from the node table")
                .with_key(id.clone())
        })?;
        nodes.push(node.clone());
    }
    let mut edges = Vec::with_capacity(pairs.len());
    for (a, b) in &pairs {
        let edge = available
            .iter()
            .find(|e| (&e.from == a && &e.to == b) || (&e.from == b && &e.to == a))
            .ok_or_else(|| {
                StorageError::query_failed("shortest path step has no backing edge")
                    .with_key(format!("{a} -> {b}"))
            })?;
        edges.push(edge.clone());
    }
    Ok(Some(GraphPath { nodes, edges, weight: None }))
}
