//! Native-graph adapter driven through a client trait.
//!
//! The engine itself lives behind [`GraphClient`] — a Bolt session, an
//! embedded graph library, or (in tests) an in-process mock. The adapter
//! owns none of the engine's quirks: it builds every statement through the
//! safe builder in [`crate::cypher`] and decodes rows into the same
//! [`GraphPath`] shape the relational engine produces, so callers cannot
//! tell the two graph backends apart. Rows that do not decode are dropped
//! with a debug log rather than failing the whole traversal.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::base::{AdapterCore, OperationTiming, TransactionHooks};
use crate::config::GraphClientConfig;
use crate::cypher::{self, CypherStatement};
use crate::error::{StorageError, StorageResult};
use crate::sql::ident;
use crate::sql::types::convert_placeholders;
use crate::traits::graph::{
    validate_result_limit, GraphEdge, GraphNode, GraphPath, GraphPattern, GraphStats,
    GraphStorage, TraversalPattern, DEFAULT_MAX_DEPTH, DEFAULT_TRAVERSAL_LIMIT,
};
use crate::traits::semantic::{QueryEnvelope, QueryMetadata, Row};

/// Connection to a Cypher-speaking graph engine.
///
/// `execute` runs one parameterized statement and returns its rows as
/// JSON objects. The transaction methods default to no-ops for engines
/// whose sessions auto-commit.
pub trait GraphClient: Send + Sync {
    fn execute(&self, statement: &CypherStatement) -> StorageResult<Vec<Row>>;

    fn begin_transaction(&self) -> StorageResult<()> {
        Ok(())
    }
    fn commit_transaction(&self) -> StorageResult<()> {
        Ok(())
    }
    fn rollback_transaction(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Decode a node value of the form `{id, type, data}`.
pub fn decode_node(value: &Value) -> Option<GraphNode> {
    let object = value.as_object()?;
    let properties = match object.get("data") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    Some(GraphNode {
        id: object.get("id")?.as_str()?.to_owned(),
        node_type: object
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        properties,
    })
}

/// Decode an edge value of the form `{from, to, type, data}`.
pub fn decode_edge(value: &Value) -> Option<GraphEdge> {
    let object = value.as_object()?;
    let properties = match object.get("data") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    Some(GraphEdge {
        from: object.get("from")?.as_str()?.to_owned(),
        to: object.get("to")?.as_str()?.to_owned(),
        edge_type: object
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        properties,
    })
}

/// Decode a path value of the form `{nodes: […], edges: […]}` into the
/// shared [`GraphPath`] shape.
pub fn decode_path(value: &Value) -> Option<GraphPath> {
    let object = value.as_object()?;
    let nodes = object
        .get("nodes")?
        .as_array()?
        .iter()
        .map(decode_node)
        .collect::<Option<Vec<_>>>()?;
    let edges = object
        .get("edges")
        .and_then(Value::as_array)
        .map(|edges| edges.iter().filter_map(decode_edge).collect())
        .unwrap_or_default();
    Some(GraphPath { nodes, edges, weight: None })
}

struct ClientTransaction<'a, C: GraphClient> {
    client: &'a C,
}

impl<C: GraphClient> TransactionHooks for ClientTransaction<'_, C> {
    fn begin(&self) -> StorageResult<()> {
        self.client.begin_transaction()
    }
    fn commit(&self) -> StorageResult<()> {
        self.client.commit_transaction()
    }
    fn rollback(&self) -> StorageResult<()> {
        self.client.rollback_transaction()
    }
}

/// Graph storage over any [`GraphClient`].
pub struct GraphClientStore<C: GraphClient> {
    client: C,
    config: GraphClientConfig,
    core: AdapterCore<Value>,
}

impl<C: GraphClient> GraphClientStore<C> {
    pub fn new(client: C, config: GraphClientConfig) -> Self {
        Self {
            core: AdapterCore::new(config.performance.clone()),
            client,
            config,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn endpoint(&self) -> &str {
        &self.config.database
    }

    pub fn performance_stats(&self) -> Vec<OperationTiming> {
        self.core.performance_stats()
    }

    fn run(&self, operation: &str, statement: &CypherStatement) -> StorageResult<Vec<Row>> {
        self.core.time_op(operation, || self.client.execute(statement))
    }
}

impl<C: GraphClient> GraphStorage for GraphClientStore<C> {
    fn add_node(&self, node: GraphNode) -> StorageResult<()> {
        let statement = cypher::store_node(
            &node.id,
            &node.id,
            &node.node_type,
            &Value::Object(node.properties.clone()),
        );
        self.run("add_node", &statement)?;
        Ok(())
    }

    fn get_node(&self, id: &str) -> StorageResult<Option<GraphNode>> {
        let statement =
            CypherStatement::new("MATCH (n {id: $id}) RETURN n").bind("id", json!(id));
        let rows = self.run("get_node", &statement)?;
        Ok(rows.first().and_then(|row| row.get("n")).and_then(decode_node))
    }

    fn update_node(&self, id: &str, properties: Map<String, Value>) -> StorageResult<bool> {
        let statement = CypherStatement::new(
            "MATCH (n {id: $id}) SET n.data = $data RETURN n.id AS id",
        )
        .bind("id", json!(id))
        .bind("data", Value::Object(properties));
        let rows = self.run("update_node", &statement)?;
        Ok(!rows.is_empty())
    }

    fn delete_node(&self, id: &str) -> StorageResult<bool> {
        if self.get_node(id)?.is_none() {
            return Ok(false);
        }
        self.run("delete_node", &cypher::delete_node(id))?;
        Ok(true)
    }

    fn query_nodes(
        &self,
        node_type: Option<&str>,
        filters: &Map<String, Value>,
    ) -> StorageResult<Vec<GraphNode>> {
        let mut clauses = Vec::new();
        let mut statement = CypherStatement::new(String::new());
        if let Some(node_type) = node_type {
            clauses.push("n.type = $type".to_owned());
            statement = statement.bind("type", json!(node_type));
        }
        for (index, (field, expected)) in filters.iter().enumerate() {
            ident::validate(field)?;
            let param = format!("p{index}");
            clauses.push(format!("n.data.{field} = ${param}"));
            statement = statement.bind(&param, expected.clone());
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        statement.text = format!("MATCH (n){where_clause} RETURN n");
        let rows = self.run("query_nodes", &statement)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("n"))
            .filter_map(decode_node)
            .collect())
    }

    fn add_edge(&self, edge: GraphEdge) -> StorageResult<()> {
        let statement = cypher::create_edge(
            &edge.from,
            &edge.to,
            &edge.edge_type,
            &Value::Object(edge.properties.clone()),
        );
        self.run("add_edge", &statement)?;
        Ok(())
    }

    fn get_edge(&self, from: &str, to: &str, edge_type: &str) -> StorageResult<Option<GraphEdge>> {
        let statement = CypherStatement::new(
            "MATCH (a {id: $from})-[r]->(b {id: $to}) WHERE r.type = $type \
             RETURN r, a.id AS from, b.id AS to",
        )
        .bind("from", json!(from))
        .bind("to", json!(to))
        .bind("type", json!(edge_type));
        let rows = self.run("get_edge", &statement)?;
        Ok(rows.first().and_then(row_to_edge))
    }

    fn get_edges(
        &self,
        node_id: &str,
        edge_types: Option<&[String]>,
    ) -> StorageResult<Vec<GraphEdge>> {
        let statement = cypher::get_edges(node_id, edge_types);
        let rows = self.run("get_edges", &statement)?;
        Ok(rows.iter().filter_map(row_to_edge).collect())
    }

    fn update_edge(
        &self,
        from: &str,
        to: &str,
        edge_type: &str,
        properties: Map<String, Value>,
    ) -> StorageResult<bool> {
        let statement = CypherStatement::new(
            "MATCH (a {id: $from})-[r]->(b {id: $to}) WHERE r.type = $type \
             SET r.data = $data RETURN r",
        )
        .bind("from", json!(from))
        .bind("to", json!(to))
        .bind("type", json!(edge_type))
        .bind("data", Value::Object(properties));
        let rows = self.run("update_edge", &statement)?;
        Ok(!rows.is_empty())
    }

    fn delete_edge(&self, from: &str, to: &str, edge_type: &str) -> StorageResult<bool> {
        if self.get_edge(from, to, edge_type)?.is_none() {
            return Ok(false);
        }
        let statement = CypherStatement::new(
            "MATCH (a {id: $from})-[r]->(b {id: $to}) WHERE r.type = $type DELETE r",
        )
        .bind("from", json!(from))
        .bind("to", json!(to))
        .bind("type", json!(edge_type));
        self.run("delete_edge", &statement)?;
        Ok(true)
    }

    fn traverse(&self, pattern: &TraversalPattern) -> StorageResult<Vec<GraphPath>> {
        let (depth, limit) = pattern.validated_bounds()?;
        let statement = cypher::traversal(
            &pattern.start_node,
            pattern.direction,
            depth,
            pattern.edge_types.as_deref(),
            Some(limit),
        )?;
        let rows = match self.run("traverse", &statement) {
            Ok(rows) => rows,
            Err(err) => {
                debug!(error = %err, start = %pattern.start_node, "traversal failed");
                return Ok(Vec::new());
            }
        };
        Ok(rows
            .iter()
            .filter_map(|row| {
                let path = row.get("p").and_then(decode_path);
                if path.is_none() {
                    debug!("dropping traversal row that does not decode to a path");
                }
                path
            })
            .collect())
    }

    fn find_connected(&self, node_id: &str, depth: u32) -> StorageResult<Vec<GraphNode>> {
        let statement = cypher::connected(node_id, depth, None)?;
        let rows = match self.run("find_connected", &statement) {
            Ok(rows) => rows,
            Err(err) => {
                debug!(error = %err, node_id, "connected query failed");
                return Ok(Vec::new());
            }
        };
        Ok(rows
            .iter()
            .filter_map(|row| row.get("other"))
            .filter_map(decode_node)
            .collect())
    }

    fn shortest_path(
        &self,
        from: &str,
        to: &str,
        max_depth: Option<u32>,
    ) -> StorageResult<Option<GraphPath>> {
        let statement =
            cypher::shortest_path(from, to, max_depth.unwrap_or(DEFAULT_MAX_DEPTH), None)?;
        let rows = match self.run("shortest_path", &statement) {
            Ok(rows) => rows,
            Err(err) => {
                debug!(error = %err, from, to, "shortest path query failed");
                return Ok(None);
            }
        };
        Ok(rows.first().and_then(|row| row.get("p")).and_then(decode_path))
    }

    fn find_by_pattern(&self, pattern: &GraphPattern) -> StorageResult<Vec<GraphPath>> {
        let limit =
            validate_result_limit(pattern.result_limit.unwrap_or(DEFAULT_TRAVERSAL_LIMIT))?;
        match &pattern.edge_type {
            Some(edge_type) => {
                let mut clauses = vec!["r.type = $edge_type".to_owned()];
                let mut statement =
                    CypherStatement::new(String::new()).bind("edge_type", json!(edge_type));
                if let Some(node_type) = &pattern.node_type {
                    clauses.push("a.type = $node_type".to_owned());
                    statement = statement.bind("node_type", json!(node_type));
                }
                for (index, (field, expected)) in pattern.properties.iter().enumerate() {
                    ident::validate(field)?;
                    let param = format!("p{index}");
                    clauses.push(format!("a.data.{field} = ${param}"));
                    statement = statement.bind(&param, expected.clone());
                }
                statement.text = format!(
                    "MATCH (a)-[r]->(b) WHERE {} \
                     RETURN a, r, b LIMIT {limit}",
                    clauses.join(" AND ")
                );
                let rows = self.run("find_by_pattern", &statement)?;
                Ok(rows
                    .iter()
                    .filter_map(|row| {
                        let from = row.get("a").and_then(decode_node)?;
                        let to = row.get("b").and_then(decode_node)?;
                        let mut edge = row.get("r").and_then(decode_edge).unwrap_or_else(|| {
                            GraphEdge::new(from.id.clone(), to.id.clone(), "")
                        });
                        if edge.from.is_empty() {
                            edge.from = from.id.clone();
                        }
                        if edge.to.is_empty() {
                            edge.to = to.id.clone();
                        }
                        Some(GraphPath { nodes: vec![from, to], edges: vec![edge], weight: None })
                    })
                    .collect())
            }
            None => {
                let mut nodes =
                    self.query_nodes(pattern.node_type.as_deref(), &pattern.properties)?;
                nodes.truncate(limit);
                Ok(nodes
                    .into_iter()
                    .map(|node| GraphPath { nodes: vec![node], edges: Vec::new(), weight: None })
                    .collect())
            }
        }
    }

    fn stream_episodes(
        &self,
        node_type: &str,
        episodes: Vec<Map<String, Value>>,
    ) -> StorageResult<Vec<String>> {
        if episodes.is_empty() {
            return Ok(Vec::new());
        }
        let stamp = chrono::Utc::now().timestamp_millis();
        let mut ids = Vec::with_capacity(episodes.len());
        let mut f = || -> StorageResult<()> {
            let mut previous: Option<String> = None;
            for (index, properties) in episodes.iter().enumerate() {
                let id = format!("{node_type}_{stamp}_{index}");
                self.add_node(GraphNode {
                    id: id.clone(),
                    node_type: node_type.to_owned(),
                    properties: properties.clone(),
                })?;
                if let Some(previous) = previous {
                    self.add_edge(GraphEdge::new(previous, id.clone(), "FOLLOWS"))?;
                }
                previous = Some(id.clone());
                ids.push(id);
            }
            Ok(())
        };
        self.core
            .transaction(&ClientTransaction { client: &self.client }, &mut f)?;
        Ok(ids)
    }

    fn create_index(&self, _node_type: &str, _property: &str) -> StorageResult<String> {
        Err(StorageError::not_implemented(
            "index management is not standardized across graph endpoints",
        ))
    }

    fn list_indexes(&self) -> StorageResult<Vec<String>> {
        Err(StorageError::not_implemented(
            "index management is not standardized across graph endpoints",
        ))
    }

    fn get_graph_stats(&self) -> StorageResult<GraphStats> {
        let mut stats = GraphStats::default();
        let rows = self.run(
            "get_graph_stats",
            &CypherStatement::new("MATCH (n) RETURN count(n) AS n"),
        )?;
        stats.node_count = rows.first().and_then(|r| r.get("n")).and_then(Value::as_u64).unwrap_or(0);
        let rows = self.run(
            "get_graph_stats",
            &CypherStatement::new("MATCH ()-[r]->() RETURN count(r) AS n"),
        )?;
        stats.edge_count = rows.first().and_then(|r| r.get("n")).and_then(Value::as_u64).unwrap_or(0);
        let rows = self.run(
            "get_graph_stats",
            &CypherStatement::new("MATCH (n) RETURN n.type AS kind, count(*) AS n"),
        )?;
        for row in &rows {
            if let (Some(kind), Some(count)) =
                (row.get("kind").and_then(Value::as_str), row.get("n"))
            {
                stats.nodes_by_type.insert(kind.to_owned(), count.clone());
            }
        }
        let rows = self.run(
            "get_graph_stats",
            &CypherStatement::new("MATCH ()-[r]->() RETURN r.type AS kind, count(*) AS n"),
        )?;
        for row in &rows {
            if let (Some(kind), Some(count)) =
                (row.get("kind").and_then(Value::as_str), row.get("n"))
            {
                stats.edges_by_type.insert(kind.to_owned(), count.clone());
            }
        }
        Ok(stats)
    }

    fn execute_query(&self, query: &str, params: &[Value]) -> QueryEnvelope {
        // Positional `?` markers become numbered parameters bound by index.
        let mut statement = CypherStatement::new(convert_placeholders(query));
        for (index, value) in params.iter().enumerate() {
            statement = statement.bind(&(index + 1).to_string(), value.clone());
        }
        let started = std::time::Instant::now();
        match self.run("execute_query", &statement) {
            Ok(rows) => {
                let metadata = QueryMetadata {
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    rows_scanned: rows.len() as u64,
                    from_cache: false,
                };
                QueryEnvelope::ok(rows, metadata)
            }
            Err(err) => QueryEnvelope::failure(err),
        }
    }

    fn transaction(&self, f: &mut dyn FnMut() -> StorageResult<()>) -> StorageResult<()> {
        self.core
            .transaction(&ClientTransaction { client: &self.client }, f)
    }
}

fn row_to_edge(row: &Row) -> Option<GraphEdge> {
    let mut edge = row.get("r").and_then(decode_edge).or_else(|| {
        // Engines that return the relationship without endpoint ids inline.
        let object = row.get("r")?.as_object()?;
        Some(GraphEdge {
            from: String::new(),
            to: String::new(),
            edge_type: object
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            properties: match object.get("data") {
                Some(Value::Object(map)) => map.clone(),
                _ => Map::new(),
            },
        })
    })?;
    if let Some(from) = row.get("from").and_then(Value::as_str) {
        edge.from = from.to_owned();
    }
    if let Some(to) = row.get("to").and_then(Value::as_str) {
        edge.to = to.to_owned();
    }
    if edge.from.is_empty() || edge.to.is_empty() {
        return None;
    }
    Some(edge)
}
