//! Graph storage over the relational node/edge tables.
//!
//! Traversal, shortest path, and connected-within-depth delegate to the
//! recursive traversal engine; path assembly uses one batched node fetch
//! (and one OR-list edge fetch for shortest path) instead of a query per
//! path element. Validation failures propagate as `InvalidValue`;
//! execution failures on the traversal entry points degrade to empty
//! results with a debug-level log line.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::sql::ident;
use crate::sql::types::SqlParam;
use crate::traits::graph::{
    validate_depth, validate_result_limit, GraphEdge, GraphNode, GraphPath, GraphPattern,
    GraphStats, GraphStorage, TraversalPattern, DEFAULT_MAX_DEPTH, DEFAULT_TRAVERSAL_LIMIT,
};
use crate::traits::semantic::{QueryEnvelope, Row};
use crate::traversal::{assemble_paths, assemble_shortest_path, WalkRow};

use super::{execute, query_rows, run_envelope, RelationalStore};

fn parse_properties(raw: Option<&Value>) -> Map<String, Value> {
    raw.and_then(Value::as_str)
        .and_then(|text| serde_json::from_str::<Value>(text).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

fn row_to_node(row: &Row) -> Option<GraphNode> {
    Some(GraphNode {
        id: row.get("id")?.as_str()?.to_owned(),
        node_type: row.get("node_type")?.as_str()?.to_owned(),
        properties: parse_properties(row.get("properties")),
    })
}

fn row_to_edge(row: &Row) -> Option<GraphEdge> {
    Some(GraphEdge {
        from: row.get("from_id")?.as_str()?.to_owned(),
        to: row.get("to_id")?.as_str()?.to_owned(),
        edge_type: row.get("edge_type")?.as_str()?.to_owned(),
        properties: parse_properties(row.get("properties")),
    })
}

impl RelationalStore {
    fn nodes_table(&self) -> &str {
        &self.config().nodes_table
    }

    fn edges_table(&self) -> &str {
        &self.config().edges_table
    }

    /// Single batched fetch of nodes by id, preserving the caller's order.
    fn fetch_nodes_ordered(&self, ids: &[String]) -> StorageResult<Vec<GraphNode>> {
        let map = self.fetch_node_map(ids)?;
        Ok(ids.iter().filter_map(|id| map.get(id).cloned()).collect())
    }

    fn fetch_node_map(
        &self,
        ids: &[String],
    ) -> StorageResult<std::collections::HashMap<String, GraphNode>> {
        if ids.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let statement = self.traversal().nodes_by_ids_sql(ids)?;
        let rows = query_rows(&self.conn().lock(), &statement.sql, &statement.params)?;
        Ok(rows
            .iter()
            .filter_map(row_to_node)
            .map(|node| (node.id.clone(), node))
            .collect())
    }

    fn fetch_edges_for_pairs(&self, pairs: &[(String, String)]) -> StorageResult<Vec<GraphEdge>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let statement = self.traversal().edges_for_pairs_sql(pairs)?;
        let rows = query_rows(&self.conn().lock(), &statement.sql, &statement.params)?;
        Ok(rows.iter().filter_map(row_to_edge).collect())
    }

    fn walk_rows(&self, sql: &str, params: &[SqlParam], with_edges: bool) -> StorageResult<Vec<WalkRow>> {
        let rows = query_rows(&self.conn().lock(), sql, params)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(WalkRow {
                    path_nodes: row.get("path_nodes")?.as_str()?.to_owned(),
                    path_edges: if with_edges {
                        Some(row.get("path_edges")?.as_str()?.to_owned())
                    } else {
                        None
                    },
                    depth: row.get("depth").and_then(Value::as_i64).unwrap_or(0),
                })
            })
            .collect())
    }
}

impl GraphStorage for RelationalStore {
    fn add_node(&self, node: GraphNode) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, node_type, properties) VALUES (?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
               node_type = excluded.node_type, properties = excluded.properties",
            self.nodes_table()
        );
        let params = [
            SqlParam::Text(node.id.clone()),
            SqlParam::Text(node.node_type.clone()),
            SqlParam::Text(Value::Object(node.properties.clone()).to_string()),
        ];
        execute(&self.conn().lock(), &sql, &params)
            .map_err(|err| {
                StorageError::write_failed("node upsert failed")
                    .with_key(node.id.clone())
                    .with_table(self.nodes_table().to_owned())
                    .with_source(err)
            })
            .map(|_| ())
    }

    fn get_node(&self, id: &str) -> StorageResult<Option<GraphNode>> {
        let sql = format!(
            "SELECT id, node_type, properties FROM {} WHERE id = ?",
            self.nodes_table()
        );
        let rows = query_rows(&self.conn().lock(), &sql, &[SqlParam::Text(id.to_owned())])?;
        Ok(rows.first().and_then(row_to_node))
    }

    fn update_node(&self, id: &str, properties: Map<String, Value>) -> StorageResult<bool> {
        let sql = format!("UPDATE {} SET properties = ? WHERE id = ?", self.nodes_table());
        let params = [
            SqlParam::Text(Value::Object(properties).to_string()),
            SqlParam::Text(id.to_owned()),
        ];
        let changed = execute(&self.conn().lock(), &sql, &params).map_err(|err| {
            StorageError::write_failed("node update failed")
                .with_key(id.to_owned())
                .with_source(err)
        })?;
        Ok(changed > 0)
    }

    fn delete_node(&self, id: &str) -> StorageResult<bool> {
        // Edge cleanup rides on the cascade constraint.
        let sql = format!("DELETE FROM {} WHERE id = ?", self.nodes_table());
        let changed = execute(&self.conn().lock(), &sql, &[SqlParam::Text(id.to_owned())])
            .map_err(|err| {
                StorageError::delete_failed("node delete failed")
                    .with_key(id.to_owned())
                    .with_source(err)
            })?;
        Ok(changed > 0)
    }

    fn query_nodes(
        &self,
        node_type: Option<&str>,
        filters: &Map<String, Value>,
    ) -> StorageResult<Vec<GraphNode>> {
        let mut sql = format!(
            "SELECT id, node_type, properties FROM {} WHERE 1 = 1",
            self.nodes_table()
        );
        let mut params = Vec::new();
        if let Some(node_type) = node_type {
            sql.push_str(" AND node_type = ?");
            params.push(SqlParam::Text(node_type.to_owned()));
        }
        for (field, expected) in filters {
            ident::validate(field)?;
            // Both the JSON path and the expected value bind as parameters.
            sql.push_str(" AND json_extract(properties, ?) = ?");
            params.push(SqlParam::Text(format!("$.{field}")));
            params.push(SqlParam::from_value(expected));
        }
        sql.push_str(" ORDER BY id");
        let rows = query_rows(&self.conn().lock(), &sql, &params)?;
        Ok(rows.iter().filter_map(row_to_node).collect())
    }

    fn add_edge(&self, edge: GraphEdge) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (from_id, to_id, edge_type, properties) VALUES (?, ?, ?, ?) \
             ON CONFLICT (from_id, to_id, edge_type) DO UPDATE SET \
               properties = excluded.properties",
            self.edges_table()
        );
        let params = [
            SqlParam::Text(edge.from.clone()),
            SqlParam::Text(edge.to.clone()),
            SqlParam::Text(edge.edge_type.clone()),
            SqlParam::Text(Value::Object(edge.properties.clone()).to_string()),
        ];
        execute(&self.conn().lock(), &sql, &params)
            .map_err(|err| {
                StorageError::write_failed("edge insert failed; do both endpoints exist?")
                    .with_key(format!("{} -> {}", edge.from, edge.to))
                    .with_table(self.edges_table().to_owned())
                    .with_source(err)
            })
            .map(|_| ())
    }

    fn get_edge(&self, from: &str, to: &str, edge_type: &str) -> StorageResult<Option<GraphEdge>> {
        let sql = format!(
            "SELECT from_id, to_id, edge_type, properties FROM {} \
             WHERE from_id = ? AND to_id = ? AND edge_type = ?",
            self.edges_table()
        );
        let params = [
            SqlParam::Text(from.to_owned()),
            SqlParam::Text(to.to_owned()),
            SqlParam::Text(edge_type.to_owned()),
        ];
        let rows = query_rows(&self.conn().lock(), &sql, &params)?;
        Ok(rows.first().and_then(row_to_edge))
    }

    fn get_edges(
        &self,
        node_id: &str,
        edge_types: Option<&[String]>,
    ) -> StorageResult<Vec<GraphEdge>> {
        let mut sql = format!(
            "SELECT from_id, to_id, edge_type, properties FROM {} \
             WHERE (from_id = ?1 OR to_id = ?1)",
            self.edges_table()
        );
        let mut params = vec![SqlParam::Text(node_id.to_owned())];
        if let Some(types) = edge_types {
            if !types.is_empty() {
                let placeholders = vec!["?"; types.len()].join(", ");
                sql.push_str(&format!(" AND edge_type IN ({placeholders})"));
                params.extend(types.iter().map(|t| SqlParam::Text(t.clone())));
            }
        }
        sql.push_str(" ORDER BY from_id, to_id, edge_type");
        let rows = query_rows(&self.conn().lock(), &sql, &params)?;
        Ok(rows.iter().filter_map(row_to_edge).collect())
    }

    fn update_edge(
        &self,
        from: &str,
        to: &str,
        edge_type: &str,
        properties: Map<String, Value>,
    ) -> StorageResult<bool> {
        let sql = format!(
            "UPDATE {} SET properties = ? WHERE from_id = ? AND to_id = ? AND edge_type = ?",
            self.edges_table()
        );
        let params = [
            SqlParam::Text(Value::Object(properties).to_string()),
            SqlParam::Text(from.to_owned()),
            SqlParam::Text(to.to_owned()),
            SqlParam::Text(edge_type.to_owned()),
        ];
        let changed = execute(&self.conn().lock(), &sql, &params).map_err(|err| {
            StorageError::write_failed("edge update failed").with_source(err)
        })?;
        Ok(changed > 0)
    }

    fn delete_edge(&self, from: &str, to: &str, edge_type: &str) -> StorageResult<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE from_id = ? AND to_id = ? AND edge_type = ?",
            self.edges_table()
        );
        let params = [
            SqlParam::Text(from.to_owned()),
            SqlParam::Text(to.to_owned()),
            SqlParam::Text(edge_type.to_owned()),
        ];
        let changed = execute(&self.conn().lock(), &sql, &params).map_err(|err| {
            StorageError::delete_failed("edge delete failed").with_source(err)
        })?;
        Ok(changed > 0)
    }

    fn traverse(&self, pattern: &TraversalPattern) -> StorageResult<Vec<GraphPath>> {
        // Bound validation always propagates; execution failures degrade
        // to an empty result.
        let statement = self.traversal().traverse_sql(pattern)?;
        let rows = match self.walk_rows(&statement.sql, &statement.params, true) {
            Ok(rows) => rows,
            Err(err) => {
                debug!(error = %err, start = %pattern.start_node, "traversal failed");
                return Ok(Vec::new());
            }
        };
        assemble_paths(&rows, |ids| self.fetch_node_map(ids))
    }

    fn find_connected(&self, node_id: &str, depth: u32) -> StorageResult<Vec<GraphNode>> {
        let statement = self.traversal().connected_sql(node_id, depth, None)?;
        let rows = match query_rows(&self.conn().lock(), &statement.sql, &statement.params) {
            Ok(rows) => rows,
            Err(err) => {
                debug!(error = %err, node_id, "connected query failed");
                return Ok(Vec::new());
            }
        };
        let ids: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("node_id").and_then(Value::as_str).map(str::to_owned))
            .collect();
        self.fetch_nodes_ordered(&ids)
    }

    fn shortest_path(
        &self,
        from: &str,
        to: &str,
        max_depth: Option<u32>,
    ) -> StorageResult<Option<GraphPath>> {
        let depth = validate_depth(max_depth.unwrap_or(DEFAULT_MAX_DEPTH))?;
        let statement = self.traversal().shortest_path_sql(from, to, depth, None)?;
        let rows = match self.walk_rows(&statement.sql, &statement.params, false) {
            Ok(rows) => rows,
            Err(err) => {
                debug!(error = %err, from, to, "shortest path query failed");
                return Ok(None);
            }
        };
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        assemble_shortest_path(
            row,
            |ids| self.fetch_node_map(ids),
            |pairs| self.fetch_edges_for_pairs(pairs),
        )
    }

    fn find_by_pattern(&self, pattern: &GraphPattern) -> StorageResult<Vec<GraphPath>> {
        let limit =
            validate_result_limit(pattern.result_limit.unwrap_or(DEFAULT_TRAVERSAL_LIMIT))?;
        match &pattern.edge_type {
            Some(edge_type) => {
                let mut sql = format!(
                    "SELECT a.id AS a_id, a.node_type AS a_type, a.properties AS a_props, \
                            b.id AS b_id, b.node_type AS b_type, b.properties AS b_props, \
                            e.edge_type AS edge_type, e.properties AS e_props \
                       FROM {edges} e \
                       JOIN {nodes} a ON a.id = e.from_id \
                       JOIN {nodes} b ON b.id = e.to_id \
                      WHERE e.edge_type = ?",
                    edges = self.edges_table(),
                    nodes = self.nodes_table(),
                );
                let mut params = vec![SqlParam::Text(edge_type.clone())];
                if let Some(node_type) = &pattern.node_type {
                    sql.push_str(" AND a.node_type = ?");
                    params.push(SqlParam::Text(node_type.clone()));
                }
                for (field, expected) in &pattern.properties {
                    ident::validate(field)?;
                    sql.push_str(" AND json_extract(a.properties, ?) = ?");
                    params.push(SqlParam::Text(format!("$.{field}")));
                    params.push(SqlParam::from_value(expected));
                }
                sql.push_str(&format!(" ORDER BY a.id, b.id LIMIT {limit}"));
                let rows = query_rows(&self.conn().lock(), &sql, &params)?;
                Ok(rows
                    .iter()
                    .filter_map(|row| {
                        let from = GraphNode {
                            id: row.get("a_id")?.as_str()?.to_owned(),
                            node_type: row.get("a_type")?.as_str()?.to_owned(),
                            properties: parse_properties(row.get("a_props")),
                        };
                        let to = GraphNode {
                            id: row.get("b_id")?.as_str()?.to_owned(),
                            node_type: row.get("b_type")?.as_str()?.to_owned(),
                            properties: parse_properties(row.get("b_props")),
                        };
                        let edge = GraphEdge {
                            from: from.id.clone(),
                            to: to.id.clone(),
                            edge_type: row.get("edge_type")?.as_str()?.to_owned(),
                            properties: parse_properties(row.get("e_props")),
                        };
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
        self.core().transaction(&self.hooks(), &mut f)?;
        Ok(ids)
    }

    fn create_index(&self, node_type: &str, property: &str) -> StorageResult<String> {
        ident::validate(node_type)?;
        ident::validate(property)?;
        let name = format!("idx_{}_{node_type}_{property}", self.nodes_table());
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {name} \
             ON {nodes} (json_extract(properties, '$.{property}')) \
             WHERE node_type = '{node_type}'",
            nodes = self.nodes_table(),
        );
        self.conn()
            .lock()
            .execute_batch(&sql)
            .map_err(|err| StorageError::io("index creation failed").with_source(err))?;
        Ok(name)
    }

    fn list_indexes(&self) -> StorageResult<Vec<String>> {
        let rows = query_rows(
            &self.conn().lock(),
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
            &[],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_owned))
            .collect())
    }

    fn get_graph_stats(&self) -> StorageResult<GraphStats> {
        let conn = self.conn().lock();
        let mut stats = GraphStats::default();
        let rows = query_rows(&conn, &format!("SELECT COUNT(*) AS n FROM {}", self.nodes_table()), &[])?;
        stats.node_count = rows.first().and_then(|r| r.get("n")).and_then(Value::as_u64).unwrap_or(0);
        let rows = query_rows(&conn, &format!("SELECT COUNT(*) AS n FROM {}", self.edges_table()), &[])?;
        stats.edge_count = rows.first().and_then(|r| r.get("n")).and_then(Value::as_u64).unwrap_or(0);
        let rows = query_rows(
            &conn,
            &format!(
                "SELECT node_type, COUNT(*) AS n FROM {} GROUP BY node_type",
                self.nodes_table()
            ),
            &[],
        )?;
        for row in &rows {
            if let (Some(kind), Some(count)) = (row.get("node_type").and_then(Value::as_str), row.get("n")) {
                stats.nodes_by_type.insert(kind.to_owned(), count.clone());
            }
        }
        let rows = query_rows(
            &conn,
            &format!(
                "SELECT edge_type, COUNT(*) AS n FROM {} GROUP BY edge_type",
                self.edges_table()
            ),
            &[],
        )?;
        for row in &rows {
            if let (Some(kind), Some(count)) = (row.get("edge_type").and_then(Value::as_str), row.get("n")) {
                stats.edges_by_type.insert(kind.to_owned(), count.clone());
            }
        }
        Ok(stats)
    }

    fn execute_query(&self, query: &str, params: &[Value]) -> QueryEnvelope {
        let bound = crate::sql::types::bind_params(params);
        run_envelope(self.conn(), query, &bound)
    }

    fn transaction(&self, f: &mut dyn FnMut() -> StorageResult<()>) -> StorageResult<()> {
        self.core().transaction(&self.hooks(), f)
    }
}
