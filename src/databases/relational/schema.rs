//! Schema management for the relational adapter.
//!
//! All DDL is idempotent (`IF NOT EXISTS` throughout) and runs under the
//! process-wide table-creation mutex, so concurrent `initialize()` calls
//! on the same database create the schema exactly once. The node and edge
//! tables carry `updated_at` maintenance triggers; edges foreign-key both
//! endpoints with cascade delete.

use rusqlite::Connection;

use crate::config::RelationalConfig;
use crate::error::{StorageError, StorageResult};

fn ddl_failed(err: rusqlite::Error) -> StorageError {
    StorageError::io("schema creation failed").with_source(err)
}

/// Create the node, edge, key-value, and registry tables with their
/// supporting indexes and triggers.
pub(crate) fn create_schema(conn: &Connection, config: &RelationalConfig) -> StorageResult<()> {
    let nodes = &config.nodes_table;
    let edges = &config.edges_table;
    let data = &config.data_table;

    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {nodes} ( \
           id TEXT PRIMARY KEY, \
           node_type TEXT NOT NULL, \
           properties TEXT NOT NULL DEFAULT '{{}}', \
           created_at TEXT NOT NULL DEFAULT (datetime('now')), \
           updated_at TEXT NOT NULL DEFAULT (datetime('now')) \
         ); \
         CREATE INDEX IF NOT EXISTS idx_{nodes}_type ON {nodes} (node_type); \
         CREATE TABLE IF NOT EXISTS {edges} ( \
           from_id TEXT NOT NULL REFERENCES {nodes}(id) ON DELETE CASCADE, \
           to_id TEXT NOT NULL REFERENCES {nodes}(id) ON DELETE CASCADE, \
           edge_type TEXT NOT NULL, \
           properties TEXT NOT NULL DEFAULT '{{}}', \
           created_at TEXT NOT NULL DEFAULT (datetime('now')), \
           updated_at TEXT NOT NULL DEFAULT (datetime('now')), \
           PRIMARY KEY (from_id, to_id, edge_type) \
         ); \
         CREATE INDEX IF NOT EXISTS idx_{edges}_from ON {edges} (from_id); \
         CREATE INDEX IF NOT EXISTS idx_{edges}_to ON {edges} (to_id); \
         CREATE INDEX IF NOT EXISTS idx_{edges}_type ON {edges} (edge_type); \
         CREATE TABLE IF NOT EXISTS {data} ( \
           key TEXT PRIMARY KEY, \
           value TEXT NOT NULL, \
           updated_at TEXT NOT NULL DEFAULT (datetime('now')) \
         ); \
         CREATE TABLE IF NOT EXISTS vector_index_registry ( \
           index_name TEXT PRIMARY KEY, \
           table_name TEXT NOT NULL, \
           column_name TEXT NOT NULL, \
           kind TEXT NOT NULL, \
           distance_metric TEXT NOT NULL, \
           params TEXT NOT NULL DEFAULT '{{}}' \
         ); \
         CREATE TRIGGER IF NOT EXISTS trg_{nodes}_updated \
           AFTER UPDATE ON {nodes} \
           BEGIN \
             UPDATE {nodes} SET updated_at = datetime('now') WHERE id = NEW.id; \
           END; \
         CREATE TRIGGER IF NOT EXISTS trg_{edges}_updated \
           AFTER UPDATE OF properties ON {edges} \
           BEGIN \
             UPDATE {edges} SET updated_at = datetime('now') \
              WHERE from_id = NEW.from_id AND to_id = NEW.to_id AND edge_type = NEW.edge_type; \
           END;"
    );
    conn.execute_batch(&ddl).map_err(ddl_failed)
}

/// Load existing key-value rows into a warm-start cache. An empty table is
/// not an error.
pub(crate) fn load_existing(
    conn: &Connection,
    data_table: &str,
) -> StorageResult<Vec<(String, String)>> {
    let mut statement = conn
        .prepare(&format!("SELECT key, value FROM {data_table}"))
        .map_err(ddl_failed)?;
    let rows = statement
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(ddl_failed)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(ddl_failed)?);
    }
    Ok(out)
}
