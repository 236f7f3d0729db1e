//! Relational adapter over an embedded SQL engine.
//!
//! One store exposes the key-value surface (write-through to the data
//! table), the graph surface (node/edge tables walked by the recursive
//! traversal engine), the vector surface (embeddings ranked by registered
//! distance functions), and the parameterized-SQL entry points. Instances
//! addressing the same database file share one engine connection through
//! the process-wide registry; schema creation is serialized by the
//! table-creation mutex.

mod graph;
mod schema;
mod vector;

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;

use crate::base::{AdapterCore, OperationTiming, Paged, TransactionHooks};
use crate::config::RelationalConfig;
use crate::connection::{with_table_creation_lock, ConnectionRegistry};
use crate::error::{StorageError, StorageResult};
use crate::sql::generator::SqlGenerator;
use crate::sql::types::{
    from_storage_text, normalize_large_integers, validate_storage_text, SqlParam,
};
use crate::traits::semantic::{
    AggregateOp, Aggregation, Filter, QueryEnvelope, QueryMetadata, Row, SemanticQuery,
    SemanticStorage,
};
use crate::traits::storage::{
    validate_key, BatchStorage, Storage, StorageIter,
};
use crate::traversal::TraversalEngine;

/// Shared engine connections, keyed by database path.
static SQLITE_CONNECTIONS: Lazy<ConnectionRegistry<Mutex<Connection>>> =
    Lazy::new(ConnectionRegistry::default);

/// Page size for the batched `keys`/`entries` iterators.
const ITER_PAGE_SIZE: u64 = 256;

pub(crate) fn query_failed(err: rusqlite::Error) -> StorageError {
    StorageError::query_failed("statement execution failed").with_source(err)
}

/// Convert one engine cell to JSON.
fn cell_to_json(cell: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(r) => serde_json::Number::from_f64(r).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Run a query and materialize every row as a JSON object, with
/// large-integer normalization applied.
pub(crate) fn query_rows(
    conn: &Connection,
    sql: &str,
    params: &[SqlParam],
) -> StorageResult<Vec<Row>> {
    let mut statement = conn.prepare(sql).map_err(query_failed)?;
    let names: Vec<String> = statement
        .column_names()
        .into_iter()
        .map(str::to_owned)
        .collect();
    let mut rows = statement
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(query_failed)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(query_failed)? {
        let mut object = Row::new();
        for (index, name) in names.iter().enumerate() {
            let cell = row.get_ref(index).map_err(query_failed)?;
            object.insert(name.clone(), cell_to_json(cell));
        }
        out.push(object);
    }
    normalize_large_integers(&mut out);
    Ok(out)
}

/// Execute a statement, returning the affected row count.
pub(crate) fn execute(
    conn: &Connection,
    sql: &str,
    params: &[SqlParam],
) -> StorageResult<usize> {
    conn.execute(sql, rusqlite::params_from_iter(params.iter()))
        .map_err(query_failed)
}

struct SqliteTransaction<'a> {
    conn: &'a Arc<Mutex<Connection>>,
}

impl TransactionHooks for SqliteTransaction<'_> {
    fn begin(&self) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| StorageError::write_failed("cannot begin transaction").with_source(err))
    }

    fn commit(&self) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch("COMMIT")
            .map_err(|err| StorageError::write_failed("cannot commit transaction").with_source(err))
    }

    fn rollback(&self) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch("ROLLBACK")
            .map_err(|err| StorageError::write_failed("cannot roll back transaction").with_source(err))
    }

    fn savepoint(&self, depth: u32) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch(&format!("SAVEPOINT sp_{depth}"))
            .map_err(|err| StorageError::write_failed("cannot create savepoint").with_source(err))
    }

    fn release_savepoint(&self, depth: u32) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch(&format!("RELEASE sp_{depth}"))
            .map_err(|err| StorageError::write_failed("cannot release savepoint").with_source(err))
    }

    fn rollback_to_savepoint(&self, depth: u32) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch(&format!("ROLLBACK TO sp_{depth}; RELEASE sp_{depth}"))
            .map_err(|err| {
                StorageError::write_failed("cannot roll back to savepoint").with_source(err)
            })
    }
}

/// Relational store: key-value, graph, vector, and SQL surfaces over one
/// embedded database.
pub struct RelationalStore {
    config: RelationalConfig,
    conn: Arc<Mutex<Connection>>,
    generator: SqlGenerator,
    engine: TraversalEngine,
    core: AdapterCore<Value>,
}

impl RelationalStore {
    /// Open (or join) the database and ensure the schema exists.
    pub fn new(config: RelationalConfig) -> StorageResult<Self> {
        config.validate()?;
        let generator = SqlGenerator::new(&config.data_table)?;
        let engine = TraversalEngine::new(&config.nodes_table, &config.edges_table)?;
        let address = config.database.display().to_string();

        if config.auto_create {
            if let Some(parent) = config.database.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        } else if !config.database.exists() {
            return Err(StorageError::connection_failed("database file does not exist")
                .with_database(address));
        }

        let conn = SQLITE_CONNECTIONS.get_or_open(&address, || open_connection(&config))?;

        let store = Self {
            generator,
            engine,
            core: AdapterCore::new(config.performance.clone()),
            conn,
            config,
        };
        // Idempotent schema creation, serialized per (database, table)
        // across every instance in the process.
        with_table_creation_lock(&address, &store.config.nodes_table, || {
            schema::create_schema(&store.conn.lock(), &store.config)
        })?;
        Ok(store)
    }

    pub fn config(&self) -> &RelationalConfig {
        &self.config
    }

    pub(crate) fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    pub(crate) fn traversal(&self) -> &TraversalEngine {
        &self.engine
    }

    pub(crate) fn core(&self) -> &AdapterCore<Value> {
        &self.core
    }

    pub(crate) fn hooks(&self) -> SqliteTransaction<'_> {
        SqliteTransaction { conn: &self.conn }
    }

    pub fn performance_stats(&self) -> Vec<OperationTiming> {
        self.core.performance_stats()
    }

    /// Release this instance's view of the connection. The next operation
    /// reloads automatically.
    pub fn close(&self) {
        self.core.mark_closed();
    }

    /// Evict this database from the process-wide registry. Instances that
    /// still hold the connection keep it alive.
    pub fn close_database(&self) -> StorageResult<()> {
        self.core.mark_closed();
        SQLITE_CONNECTIONS.evict(&self.config.database.display().to_string());
        Ok(())
    }

    /// Evict every cached engine connection in the process.
    pub fn clear_connection_cache() {
        SQLITE_CONNECTIONS.clear();
    }
}

fn open_connection(config: &RelationalConfig) -> StorageResult<Mutex<Connection>> {
    let open_result = if config.read_only {
        Connection::open_with_flags(
            &config.database,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
    } else {
        Connection::open(&config.database)
    };
    let conn = open_result.map_err(|err| {
        StorageError::connection_failed("cannot open database")
            .with_database(config.database.display().to_string())
            .with_source(err)
    })?;
    conn.execute_batch("PRAGMA foreign_keys = ON")
        .map_err(|err| StorageError::connection_failed("cannot apply pragmas").with_source(err))?;
    if let Some(timeout_ms) = config.timeout_ms {
        conn.busy_timeout(std::time::Duration::from_millis(timeout_ms))
            .map_err(|err| {
                StorageError::connection_failed("cannot set busy timeout").with_source(err)
            })?;
    }
    vector::register_vector_functions(&conn).map_err(|err| {
        StorageError::connection_failed("cannot register vector functions").with_source(err)
    })?;
    Ok(Mutex::new(conn))
}

impl RelationalStore {
    /// Warm-start the key-value cache from the data table. Runs at most
    /// once per lifecycle; an empty table is not an error.
    fn ensure_kv_loaded(&self) -> StorageResult<()> {
        self.core.ensure_loaded(|cache| {
            let loaded = schema::load_existing(&self.conn.lock(), self.generator.table())?;
            for (key, text) in loaded {
                cache.insert(key, from_storage_text(&text));
            }
            Ok(())
        })
    }
}

impl Storage for RelationalStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        self.ensure_kv_loaded()?;
        self.core.time_op("get", || {
            if let Some(cached) = self.core.cache_get(key) {
                return Ok(Some(cached));
            }
            // Cache miss: another instance sharing the database may have
            // written the key after our warm start.
            let statement = self.generator.get(key);
            let rows = query_rows(&self.conn.lock(), &statement.sql, &statement.params)?;
            let found = rows
                .first()
                .and_then(|row| row.get("value"))
                .and_then(Value::as_str)
                .map(from_storage_text);
            if let Some(value) = &found {
                self.core.cache_set(key.to_owned(), value.clone());
            }
            Ok(found)
        })
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        validate_key(key)?;
        self.ensure_kv_loaded()?;
        self.core.time_op("set", || {
            let statement = self.generator.upsert(key, &value);
            if let Some(SqlParam::Text(text)) = statement.params.get(1) {
                validate_storage_text(text)?;
            }
            execute(&self.conn.lock(), &statement.sql, &statement.params).map_err(|err| {
                StorageError::write_failed("key-value upsert failed")
                    .with_key(key.to_owned())
                    .with_table(self.generator.table().to_owned())
                    .with_source(err)
            })?;
            self.core.cache_set(key.to_owned(), value.clone());
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.ensure_kv_loaded()?;
        self.core.time_op("delete", || {
            let statement = self.generator.delete(key);
            let changed = execute(&self.conn.lock(), &statement.sql, &statement.params)
                .map_err(|err| {
                    StorageError::delete_failed("key-value delete failed")
                        .with_key(key.to_owned())
                        .with_source(err)
                })?;
            self.core.cache_delete(key);
            Ok(changed > 0)
        })
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.ensure_kv_loaded()?;
        if self.core.cache_contains(key) {
            return Ok(true);
        }
        let statement = self.generator.exists(key);
        let rows = query_rows(&self.conn.lock(), &statement.sql, &statement.params)?;
        Ok(!rows.is_empty())
    }

    fn clear(&self) -> StorageResult<()> {
        self.ensure_kv_loaded()?;
        execute(&self.conn.lock(), &self.generator.clear(), &[])
            .map_err(|err| StorageError::delete_failed("clear failed").with_source(err))?;
        self.core.cache_clear();
        Ok(())
    }

    fn size(&self) -> StorageResult<usize> {
        let rows = query_rows(&self.conn.lock(), &self.generator.count(), &[])?;
        let count = rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(count as usize)
    }

    fn keys(&self) -> StorageResult<StorageIter<'_, String>> {
        let pages = Paged::new(ITER_PAGE_SIZE, move |offset, limit| {
            let sql = self.generator.page_keys(offset, limit);
            let rows = query_rows(&self.conn.lock(), &sql, &[])?;
            Ok(rows
                .into_iter()
                .filter_map(|row| row.get("key").and_then(Value::as_str).map(str::to_owned))
                .collect())
        });
        Ok(Box::new(pages))
    }

    fn values(&self) -> StorageResult<StorageIter<'_, Value>> {
        let entries = self.entries()?;
        Ok(Box::new(entries.map(|entry| entry.map(|(_, value)| value))))
    }

    fn entries(&self) -> StorageResult<StorageIter<'_, (String, Value)>> {
        let pages = Paged::new(ITER_PAGE_SIZE, move |offset, limit| {
            let sql = self.generator.page_entries(offset, limit);
            let rows = query_rows(&self.conn.lock(), &sql, &[])?;
            Ok(rows
                .into_iter()
                .filter_map(|row| {
                    let key = row.get("key")?.as_str()?.to_owned();
                    let value = from_storage_text(row.get("value")?.as_str()?);
                    Some((key, value))
                })
                .collect())
        });
        Ok(Box::new(pages))
    }
}

impl BatchStorage for RelationalStore {
    /// The whole batch runs in one engine transaction.
    fn set_many(&self, entries: Vec<(String, Value)>) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for (key, _) in &entries {
            validate_key(key)?;
        }
        self.ensure_kv_loaded()?;
        let statement = self.generator.batch_upsert(&entries)?;
        self.core.transaction(&self.hooks(), || {
            execute(&self.conn.lock(), &statement.sql, &statement.params)
                .map_err(|err| StorageError::write_failed("batch upsert failed").with_source(err))?;
            for (key, value) in &entries {
                self.core.cache_set(key.clone(), value.clone());
            }
            Ok(())
        })
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.ensure_kv_loaded()?;
        let statement = self.generator.batch_delete(keys)?;
        let deleted = execute(&self.conn.lock(), &statement.sql, &statement.params)
            .map_err(|err| StorageError::delete_failed("batch delete failed").with_source(err))?;
        for key in keys {
            self.core.cache_delete(key);
        }
        Ok(deleted)
    }
}

impl SemanticStorage for RelationalStore {
    fn query(&self, query: &SemanticQuery) -> QueryEnvelope {
        match crate::sql::semantic::build(query) {
            Ok(statement) => run_envelope(&self.conn, &statement.sql, &statement.params),
            Err(err) => QueryEnvelope::failure(err),
        }
    }

    fn execute_sql(&self, sql: &str, params: &[Value]) -> QueryEnvelope {
        let bound = crate::sql::types::bind_params(params);
        run_envelope(&self.conn, sql, &bound)
    }

    fn aggregate(
        &self,
        table: &str,
        op: AggregateOp,
        field: &str,
        filters: &[Filter],
    ) -> StorageResult<Value> {
        let mut query = SemanticQuery::from_table(table)
            .aggregate(Aggregation::new(op, field).with_alias("result"));
        query.filters = filters.to_vec();
        let statement = crate::sql::semantic::build(&query)?;
        let rows = query_rows(&self.conn.lock(), &statement.sql, &statement.params)?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("result"))
            .unwrap_or(Value::Null))
    }

    fn group_by(
        &self,
        table: &str,
        keys: &[String],
        aggregations: &[Aggregation],
        filters: &[Filter],
    ) -> QueryEnvelope {
        let mut query = SemanticQuery::from_table(table);
        query.select = keys.to_vec();
        query.group_by = keys.to_vec();
        query.aggregations = aggregations.to_vec();
        query.filters = filters.to_vec();
        match crate::sql::semantic::build(&query) {
            Ok(statement) => run_envelope(&self.conn, &statement.sql, &statement.params),
            Err(err) => QueryEnvelope::failure(err),
        }
    }

    fn explain_query(&self, sql: &str) -> QueryEnvelope {
        run_envelope(&self.conn, &format!("EXPLAIN QUERY PLAN {sql}"), &[])
    }
    // Materialized views, search indexes, and columnar I/O stay at their
    // NotImplemented defaults; the columnar backend is the conformance
    // target for those.
}

/// Helper used by the envelope-returning entry points: times the query and
/// folds recoverable failures into the envelope.
pub(crate) fn run_envelope(
    conn: &Arc<Mutex<Connection>>,
    sql: &str,
    params: &[SqlParam],
) -> QueryEnvelope {
    let started = std::time::Instant::now();
    match query_rows(&conn.lock(), sql, params) {
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
