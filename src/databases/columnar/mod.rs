//! Columnar adapter over an embedded analytic SQL engine.
//!
//! This is the OLAP-facing backend: declarative semantic queries,
//! aggregation and grouping, materialized views (registry plus
//! rebuild-on-refresh), registry-backed search indexes, schema
//! introspection through `information_schema`, and parquet export/import
//! gated by configuration. The key-value surface writes through to a
//! two-column table produced by the SQL generator.

mod parquet;

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;

use crate::base::{AdapterCore, OperationTiming, Paged, TransactionHooks};
use crate::config::ColumnarConfig;
use crate::connection::{with_table_creation_lock, ConnectionRegistry};
use crate::error::{StorageError, StorageResult};
use crate::sql::generator::SqlGenerator;
use crate::sql::ident;
use crate::sql::types::{
    from_storage_text, normalize_large_integers, validate_storage_text, SqlParam,
};
use crate::traits::semantic::{
    AggregateOp, Aggregation, ColumnDef, ColumnType, Filter, QueryEnvelope, QueryMetadata, Row,
    SemanticQuery, SemanticStorage,
};
use crate::traits::storage::{validate_key, BatchStorage, SaveableStorage, Storage, StorageIter};

/// Shared engine connections, keyed by database path.
static DUCKDB_CONNECTIONS: Lazy<ConnectionRegistry<Mutex<duckdb::Connection>>> =
    Lazy::new(ConnectionRegistry::default);

const ITER_PAGE_SIZE: u64 = 256;
const DEFAULT_SEARCH_LIMIT: usize = 100;

fn query_failed(err: duckdb::Error) -> StorageError {
    StorageError::query_failed("statement execution failed").with_source(err)
}

fn cell_to_json(cell: duckdb::types::ValueRef<'_>) -> Value {
    use duckdb::types::ValueRef;
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i),
        ValueRef::SmallInt(i) => Value::from(i),
        ValueRef::Int(i) => Value::from(i),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => match i64::try_from(i) {
            Ok(fits) => Value::from(fits),
            Err(_) => Value::String(i.to_string()),
        },
        ValueRef::UTinyInt(i) => Value::from(i),
        ValueRef::USmallInt(i) => Value::from(i),
        ValueRef::UInt(i) => Value::from(i),
        ValueRef::UBigInt(i) => Value::from(i),
        ValueRef::Float(f) => {
            serde_json::Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number)
        }
        ValueRef::Double(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Decimal(d) => Value::String(d.to_string()),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        ValueRef::Timestamp(_, v) => Value::from(v),
        ValueRef::Date32(v) => Value::from(v),
        ValueRef::Time64(_, v) => Value::from(v),
        other => Value::String(format!("{other:?}")),
    }
}

pub(crate) fn query_rows(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[SqlParam],
) -> StorageResult<Vec<Row>> {
    let mut statement = conn.prepare(sql).map_err(query_failed)?;
    let mut rows = statement
        .query(duckdb::params_from_iter(params.iter()))
        .map_err(query_failed)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(query_failed)? {
        let statement = row.as_ref();
        let names = statement.column_names();
        let mut object = Row::new();
        for (index, name) in names.iter().enumerate() {
            let cell = row.get_ref(index).map_err(query_failed)?;
            object.insert(name.to_string(), cell_to_json(cell));
        }
        out.push(object);
    }
    normalize_large_integers(&mut out);
    Ok(out)
}

pub(crate) fn execute(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[SqlParam],
) -> StorageResult<usize> {
    conn.execute(sql, duckdb::params_from_iter(params.iter()))
        .map_err(query_failed)
}

fn run_envelope(
    conn: &Arc<Mutex<duckdb::Connection>>,
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

/// Escape LIKE wildcards in a user-supplied search term.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

struct DuckTransaction<'a> {
    conn: &'a Arc<Mutex<duckdb::Connection>>,
}

impl TransactionHooks for DuckTransaction<'_> {
    fn begin(&self) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch("BEGIN TRANSACTION")
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
}

/// Columnar store: key-value plus the semantic/OLAP capability surface.
pub struct ColumnarStore {
    config: ColumnarConfig,
    conn: Arc<Mutex<duckdb::Connection>>,
    generator: SqlGenerator,
    core: AdapterCore<Value>,
}

impl ColumnarStore {
    /// Open (or join) the database and ensure the key-value and registry
    /// tables exist.
    pub fn new(config: ColumnarConfig) -> StorageResult<Self> {
        config.validate()?;
        let generator = SqlGenerator::new(&config.table)?;
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

        let conn = DUCKDB_CONNECTIONS.get_or_open(&address, || open_connection(&config))?;
        let store = Self {
            generator,
            core: AdapterCore::new(config.performance.clone()),
            conn,
            config,
        };
        with_table_creation_lock(&address, &store.config.table, || store.create_schema())?;
        Ok(store)
    }

    fn create_schema(&self) -> StorageResult<()> {
        let ddl = format!(
            "{}; \
             CREATE TABLE IF NOT EXISTS matview_registry ( \
               name TEXT PRIMARY KEY, definition TEXT NOT NULL, refreshed_at TEXT \
             ); \
             CREATE TABLE IF NOT EXISTS search_index_registry ( \
               table_name TEXT PRIMARY KEY, columns TEXT NOT NULL \
             );",
            self.generator.create_table()
        );
        self.conn
            .lock()
            .execute_batch(&ddl)
            .map_err(|err| StorageError::io("schema creation failed").with_source(err))
    }

    pub fn config(&self) -> &ColumnarConfig {
        &self.config
    }

    fn hooks(&self) -> DuckTransaction<'_> {
        DuckTransaction { conn: &self.conn }
    }

    /// Run `f` inside an engine transaction with cache-snapshot semantics.
    pub fn transaction<R>(&self, f: impl FnOnce() -> StorageResult<R>) -> StorageResult<R> {
        self.core.transaction(&self.hooks(), f)
    }

    pub fn performance_stats(&self) -> Vec<OperationTiming> {
        self.core.performance_stats()
    }

    fn table_count(&self, table: &str) -> StorageResult<u64> {
        ident::validate(table)?;
        let rows = query_rows(
            &self.conn.lock(),
            &format!("SELECT COUNT(*) AS n FROM {table}"),
            &[],
        )?;
        Ok(rows.first().and_then(|r| r.get("n")).and_then(Value::as_u64).unwrap_or(0))
    }

    fn require_export_enabled(&self) -> StorageResult<()> {
        if !self.config.enable_columnar_export {
            return Err(StorageError::invalid_value(
                "columnar export/import is disabled; set enable_columnar_export",
            ));
        }
        Ok(())
    }

    /// Release this instance's view of the connection. The next operation
    /// reloads automatically.
    pub fn close(&self) {
        self.core.mark_closed();
    }

    /// Evict this database from the process-wide registry.
    pub fn close_database(&self) -> StorageResult<()> {
        self.core.mark_closed();
        DUCKDB_CONNECTIONS.evict(&self.config.database.display().to_string());
        Ok(())
    }

    /// Evict every cached engine connection in the process.
    pub fn clear_connection_cache() {
        DUCKDB_CONNECTIONS.clear();
    }
}

fn open_connection(config: &ColumnarConfig) -> StorageResult<Mutex<duckdb::Connection>> {
    let open_failed = |err: duckdb::Error| {
        StorageError::connection_failed("cannot open database")
            .with_database(config.database.display().to_string())
            .with_source(err)
    };
    let conn = if config.read_only {
        let engine_config = duckdb::Config::default()
            .access_mode(duckdb::AccessMode::ReadOnly)
            .map_err(open_failed)?;
        duckdb::Connection::open_with_flags(&config.database, engine_config).map_err(open_failed)?
    } else {
        duckdb::Connection::open(&config.database).map_err(open_failed)?
    };
    if let Some(threads) = config.threads {
        conn.execute_batch(&format!("PRAGMA threads = {threads}"))
            .map_err(|err| StorageError::connection_failed("cannot set threads").with_source(err))?;
    }
    if let Some(bytes) = config.buffer_pool_bytes {
        conn.execute_batch(&format!("SET memory_limit = '{bytes}B'"))
            .map_err(|err| {
                StorageError::connection_failed("cannot set memory limit").with_source(err)
            })?;
    }
    Ok(Mutex::new(conn))
}

impl Storage for ColumnarStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;
        self.core.time_op("get", || {
            let statement = self.generator.get(key);
            let rows = query_rows(&self.conn.lock(), &statement.sql, &statement.params)?;
            Ok(rows
                .first()
                .and_then(|row| row.get("value"))
                .and_then(Value::as_str)
                .map(from_storage_text))
        })
    }

    fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        validate_key(key)?;
        self.core.time_op("set", || {
            let statement = self.generator.upsert(key, &value);
            if let Some(SqlParam::Text(text)) = statement.params.get(1) {
                validate_storage_text(text)?;
            }
            execute(&self.conn.lock(), &statement.sql, &statement.params)
                .map_err(|err| {
                    StorageError::write_failed("key-value upsert failed")
                        .with_key(key.to_owned())
                        .with_table(self.generator.table().to_owned())
                        .with_source(err)
                })
                .map(|_| ())
        })
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.core.time_op("delete", || {
            let statement = self.generator.delete(key);
            let changed = execute(&self.conn.lock(), &statement.sql, &statement.params)
                .map_err(|err| {
                    StorageError::delete_failed("key-value delete failed")
                        .with_key(key.to_owned())
                        .with_source(err)
                })?;
            Ok(changed > 0)
        })
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let statement = self.generator.exists(key);
        let rows = query_rows(&self.conn.lock(), &statement.sql, &statement.params)?;
        Ok(!rows.is_empty())
    }

    fn clear(&self) -> StorageResult<()> {
        execute(&self.conn.lock(), &self.generator.clear(), &[])
            .map_err(|err| StorageError::delete_failed("clear failed").with_source(err))?;
        Ok(())
    }

    fn size(&self) -> StorageResult<usize> {
        Ok(self.table_count(self.generator.table())? as usize)
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

impl BatchStorage for ColumnarStore {
    /// The whole batch runs in one engine transaction.
    fn set_many(&self, entries: Vec<(String, Value)>) -> StorageResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        for (key, _) in &entries {
            validate_key(key)?;
        }
        let statement = self.generator.batch_upsert(&entries)?;
        self.transaction(|| {
            execute(&self.conn.lock(), &statement.sql, &statement.params)
                .map_err(|err| StorageError::write_failed("batch upsert failed").with_source(err))
                .map(|_| ())
        })
    }

    fn delete_many(&self, keys: &[String]) -> StorageResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let statement = self.generator.batch_delete(keys)?;
        execute(&self.conn.lock(), &statement.sql, &statement.params)
            .map_err(|err| StorageError::delete_failed("batch delete failed").with_source(err))
    }
}

impl SaveableStorage for ColumnarStore {
    /// Force a checkpoint of the write-ahead state into the database file.
    fn save(&self) -> StorageResult<()> {
        self.conn
            .lock()
            .execute_batch("CHECKPOINT")
            .map_err(|err| StorageError::io("checkpoint failed").with_source(err))
    }
}

impl SemanticStorage for ColumnarStore {
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

    fn create_materialized_view(&self, name: &str, definition: &str) -> StorageResult<()> {
        ident::validate(name)?;
        let conn = self.conn.lock();
        conn.execute_batch(&format!("CREATE TABLE {name} AS {definition}"))
            .map_err(|err| {
                StorageError::io("materialized view creation failed")
                    .with_table(name.to_owned())
                    .with_source(err)
            })?;
        execute(
            &conn,
            "INSERT INTO matview_registry (name, definition, refreshed_at) \
             VALUES (?, ?, CAST(now() AS TEXT)) \
             ON CONFLICT (name) DO UPDATE SET definition = excluded.definition",
            &[
                SqlParam::Text(name.to_owned()),
                SqlParam::Text(definition.to_owned()),
            ],
        )?;
        Ok(())
    }

    fn refresh_materialized_view(&self, name: &str) -> StorageResult<()> {
        ident::validate(name)?;
        let conn = self.conn.lock();
        let rows = query_rows(
            &conn,
            "SELECT definition FROM matview_registry WHERE name = ?",
            &[SqlParam::Text(name.to_owned())],
        )?;
        let Some(definition) = rows
            .first()
            .and_then(|row| row.get("definition"))
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            return Err(StorageError::invalid_value(format!(
                "materialized view '{name}' is not registered"
            )));
        };
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {name}; CREATE TABLE {name} AS {definition}"))
            .map_err(|err| {
                StorageError::io("materialized view refresh failed")
                    .with_table(name.to_owned())
                    .with_source(err)
            })?;
        execute(
            &conn,
            "UPDATE matview_registry SET refreshed_at = CAST(now() AS TEXT) WHERE name = ?",
            &[SqlParam::Text(name.to_owned())],
        )?;
        Ok(())
    }

    fn query_materialized_view(&self, name: &str) -> QueryEnvelope {
        if let Err(err) = ident::validate(name) {
            return QueryEnvelope::failure(err);
        }
        run_envelope(&self.conn, &format!("SELECT * FROM {name}"), &[])
    }

    fn drop_materialized_view(&self, name: &str) -> StorageResult<()> {
        ident::validate(name)?;
        let conn = self.conn.lock();
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {name}"))
            .map_err(|err| {
                StorageError::delete_failed("materialized view drop failed")
                    .with_table(name.to_owned())
                    .with_source(err)
            })?;
        execute(
            &conn,
            "DELETE FROM matview_registry WHERE name = ?",
            &[SqlParam::Text(name.to_owned())],
        )?;
        Ok(())
    }

    fn list_materialized_views(&self) -> StorageResult<Vec<String>> {
        let rows = query_rows(
            &self.conn.lock(),
            "SELECT name FROM matview_registry ORDER BY name",
            &[],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_owned))
            .collect())
    }

    fn create_search_index(&self, table: &str, columns: &[String]) -> StorageResult<()> {
        ident::validate(table)?;
        if columns.is_empty() {
            return Err(StorageError::invalid_value("search index requires at least one column"));
        }
        for column in columns {
            ident::validate(column)?;
        }
        execute(
            &self.conn.lock(),
            "INSERT INTO search_index_registry (table_name, columns) VALUES (?, ?) \
             ON CONFLICT (table_name) DO UPDATE SET columns = excluded.columns",
            &[
                SqlParam::Text(table.to_owned()),
                SqlParam::Text(serde_json::to_string(columns)?),
            ],
        )?;
        Ok(())
    }

    fn search(&self, table: &str, term: &str, limit: Option<usize>) -> QueryEnvelope {
        if let Err(err) = ident::validate(table) {
            return QueryEnvelope::failure(err);
        }
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let columns = {
            let rows = match query_rows(
                &self.conn.lock(),
                "SELECT columns FROM search_index_registry WHERE table_name = ?",
                &[SqlParam::Text(table.to_owned())],
            ) {
                Ok(rows) => rows,
                Err(err) => return QueryEnvelope::failure(err),
            };
            let Some(raw) = rows
                .first()
                .and_then(|row| row.get("columns"))
                .and_then(Value::as_str)
            else {
                return QueryEnvelope::failure(format!(
                    "no search index registered for table '{table}'"
                ));
            };
            match serde_json::from_str::<Vec<String>>(raw) {
                Ok(columns) => columns,
                Err(err) => return QueryEnvelope::failure(err),
            }
        };
        for column in &columns {
            if let Err(err) = ident::validate(column) {
                return QueryEnvelope::failure(err);
            }
        }
        let clauses: Vec<String> = columns
            .iter()
            .map(|column| format!("CAST({column} AS TEXT) LIKE ? ESCAPE '\\'"))
            .collect();
        let pattern = format!("%{}%", escape_like(term));
        let params: Vec<SqlParam> = columns
            .iter()
            .map(|_| SqlParam::Text(pattern.clone()))
            .collect();
        let sql = format!(
            "SELECT * FROM {table} WHERE {} LIMIT {limit}",
            clauses.join(" OR ")
        );
        run_envelope(&self.conn, &sql, &params)
    }

    fn drop_search_index(&self, table: &str) -> StorageResult<()> {
        ident::validate(table)?;
        execute(
            &self.conn.lock(),
            "DELETE FROM search_index_registry WHERE table_name = ?",
            &[SqlParam::Text(table.to_owned())],
        )?;
        Ok(())
    }

    fn define_schema(&self, table: &str, columns: &[ColumnDef]) -> StorageResult<()> {
        let generator = SqlGenerator::new(table)?;
        let ddl = generator.define_schema(columns)?;
        self.conn
            .lock()
            .execute_batch(&ddl)
            .map_err(|err| {
                StorageError::io("schema definition failed")
                    .with_table(table.to_owned())
                    .with_source(err)
            })
    }

    fn get_schema(&self, table: &str) -> StorageResult<Vec<ColumnDef>> {
        ident::validate(table)?;
        let rows = query_rows(
            &self.conn.lock(),
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_name = ? ORDER BY ordinal_position",
            &[SqlParam::Text(table.to_owned())],
        )?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let name = row.get("column_name")?.as_str()?.to_owned();
                let engine_type = row.get("data_type")?.as_str()?.to_ascii_uppercase();
                let column_type = if engine_type.contains("INT") {
                    ColumnType::Integer
                } else if engine_type.contains("DOUBLE")
                    || engine_type.contains("FLOAT")
                    || engine_type.contains("REAL")
                    || engine_type.contains("DECIMAL")
                {
                    ColumnType::Real
                } else if engine_type.contains("BOOL") {
                    ColumnType::Boolean
                } else if engine_type.contains("JSON") {
                    ColumnType::Json
                } else {
                    ColumnType::Text
                };
                Some(ColumnDef { name, column_type })
            })
            .collect())
    }

    fn export_to_columnar(
        &self,
        source: &crate::traits::semantic::ExportSource,
        path: &str,
    ) -> StorageResult<()> {
        parquet::export(self, source, path)
    }

    fn import_from_columnar(&self, table: &str, path: &str) -> StorageResult<u64> {
        parquet::import(self, table, path)
    }

    fn query_columnar(&self, path: &str) -> QueryEnvelope {
        parquet::query(self, path)
    }

    fn explain_query(&self, sql: &str) -> QueryEnvelope {
        run_envelope(&self.conn, &format!("EXPLAIN {sql}"), &[])
    }
}
