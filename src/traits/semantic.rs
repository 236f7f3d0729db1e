//! Semantic/OLAP capability interface.
//!
//! A [`SemanticQuery`] is a declarative description of a tabular query —
//! projection, filters, grouping, aggregation, ordering, pagination — that
//! the semantic builder translates into parameterized SQL. Results come
//! back in a [`QueryEnvelope`]: recoverable backend errors land in the
//! envelope's error list instead of unwinding through the caller.
//!
//! Every method has a default body answering `NotImplemented`, so backends
//! implement exactly the slice they support and the rest degrades
//! gracefully at runtime rather than failing at compile time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};

/// Comparison operators accepted in a [`Filter`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    #[strum(serialize = "=")]
    Eq,
    #[serde(rename = "<>")]
    #[strum(serialize = "<>")]
    Ne,
    #[serde(rename = "<")]
    #[strum(serialize = "<")]
    Lt,
    #[serde(rename = "<=")]
    #[strum(serialize = "<=")]
    Le,
    #[serde(rename = ">")]
    #[strum(serialize = ">")]
    Gt,
    #[serde(rename = ">=")]
    #[strum(serialize = ">=")]
    Ge,
    #[serde(rename = "IN")]
    #[strum(serialize = "IN")]
    In,
    #[serde(rename = "LIKE")]
    #[strum(serialize = "LIKE")]
    Like,
}

/// One binary comparison in a WHERE clause. The value always binds as a
/// parameter; only the validated field name reaches the statement text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self { field: field.into(), operator, value }
    }
}

/// Aggregate operators.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregation in the SELECT list, aliased `{op}_{field}` unless an
/// explicit alias is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub operator: AggregateOp,
    pub field: String,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Aggregation {
    pub fn new(operator: AggregateOp, field: impl Into<String>) -> Self {
        Self { operator, field: field.into(), alias: None }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The effective output column name.
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.operator, self.field))
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// Declarative query over an abstract tabular view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticQuery {
    pub from: String,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(rename = "where", default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl SemanticQuery {
    /// Start a query against `from`, selecting everything.
    pub fn from_table(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            select: Vec::new(),
            filters: Vec::new(),
            group_by: Vec::new(),
            aggregations: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn select(mut self, column: impl Into<String>) -> Self {
        self.select.push(column.into());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy { field: field.into(), descending });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A result row: column name to JSON value.
pub type Row = Map<String, Value>;

/// Execution metadata attached to every envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub execution_time_ms: u64,
    pub rows_scanned: u64,
    pub from_cache: bool,
}

/// The `{data, metadata, errors}` result shape of semantic and SQL
/// operations. Recoverable failures produce an envelope with empty data
/// and a populated error list; the envelope itself never unwinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    pub data: Vec<Row>,
    pub metadata: QueryMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl QueryEnvelope {
    /// A successful envelope.
    pub fn ok(data: Vec<Row>, metadata: QueryMetadata) -> Self {
        Self { data, metadata, errors: Vec::new() }
    }

    /// A failure envelope carrying the error message.
    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            data: Vec::new(),
            metadata: QueryMetadata::default(),
            errors: vec![error.to_string()],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Column types accepted by `define_schema`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
    strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Json,
}

/// One column in a schema description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

/// What to export to a columnar file: a whole table or an arbitrary query.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportSource {
    Table(String),
    Query(String),
}

fn unsupported(op: &str) -> StorageError {
    StorageError::not_implemented(format!("{op} is not supported on this backend"))
}

/// Semantic/OLAP storage capability.
pub trait SemanticStorage: Send + Sync {
    /// Run a declarative query. Recoverable failures land in the envelope.
    fn query(&self, query: &SemanticQuery) -> QueryEnvelope {
        let _ = query;
        QueryEnvelope::failure(unsupported("semantic query"))
    }

    /// Execute parameterized SQL.
    fn execute_sql(&self, sql: &str, params: &[Value]) -> QueryEnvelope {
        let _ = (sql, params);
        QueryEnvelope::failure(unsupported("execute_sql"))
    }

    /// One aggregate over a table, optionally filtered.
    fn aggregate(
        &self,
        table: &str,
        op: AggregateOp,
        field: &str,
        filters: &[Filter],
    ) -> StorageResult<Value> {
        let _ = (table, op, field, filters);
        Err(unsupported("aggregate"))
    }

    /// Grouped aggregation over a table.
    fn group_by(
        &self,
        table: &str,
        keys: &[String],
        aggregations: &[Aggregation],
        filters: &[Filter],
    ) -> QueryEnvelope {
        let _ = (table, keys, aggregations, filters);
        QueryEnvelope::failure(unsupported("group_by"))
    }

    // Materialized views
    fn create_materialized_view(&self, name: &str, definition: &str) -> StorageResult<()> {
        let _ = (name, definition);
        Err(unsupported("create_materialized_view"))
    }
    fn refresh_materialized_view(&self, name: &str) -> StorageResult<()> {
        let _ = name;
        Err(unsupported("refresh_materialized_view"))
    }
    fn query_materialized_view(&self, name: &str) -> QueryEnvelope {
        let _ = name;
        QueryEnvelope::failure(unsupported("query_materialized_view"))
    }
    fn drop_materialized_view(&self, name: &str) -> StorageResult<()> {
        let _ = name;
        Err(unsupported("drop_materialized_view"))
    }
    fn list_materialized_views(&self) -> StorageResult<Vec<String>> {
        Err(unsupported("list_materialized_views"))
    }

    // Search
    fn create_search_index(&self, table: &str, columns: &[String]) -> StorageResult<()> {
        let _ = (table, columns);
        Err(unsupported("create_search_index"))
    }
    fn search(&self, table: &str, term: &str, limit: Option<usize>) -> QueryEnvelope {
        let _ = (table, term, limit);
        QueryEnvelope::failure(unsupported("search"))
    }
    fn drop_search_index(&self, table: &str) -> StorageResult<()> {
        let _ = table;
        Err(unsupported("drop_search_index"))
    }

    // Schema
    fn define_schema(&self, table: &str, columns: &[ColumnDef]) -> StorageResult<()> {
        let _ = (table, columns);
        Err(unsupported("define_schema"))
    }
    fn get_schema(&self, table: &str) -> StorageResult<Vec<ColumnDef>> {
        let _ = table;
        Err(unsupported("get_schema"))
    }

    // Columnar I/O
    fn export_to_columnar(&self, source: &ExportSource, path: &str) -> StorageResult<()> {
        let _ = (source, path);
        Err(unsupported("export_to_columnar"))
    }
    /// Import a columnar file, returning the number of imported rows
    /// (measured as the before/after count delta).
    fn import_from_columnar(&self, table: &str, path: &str) -> StorageResult<u64> {
        let _ = (table, path);
        Err(unsupported("import_from_columnar"))
    }
    /// Query a columnar file in place.
    fn query_columnar(&self, path: &str) -> QueryEnvelope {
        let _ = path;
        QueryEnvelope::failure(unsupported("query_columnar"))
    }

    /// The engine's plan for a statement.
    fn explain_query(&self, sql: &str) -> QueryEnvelope {
        let _ = sql;
        QueryEnvelope::failure(unsupported("explain_query"))
    }
}
