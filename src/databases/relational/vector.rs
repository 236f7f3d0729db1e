//! Vector operations over the relational backend.
//!
//! Embeddings are JSON arrays in an `embedding` column; the three distance
//! metrics are registered as deterministic SQL scalar functions on every
//! connection, so ranking happens inside the engine. The query vector is
//! the one value rendered as a literal — after every component is
//! validated finite — matching how the engine's native vector extensions
//! take their probe vectors. Filters and thresholds bind as parameters.

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;
use serde_json::Value;
use tracing::warn;

use crate::error::{StorageError, StorageResult};
use crate::sql::ident;
use crate::sql::types::SqlParam;
use crate::traits::graph::validate_result_limit;
use crate::traits::semantic::{Filter, FilterOperator, Row};
use crate::traits::vector::{DistanceMetric, VectorIndexKind, VectorSearchOptions, VectorStorage};

use super::{execute, query_rows, RelationalStore};

const DEFAULT_SEARCH_LIMIT: usize = 10;

fn parse_vector(ctx: &Context<'_>, index: usize) -> rusqlite::Result<Vec<f64>> {
    let text: String = ctx.get(index)?;
    serde_json::from_str(&text).map_err(|err| {
        rusqlite::Error::UserFunctionError(format!("not a JSON vector: {err}").into())
    })
}

fn paired(ctx: &Context<'_>) -> rusqlite::Result<(Vec<f64>, Vec<f64>)> {
    let a = parse_vector(ctx, 0)?;
    let b = parse_vector(ctx, 1)?;
    if a.len() != b.len() {
        return Err(rusqlite::Error::UserFunctionError(
            format!("vector length mismatch: {} vs {}", a.len(), b.len()).into(),
        ));
    }
    Ok((a, b))
}

/// Register `vec_distance_cosine`, `vec_distance_euclidean`, and
/// `vec_distance_inner_product` on a connection.
pub(crate) fn register_vector_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("vec_distance_cosine", 2, flags, |ctx| {
        let (a, b) = paired(ctx)?;
        let dot: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
        let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return Ok(1.0);
        }
        Ok(1.0 - dot / (norm_a * norm_b))
    })?;
    conn.create_scalar_function("vec_distance_euclidean", 2, flags, |ctx| {
        let (a, b) = paired(ctx)?;
        Ok(a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt())
    })?;
    conn.create_scalar_function("vec_distance_inner_product", 2, flags, |ctx| {
        let (a, b) = paired(ctx)?;
        // Negated so that smaller means closer, like the native operator.
        Ok(-a.iter().zip(&b).map(|(x, y)| x * y).sum::<f64>())
    })?;
    Ok(())
}

fn distance_function(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "vec_distance_cosine",
        DistanceMetric::Euclidean => "vec_distance_euclidean",
        DistanceMetric::InnerProduct => "vec_distance_inner_product",
    }
}

/// Validate and render the probe vector as a JSON-array literal.
fn render_vector_literal(vector: &[f64]) -> StorageResult<String> {
    if vector.is_empty() {
        return Err(StorageError::invalid_value("query vector must not be empty"));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(StorageError::invalid_value("query vector contains a non-finite component"));
    }
    let parts: Vec<String> = vector.iter().map(f64::to_string).collect();
    Ok(format!("[{}]", parts.join(",")))
}

fn render_data_filter(filter: &Filter, params: &mut Vec<SqlParam>) -> StorageResult<String> {
    ident::validate(&filter.field)?;
    params.push(SqlParam::Text(format!("$.{}", filter.field)));
    match filter.operator {
        FilterOperator::In => {
            let Value::Array(items) = &filter.value else {
                return Err(StorageError::invalid_value(format!(
                    "IN filter on '{}' requires an array value",
                    filter.field
                )));
            };
            if items.is_empty() {
                return Err(StorageError::invalid_value(format!(
                    "IN filter on '{}' requires a non-empty array",
                    filter.field
                )));
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            params.extend(items.iter().map(SqlParam::from_value));
            Ok(format!("json_extract(data, ?) IN ({placeholders})"))
        }
        operator => {
            params.push(SqlParam::from_value(&filter.value));
            Ok(format!("json_extract(data, ?) {operator} ?"))
        }
    }
}

impl RelationalStore {
    /// The rows-plus-embedding table used by the vector surface.
    fn ensure_vector_table(&self, table: &str) -> StorageResult<()> {
        ident::validate(table)?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} ( \
               id INTEGER PRIMARY KEY AUTOINCREMENT, \
               data TEXT NOT NULL DEFAULT '{{}}', \
               embedding TEXT NOT NULL \
             )"
        );
        self.conn()
            .lock()
            .execute_batch(&ddl)
            .map_err(|err| StorageError::io("vector table creation failed").with_source(err))
    }

    fn engine_supports(_kind: VectorIndexKind) -> bool {
        // The embedded engine ships no native ANN index family; both kinds
        // are emulated over a plain index plus registry metadata.
        false
    }
}

impl VectorStorage for RelationalStore {
    fn create_vector_index(
        &self,
        table: &str,
        column: &str,
        kind: VectorIndexKind,
    ) -> StorageResult<String> {
        ident::validate(table)?;
        ident::validate(column)?;
        self.ensure_vector_table(table)?;

        let mut effective = kind;
        if !Self::engine_supports(effective) {
            warn!(
                requested = %kind,
                fallback = %kind.fallback(),
                "requested vector index kind unavailable, trying fallback"
            );
            effective = kind.fallback();
        }
        // `emulated` only governs the physical structure below; the
        // recorded kind stays whatever the fallback chain settled on.
        let emulated = !Self::engine_supports(effective);
        if emulated {
            warn!(kind = %effective, "no native vector index family; emulating with a btree index");
        }

        let name = format!("idx_{table}_{column}_vec");
        let ddl = format!("CREATE INDEX IF NOT EXISTS {name} ON {table} ({column})");
        self.conn()
            .lock()
            .execute_batch(&ddl)
            .map_err(|err| StorageError::io("vector index creation failed").with_source(err))?;

        let vector = &self.config().vector;
        let params_json = serde_json::json!({
            "emulated": emulated,
            "ivf_lists": vector.ivf_lists,
            "ivf_probes": vector.ivf_probes,
            "hnsw_m": vector.hnsw_m,
            "hnsw_ef_construction": vector.hnsw_ef_construction,
        });
        let sql = "INSERT INTO vector_index_registry \
                   (index_name, table_name, column_name, kind, distance_metric, params) \
                   VALUES (?, ?, ?, ?, ?, ?) \
                   ON CONFLICT (index_name) DO UPDATE SET \
                     kind = excluded.kind, params = excluded.params";
        let params = [
            SqlParam::Text(name.clone()),
            SqlParam::Text(table.to_owned()),
            SqlParam::Text(column.to_owned()),
            SqlParam::Text(effective.to_string()),
            SqlParam::Text(vector.distance_metric.to_string()),
            SqlParam::Text(params_json.to_string()),
        ];
        execute(&self.conn().lock(), sql, &params)
            .map_err(|err| StorageError::write_failed("index registry update failed").with_source(err))?;
        Ok(name)
    }

    fn vector_search(
        &self,
        table: &str,
        query_vector: &[f64],
        options: &VectorSearchOptions,
    ) -> StorageResult<Vec<Row>> {
        ident::validate(table)?;
        let limit = validate_result_limit(options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))?;
        let expected = self.config().vector.vector_dimensions;
        if query_vector.len() != expected {
            return Err(StorageError::invalid_value(format!(
                "query vector has {} dimensions, configured dimensionality is {expected}",
                query_vector.len()
            )));
        }
        let literal = render_vector_literal(query_vector)?;
        let metric = options.metric.unwrap_or(self.config().vector.distance_metric);
        let function = distance_function(metric);

        let mut params = Vec::new();
        let mut where_clause = String::new();
        if !options.filters.is_empty() {
            let mut clauses = Vec::with_capacity(options.filters.len());
            for filter in &options.filters {
                clauses.push(render_data_filter(filter, &mut params)?);
            }
            where_clause = format!(" WHERE {}", clauses.join(" AND "));
        }

        let ranked = format!(
            "SELECT id, data, {function}(embedding, '{literal}') AS distance \
               FROM {table}{where_clause}"
        );
        let sql = match options.threshold {
            Some(threshold) => {
                if !threshold.is_finite() {
                    return Err(StorageError::invalid_value("threshold must be finite"));
                }
                params.push(SqlParam::Real(threshold));
                format!(
                    "SELECT * FROM ({ranked}) WHERE distance <= ? \
                     ORDER BY distance LIMIT {limit}"
                )
            }
            None => format!("{ranked} ORDER BY distance LIMIT {limit}"),
        };

        let rows = query_rows(&self.conn().lock(), &sql, &params)?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                // Surface the payload as structured JSON.
                if let Some(parsed) = row
                    .get("data")
                    .and_then(Value::as_str)
                    .and_then(|text| serde_json::from_str::<Value>(text).ok())
                {
                    row.insert("data".to_owned(), parsed);
                }
                row
            })
            .collect())
    }

    fn insert_with_embedding(
        &self,
        table: &str,
        row: Row,
        embedding: &[f64],
    ) -> StorageResult<()> {
        ident::validate(table)?;
        let expected = self.config().vector.vector_dimensions;
        if embedding.len() != expected {
            return Err(StorageError::invalid_value(format!(
                "embedding has {} dimensions, configured dimensionality is {expected}",
                embedding.len()
            ))
            .with_table(table.to_owned()));
        }
        let literal = render_vector_literal(embedding)?;
        self.ensure_vector_table(table)?;
        let sql = format!("INSERT INTO {table} (data, embedding) VALUES (?, ?)");
        let params = [
            SqlParam::Text(Value::Object(row).to_string()),
            SqlParam::Text(literal),
        ];
        execute(&self.conn().lock(), &sql, &params)
            .map_err(|err| {
                StorageError::write_failed("embedding insert failed")
                    .with_table(table.to_owned())
                    .with_source(err)
            })
            .map(|_| ())
    }
}
