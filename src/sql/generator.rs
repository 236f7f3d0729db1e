//! Canonical SQL for the key-value layer, index DDL, and columnar I/O.
//!
//! A [`SqlGenerator`] is keyed to a table name that passed identifier
//! validation at construction, so every statement it emits embeds only
//! vetted identifiers. Values always travel as positional `?` parameters;
//! the single textual splice besides identifiers is the single-quote
//! escaped file path of the columnar statements.

use serde_json::Value;

use crate::error::{StorageError, StorageResult};
use crate::sql::ident;
use crate::sql::types::{SqlParam, to_storage_text};
use crate::sql::SqlStatement;
use crate::traits::semantic::{ColumnDef, ColumnType};

/// Escape a filesystem path for inclusion in a quoted SQL literal.
fn escape_path(path: &str) -> String {
    path.replace('\'', "''")
}

/// Statement factory for one validated table.
#[derive(Debug, Clone)]
pub struct SqlGenerator {
    table: String,
}

impl SqlGenerator {
    /// Create a generator for `table`.
    ///
    /// # Errors
    ///
    /// `InvalidValue` when the table name fails identifier validation.
    pub fn new(table: &str) -> StorageResult<Self> {
        ident::validate(table)?;
        Ok(Self { table: table.to_owned() })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    // Key-value layer

    pub fn create_table(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            self.table
        )
    }

    pub fn load_all(&self) -> String {
        format!("SELECT key, value FROM {}", self.table)
    }

    /// One page of keys, ordered for stable pagination.
    pub fn page_keys(&self, offset: u64, limit: u64) -> String {
        format!(
            "SELECT key FROM {} ORDER BY key LIMIT {limit} OFFSET {offset}",
            self.table
        )
    }

    /// One page of entries, ordered for stable pagination.
    pub fn page_entries(&self, offset: u64, limit: u64) -> String {
        format!(
            "SELECT key, value FROM {} ORDER BY key LIMIT {limit} OFFSET {offset}",
            self.table
        )
    }

    pub fn get(&self, key: &str) -> SqlStatement {
        SqlStatement::new(
            format!("SELECT value FROM {} WHERE key = ?", self.table),
            vec![SqlParam::Text(key.to_owned())],
        )
    }

    pub fn upsert(&self, key: &str, value: &Value) -> SqlStatement {
        SqlStatement::new(
            format!(
                "INSERT INTO {} (key, value) VALUES (?, ?) \
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                self.table
            ),
            vec![
                SqlParam::Text(key.to_owned()),
                SqlParam::Text(to_storage_text(value)),
            ],
        )
    }

    pub fn delete(&self, key: &str) -> SqlStatement {
        SqlStatement::new(
            format!("DELETE FROM {} WHERE key = ?", self.table),
            vec![SqlParam::Text(key.to_owned())],
        )
    }

    pub fn clear(&self) -> String {
        format!("DELETE FROM {}", self.table)
    }

    pub fn count(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.table)
    }

    pub fn exists(&self, key: &str) -> SqlStatement {
        SqlStatement::new(
            format!("SELECT 1 FROM {} WHERE key = ? LIMIT 1", self.table),
            vec![SqlParam::Text(key.to_owned())],
        )
    }

    // Bulk layer

    /// Multi-row upsert with one `(?, ?)` tuple per entry.
    ///
    /// # Errors
    ///
    /// `InvalidValue` on an empty entry set.
    pub fn batch_upsert(&self, entries: &[(String, Value)]) -> StorageResult<SqlStatement> {
        if entries.is_empty() {
            return Err(StorageError::invalid_value("batch upsert requires at least one entry"));
        }
        let tuples = vec!["(?, ?)"; entries.len()].join(", ");
        let mut params = Vec::with_capacity(entries.len() * 2);
        for (key, value) in entries {
            params.push(SqlParam::Text(key.clone()));
            params.push(SqlParam::Text(to_storage_text(value)));
        }
        Ok(SqlStatement::new(
            format!(
                "INSERT INTO {} (key, value) VALUES {tuples} \
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                self.table
            ),
            params,
        ))
    }

    /// Multi-key delete via a parameterized `IN` list.
    pub fn batch_delete(&self, keys: &[String]) -> StorageResult<SqlStatement> {
        if keys.is_empty() {
            return Err(StorageError::invalid_value("batch delete requires at least one key"));
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        Ok(SqlStatement::new(
            format!("DELETE FROM {} WHERE key IN ({placeholders})", self.table),
            keys.iter().map(|k| SqlParam::Text(k.clone())).collect(),
        ))
    }

    // Index DDL

    pub fn create_index(&self, index_name: &str, column: &str, unique: bool) -> StorageResult<String> {
        ident::validate(index_name)?;
        ident::validate(column)?;
        let unique_kw = if unique { "UNIQUE " } else { "" };
        Ok(format!(
            "CREATE {unique_kw}INDEX IF NOT EXISTS {index_name} ON {} ({column})",
            self.table
        ))
    }

    pub fn drop_index(&self, index_name: &str) -> StorageResult<String> {
        ident::validate(index_name)?;
        Ok(format!("DROP INDEX IF EXISTS {index_name}"))
    }

    // Schema definition

    fn render_column_type(column_type: ColumnType) -> &'static str {
        match column_type {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Json => "TEXT",
        }
    }

    /// `CREATE TABLE` for a user-described schema; every column name is
    /// validated.
    pub fn define_schema(&self, columns: &[ColumnDef]) -> StorageResult<String> {
        if columns.is_empty() {
            return Err(StorageError::invalid_value("schema requires at least one column"));
        }
        let mut rendered = Vec::with_capacity(columns.len());
        for column in columns {
            ident::validate(&column.name)?;
            rendered.push(format!(
                "{} {}",
                column.name,
                Self::render_column_type(column.column_type)
            ));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.table,
            rendered.join(", ")
        ))
    }

    // Columnar I/O

    /// Export the whole table to a columnar file.
    pub fn copy_table_to_parquet(&self, path: &str) -> String {
        format!(
            "COPY {} TO '{}' (FORMAT PARQUET)",
            self.table,
            escape_path(path)
        )
    }

    /// Export an arbitrary query to a columnar file.
    pub fn copy_query_to_parquet(query: &str, path: &str) -> String {
        format!("COPY ({query}) TO '{}' (FORMAT PARQUET)", escape_path(path))
    }

    /// Import a columnar file into the table.
    pub fn import_from_parquet(&self, path: &str) -> String {
        format!(
            "INSERT INTO {} SELECT * FROM read_parquet('{}')",
            self.table,
            escape_path(path)
        )
    }

    /// Query a columnar file in place.
    pub fn select_from_parquet(path: &str) -> String {
        format!("SELECT * FROM read_parquet('{}')", escape_path(path))
    }
}
