//! Error types for storage operations.
//!
//! Every public API in this crate returns [`StorageResult<T>`], an alias for
//! `Result<T, StorageError>`. The error is a single tagged variant whose
//! kinds mirror the failure classes of the storage layer: configuration and
//! validation problems, connection lifecycle failures, and the four
//! operational classes (write, query, delete, serialization).
//!
//! Errors carry the triggering context (key, table, database, source error)
//! so that a failure deep inside an adapter still names the operation that
//! caused it:
//!
//! ```
//! use polystore::error::{ErrorKind, StorageError};
//!
//! let err = StorageError::write_failed("upsert rejected")
//!     .with_key("user:42")
//!     .with_table("documents");
//! assert_eq!(err.kind(), ErrorKind::WriteFailed);
//! assert!(err.to_string().contains("user:42"));
//! ```

use thiserror::Error;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Discriminant of [`StorageError`], convenient for matching in tests and
/// for callers that only branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    /// Configuration error, invalid identifier, invalid depth/limit,
    /// dimension mismatch, oversize value.
    InvalidValue,
    /// Cannot open, connection lost, uninitialized handle, timeout.
    ConnectionFailed,
    /// Insert/upsert/batch write failure.
    WriteFailed,
    /// Read path, iteration, or SQL execution failure.
    QueryFailed,
    /// Delete or clear failure.
    DeleteFailed,
    /// Value preprocessing or encoding failure.
    SerializationFailed,
    /// Schema/DDL or filesystem failure outside the connection path.
    Io,
    /// Unsupported capability on the active backend.
    NotImplemented,
}

/// Structured context attached to every error: the key, table, and database
/// involved, plus the display form of the underlying engine error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub key: Option<String>,
    pub table: Option<String>,
    pub database: Option<String>,
    pub source: Option<String>,
}

impl ErrorContext {
    fn is_empty(&self) -> bool {
        self.key.is_none() && self.table.is_none() && self.database.is_none() && self.source.is_none()
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::new();
        if let Some(key) = &self.key {
            parts.push(format!("key={key}"));
        }
        if let Some(table) = &self.table {
            parts.push(format!("table={table}"));
        }
        if let Some(database) = &self.database {
            parts.push(format!("database={database}"));
        }
        if let Some(source) = &self.source {
            parts.push(format!("caused by: {source}"));
        }
        write!(f, " ({})", parts.join(", "))
    }
}

/// The error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("invalid value: {message}{context}")]
    InvalidValue { message: String, context: ErrorContext },

    #[error("connection failed: {message}{context}")]
    ConnectionFailed { message: String, context: ErrorContext },

    #[error("write failed: {message}{context}")]
    WriteFailed { message: String, context: ErrorContext },

    #[error("query failed: {message}{context}")]
    QueryFailed { message: String, context: ErrorContext },

    #[error("delete failed: {message}{context}")]
    DeleteFailed { message: String, context: ErrorContext },

    #[error("serialization failed: {message}{context}")]
    SerializationFailed { message: String, context: ErrorContext },

    #[error("i/o error: {message}{context}")]
    Io { message: String, context: ErrorContext },

    #[error("not implemented: {message}{context}")]
    NotImplemented { message: String, context: ErrorContext },
}

macro_rules! impl_error_constructors {
    ($(($fn_name:ident, $variant:ident)),* $(,)?) => {
        impl StorageError {
            $(
                #[doc = concat!("Construct a `", stringify!($variant), "` error with an empty context.")]
                pub fn $fn_name(message: impl Into<String>) -> Self {
                    StorageError::$variant {
                        message: message.into(),
                        context: ErrorContext::default(),
                    }
                }
            )*

            /// The failure class of this error.
            pub fn kind(&self) -> ErrorKind {
                match self {
                    $(StorageError::$variant { .. } => ErrorKind::$variant,)*
                }
            }

            /// Borrow the structured context.
            pub fn context(&self) -> &ErrorContext {
                match self {
                    $(StorageError::$variant { context, .. } => context,)*
                }
            }

            fn context_mut(&mut self) -> &mut ErrorContext {
                match self {
                    $(StorageError::$variant { context, .. } => context,)*
                }
            }
        }
    };
}

impl_error_constructors!(
    (invalid_value, InvalidValue),
    (connection_failed, ConnectionFailed),
    (write_failed, WriteFailed),
    (query_failed, QueryFailed),
    (delete_failed, DeleteFailed),
    (serialization_failed, SerializationFailed),
    (io, Io),
    (not_implemented, NotImplemented),
);

impl StorageError {
    /// Attach the key that triggered the failure.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.context_mut().key = Some(key.into());
        self
    }

    /// Attach the table or container name involved.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.context_mut().table = Some(table.into());
        self
    }

    /// Attach the database address involved.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.context_mut().database = Some(database.into());
        self
    }

    /// Attach the display form of the underlying engine error.
    pub fn with_source(mut self, source: impl std::fmt::Display) -> Self {
        self.context_mut().source = Some(source.to_string());
        self
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization_failed("JSON encoding failed").with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::io("filesystem operation failed").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(StorageError::invalid_value("x").kind(), ErrorKind::InvalidValue);
        assert_eq!(StorageError::query_failed("x").kind(), ErrorKind::QueryFailed);
        assert_eq!(StorageError::not_implemented("x").kind(), ErrorKind::NotImplemented);
    }

    #[test]
    fn display_includes_context() {
        let err = StorageError::delete_failed("row missing")
            .with_key("k1")
            .with_table("nodes")
            .with_source("engine said no");
        let rendered = err.to_string();
        assert!(rendered.contains("delete failed: row missing"));
        assert!(rendered.contains("key=k1"));
        assert!(rendered.contains("table=nodes"));
        assert!(rendered.contains("caused by: engine said no"));
    }

    #[test]
    fn empty_context_renders_nothing() {
        let err = StorageError::connection_failed("refused");
        assert_eq!(err.to_string(), "connection failed: refused");
    }
}
