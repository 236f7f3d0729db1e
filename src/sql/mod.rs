//! Safe SQL construction.
//!
//! Everything that turns user-visible requests into SQL text lives under
//! this module, and all of it holds one invariant: no user-supplied string
//! is concatenated into a statement except identifiers that have passed
//! [`ident::validate`] and integer bounds that have passed integer
//! validation. Values travel as positional parameters.

pub mod generator;
pub mod ident;
pub mod semantic;
pub mod types;

use types::SqlParam;

/// A statement plus its positional parameters, ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlStatement {
    /// A statement with no parameters.
    pub fn bare(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new() }
    }

    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self { sql: sql.into(), params }
    }
}
