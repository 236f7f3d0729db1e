//! Identifier validation and sanitization.
//!
//! User-supplied table, column, and index names are the one place where a
//! string can reach SQL text without a parameter slot, so they pass through
//! here first. `validate` rejects anything outside the allow pattern
//! `[A-Za-z_][A-Za-z0-9_]*`, names longer than 128 characters, and reserved
//! keywords; `sanitize` produces a best-effort conforming form for callers
//! that derive names from external input.

use crate::error::{StorageError, StorageResult};

/// Maximum identifier length accepted by every supported engine.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reserved words rejected case-insensitively. The set is the union of the
/// keywords meaningful to the engines this crate targets.
const RESERVED_KEYWORDS: &[&str] = &[
    "all", "alter", "and", "any", "as", "asc", "between", "by", "case", "cast", "check",
    "column", "commit", "constraint", "copy", "create", "cross", "current", "database",
    "default", "delete", "desc", "distinct", "drop", "else", "end", "escape", "except",
    "exists", "explain", "false", "for", "foreign", "from", "full", "group", "having",
    "in", "index", "inner", "insert", "intersect", "into", "is", "join", "left",
    "like", "limit", "natural", "not", "null", "offset", "on", "or", "order", "outer",
    "pragma", "primary", "references", "right", "rollback", "select", "set", "table",
    "then", "to", "transaction", "trigger", "true", "union", "unique", "update",
    "using", "values", "view", "when", "where", "with",
];

fn is_reserved(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    RESERVED_KEYWORDS.binary_search(&lowered.as_str()).is_ok()
}

fn matches_pattern(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate an identifier against the allow pattern, the length cap, and
/// the reserved-keyword set.
///
/// # Errors
///
/// Returns [`StorageError::InvalidValue`] naming the offending identifier.
pub fn validate(name: &str) -> StorageResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StorageError::invalid_value("identifier must not be empty"));
    }
    if trimmed != name {
        return Err(StorageError::invalid_value(format!(
            "identifier '{name}' has surrounding whitespace"
        )));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(StorageError::invalid_value(format!(
            "identifier exceeds {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }
    if !matches_pattern(name) {
        return Err(StorageError::invalid_value(format!(
            "identifier '{name}' must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    if is_reserved(name) {
        return Err(StorageError::invalid_value(format!(
            "identifier '{name}' is a reserved keyword"
        )));
    }
    Ok(())
}

/// Best-effort transformation of an arbitrary string into a valid
/// identifier. Invalid characters become `_`, a leading digit or a reserved
/// word gains a `table_` prefix, and the result is truncated to the cap.
///
/// An empty input sanitizes to `table_`.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let needs_prefix = match out.chars().next() {
        None => true,
        Some(c) => c.is_ascii_digit(),
    };
    if needs_prefix || is_reserved(&out) {
        out.insert_str(0, "table_");
    }
    out.truncate(MAX_IDENTIFIER_LENGTH);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn accepts_conforming_names() {
        for name in ["users", "_internal", "Table1", "a", "graph_edges_v2"] {
            assert!(validate(name).is_ok(), "{name} should validate");
        }
    }

    #[test]
    fn rejects_injections_and_malformed_names() {
        for name in [
            "",
            "  ",
            "1users",
            "users; DROP TABLE x",
            "users--",
            "na me",
            "sp\u{e9}cial",
        ] {
            let err = validate(name).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidValue, "{name:?}");
        }
    }

    #[test]
    fn rejects_reserved_keywords_case_insensitively() {
        assert!(validate("select").is_err());
        assert!(validate("SELECT").is_err());
        assert!(validate("Table").is_err());
        // Not reserved, merely similar.
        assert!(validate("selection").is_ok());
    }

    #[test]
    fn rejects_overlong_names() {
        let name = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        assert!(validate(&name).is_err());
        assert!(validate(&name[..MAX_IDENTIFIER_LENGTH]).is_ok());
    }

    #[test]
    fn sanitize_produces_valid_identifiers() {
        for input in ["users; DROP", "1st_table", "select", "", "weird name!"] {
            let cleaned = sanitize(input);
            assert!(validate(&cleaned).is_ok(), "{input:?} -> {cleaned:?}");
        }
        assert_eq!(sanitize("1st"), "table_1st");
        assert_eq!(sanitize("order"), "table_order");
        assert_eq!(sanitize("good_name"), "good_name");
    }

    #[test]
    fn reserved_keyword_list_is_sorted_for_binary_search() {
        let mut sorted = RESERVED_KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED_KEYWORDS);
    }
}
