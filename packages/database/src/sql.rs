//! SQL text helpers for statements that cannot take bound parameters
//! (table functions, `COPY`, DDL).

use std::path::Path;

/// Quotes a string literal, doubling embedded single quotes.
#[must_use]
pub fn string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quotes a path as a string literal.
#[must_use]
pub fn path_literal(path: &Path) -> String {
    string_literal(&path.display().to_string())
}

/// Quotes an identifier, doubling embedded double quotes.
#[must_use]
pub fn identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
