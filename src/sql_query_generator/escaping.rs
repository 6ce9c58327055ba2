//! Identifier quoting and literal escaping.
//!
//! Every identifier and literal that reaches a statement goes through a [`Dialect`].
//! Escaping is fail-closed: anything that cannot be written safely is an error.

use chrono::{DateTime, Utc};

use super::errors::SqlGeneratorError;
use crate::node_catalog::{Leaf, LeafType};
use crate::statement::Value;

/// Longest table or column name the server accepts
const MAX_IDENTIFIER_LENGTH: usize = 64;
/// Longest table or column alias
const MAX_ALIAS_LENGTH: usize = 256;

pub trait Dialect: Send + Sync {
    /// Quote a table or column name
    fn escape_identifier(&self, identifier: &str) -> Result<String, SqlGeneratorError>;

    /// Quote a table or column alias
    fn escape_alias(&self, alias: &str) -> Result<String, SqlGeneratorError>;

    /// Escape and quote a string literal
    fn escape_string(&self, value: &str) -> String;

    fn escape_datetime(&self, value: &DateTime<Utc>) -> String {
        format!("'{}'", value.format("%Y-%m-%d %H:%M:%S%.6f"))
    }

    fn escape_float(&self, value: f64) -> Result<String, SqlGeneratorError> {
        if value.is_finite() {
            Ok(value.to_string())
        } else {
            Err(SqlGeneratorError::NonFiniteFloat(value))
        }
    }

    /// Full-text predicate over an already-quoted column
    fn full_text(&self, column: &str, terms: &str) -> String {
        format!(
            "MATCH ({}) AGAINST ({} IN BOOLEAN MODE)",
            column,
            self.escape_string(terms)
        )
    }

    /// Write a value as a literal of the leaf's type
    fn escape_leaf_value(&self, leaf: &Leaf, value: &Value) -> Result<String, SqlGeneratorError> {
        match (leaf.leaf_type, value) {
            (_, Value::Null) => Ok("NULL".to_string()),
            (LeafType::Boolean, Value::Boolean(b)) => {
                Ok(if *b { "TRUE" } else { "FALSE" }.to_string())
            }
            (LeafType::Int, Value::Int(i)) => Ok(i.to_string()),
            (LeafType::Float, Value::Int(i)) => Ok(i.to_string()),
            (LeafType::Float, Value::Float(x)) => self.escape_float(*x),
            (LeafType::String | LeafType::Uuid, Value::String(s)) => Ok(self.escape_string(s)),
            (LeafType::DateTime, Value::DateTime(dt)) => Ok(self.escape_datetime(dt)),
            _ => Err(SqlGeneratorError::WrongLiteralType {
                expected: leaf.leaf_type.to_string(),
                value: value.to_string(),
            }),
        }
    }
}

/// MariaDB / MySQL flavour: backtick identifiers, backslash string escapes
#[derive(Debug, Clone, Copy, Default)]
pub struct MariaDbDialect;

impl MariaDbDialect {
    fn quote(identifier: &str, max_length: usize) -> Result<String, SqlGeneratorError> {
        let invalid = |reason: String| SqlGeneratorError::InvalidIdentifier {
            identifier: identifier.to_string(),
            reason,
        };
        if identifier.is_empty() {
            return Err(invalid("empty".to_string()));
        }
        if identifier.contains('\0') {
            return Err(invalid("contains a NUL character".to_string()));
        }
        if identifier.chars().count() > max_length {
            return Err(invalid(format!("longer than {} characters", max_length)));
        }
        Ok(format!("`{}`", identifier.replace('`', "``")))
    }
}

impl Dialect for MariaDbDialect {
    fn escape_identifier(&self, identifier: &str) -> Result<String, SqlGeneratorError> {
        Self::quote(identifier, MAX_IDENTIFIER_LENGTH)
    }

    fn escape_alias(&self, alias: &str) -> Result<String, SqlGeneratorError> {
        Self::quote(alias, MAX_ALIAS_LENGTH)
    }

    fn escape_string(&self, value: &str) -> String {
        let escaped = value
            .replace('\\', "\\\\") // first
            .replace('\'', "\\'")
            .replace('"', "\\\"")
            .replace('\0', "\\0")
            .replace('\n', "\\n")
            .replace('\r', "\\r")
            .replace('\x1a', "\\Z");
        format!("'{}'", escaped)
    }
}
