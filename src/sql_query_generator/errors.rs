use thiserror::Error;

use crate::node_catalog::NodeCatalogError;
use crate::statement::StatementError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SqlGeneratorError {
    #[error("Invalid identifier `{identifier}`: {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("Literal {value} cannot be written as {expected}")]
    WrongLiteralType { expected: String, value: String },

    #[error("Non-finite float {0} has no SQL literal")]
    NonFiniteFloat(f64),

    #[error("Unexpected value while compiling {context}: {value}")]
    UnexpectedValue { context: String, value: String },

    #[error("Limit {limit} exceeds the configured maximum of {max}")]
    InvalidLimit { limit: u64, max: u64 },

    #[error("Nothing to write into `{node}` ({statement} without values)")]
    EmptyStatement {
        node: String,
        statement: &'static str,
    },

    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error(transparent)]
    Catalog(#[from] NodeCatalogError),
}

impl SqlGeneratorError {
    pub(crate) fn unexpected(context: impl Into<String>, value: impl ToString) -> Self {
        SqlGeneratorError::UnexpectedValue {
            context: context.into(),
            value: value.to_string(),
        }
    }
}
