use thiserror::Error;

use crate::node_catalog::NodeCatalogError;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StatementError {
    #[error(transparent)]
    Catalog(#[from] NodeCatalogError),

    #[error("Expression on `{found}` cannot be used where `{expected}` is expected")]
    NodeMismatch { expected: String, found: String },

    #[error("Invalid value for `{node}.{component}` (expected {expected}): {value}")]
    InvalidValue {
        node: String,
        component: String,
        expected: String,
        value: String,
    },

    #[error("Missing value for `{key}` on `{node}`")]
    MissingValue { node: String, key: String },

    #[error("Operator `{operator}` is not supported on `{node}.{component}`")]
    UnsupportedOperator {
        node: String,
        component: String,
        operator: String,
    },

    #[error("Raw filter on `{node}` cannot be evaluated in memory")]
    NotExecutable { node: String },

    #[error("Selection key `{key}` is used more than once on `{node}`")]
    DuplicateSelectionKey { node: String, key: String },

    #[error("Invalid input at `{path}`: {reason}")]
    InvalidInput { path: String, reason: String },

    #[error("Change on `{node}` {identifier} cannot follow a {previous}")]
    InconsistentChange {
        node: String,
        identifier: String,
        previous: String,
    },
}

impl StatementError {
    pub(crate) fn invalid_input(path: impl Into<String>, reason: impl Into<String>) -> Self {
        StatementError::InvalidInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(node: impl Into<String>, key: impl Into<String>) -> Self {
        StatementError::MissingValue {
            node: node.into(),
            key: key.into(),
        }
    }
}
