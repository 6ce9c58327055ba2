use thiserror::Error;

use super::ConnectorError;
use crate::node_catalog::NodeCatalogError;
use crate::sql_query_generator::SqlGeneratorError;
use crate::statement::StatementError;

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Raised by the store; passed through untouched
    #[error("Connector error: {0}")]
    Connector(#[source] ConnectorError),

    #[error(transparent)]
    Generator(#[from] SqlGeneratorError),

    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error(transparent)]
    Catalog(#[from] NodeCatalogError),

    #[error("Unexpected row shape: {reason}")]
    UnexpectedRow { reason: String },
}

impl ExecutionError {
    pub(crate) fn unexpected_row(reason: impl Into<String>) -> Self {
        ExecutionError::UnexpectedRow {
            reason: reason.into(),
        }
    }
}
