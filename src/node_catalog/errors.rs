//! # Node Catalog Error Types
//!
//! Errors raised while loading, validating and querying node definitions.
//!
//! Configuration errors carry the offending file path so startup failures are
//! actionable:
//!
//! ```ignore
//! NodeCatalogError::config_read_with_path("schema.yaml", io_error)
//! ```

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NodeCatalogError {
    #[error("No node definition found for `{node}`")]
    Node { node: String },
    #[error("Node `{node}` has no component or reverse edge named `{component}`")]
    Component { node: String, component: String },
    #[error("Node `{node}` is defined more than once")]
    DuplicateNode { node: String },
    #[error("Node `{node}` defines `{name}` more than once")]
    DuplicateComponent { node: String, name: String },
    #[error("Invalid name `{name}` (expected letters, digits and underscores, not starting with a digit)")]
    InvalidName { name: String },
    #[error("Node `{node}` has no unique constraint; at least one is required")]
    MissingUniqueConstraint { node: String },
    #[error("Node `{node}` marks {count} unique constraints as identifier; exactly one is allowed")]
    AmbiguousIdentifier { node: String, count: usize },
    #[error("Identifier of `{node}` contains nullable component `{component}`")]
    NullableIdentifier { node: String, component: String },
    #[error("Edge `{node}.{edge}` references `{head}` whose identifier is not made of leaves only")]
    UnsupportedEdgeHead {
        node: String,
        edge: String,
        head: String,
    },
    #[error("Edge `{node}.{edge}` maps unknown head leaf `{leaf}`")]
    InvalidForeignKey {
        node: String,
        edge: String,
        leaf: String,
    },
    #[error("Reverse edge `{node}.{name}` is invalid: {reason}")]
    InvalidReverseEdge {
        node: String,
        name: String,
        reason: String,
    },
    #[error("Failed to read node catalog configuration: {error}")]
    ConfigReadError { error: String },
    #[error("Failed to parse node catalog configuration: {error}")]
    ConfigParseError { error: String },
}

impl NodeCatalogError {
    /// Create a ConfigReadError with the file path included
    pub fn config_read_with_path(path: impl Into<String>, error: impl std::fmt::Display) -> Self {
        NodeCatalogError::ConfigReadError {
            error: format!("{}: {}", path.into(), error),
        }
    }
}
