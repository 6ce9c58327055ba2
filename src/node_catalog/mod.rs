pub mod config;
pub mod errors;
pub mod node_schema;

#[cfg(test)]
pub mod testing;

pub use config::{ComponentDefinition, NodeCatalogConfig, NodeDefinition};
pub use errors::NodeCatalogError;
pub use node_schema::{
    Component, Edge, ForeignKeyColumn, Leaf, LeafType, NodeCatalog, NodeSchema, ReverseEdge,
    ReverseEdgeKind, UniqueConstraint,
};
