//! nodegraph - statement algebra and change-impact engine for schema-driven node stores
//!
//! This crate provides:
//! - Node catalogs loaded from YAML schema definitions
//! - Filter, ordering and selection algebras with reduction and in-memory evaluation
//! - Dependency graphs and change-affected-graph evaluation for live queries
//! - MariaDB statement compilation with deferred nested fetches
//! - Async statement execution behind a connector seam

pub mod affected_graph;
pub mod config;
pub mod executor;
pub mod node_catalog;
pub mod sql_query_generator;
pub mod statement;

pub use affected_graph::{AffectedGraph, ChangeImpact, SubscriptionDependencies, SubscriptionImpact};
pub use config::{ConfigError, EngineConfig};
pub use executor::{Connector, ConnectorError, ExecutionError, NodeLoader, StatementExecutor};
pub use node_catalog::{NodeCatalog, NodeCatalogConfig, NodeCatalogError, NodeSchema};
pub use sql_query_generator::{
    DeferredFetch, Dialect, FindOptions, FindStatement, MariaDbDialect, SqlGeneratorError,
    StatementGenerator,
};
pub use statement::{
    BooleanFilter, DependencyGraph, NodeChange, NodeChangeAggregation, NodeSelection, NodeValue,
    OrderingExpression, StatementError, Value,
};
