//! Unit tests - statement algebra exercised through the public API
//!
//! No store is involved: filters are compiled to SQL strings and evaluated in memory.

use nodegraph::NodeCatalog;

mod filter_properties;
mod scenarios;

pub const BLOG_SCHEMA: &str = include_str!("../../fixtures/blog_schema.yaml");

pub fn blog_catalog() -> NodeCatalog {
    NodeCatalog::from_yaml_str(BLOG_SCHEMA).expect("blog schema fixture should build")
}
