//! Shared fixtures for unit tests

use super::node_schema::NodeCatalog;

pub const BLOG_SCHEMA: &str = include_str!("../../tests/fixtures/blog_schema.yaml");

pub fn blog_catalog() -> NodeCatalog {
    NodeCatalog::from_yaml_str(BLOG_SCHEMA).expect("blog schema fixture should build")
}
