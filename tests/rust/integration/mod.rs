//! Integration tests - compiled statements run through a connector
//!
//! The connector is an in-memory fake that records every statement and answers
//! from canned rows, so no database is required.

use std::sync::Mutex;

use async_trait::async_trait;

use nodegraph::{Connector, ConnectorError, NodeCatalog, NodeValue};

mod executor_tests;
mod join_deduplication_tests;

pub const BLOG_SCHEMA: &str = include_str!("../../fixtures/blog_schema.yaml");

pub fn blog_catalog() -> NodeCatalog {
    NodeCatalog::from_yaml_str(BLOG_SCHEMA).expect("blog schema fixture should build")
}

type Responder = Box<dyn Fn(&str) -> Result<Vec<NodeValue>, ConnectorError> + Send + Sync>;

/// Records statements and answers reads through a responder
pub struct RecordingConnector {
    responder: Responder,
    affected_rows: u64,
    statements: Mutex<Vec<String>>,
}

impl RecordingConnector {
    pub fn new(
        responder: impl Fn(&str) -> Result<Vec<NodeValue>, ConnectorError> + Send + Sync + 'static,
    ) -> Self {
        RecordingConnector {
            responder: Box::new(responder),
            affected_rows: 1,
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn query(&self, sql: &str) -> Result<Vec<NodeValue>, ConnectorError> {
        self.statements.lock().unwrap().push(sql.to_string());
        (self.responder)(sql)
    }

    async fn execute(&self, sql: &str) -> Result<u64, ConnectorError> {
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(self.affected_rows)
    }
}
