//! Run compiled statements through a [`Connector`] and rebuild nested values.
//!
//! Rows come back flat, keyed by dotted column aliases (`category.title`). They are
//! folded into nested records, relations whose identifier columns are all NULL
//! become `Null`, deferred multiple-head fetches are resolved level by level, and
//! the result is projected onto the requested selection.

mod errors;
mod loader;

use async_trait::async_trait;
use futures_util::future::{try_join_all, BoxFuture};
use std::sync::Arc;

use crate::node_catalog::NodeSchema;
use crate::sql_query_generator::{
    DeferredFetch, FindOptions, StatementGenerator, IDENTIFIER_KEY, PARENT_KEY,
};
use crate::statement::{BooleanFilter, NodeSelection, NodeValue, Value};

pub use errors::ExecutionError;
pub use loader::NodeLoader;

pub type ConnectorError = Box<dyn std::error::Error + Send + Sync>;

/// Access to the relational store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run a reading statement; each row maps column aliases to values
    async fn query(&self, sql: &str) -> Result<Vec<NodeValue>, ConnectorError>;

    /// Run a writing statement and return the number of affected rows
    async fn execute(&self, sql: &str) -> Result<u64, ConnectorError>;
}

pub struct StatementExecutor<'a, C: Connector + ?Sized> {
    generator: StatementGenerator<'a>,
    connector: &'a C,
}

impl<'a, C: Connector + ?Sized> StatementExecutor<'a, C> {
    pub fn new(generator: StatementGenerator<'a>, connector: &'a C) -> Self {
        StatementExecutor {
            generator,
            connector,
        }
    }

    pub fn generator(&self) -> &StatementGenerator<'a> {
        &self.generator
    }

    /// Selected values of every instance matching `options`, in statement order
    pub async fn find(
        &self,
        selection: &NodeSelection,
        options: &FindOptions,
    ) -> Result<Vec<NodeValue>, ExecutionError> {
        let statement = self.generator.find(selection, options)?;
        let mut records = self.fetch(&statement.sql).await?;
        self.resolve_deferred(&mut records, &statement.deferred).await?;

        let values = records
            .iter()
            .map(|record| selection.parse_value(record))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!("found {} {} instances", values.len(), selection.node().name);
        Ok(values)
    }

    pub async fn count(
        &self,
        node: &Arc<NodeSchema>,
        filter: Option<&BooleanFilter>,
    ) -> Result<u64, ExecutionError> {
        let sql = self.generator.count(node, filter)?;
        let rows = self
            .connector
            .query(&sql)
            .await
            .map_err(ExecutionError::Connector)?;
        match rows.first().and_then(|row| row.get("count")) {
            Some(Value::Int(n)) if *n >= 0 => Ok(*n as u64),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| ExecutionError::unexpected_row(format!("count `{}`", s))),
            other => Err(ExecutionError::unexpected_row(format!(
                "count of {} is {:?}",
                node.name, other
            ))),
        }
    }

    pub async fn insert(
        &self,
        node: &Arc<NodeSchema>,
        values: &[NodeValue],
    ) -> Result<u64, ExecutionError> {
        let sql = self.generator.insert(node, values)?;
        self.execute(&sql).await
    }

    pub async fn update(
        &self,
        node: &Arc<NodeSchema>,
        filter: Option<&BooleanFilter>,
        value: &NodeValue,
    ) -> Result<u64, ExecutionError> {
        let sql = self.generator.update(node, filter, value)?;
        self.execute(&sql).await
    }

    pub async fn delete(
        &self,
        node: &Arc<NodeSchema>,
        filter: Option<&BooleanFilter>,
    ) -> Result<u64, ExecutionError> {
        let sql = self.generator.delete(node, filter)?;
        self.execute(&sql).await
    }

    async fn execute(&self, sql: &str) -> Result<u64, ExecutionError> {
        let affected = self
            .connector
            .execute(sql)
            .await
            .map_err(ExecutionError::Connector)?;
        log::debug!("{} rows affected", affected);
        Ok(affected)
    }

    async fn fetch(&self, sql: &str) -> Result<Vec<NodeValue>, ExecutionError> {
        let rows = self
            .connector
            .query(sql)
            .await
            .map_err(ExecutionError::Connector)?;
        Ok(rows.into_iter().map(assemble_row).collect())
    }

    /// One statement per deferred fetch for all `records`; siblings run concurrently
    async fn resolve_deferred(
        &self,
        records: &mut [NodeValue],
        deferred: &[DeferredFetch],
    ) -> Result<(), ExecutionError> {
        if deferred.is_empty() || records.is_empty() {
            return Ok(());
        }

        let mut batches = Vec::with_capacity(deferred.len());
        for fetch in deferred {
            batches.push((fetch, self.parent_ids(records, fetch)?));
        }
        let children =
            try_join_all(batches.iter().map(|(fetch, ids)| self.fetch_children(fetch, ids))).await?;

        for ((fetch, _), rows) in batches.iter().zip(children) {
            for record in records.iter_mut() {
                if let Some(parent) = record_at_mut(record, fetch.parent_path()) {
                    let items = match parent.get(IDENTIFIER_KEY) {
                        Some(Value::Node(id)) => rows
                            .iter()
                            .filter(|row| is_child_of(row, id))
                            .cloned()
                            .map(Value::Node)
                            .collect(),
                        _ => Vec::new(),
                    };
                    parent.insert(fetch.key(), Value::List(items));
                }
            }
        }
        Ok(())
    }

    fn fetch_children<'s>(
        &'s self,
        fetch: &'s DeferredFetch,
        parent_ids: &'s [NodeValue],
    ) -> BoxFuture<'s, Result<Vec<NodeValue>, ExecutionError>> {
        Box::pin(async move {
            if parent_ids.is_empty() {
                return Ok(Vec::new());
            }
            let statement = self.generator.deferred(fetch, parent_ids)?;
            let mut children = self.fetch(&statement.sql).await?;
            self.resolve_deferred(&mut children, &statement.deferred).await?;
            Ok(children)
        })
    }

    /// Distinct identifiers of the records holding `fetch`'s relation
    fn parent_ids(
        &self,
        records: &[NodeValue],
        fetch: &DeferredFetch,
    ) -> Result<Vec<NodeValue>, ExecutionError> {
        let parent = self
            .generator
            .catalog()
            .node(&fetch.selection.reverse_edge.node)?;
        let mut ids: Vec<NodeValue> = Vec::new();
        for record in records {
            let Some(found) = record_at(record, fetch.parent_path()) else {
                continue;
            };
            let raw = match found.get(IDENTIFIER_KEY) {
                Some(Value::Node(raw)) => raw,
                _ => {
                    return Err(ExecutionError::unexpected_row(format!(
                        "no identifier columns for {}",
                        parent.name
                    )))
                }
            };
            let id = parent.parse_identifier(raw)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// Fold a flat row with dotted keys into nested records
fn assemble_row(row: NodeValue) -> NodeValue {
    let mut record = NodeValue::new();
    for (key, value) in row {
        let path: Vec<&str> = key.split('.').collect();
        insert_path(&mut record, &path, value);
    }
    collapse_missing(&mut record);
    record
}

fn insert_path(record: &mut NodeValue, path: &[&str], value: Value) {
    match path {
        [] => {}
        [key] => record.insert(*key, value),
        [key, rest @ ..] => {
            if !matches!(record.get(key), Some(Value::Node(_))) {
                record.insert(*key, NodeValue::new());
            }
            if let Some(Value::Node(child)) = record.get_mut(key) {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Replace nested records whose identifier is entirely NULL (unmatched LEFT JOIN) by `Null`
fn collapse_missing(record: &mut NodeValue) {
    let keys: Vec<String> = record
        .keys()
        .filter(|key| *key != IDENTIFIER_KEY && *key != PARENT_KEY)
        .map(str::to_string)
        .collect();
    for key in keys {
        let Some(value) = record.get_mut(&key) else {
            continue;
        };
        let missing = match value {
            Value::Node(child) => {
                collapse_missing(child);
                matches!(child.get(IDENTIFIER_KEY), Some(Value::Node(id)) if all_null(id))
            }
            _ => false,
        };
        if missing {
            *value = Value::Null;
        }
    }
}

fn all_null(record: &NodeValue) -> bool {
    record.iter().all(|(_, value)| match value {
        Value::Null => true,
        Value::Node(nested) => all_null(nested),
        _ => false,
    })
}

fn is_child_of(row: &NodeValue, parent_id: &NodeValue) -> bool {
    match row.get(PARENT_KEY) {
        Some(Value::Node(reference)) => reference
            .iter()
            .all(|(key, value)| parent_id.get(key).is_some_and(|id| id.loose_eq(value))),
        _ => false,
    }
}

fn record_at<'r>(record: &'r NodeValue, path: &[String]) -> Option<&'r NodeValue> {
    match path.split_first() {
        None => Some(record),
        Some((key, rest)) => match record.get(key) {
            Some(Value::Node(child)) => record_at(child, rest),
            _ => None,
        },
    }
}

fn record_at_mut<'r>(record: &'r mut NodeValue, path: &[String]) -> Option<&'r mut NodeValue> {
    match path.split_first() {
        None => Some(record),
        Some((key, rest)) => match record.get_mut(key) {
            Some(Value::Node(child)) => record_at_mut(child, rest),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::node_catalog::testing::blog_catalog;
    use crate::sql_query_generator::MariaDbDialect;
    use serde_json::json;

    const ARTICLE_A: &str = "0b0ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59";
    const ARTICLE_B: &str = "1c1ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59";
    const CATEGORY: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";
    const TAG: &str = "2d2ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59";

    fn article_row(id: &str, title: &str, category: Option<&str>) -> NodeValue {
        let category_id = category.map(Value::from).unwrap_or(Value::Null);
        let category_title = category.map(|_| Value::from("News")).unwrap_or(Value::Null);
        NodeValue::new()
            .with("__id.id", id)
            .with("title", title)
            .with("category.__id.id", category_id)
            .with("category.title", category_title)
    }

    fn tag_row(article: &str, order: i64) -> NodeValue {
        NodeValue::new()
            .with("__id.article.id", article)
            .with("__id.tag.id", TAG)
            .with("order", order)
            .with("__parent.id", article)
    }

    #[test]
    fn test_assemble_row_collapses_unmatched_joins() {
        let record = assemble_row(article_row(ARTICLE_A, "Hello", None));
        assert_eq!(record.get("category"), Some(&Value::Null));
        assert_eq!(
            record.get("__id"),
            Some(&Value::Node(NodeValue::new().with("id", ARTICLE_A)))
        );
    }

    #[tokio::test]
    async fn test_find_resolves_deferred_fetches() {
        let catalog = blog_catalog();
        let config = EngineConfig::default();
        let article = catalog.node("Article").unwrap();
        let selection = NodeSelection::parse(
            &catalog,
            article,
            &json!({
                "title": true,
                "category": { "title": true },
                "tags": { "first": 2, "selection": { "order": true } }
            }),
        )
        .unwrap();

        let mut connector = MockConnector::new();
        connector
            .expect_query()
            .withf(|sql| sql.starts_with("SELECT `articles`"))
            .times(1)
            .returning(|_| {
                Ok(vec![
                    article_row(ARTICLE_A, "Hello", Some(CATEGORY)),
                    article_row(ARTICLE_B, "World", None),
                ])
            });
        connector
            .expect_query()
            .withf(|sql| sql.contains("ROW_NUMBER()") && sql.contains(ARTICLE_B))
            .times(1)
            .returning(|_| Ok(vec![tag_row(ARTICLE_A, 1), tag_row(ARTICLE_A, 2)]));

        let executor = StatementExecutor::new(
            StatementGenerator::new(&catalog, &MariaDbDialect, &config),
            &connector,
        );
        let values = executor
            .find(&selection, &FindOptions::default())
            .await
            .unwrap();

        assert_eq!(values.len(), 2);
        assert_eq!(
            values[0].to_json(),
            json!({
                "title": "Hello",
                "category": { "title": "News" },
                "tags": [{ "order": 1 }, { "order": 2 }]
            })
        );
        assert_eq!(
            values[1].to_json(),
            json!({ "title": "World", "category": null, "tags": [] })
        );
    }

    #[tokio::test]
    async fn test_connector_errors_pass_through() {
        let catalog = blog_catalog();
        let config = EngineConfig::default();
        let article = catalog.node("Article").unwrap();

        let mut connector = MockConnector::new();
        connector
            .expect_query()
            .returning(|_| Err("connection lost".into()));

        let executor = StatementExecutor::new(
            StatementGenerator::new(&catalog, &MariaDbDialect, &config),
            &connector,
        );
        let err = executor.count(article, None).await.unwrap_err();
        match err {
            ExecutionError::Connector(source) => assert_eq!(source.to_string(), "connection lost"),
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_count_accepts_decimal_strings() {
        let catalog = blog_catalog();
        let config = EngineConfig::default();
        let article = catalog.node("Article").unwrap();

        let mut connector = MockConnector::new();
        connector
            .expect_query()
            .returning(|_| Ok(vec![NodeValue::new().with("count", "42")]));

        let executor = StatementExecutor::new(
            StatementGenerator::new(&catalog, &MariaDbDialect, &config),
            &connector,
        );
        let count = tokio_test::block_on(executor.count(article, None)).unwrap();
        assert_eq!(count, 42);
    }
}
