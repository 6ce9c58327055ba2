//! Statement execution: row reassembly, deferred fetches, mutations and loaders

use serde_json::json;

use nodegraph::{
    EngineConfig, ExecutionError, FindOptions, MariaDbDialect, NodeLoader, NodeSelection,
    NodeValue, OrderingExpression, StatementExecutor, StatementGenerator, Value,
};

use super::{blog_catalog, RecordingConnector};

const NEWS: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";
const MISC: &str = "8b7c6d5e-4f3a-4b2c-9d1e-0f9a8b7c6d5e";
const ARTICLE_A: &str = "0b0ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59";
const ARTICLE_B: &str = "1c1ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59";
const TAG: &str = "4d3c2b1a-0f9e-4d8c-b7a6-958473625140";
const USER: &str = "7e6d5c4b-3a29-4180-9f7e-6d5c4b3a2918";

fn category_row(id: &str, title: &str) -> NodeValue {
    NodeValue::new().with("__id.id", id).with("title", title)
}

fn article_row(id: &str, title: &str, category: &str) -> NodeValue {
    NodeValue::new()
        .with("__id.id", id)
        .with("title", title)
        .with("__parent.id", category)
}

fn tag_row(article: &str, order: i64) -> NodeValue {
    NodeValue::new()
        .with("__id.article.id", article)
        .with("__id.tag.id", TAG)
        .with("order", order)
        .with("__parent.id", article)
}

fn blog_store(sql: &str) -> Vec<NodeValue> {
    if sql.contains("(SELECT `article_tags`.*") {
        vec![tag_row(ARTICLE_A, 1), tag_row(ARTICLE_A, 2)]
    } else if sql.contains("(SELECT `articles`.*") {
        vec![
            article_row(ARTICLE_A, "Hello", NEWS),
            article_row(ARTICLE_B, "World", NEWS),
        ]
    } else {
        vec![category_row(NEWS, "News"), category_row(MISC, "Misc")]
    }
}

#[tokio::test]
async fn test_nested_collections_are_fetched_level_by_level() {
    let catalog = blog_catalog();
    let config = EngineConfig::default();
    let category = catalog.node("Category").unwrap();
    let selection = NodeSelection::parse(
        &catalog,
        category,
        &json!({
            "title": true,
            "articles": {
                "first": 2,
                "orderBy": ["views_DESC"],
                "selection": {
                    "title": true,
                    "tags": { "first": 5, "orderBy": ["order_ASC"], "selection": { "order": true } }
                }
            }
        }),
    )
    .unwrap();
    let connector = RecordingConnector::new(|sql| Ok(blog_store(sql)));
    let executor = StatementExecutor::new(
        StatementGenerator::new(&catalog, &MariaDbDialect, &config),
        &connector,
    );

    let values = executor
        .find(
            &selection,
            &FindOptions {
                ordering: Some(OrderingExpression::parse(category, &["title_ASC"]).unwrap()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        values.iter().map(NodeValue::to_json).collect::<Vec<_>>(),
        vec![
            json!({
                "title": "News",
                "articles": [
                    { "title": "Hello", "tags": [{ "order": 1 }, { "order": 2 }] },
                    { "title": "World", "tags": [] }
                ]
            }),
            json!({ "title": "Misc", "articles": [] }),
        ]
    );

    // One statement per level, whatever the number of parents
    let statements = connector.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].starts_with("SELECT `categories`.`id` AS `__id.id`"));
    assert!(statements[1].contains(&format!("IN ('{}', '{}')", NEWS, MISC)));
    assert!(statements[2].contains(&format!("IN ('{}', '{}')", ARTICLE_A, ARTICLE_B)));
}

#[tokio::test]
async fn test_empty_result_skips_deferred_fetches() {
    let catalog = blog_catalog();
    let config = EngineConfig::default();
    let category = catalog.node("Category").unwrap();
    let selection = NodeSelection::parse(
        &catalog,
        category,
        &json!({ "articles": { "first": 2, "selection": { "title": true } } }),
    )
    .unwrap();
    let connector = RecordingConnector::new(|_| Ok(Vec::new()));
    let executor = StatementExecutor::new(
        StatementGenerator::new(&catalog, &MariaDbDialect, &config),
        &connector,
    );

    let values = executor.find(&selection, &FindOptions::default()).await.unwrap();
    assert!(values.is_empty());
    assert_eq!(connector.statements().len(), 1);
}

#[tokio::test]
async fn test_store_errors_reach_the_caller_unchanged() {
    let catalog = blog_catalog();
    let config = EngineConfig::default();
    let article = catalog.node("Article").unwrap();
    let connector = RecordingConnector::new(|_| Err("Duplicate entry 'x' for key 'slug'".into()));
    let executor = StatementExecutor::new(
        StatementGenerator::new(&catalog, &MariaDbDialect, &config),
        &connector,
    );

    let err = executor
        .find(
            &NodeSelection::identifier(&catalog, article).unwrap(),
            &FindOptions::default(),
        )
        .await
        .unwrap_err();
    match err {
        ExecutionError::Connector(source) => {
            assert_eq!(source.to_string(), "Duplicate entry 'x' for key 'slug'")
        }
        other => panic!("expected a connector error, got {}", other),
    }
}

#[tokio::test]
async fn test_mutations_run_as_writing_statements() {
    let catalog = blog_catalog();
    let config = EngineConfig::default();
    let article = catalog.node("Article").unwrap();
    let connector = RecordingConnector::new(|_| Ok(Vec::new()));
    let executor = StatementExecutor::new(
        StatementGenerator::new(&catalog, &MariaDbDialect, &config),
        &connector,
    );
    let filter = nodegraph::BooleanFilter::parse(&catalog, article, &json!({ "id": ARTICLE_A })).unwrap();

    let created = executor
        .insert(
            article,
            &[NodeValue::new()
                .with("id", ARTICLE_A)
                .with("title", "Hello")
                .with("status", "DRAFT")
                .with("views", 0i64)
                .with("createdBy", NodeValue::new().with("id", USER))],
        )
        .await
        .unwrap();
    let updated = executor
        .update(article, Some(&filter), &NodeValue::new().with("status", "PUBLISHED"))
        .await
        .unwrap();
    let deleted = executor.delete(article, Some(&filter)).await.unwrap();
    assert_eq!((created, updated, deleted), (1, 1, 1));

    let statements = connector.statements();
    assert!(statements[0].starts_with("INSERT INTO `articles` ("));
    assert!(statements[0].contains(&format!("'{}'", USER)));
    assert_eq!(
        statements[1],
        format!(
            "UPDATE `articles` AS `articles` SET `articles`.`status` = 'PUBLISHED' WHERE `articles`.`id` = '{}'",
            ARTICLE_A
        )
    );
    assert_eq!(
        statements[2],
        format!(
            "DELETE `articles` FROM `articles` AS `articles` WHERE `articles`.`id` = '{}'",
            ARTICLE_A
        )
    );
}

#[tokio::test]
async fn test_loader_batches_misses_into_one_statement() {
    let catalog = blog_catalog();
    let config = EngineConfig::default();
    let article = catalog.node("Article").unwrap();
    let connector = RecordingConnector::new(|sql| {
        Ok([ARTICLE_A, ARTICLE_B]
            .into_iter()
            .filter(|id| sql.contains(id))
            .map(|id| {
                NodeValue::new()
                    .with("__id.id", id)
                    .with("title", "Hello")
                    .with("id", id)
            })
            .collect())
    });
    let loader = NodeLoader::new(
        StatementExecutor::new(
            StatementGenerator::new(&catalog, &MariaDbDialect, &config),
            &connector,
        ),
        article,
    );
    let selection = NodeSelection::parse(&catalog, article, &json!({ "title": true })).unwrap();
    let ids = [
        NodeValue::new().with("id", ARTICLE_A),
        NodeValue::new().with("id", ARTICLE_B),
        NodeValue::new().with("id", ARTICLE_A),
    ];

    let loaded = loader.load_many(&ids, &selection).await.unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded.iter().all(|value| {
        value.as_ref().and_then(|v| v.get("title")) == Some(&Value::from("Hello"))
    }));

    loader.load(&ids[1], &selection).await.unwrap();
    assert_eq!(connector.statements().len(), 1);
}
