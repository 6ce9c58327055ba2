//! End-to-end behaviour of the algebra on the blog schema

use serde_json::json;

use nodegraph::statement::{NodeCreation, NodeUpdate};
use nodegraph::{
    AffectedGraph, BooleanFilter, ChangeImpact, EngineConfig, FindOptions, MariaDbDialect,
    NodeCatalog, NodeChange, NodeChangeAggregation, NodeSelection, NodeValue, OrderingExpression,
    StatementGenerator, SubscriptionDependencies, Value,
};

use super::blog_catalog;

const ARTICLE: &str = "0b0ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59";
const CATEGORY: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";
const TAG: &str = "4d3c2b1a-0f9e-4d8c-b7a6-958473625140";

fn published_news(catalog: &NodeCatalog) -> BooleanFilter {
    BooleanFilter::parse(
        catalog,
        catalog.node("Article").unwrap(),
        &json!({ "status": "PUBLISHED", "category": { "title": "News" } }),
    )
    .unwrap()
}

fn article(status: &str, views: i64) -> NodeValue {
    NodeValue::new()
        .with("id", ARTICLE)
        .with("title", "Hello")
        .with("status", status)
        .with("views", views)
        .with("category", NodeValue::new().with("id", CATEGORY))
}

fn article_update(catalog: &NodeCatalog, before: NodeValue, after: NodeValue) -> NodeChange {
    NodeChange::Update(NodeUpdate::new(catalog.node("Article").unwrap(), before, after).unwrap())
}

#[test]
fn test_filter_compiles_to_joined_where_clause() {
    let catalog = blog_catalog();
    let config = EngineConfig::default();
    let article = catalog.node("Article").unwrap();
    let generator = StatementGenerator::new(&catalog, &MariaDbDialect, &config);

    let statement = generator
        .find(
            &NodeSelection::identifier(&catalog, article).unwrap(),
            &FindOptions {
                filter: Some(published_news(&catalog)),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(statement.sql.contains(
        " LEFT JOIN `categories` AS `articles>category` ON `articles`.`category_id` = `articles>category`.`id`"
    ));
    assert!(statement.sql.contains(concat!(
        " WHERE (`articles`.`status` = 'PUBLISHED'",
        " AND (`articles`.`category_id` IS NOT NULL AND `articles>category`.`title` = 'News'))",
    )));
    assert!(statement.deferred.is_empty());
}

#[test]
fn test_filter_dependencies() {
    let catalog = blog_catalog();
    let filter = published_news(&catalog);
    let dependencies = filter.dependencies();

    assert_eq!(dependencies.node(), "Article");
    assert_eq!(
        dependencies.leaves().iter().collect::<Vec<_>>(),
        vec!["status"]
    );
    let category = &dependencies.edges()["category"];
    assert_eq!(category.node(), "Category");
    assert_eq!(category.leaves().iter().collect::<Vec<_>>(), vec!["title"]);
    assert!(dependencies.reverse_edges().is_empty());
}

#[test]
fn test_status_update_affects_the_updated_article() {
    let catalog = blog_catalog();
    let change = article_update(&catalog, article("DRAFT", 1), article("PUBLISHED", 1));

    let affected = AffectedGraph::new(&catalog)
        .filter(&published_news(&catalog), &change)
        .unwrap();

    let expected = BooleanFilter::identifier(
        &catalog,
        catalog.node("Article").unwrap(),
        &NodeValue::new().with("id", ARTICLE),
    )
    .unwrap();
    assert_eq!(affected, Some(expected));
}

#[test]
fn test_views_update_cannot_affect_the_filter() {
    let catalog = blog_catalog();
    let change = article_update(&catalog, article("DRAFT", 1), article("DRAFT", 7));

    let affected = AffectedGraph::new(&catalog)
        .filter(&published_news(&catalog), &change)
        .unwrap();
    assert_eq!(affected, None);
}

#[test]
fn test_collection_ordering_follows_the_sorted_leaf() {
    let catalog = blog_catalog();
    let article_tag = catalog.node("ArticleTag").unwrap();
    let ordering = OrderingExpression::parse(article_tag, &["order_ASC"]).unwrap();
    let link = |order: i64| {
        NodeValue::new()
            .with("article", NodeValue::new().with("id", ARTICLE))
            .with("tag", NodeValue::new().with("id", TAG))
            .with("order", order)
    };

    let reorder = NodeUpdate::new(article_tag, link(1), link(3)).unwrap();
    assert!(ordering.is_affected_by_update(&reorder));

    let untouched = NodeUpdate::new(article_tag, link(1), link(1)).unwrap();
    assert!(!ordering.is_affected_by_update(&untouched));

    // Updates of another node never reorder the collection
    let article_node = catalog.node("Article").unwrap();
    let other = NodeUpdate::new(article_node, article("DRAFT", 1), article("DRAFT", 2)).unwrap();
    assert!(!ordering.is_affected_by_update(&other));
}

#[test]
fn test_linking_a_new_tag_affects_the_article() {
    let catalog = blog_catalog();
    let article_node = catalog.node("Article").unwrap();
    let filter = BooleanFilter::parse(
        &catalog,
        article_node,
        &json!({ "tags_some": { "tag": { "title": "x" } } }),
    )
    .unwrap();
    let subscription = SubscriptionDependencies::new(
        article_node,
        Some(filter),
        None,
        NodeSelection::identifier(&catalog, article_node).unwrap(),
    )
    .unwrap();

    let mutation = NodeChangeAggregation::from_changes([
        NodeChange::Creation(
            NodeCreation::new(
                catalog.node("Tag").unwrap(),
                NodeValue::new().with("id", TAG).with("title", "x"),
            )
            .unwrap(),
        ),
        NodeChange::Creation(
            NodeCreation::new(
                catalog.node("ArticleTag").unwrap(),
                NodeValue::new()
                    .with("article", NodeValue::new().with("id", ARTICLE))
                    .with("tag", NodeValue::new().with("id", TAG))
                    .with("order", 0i64),
            )
            .unwrap(),
        ),
    ])
    .unwrap();

    let impact = subscription.evaluate(&catalog, &mutation).unwrap();
    assert_eq!(impact.impacts.len(), 2);
    assert!(!impact.reordered);

    let article_id = BooleanFilter::identifier(
        &catalog,
        article_node,
        &NodeValue::new().with("id", ARTICLE),
    )
    .unwrap();
    assert_eq!(impact.impacts[1], ChangeImpact::Filter(article_id.clone()));

    // The combined filter re-selects the linked article
    let combined = impact.combined(article_node).unwrap().unwrap();
    let linked_article = NodeValue::new().with("id", ARTICLE).with(
        "tags",
        Value::List(vec![Value::from(
            NodeValue::new().with("tag", NodeValue::new().with("id", TAG).with("title", "x")),
        )]),
    );
    assert!(combined.execute(&linked_article).unwrap());
}

#[test]
fn test_unrelated_mutation_leaves_subscription_untouched() {
    let catalog = blog_catalog();
    let article_node = catalog.node("Article").unwrap();
    let subscription = SubscriptionDependencies::new(
        article_node,
        Some(published_news(&catalog)),
        Some(OrderingExpression::parse(article_node, &["title_ASC"]).unwrap()),
        NodeSelection::parse(&catalog, article_node, &json!({ "title": true })).unwrap(),
    )
    .unwrap();

    let mutation = NodeChangeAggregation::from_changes([article_update(
        &catalog,
        article("DRAFT", 1),
        article("DRAFT", 2),
    )])
    .unwrap();

    let impact = subscription.evaluate(&catalog, &mutation).unwrap();
    assert!(impact.is_unaffected());
    assert_eq!(impact.combined(article_node).unwrap(), None);
}
