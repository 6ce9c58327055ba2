//! At most one join per relation path, however many expressions traverse it

use serde_json::json;

use nodegraph::sql_query_generator::{JoinRelation, TableNode};
use nodegraph::{
    BooleanFilter, EngineConfig, FindOptions, MariaDbDialect, NodeSelection, OrderingExpression,
    StatementGenerator,
};

use super::blog_catalog;

#[test]
fn test_filter_selection_and_ordering_share_the_edge_join() {
    let catalog = blog_catalog();
    let config = EngineConfig::default();
    let article = catalog.node("Article").unwrap();
    let generator = StatementGenerator::new(&catalog, &MariaDbDialect, &config);

    let filter = BooleanFilter::parse(
        &catalog,
        article,
        &json!({ "OR": [{ "category": { "title": "News" } }, { "category": { "slug": "misc" } }] }),
    )
    .unwrap();
    let selection = NodeSelection::parse(
        &catalog,
        article,
        &json!({ "title": true, "category": { "slug": true } }),
    )
    .unwrap();

    let sql = generator
        .find(
            &selection,
            &FindOptions {
                filter: Some(filter),
                ordering: Some(OrderingExpression::parse(article, &["title_ASC"]).unwrap()),
                limit: Some(10),
                ..Default::default()
            },
        )
        .unwrap()
        .sql;

    assert_eq!(sql.matches("LEFT JOIN `categories`").count(), 1);
    assert!(sql.contains("`articles>category`.`title` = 'News'"));
    assert!(sql.contains("`articles>category`.`slug` = 'misc'"));
}

#[test]
fn test_reverse_edges_never_join_in_filters() {
    let catalog = blog_catalog();
    let config = EngineConfig::default();
    let article = catalog.node("Article").unwrap();
    let generator = StatementGenerator::new(&catalog, &MariaDbDialect, &config);
    let filter = BooleanFilter::parse(
        &catalog,
        article,
        &json!({ "tags_some": { "order_gt": 1 }, "tagsCount_gte": 2 }),
    )
    .unwrap();

    let sql = generator.count(article, Some(&filter)).unwrap();
    assert!(!sql.contains("JOIN"));
    assert!(sql.contains("EXISTS (SELECT 1 FROM `article_tags` AS `articles<tags`"));
    assert!(sql.contains("(SELECT COUNT(*) FROM `article_tags` AS `articles<tags`"));
}

#[test]
fn test_same_reverse_edge_and_key_yield_the_same_join() {
    let catalog = blog_catalog();
    let user = catalog.node("User").unwrap();
    let profile = user.reverse_edge("profile").unwrap();
    let mut root = TableNode::root(user);

    let first = root
        .join(&catalog, JoinRelation::ReverseEdgeUnique(profile.clone()), Some("bio"))
        .unwrap()
        .alias
        .clone();
    let second = root
        .join(&catalog, JoinRelation::ReverseEdgeUnique(profile.clone()), Some("bio"))
        .unwrap()
        .alias
        .clone();

    assert_eq!(first, second);
    assert_eq!(root.join_count(), 1);
    assert_eq!(
        root.joins_sql(&MariaDbDialect).unwrap().matches("LEFT JOIN").count(),
        1
    );
}
