//! Algebraic laws of filter reduction, checked on generated Article filters

use std::sync::Arc;

use proptest::prelude::*;

use nodegraph::statement::{CountOperator, LeafOperator, NodeCreation, NodeDeletion, NodeUpdate};
use nodegraph::{AffectedGraph, BooleanFilter, NodeCatalog, NodeChange, NodeSchema, NodeValue, Value};

use super::blog_catalog;

const ARTICLE: &str = "0b0ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59";
const ARTICLES: [&str; 2] = [ARTICLE, "1c1ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59"];
/// The last tag is reserved for the link a change creates, moves or deletes
const TAGS: [&str; 3] = [
    "4d3c2b1a-0f9e-4d8c-b7a6-958473625140",
    "5e4d3c2b-1a0f-4e9d-8c7b-a69584736251",
    "6f5e4d3c-2b1a-4f0e-9d8c-7b6a95847362",
];
const CHANGED_TAG: usize = 2;
const TITLES: [&str; 3] = ["News", "Misc", "Archive"];
const STATUSES: [&str; 3] = ["DRAFT", "PUBLISHED", "ARCHIVED"];
const CATEGORIES: [(&str, &str); 2] = [
    ("9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d", "News"),
    ("8b7c6d5e-4f3a-4b2c-9d1e-0f9a8b7c6d5e", "Misc"),
];
const COMPARISONS: [LeafOperator; 6] = [
    LeafOperator::Eq,
    LeafOperator::Not,
    LeafOperator::Gt,
    LeafOperator::Gte,
    LeafOperator::Lt,
    LeafOperator::Lte,
];
const COUNT_COMPARISONS: [CountOperator; 6] = [
    CountOperator::Eq,
    CountOperator::Not,
    CountOperator::Gt,
    CountOperator::Gte,
    CountOperator::Lt,
    CountOperator::Lte,
];

/// Shape of a generated filter; turned into a [`BooleanFilter`] once the catalog exists
#[derive(Debug, Clone)]
enum Expr {
    Const(bool),
    Status(bool, usize),
    StatusIn(bool, Vec<usize>),
    Views(usize, i64),
    Score(usize, i64),
    ScoreIsNull(bool),
    Category(Option<usize>),
    TagsSome(usize, i64),
    TagsCount(usize, u64),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

fn leaf_expr() -> impl Strategy<Value = Expr> {
    prop_oneof![
        any::<bool>().prop_map(Expr::Const),
        (any::<bool>(), 0..STATUSES.len()).prop_map(|(eq, s)| Expr::Status(eq, s)),
        (any::<bool>(), prop::collection::vec(0..STATUSES.len(), 0..3))
            .prop_map(|(is_in, s)| Expr::StatusIn(is_in, s)),
        (0..COMPARISONS.len(), 0..4i64).prop_map(|(op, v)| Expr::Views(op, v)),
        (0..COMPARISONS.len(), 0..3i64).prop_map(|(op, v)| Expr::Score(op, v)),
        any::<bool>().prop_map(Expr::ScoreIsNull),
        prop::option::of(0..CATEGORIES.len()).prop_map(Expr::Category),
        (0..COMPARISONS.len(), 0..3i64).prop_map(|(op, v)| Expr::TagsSome(op, v)),
        (0..COUNT_COMPARISONS.len(), 0..4u64).prop_map(|(op, n)| Expr::TagsCount(op, n)),
    ]
}

fn expr() -> impl Strategy<Value = Expr> {
    leaf_expr().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Expr::And),
            prop::collection::vec(inner.clone(), 0..4).prop_map(Expr::Or),
            inner.prop_map(|e| Expr::Not(Box::new(e))),
        ]
    })
}

fn build(catalog: &NodeCatalog, node: &Arc<NodeSchema>, expr: &Expr) -> BooleanFilter {
    let operands = |exprs: &[Expr]| exprs.iter().map(|e| build(catalog, node, e)).collect();
    match expr {
        Expr::Const(b) => BooleanFilter::value(node, *b),
        Expr::Status(eq, s) => {
            let op = if *eq { LeafOperator::Eq } else { LeafOperator::Not };
            BooleanFilter::leaf(node, "status", op, STATUSES[*s]).unwrap()
        }
        Expr::StatusIn(is_in, items) => {
            let op = if *is_in { LeafOperator::In } else { LeafOperator::NotIn };
            let items = items.iter().map(|s| Value::from(STATUSES[*s])).collect();
            BooleanFilter::leaf(node, "status", op, Value::List(items)).unwrap()
        }
        Expr::Views(op, v) => BooleanFilter::leaf(node, "views", COMPARISONS[*op], *v).unwrap(),
        Expr::Score(op, v) => {
            BooleanFilter::leaf(node, "score", COMPARISONS[*op], *v as f64).unwrap()
        }
        Expr::ScoreIsNull(is_null) => {
            let op = if *is_null { LeafOperator::Eq } else { LeafOperator::Not };
            BooleanFilter::leaf(node, "score", op, Value::Null).unwrap()
        }
        Expr::Category(title) => {
            let head = title.map(|t| {
                let category = catalog.node("Category").unwrap();
                BooleanFilter::leaf(category, "title", LeafOperator::Eq, CATEGORIES[t].1).unwrap()
            });
            BooleanFilter::edge_exists(node, "category", head).unwrap()
        }
        Expr::TagsSome(op, v) => {
            let article_tag = catalog.node("ArticleTag").unwrap();
            let head = BooleanFilter::leaf(article_tag, "order", COMPARISONS[*op], *v).unwrap();
            BooleanFilter::reverse_edge_exists(node, "tags", Some(head)).unwrap()
        }
        Expr::TagsCount(op, n) => {
            BooleanFilter::reverse_edge_count(node, "tags", COUNT_COMPARISONS[*op], *n).unwrap()
        }
        Expr::And(exprs) => BooleanFilter::and(node, operands(exprs)).unwrap(),
        Expr::Or(exprs) => BooleanFilter::or(node, operands(exprs)).unwrap(),
        Expr::Not(inner) => BooleanFilter::not(build(catalog, node, inner)),
    }
}

/// Every Article component a generated filter can read
#[derive(Debug, Clone)]
struct ArticleState {
    status: usize,
    views: i64,
    score: Option<i64>,
    category: Option<usize>,
    /// Order of each linked tag
    tags: Vec<i64>,
}

fn article_state() -> impl Strategy<Value = ArticleState> {
    (
        0..STATUSES.len(),
        0..4i64,
        prop::option::of(0..3i64),
        prop::option::of(0..CATEGORIES.len()),
        prop::collection::vec(0..3i64, 0..=CHANGED_TAG),
    )
        .prop_map(|(status, views, score, category, tags)| ArticleState {
            status,
            views,
            score,
            category,
            tags,
        })
}

fn tag_link(article: &str, tag: usize, order: i64) -> NodeValue {
    NodeValue::new()
        .with("article", NodeValue::new().with("id", article))
        .with("tag", NodeValue::new().with("id", TAGS[tag]))
        .with("order", order)
}

fn article_value(state: &ArticleState) -> NodeValue {
    article_instance(ARTICLE, state, CATEGORIES.map(|(_, title)| title), None)
}

/// `titles` per category; `changed_link` is the order of the changed tag if it is linked here
fn article_instance(
    id: &str,
    state: &ArticleState,
    titles: [&str; 2],
    changed_link: Option<i64>,
) -> NodeValue {
    let category = match state.category {
        Some(c) => Value::from(
            NodeValue::new()
                .with("id", CATEGORIES[c].0)
                .with("title", titles[c]),
        ),
        None => Value::Null,
    };
    let tags = state
        .tags
        .iter()
        .enumerate()
        .map(|(tag, order)| tag_link(id, tag, *order))
        .chain(changed_link.map(|order| tag_link(id, CHANGED_TAG, order)))
        .map(Value::from)
        .collect();
    NodeValue::new()
        .with("id", id)
        .with("title", "Hello")
        .with("status", STATUSES[state.status])
        .with("views", state.views)
        .with("score", state.score.map(|s| Value::from(s as f64)).unwrap_or(Value::Null))
        .with("category", category)
        .with("tags", Value::List(tags))
}

proptest! {
    #[test]
    fn prop_reduction_is_idempotent(e in expr()) {
        let catalog = blog_catalog();
        let filter = build(&catalog, catalog.node("Article").unwrap(), &e);
        let reduced = filter.reduced();
        prop_assert_eq!(reduced.reduced(), reduced);
    }

    #[test]
    fn prop_reduction_preserves_semantics(e in expr(), state in article_state()) {
        let catalog = blog_catalog();
        let filter = build(&catalog, catalog.node("Article").unwrap(), &e);
        let value = article_value(&state);
        prop_assert_eq!(
            filter.execute(&value).unwrap(),
            filter.reduced().execute(&value).unwrap()
        );
    }

    #[test]
    fn prop_identity_laws(e in expr()) {
        let catalog = blog_catalog();
        let node = catalog.node("Article").unwrap();
        let x = build(&catalog, node, &e);
        let t = || BooleanFilter::value(node, true);
        let f = || BooleanFilter::value(node, false);

        prop_assert_eq!(BooleanFilter::and(node, vec![t(), x.clone()]).unwrap().reduced(), x.reduced());
        prop_assert_eq!(BooleanFilter::or(node, vec![f(), x.clone()]).unwrap().reduced(), x.reduced());
        prop_assert!(BooleanFilter::and(node, vec![f(), x.clone()]).unwrap().reduced().is_false());
        prop_assert!(BooleanFilter::or(node, vec![t(), x.clone()]).unwrap().reduced().is_true());
    }

    #[test]
    fn prop_double_negation(e in expr()) {
        let catalog = blog_catalog();
        let x = build(&catalog, catalog.node("Article").unwrap(), &e);
        let doubled = BooleanFilter::not(BooleanFilter::not(x.clone()));
        prop_assert_eq!(doubled.reduced(), x.reduced());
    }

    #[test]
    fn prop_affected_graph_covers_every_flip(
        e in expr(),
        before in article_state(),
        after in article_state(),
    ) {
        let catalog = blog_catalog();
        let node = catalog.node("Article").unwrap();
        let filter = build(&catalog, node, &e);
        // Links are not components of the article itself
        let after = ArticleState { tags: before.tags.clone(), ..after };
        let (old, new) = (article_value(&before), article_value(&after));
        let change = NodeChange::Update(NodeUpdate::new(node, old.clone(), new.clone()).unwrap());

        let affected = AffectedGraph::new(&catalog).filter(&filter, &change).unwrap();
        if filter.execute(&old).unwrap() != filter.execute(&new).unwrap() {
            let affected = affected.expect("a flipped result must be reported");
            prop_assert!(affected.execute(&new).unwrap());
        }
    }

    #[test]
    fn prop_head_updates_cover_every_flip(
        e in expr(),
        state in article_state(),
        category in 0..CATEGORIES.len(),
        before in 0..TITLES.len(),
        after in 0..TITLES.len(),
    ) {
        let catalog = blog_catalog();
        let node = catalog.node("Article").unwrap();
        let filter = build(&catalog, node, &e);

        let category_value = |title: &str| {
            NodeValue::new()
                .with("id", CATEGORIES[category].0)
                .with("title", title)
                .with("slug", "slug")
        };
        let change = NodeChange::Update(
            NodeUpdate::new(
                catalog.node("Category").unwrap(),
                category_value(TITLES[before]),
                category_value(TITLES[after]),
            )
            .unwrap(),
        );
        let titles = |title: &'static str| {
            let mut titles = CATEGORIES.map(|(_, title)| title);
            titles[category] = title;
            titles
        };
        let old = article_instance(ARTICLE, &state, titles(TITLES[before]), None);
        let new = article_instance(ARTICLE, &state, titles(TITLES[after]), None);

        let affected = AffectedGraph::new(&catalog).filter(&filter, &change).unwrap();
        if filter.execute(&old).unwrap() != filter.execute(&new).unwrap() {
            let affected = affected.expect("a flipped result must be reported");
            prop_assert!(affected.execute(&new).unwrap());
        }
    }

    #[test]
    fn prop_link_changes_cover_every_flip(
        e in expr(),
        states in (article_state(), article_state()),
        before in prop::option::of((0..ARTICLES.len(), 0..3i64)),
        after in prop::option::of((0..ARTICLES.len(), 0..3i64)),
    ) {
        prop_assume!(before.is_some() || after.is_some());
        let catalog = blog_catalog();
        let node = catalog.node("Article").unwrap();
        let article_tag = catalog.node("ArticleTag").unwrap();
        let filter = build(&catalog, node, &e);

        let link = |(article, order): (usize, i64)| tag_link(ARTICLES[article], CHANGED_TAG, order);
        let change = match (before, after) {
            (None, Some(a)) => NodeChange::Creation(NodeCreation::new(article_tag, link(a)).unwrap()),
            (Some(b), None) => NodeChange::Deletion(NodeDeletion::new(article_tag, link(b)).unwrap()),
            (Some(b), Some(a)) => {
                NodeChange::Update(NodeUpdate::new(article_tag, link(b), link(a)).unwrap())
            }
            (None, None) => unreachable!(),
        };
        let affected = AffectedGraph::new(&catalog).filter(&filter, &change).unwrap();

        // Moving a link can flip both the article it leaves and the one it joins
        for (index, state) in [&states.0, &states.1].into_iter().enumerate() {
            let linked = |side: Option<(usize, i64)>| {
                side.filter(|(article, _)| *article == index).map(|(_, order)| order)
            };
            let titles = CATEGORIES.map(|(_, title)| title);
            let old = article_instance(ARTICLES[index], state, titles, linked(before));
            let new = article_instance(ARTICLES[index], state, titles, linked(after));

            if filter.execute(&old).unwrap() != filter.execute(&new).unwrap() {
                let affected = affected.as_ref().expect("a flipped result must be reported");
                prop_assert!(affected.execute(&new).unwrap(), "{} not covered by {}", ARTICLES[index], affected);
            }
        }
    }
}
