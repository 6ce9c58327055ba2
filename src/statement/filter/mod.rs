//! Boolean filter algebra.
//!
//! A [`BooleanFilter`] is an immutable predicate tree over one node's components
//! and relations. Instances are cheap to clone (shared) and memoize their derived
//! properties (`reduced`, `dependencies`) on first access.

mod execute;
mod input;
mod reduce;

use std::fmt;
use std::sync::{Arc, OnceLock};

use super::dependency::DependencyGraph;
use super::errors::StatementError;
use super::value::{NodeValue, Value};
use crate::node_catalog::{
    Component, Edge, Leaf, LeafType, NodeCatalog, NodeSchema, ReverseEdge, ReverseEdgeKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafOperator {
    Eq,
    Not,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    FullText,
}

impl LeafOperator {
    pub fn input_suffix(&self) -> &'static str {
        match self {
            LeafOperator::Eq => "",
            LeafOperator::Not => "_not",
            LeafOperator::Gt => "_gt",
            LeafOperator::Gte => "_gte",
            LeafOperator::Lt => "_lt",
            LeafOperator::Lte => "_lte",
            LeafOperator::In => "_in",
            LeafOperator::NotIn => "_not_in",
            LeafOperator::FullText => "_full_text",
        }
    }

    pub(crate) fn symbol(&self) -> &'static str {
        match self {
            LeafOperator::Eq => "=",
            LeafOperator::Not => "!=",
            LeafOperator::Gt => ">",
            LeafOperator::Gte => ">=",
            LeafOperator::Lt => "<",
            LeafOperator::Lte => "<=",
            LeafOperator::In => "IN",
            LeafOperator::NotIn => "NOT IN",
            LeafOperator::FullText => "MATCHES",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountOperator {
    Eq,
    Not,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CountOperator {
    pub fn input_suffix(&self) -> &'static str {
        match self {
            CountOperator::Eq => "",
            CountOperator::Not => "_not",
            CountOperator::Gt => "_gt",
            CountOperator::Gte => "_gte",
            CountOperator::Lt => "_lt",
            CountOperator::Lte => "_lte",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            CountOperator::Eq => "=",
            CountOperator::Not => "!=",
            CountOperator::Gt => ">",
            CountOperator::Gte => ">=",
            CountOperator::Lt => "<",
            CountOperator::Lte => "<=",
        }
    }

    pub fn matches(&self, count: u64, value: u64) -> bool {
        match self {
            CountOperator::Eq => count == value,
            CountOperator::Not => count != value,
            CountOperator::Gt => count > value,
            CountOperator::Gte => count >= value,
            CountOperator::Lt => count < value,
            CountOperator::Lte => count <= value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafFilter {
    pub leaf: Arc<Leaf>,
    pub operator: LeafOperator,
    /// A list for `In`/`NotIn`, a string for `FullText`
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeExistsFilter {
    pub edge: Arc<Edge>,
    /// `None`: the edge is merely set
    pub head_filter: Option<BooleanFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReverseEdgeExistsFilter {
    pub reverse_edge: Arc<ReverseEdge>,
    pub head_filter: Option<BooleanFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReverseEdgeCountFilter {
    pub reverse_edge: Arc<ReverseEdge>,
    pub operator: CountOperator,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    Value(bool),
    And(Vec<BooleanFilter>),
    Or(Vec<BooleanFilter>),
    Not(BooleanFilter),
    Leaf(LeafFilter),
    EdgeExists(EdgeExistsFilter),
    ReverseEdgeUniqueExists(ReverseEdgeExistsFilter),
    ReverseEdgeMultipleExists(ReverseEdgeExistsFilter),
    ReverseEdgeMultipleCount(ReverseEdgeCountFilter),
    /// Trusted SQL predicate; `{alias}` is replaced by the quoted table alias
    Raw(String),
}

struct FilterNode {
    node: Arc<NodeSchema>,
    kind: FilterKind,
    /// `Some(None)`: already reduced
    reduced: OnceLock<Option<BooleanFilter>>,
    dependencies: OnceLock<DependencyGraph>,
}

#[derive(Clone)]
pub struct BooleanFilter(Arc<FilterNode>);

impl BooleanFilter {
    fn new(node: &Arc<NodeSchema>, kind: FilterKind) -> Self {
        BooleanFilter(Arc::new(FilterNode {
            node: node.clone(),
            kind,
            reduced: OnceLock::new(),
            dependencies: OnceLock::new(),
        }))
    }

    pub fn node(&self) -> &Arc<NodeSchema> {
        &self.0.node
    }

    pub fn kind(&self) -> &FilterKind {
        &self.0.kind
    }

    pub fn is_true(&self) -> bool {
        matches!(self.kind(), FilterKind::Value(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self.kind(), FilterKind::Value(false))
    }

    pub fn value(node: &Arc<NodeSchema>, value: bool) -> Self {
        Self::new(node, FilterKind::Value(value))
    }

    pub fn and(node: &Arc<NodeSchema>, operands: Vec<BooleanFilter>) -> Result<Self, StatementError> {
        check_operands(node, &operands)?;
        Ok(Self::new(node, FilterKind::And(operands)))
    }

    pub fn or(node: &Arc<NodeSchema>, operands: Vec<BooleanFilter>) -> Result<Self, StatementError> {
        check_operands(node, &operands)?;
        Ok(Self::new(node, FilterKind::Or(operands)))
    }

    pub fn not(operand: BooleanFilter) -> Self {
        let node = operand.node().clone();
        Self::new(&node, FilterKind::Not(operand))
    }

    /// Leaf comparison, validating the operator against the leaf type and coercing the value
    pub fn leaf(
        node: &Arc<NodeSchema>,
        leaf: &str,
        operator: LeafOperator,
        value: impl Into<Value>,
    ) -> Result<Self, StatementError> {
        let leaf = node.leaf(leaf)?.clone();
        let value = value.into();
        let unsupported = || StatementError::UnsupportedOperator {
            node: leaf.node.clone(),
            component: leaf.name.clone(),
            operator: format!("{:?}", operator),
        };

        let value = match operator {
            LeafOperator::Eq | LeafOperator::Not => match value {
                // Comparing with NULL is meaningful even on non-nullable leaves
                Value::Null => Value::Null,
                other => leaf.parse_value(&other)?,
            },
            LeafOperator::Gt | LeafOperator::Gte | LeafOperator::Lt | LeafOperator::Lte => {
                if !leaf.leaf_type.is_comparable() || value.is_null() {
                    return Err(unsupported());
                }
                leaf.parse_value(&value)?
            }
            LeafOperator::In | LeafOperator::NotIn => match value {
                Value::List(items) => Value::List(
                    items
                        .iter()
                        .map(|item| match item {
                            Value::Null => Ok(Value::Null),
                            other => leaf.parse_value(other),
                        })
                        .collect::<Result<_, _>>()?,
                ),
                other => {
                    return Err(StatementError::InvalidValue {
                        node: leaf.node.clone(),
                        component: leaf.name.clone(),
                        expected: format!("list of {}", leaf.leaf_type),
                        value: other.to_string(),
                    })
                }
            },
            LeafOperator::FullText => match (&value, leaf.leaf_type) {
                (Value::String(_), LeafType::String) => value,
                _ => return Err(unsupported()),
            },
        };

        Ok(Self::new(
            node,
            FilterKind::Leaf(LeafFilter {
                leaf,
                operator,
                value,
            }),
        ))
    }

    pub fn edge_exists(
        node: &Arc<NodeSchema>,
        edge: &str,
        head_filter: Option<BooleanFilter>,
    ) -> Result<Self, StatementError> {
        let edge = node.edge(edge)?.clone();
        if let Some(head) = &head_filter {
            check_node(&edge.head, head)?;
        }
        Ok(Self::new(
            node,
            FilterKind::EdgeExists(EdgeExistsFilter { edge, head_filter }),
        ))
    }

    /// Existence through a reverse edge; the variant follows the reverse edge's kind
    pub fn reverse_edge_exists(
        node: &Arc<NodeSchema>,
        reverse_edge: &str,
        head_filter: Option<BooleanFilter>,
    ) -> Result<Self, StatementError> {
        let reverse_edge = node.reverse_edge(reverse_edge)?.clone();
        if let Some(head) = &head_filter {
            check_node(reverse_edge.head(), head)?;
        }
        let filter = ReverseEdgeExistsFilter {
            reverse_edge,
            head_filter,
        };
        let kind = match filter.reverse_edge.kind {
            ReverseEdgeKind::Unique => FilterKind::ReverseEdgeUniqueExists(filter),
            ReverseEdgeKind::Multiple => FilterKind::ReverseEdgeMultipleExists(filter),
        };
        Ok(Self::new(node, kind))
    }

    pub fn reverse_edge_count(
        node: &Arc<NodeSchema>,
        reverse_edge: &str,
        operator: CountOperator,
        value: u64,
    ) -> Result<Self, StatementError> {
        let reverse_edge = node.reverse_edge(reverse_edge)?.clone();
        if reverse_edge.kind != ReverseEdgeKind::Multiple {
            return Err(StatementError::UnsupportedOperator {
                node: node.name.clone(),
                component: reverse_edge.name.clone(),
                operator: "count".to_string(),
            });
        }
        Ok(Self::new(
            node,
            FilterKind::ReverseEdgeMultipleCount(ReverseEdgeCountFilter {
                reverse_edge,
                operator,
                value,
            }),
        ))
    }

    pub fn raw(node: &Arc<NodeSchema>, sql: impl Into<String>) -> Self {
        Self::new(node, FilterKind::Raw(sql.into()))
    }

    /// `{identifier = id}`: matches exactly the instance identified by `id`
    pub fn identifier(
        catalog: &NodeCatalog,
        node: &Arc<NodeSchema>,
        id: &NodeValue,
    ) -> Result<Self, StatementError> {
        let mut operands = Vec::new();
        for component in node.identifier_components() {
            let value = id
                .get(component.name())
                .ok_or_else(|| StatementError::missing(&node.name, component.name()))?;
            operands.push(match component {
                Component::Leaf(leaf) => {
                    Self::leaf(node, &leaf.name, LeafOperator::Eq, value.clone())?
                }
                Component::Edge(edge) => {
                    let head = catalog.edge_head(edge)?;
                    let head_id = value
                        .as_node()
                        .ok_or_else(|| StatementError::InvalidValue {
                            node: node.name.clone(),
                            component: edge.name.clone(),
                            expected: format!("reference to {}", edge.head),
                            value: value.to_string(),
                        })?;
                    Self::edge_exists(
                        node,
                        &edge.name,
                        Some(Self::identifier(catalog, head, head_id)?),
                    )?
                }
            });
        }
        Ok(Self::and(node, operands)?.reduced())
    }

    /// Components and relations read by this filter
    pub fn dependencies(&self) -> &DependencyGraph {
        self.0
            .dependencies
            .get_or_init(|| self.compute_dependencies())
    }

    fn compute_dependencies(&self) -> DependencyGraph {
        let node = &self.node().name;
        match self.kind() {
            FilterKind::Value(_) => DependencyGraph::new(node),
            FilterKind::And(operands) | FilterKind::Or(operands) => {
                DependencyGraph::union(node, operands.iter().map(|o| o.dependencies()))
            }
            FilterKind::Not(operand) => operand.dependencies().clone(),
            FilterKind::Leaf(filter) => DependencyGraph::new(node).with_leaf(&filter.leaf.name),
            FilterKind::EdgeExists(filter) => {
                let mut graph = DependencyGraph::new(node);
                graph.add_edge(
                    &filter.edge,
                    filter.head_filter.as_ref().map(|h| h.dependencies()),
                );
                graph
            }
            FilterKind::ReverseEdgeUniqueExists(filter)
            | FilterKind::ReverseEdgeMultipleExists(filter) => {
                let mut graph = DependencyGraph::new(node);
                graph.add_reverse_edge(
                    &filter.reverse_edge,
                    filter.head_filter.as_ref().map(|h| h.dependencies()),
                );
                graph
            }
            FilterKind::ReverseEdgeMultipleCount(filter) => {
                let mut graph = DependencyGraph::new(node);
                graph.add_reverse_edge(&filter.reverse_edge, None);
                graph
            }
            FilterKind::Raw(_) => DependencyGraph::opaque(node),
        }
    }
}

fn check_node(expected: &str, filter: &BooleanFilter) -> Result<(), StatementError> {
    if filter.node().name != expected {
        return Err(StatementError::NodeMismatch {
            expected: expected.to_string(),
            found: filter.node().name.clone(),
        });
    }
    Ok(())
}

fn check_operands(node: &NodeSchema, operands: &[BooleanFilter]) -> Result<(), StatementError> {
    operands.iter().try_for_each(|o| check_node(&node.name, o))
}

impl PartialEq for BooleanFilter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
            || (self.0.node.name == other.0.node.name && self.0.kind == other.0.kind)
    }
}

impl fmt::Debug for BooleanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BooleanFilter({}: {})", self.node().name, self)
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, operands: &[BooleanFilter], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, operand) in operands.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", sep)?;
        }
        write!(f, "{}", operand)?;
    }
    f.write_str(")")
}

impl fmt::Display for BooleanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            FilterKind::Value(b) => write!(f, "{}", b),
            FilterKind::And(operands) => write_joined(f, operands, "AND"),
            FilterKind::Or(operands) => write_joined(f, operands, "OR"),
            FilterKind::Not(operand) => write!(f, "NOT {}", operand),
            FilterKind::Leaf(filter) => write!(
                f,
                "{} {} {}",
                filter.leaf.name,
                filter.operator.symbol(),
                filter.value
            ),
            FilterKind::EdgeExists(filter) => match &filter.head_filter {
                Some(head) => write!(f, "{} {{ {} }}", filter.edge.name, head),
                None => write!(f, "{} IS SET", filter.edge.name),
            },
            FilterKind::ReverseEdgeUniqueExists(filter) => match &filter.head_filter {
                Some(head) => write!(f, "{} {{ {} }}", filter.reverse_edge.name, head),
                None => write!(f, "{} EXISTS", filter.reverse_edge.name),
            },
            FilterKind::ReverseEdgeMultipleExists(filter) => match &filter.head_filter {
                Some(head) => write!(f, "{} SOME {{ {} }}", filter.reverse_edge.name, head),
                None => write!(f, "{} SOME", filter.reverse_edge.name),
            },
            FilterKind::ReverseEdgeMultipleCount(filter) => write!(
                f,
                "{} {} {}",
                filter.reverse_edge.count_key(),
                filter.operator.sql(),
                filter.value
            ),
            FilterKind::Raw(sql) => write!(f, "RAW({})", sql),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_catalog::testing::blog_catalog;

    #[test]
    fn test_structural_equality() {
        let catalog = blog_catalog();
        let article = catalog.node("Article").unwrap();
        let a = BooleanFilter::leaf(article, "status", LeafOperator::Eq, "PUBLISHED").unwrap();
        let b = BooleanFilter::leaf(article, "status", LeafOperator::Eq, "PUBLISHED").unwrap();
        let c = BooleanFilter::leaf(article, "status", LeafOperator::Eq, "DRAFT").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_operands_must_share_the_node() {
        let catalog = blog_catalog();
        let article = catalog.node("Article").unwrap();
        let category = catalog.node("Category").unwrap();
        let on_category =
            BooleanFilter::leaf(category, "title", LeafOperator::Eq, "News").unwrap();

        let err = BooleanFilter::and(article, vec![on_category.clone()]).unwrap_err();
        assert!(matches!(err, StatementError::NodeMismatch { .. }));

        let err = BooleanFilter::edge_exists(article, "createdBy", Some(on_category)).unwrap_err();
        assert!(matches!(err, StatementError::NodeMismatch { .. }));
    }

    #[test]
    fn test_leaf_operator_validation() {
        let catalog = blog_catalog();
        let tag = catalog.node("Tag").unwrap();
        assert!(matches!(
            BooleanFilter::leaf(tag, "deprecated", LeafOperator::Gt, true),
            Err(StatementError::UnsupportedOperator { .. })
        ));
        assert!(matches!(
            BooleanFilter::leaf(tag, "title", LeafOperator::In, "x"),
            Err(StatementError::InvalidValue { .. })
        ));
        assert!(matches!(
            BooleanFilter::leaf(tag, "missing", LeafOperator::Eq, "x"),
            Err(StatementError::Catalog(_))
        ));
    }

    #[test]
    fn test_count_requires_multiple_reverse_edge() {
        let catalog = blog_catalog();
        let user = catalog.node("User").unwrap();
        assert!(BooleanFilter::reverse_edge_count(user, "articles", CountOperator::Gt, 1).is_ok());
        assert!(BooleanFilter::reverse_edge_count(user, "profile", CountOperator::Gt, 1).is_err());
    }

    #[test]
    fn test_dependencies_of_nested_filter() {
        let catalog = blog_catalog();
        let article = catalog.node("Article").unwrap();
        let category = catalog.node("Category").unwrap();
        let filter = BooleanFilter::and(
            article,
            vec![
                BooleanFilter::leaf(article, "status", LeafOperator::Eq, "PUBLISHED").unwrap(),
                BooleanFilter::edge_exists(
                    article,
                    "category",
                    Some(BooleanFilter::leaf(category, "title", LeafOperator::Eq, "News").unwrap()),
                )
                .unwrap(),
            ],
        )
        .unwrap();

        let graph = filter.dependencies();
        assert_eq!(graph.node(), "Article");
        assert!(graph.leaves().contains("status"));
        let head = &graph.edges()["category"];
        assert_eq!(head.node(), "Category");
        assert!(head.leaves().contains("title"));
        // memoized
        assert!(std::ptr::eq(graph, filter.dependencies()));
    }

    #[test]
    fn test_identifier_filter_with_edge_identifier() {
        let catalog = blog_catalog();
        let article_tag = catalog.node("ArticleTag").unwrap();
        let id = NodeValue::new()
            .with("article", NodeValue::new().with("id", "0b0ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59"))
            .with("tag", NodeValue::new().with("id", "4d3c2b1a-0f9e-4d8c-b7a6-958473625140"));
        let filter = BooleanFilter::identifier(&catalog, article_tag, &id).unwrap();
        assert_eq!(
            filter.to_string(),
            "(article { id = '0b0ef7d4-4a0e-4b8e-8a3e-6f1d2c3b4a59' } AND tag { id = '4d3c2b1a-0f9e-4d8c-b7a6-958473625140' })"
        );
    }
}
