//! Selection algebra: which fields and relations to materialize, and in which shape.
//!
//! ```text
//! { "id": true, "title": true,
//!   "category": { "title": true },
//!   "tags": { "where": { "order_gt": 0 }, "orderBy": ["order_ASC"], "first": 5,
//!             "selection": { "tag": { "title": true } } },
//!   "nbTags:tagsCount": true }
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::Value as Json;

use super::dependency::DependencyGraph;
use super::errors::StatementError;
use super::filter::BooleanFilter;
use super::ordering::OrderingExpression;
use super::value::{NodeValue, Value};
use crate::node_catalog::{
    Component, Edge, Leaf, NodeCatalog, NodeSchema, ReverseEdge, ReverseEdgeKind,
};

#[derive(Debug, Clone, PartialEq)]
pub struct LeafSelection {
    pub leaf: Arc<Leaf>,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeHeadSelection {
    pub edge: Arc<Edge>,
    pub key: String,
    pub head_selection: NodeSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReverseEdgeUniqueHeadSelection {
    pub reverse_edge: Arc<ReverseEdge>,
    pub key: String,
    pub head_selection: NodeSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReverseEdgeMultipleHeadSelection {
    pub reverse_edge: Arc<ReverseEdge>,
    pub key: String,
    pub filter: Option<BooleanFilter>,
    pub ordering: Option<OrderingExpression>,
    pub offset: u64,
    pub limit: u64,
    pub head_selection: NodeSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReverseEdgeCountSelection {
    pub reverse_edge: Arc<ReverseEdge>,
    pub key: String,
    pub filter: Option<BooleanFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionExpression {
    Leaf(LeafSelection),
    EdgeHead(EdgeHeadSelection),
    ReverseEdgeUniqueHead(ReverseEdgeUniqueHeadSelection),
    ReverseEdgeMultipleHead(ReverseEdgeMultipleHeadSelection),
    ReverseEdgeMultipleCount(ReverseEdgeCountSelection),
}

impl SelectionExpression {
    /// Key of the expression in the selected value
    pub fn key(&self) -> &str {
        match self {
            SelectionExpression::Leaf(s) => &s.key,
            SelectionExpression::EdgeHead(s) => &s.key,
            SelectionExpression::ReverseEdgeUniqueHead(s) => &s.key,
            SelectionExpression::ReverseEdgeMultipleHead(s) => &s.key,
            SelectionExpression::ReverseEdgeMultipleCount(s) => &s.key,
        }
    }

    fn owner(&self) -> &str {
        match self {
            SelectionExpression::Leaf(s) => &s.leaf.node,
            SelectionExpression::EdgeHead(s) => &s.edge.node,
            SelectionExpression::ReverseEdgeUniqueHead(s) => &s.reverse_edge.node,
            SelectionExpression::ReverseEdgeMultipleHead(s) => &s.reverse_edge.node,
            SelectionExpression::ReverseEdgeMultipleCount(s) => &s.reverse_edge.node,
        }
    }

    fn head_selection(&self) -> Option<&NodeSelection> {
        match self {
            SelectionExpression::EdgeHead(s) => Some(&s.head_selection),
            SelectionExpression::ReverseEdgeUniqueHead(s) => Some(&s.head_selection),
            SelectionExpression::ReverseEdgeMultipleHead(s) => Some(&s.head_selection),
            SelectionExpression::Leaf(_) | SelectionExpression::ReverseEdgeMultipleCount(_) => None,
        }
    }

    /// Same variant, key, relation and arguments; head selections may differ
    pub fn is_akin_to(&self, other: &SelectionExpression) -> bool {
        match (self, other) {
            (SelectionExpression::Leaf(a), SelectionExpression::Leaf(b)) => a == b,
            (SelectionExpression::EdgeHead(a), SelectionExpression::EdgeHead(b)) => {
                a.key == b.key && a.edge == b.edge
            }
            (
                SelectionExpression::ReverseEdgeUniqueHead(a),
                SelectionExpression::ReverseEdgeUniqueHead(b),
            ) => a.key == b.key && a.reverse_edge == b.reverse_edge,
            (
                SelectionExpression::ReverseEdgeMultipleHead(a),
                SelectionExpression::ReverseEdgeMultipleHead(b),
            ) => {
                a.key == b.key
                    && a.reverse_edge == b.reverse_edge
                    && a.filter == b.filter
                    && a.ordering == b.ordering
                    && a.offset == b.offset
                    && a.limit == b.limit
            }
            (
                SelectionExpression::ReverseEdgeMultipleCount(a),
                SelectionExpression::ReverseEdgeMultipleCount(b),
            ) => a == b,
            _ => false,
        }
    }

    /// Whether a value selected with `self` carries everything `other` asks for
    pub fn includes(&self, other: &SelectionExpression) -> bool {
        self.is_akin_to(other)
            && match (self.head_selection(), other.head_selection()) {
                (Some(mine), Some(theirs)) => mine.includes(theirs),
                _ => true,
            }
    }

    fn with_head_selection(&self, head_selection: NodeSelection) -> SelectionExpression {
        let mut expression = self.clone();
        match &mut expression {
            SelectionExpression::EdgeHead(s) => s.head_selection = head_selection,
            SelectionExpression::ReverseEdgeUniqueHead(s) => s.head_selection = head_selection,
            SelectionExpression::ReverseEdgeMultipleHead(s) => s.head_selection = head_selection,
            SelectionExpression::Leaf(_) | SelectionExpression::ReverseEdgeMultipleCount(_) => {}
        }
        expression
    }

    fn dependencies(&self, graph: &mut DependencyGraph) {
        match self {
            SelectionExpression::Leaf(s) => graph.add_leaf(&s.leaf.name),
            SelectionExpression::EdgeHead(s) => {
                graph.add_edge(&s.edge, Some(s.head_selection.dependencies()))
            }
            SelectionExpression::ReverseEdgeUniqueHead(s) => {
                graph.add_reverse_edge(&s.reverse_edge, Some(s.head_selection.dependencies()))
            }
            SelectionExpression::ReverseEdgeMultipleHead(s) => {
                let mut head = s.head_selection.dependencies().clone();
                if let Some(filter) = &s.filter {
                    head.merge(filter.dependencies());
                }
                if let Some(ordering) = &s.ordering {
                    head.merge(ordering.dependencies());
                }
                graph.add_reverse_edge(&s.reverse_edge, Some(&head));
            }
            SelectionExpression::ReverseEdgeMultipleCount(s) => graph.add_reverse_edge(
                &s.reverse_edge,
                s.filter.as_ref().map(BooleanFilter::dependencies),
            ),
        }
    }

    fn parse_value(&self, node: &str, value: &NodeValue) -> Result<Value, StatementError> {
        let key = self.key();
        let raw = value.get(key).ok_or_else(|| StatementError::missing(node, key))?;
        let invalid = |expected: &str| StatementError::InvalidValue {
            node: node.to_string(),
            component: key.to_string(),
            expected: expected.to_string(),
            value: raw.to_string(),
        };

        match self {
            SelectionExpression::Leaf(s) => s.leaf.parse_value(raw),
            SelectionExpression::EdgeHead(s) => match raw {
                Value::Null if s.edge.nullable => Ok(Value::Null),
                Value::Node(head) => Ok(Value::Node(s.head_selection.parse_value(head)?)),
                _ => Err(invalid(&format!("reference to {}", s.edge.head))),
            },
            SelectionExpression::ReverseEdgeUniqueHead(s) => match raw {
                Value::Null => Ok(Value::Null),
                Value::Node(head) => Ok(Value::Node(s.head_selection.parse_value(head)?)),
                _ => Err(invalid(s.reverse_edge.head())),
            },
            SelectionExpression::ReverseEdgeMultipleHead(s) => match raw {
                Value::List(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::Node(head) => Ok(Value::Node(s.head_selection.parse_value(head)?)),
                        _ => Err(invalid(&format!("list of {}", s.reverse_edge.head()))),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List),
                _ => Err(invalid(&format!("list of {}", s.reverse_edge.head()))),
            },
            // Drivers may hand COUNT(*) back as a decimal string
            SelectionExpression::ReverseEdgeMultipleCount(_) => match raw {
                Value::Int(n) if *n >= 0 => Ok(Value::Int(*n)),
                Value::String(s) => s
                    .parse::<u64>()
                    .ok()
                    .and_then(|n| i64::try_from(n).ok())
                    .map(Value::Int)
                    .ok_or_else(|| invalid("count")),
                _ => Err(invalid("count")),
            },
        }
    }
}

/// Ordered selection expressions over one node; keys are unique.
#[derive(Clone)]
pub struct NodeSelection {
    node: Arc<NodeSchema>,
    expressions: Vec<SelectionExpression>,
    dependencies: OnceLock<DependencyGraph>,
}

impl NodeSelection {
    pub fn new(
        node: &Arc<NodeSchema>,
        expressions: Vec<SelectionExpression>,
    ) -> Result<Self, StatementError> {
        for (i, expression) in expressions.iter().enumerate() {
            if expression.owner() != node.name {
                return Err(StatementError::NodeMismatch {
                    expected: node.name.clone(),
                    found: expression.owner().to_string(),
                });
            }
            if expressions[..i].iter().any(|e| e.key() == expression.key()) {
                return Err(StatementError::DuplicateSelectionKey {
                    node: node.name.clone(),
                    key: expression.key().to_string(),
                });
            }
        }
        Ok(NodeSelection {
            node: node.clone(),
            expressions,
            dependencies: OnceLock::new(),
        })
    }

    /// Selection of the identifier components, edge heads reduced to their own identifier
    pub fn identifier(catalog: &NodeCatalog, node: &Arc<NodeSchema>) -> Result<Self, StatementError> {
        let mut expressions = Vec::new();
        for component in node.identifier_components() {
            expressions.push(match component {
                Component::Leaf(leaf) => SelectionExpression::Leaf(LeafSelection {
                    leaf: leaf.clone(),
                    key: leaf.name.clone(),
                }),
                Component::Edge(edge) => SelectionExpression::EdgeHead(EdgeHeadSelection {
                    edge: edge.clone(),
                    key: edge.name.clone(),
                    head_selection: Self::identifier(catalog, catalog.edge_head(edge)?)?,
                }),
            });
        }
        Self::new(node, expressions)
    }

    /// Parse a selection-input object, see the module documentation.
    pub fn parse(
        catalog: &NodeCatalog,
        node: &Arc<NodeSchema>,
        input: &Json,
    ) -> Result<Self, StatementError> {
        parse_selection(catalog, node, input, &node.name)
    }

    pub fn node(&self) -> &Arc<NodeSchema> {
        &self.node
    }

    pub fn expressions(&self) -> &[SelectionExpression] {
        &self.expressions
    }

    pub fn get(&self, key: &str) -> Option<&SelectionExpression> {
        self.expressions.iter().find(|e| e.key() == key)
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        self.dependencies.get_or_init(|| {
            let mut graph = DependencyGraph::new(&self.node.name);
            for expression in &self.expressions {
                expression.dependencies(&mut graph);
            }
            graph
        })
    }

    /// Project a raw record down to exactly the selected shape
    pub fn parse_value(&self, value: &NodeValue) -> Result<NodeValue, StatementError> {
        let mut selected = NodeValue::new();
        for expression in &self.expressions {
            selected.insert(expression.key(), expression.parse_value(&self.node.name, value)?);
        }
        Ok(selected)
    }

    /// Whether every expression of `other` is covered by an expression of `self`
    pub fn includes(&self, other: &NodeSelection) -> bool {
        self.node.name == other.node.name
            && other
                .expressions
                .iter()
                .all(|theirs| self.expressions.iter().any(|mine| mine.includes(theirs)))
    }

    /// Smallest selection including both `self` and `other`
    pub fn merge(&self, other: &NodeSelection) -> Result<NodeSelection, StatementError> {
        if self.node.name != other.node.name {
            return Err(StatementError::NodeMismatch {
                expected: self.node.name.clone(),
                found: other.node.name.clone(),
            });
        }
        let mut expressions = self.expressions.clone();
        for theirs in &other.expressions {
            match expressions.iter().position(|mine| mine.is_akin_to(theirs)) {
                Some(index) => {
                    if let (Some(mine), Some(their_head)) =
                        (expressions[index].head_selection(), theirs.head_selection())
                    {
                        let merged = mine.merge(their_head)?;
                        expressions[index] = expressions[index].with_head_selection(merged);
                    }
                }
                None => expressions.push(theirs.clone()),
            }
        }
        // Two different expressions under the same key are rejected here
        Self::new(&self.node, expressions)
    }
}

impl PartialEq for NodeSelection {
    fn eq(&self, other: &Self) -> bool {
        self.node.name == other.node.name && self.expressions == other.expressions
    }
}

impl fmt::Debug for NodeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeSelection({}: {})", self.node.name, self)
    }
}

impl fmt::Display for NodeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, expression) in self.expressions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(expression.key())?;
            match expression {
                SelectionExpression::Leaf(_) => {}
                SelectionExpression::ReverseEdgeMultipleCount(_) => f.write_str(" (count)")?,
                SelectionExpression::ReverseEdgeMultipleHead(s) => {
                    write!(f, "[{}..+{}] {}", s.offset, s.limit, s.head_selection)?
                }
                SelectionExpression::EdgeHead(s) => write!(f, " {}", s.head_selection)?,
                SelectionExpression::ReverseEdgeUniqueHead(s) => write!(f, " {}", s.head_selection)?,
            }
        }
        f.write_str("}")
    }
}

fn parse_selection(
    catalog: &NodeCatalog,
    node: &Arc<NodeSchema>,
    input: &Json,
    path: &str,
) -> Result<NodeSelection, StatementError> {
    let object = input
        .as_object()
        .ok_or_else(|| StatementError::invalid_input(path, "expected an object"))?;

    let mut expressions = Vec::with_capacity(object.len());
    for (entry, value) in object {
        let path = format!("{}.{}", path, entry);
        let (key, name) = match entry.split_once(':') {
            Some((alias, name)) => (alias.to_string(), name),
            None => (entry.clone(), entry.as_str()),
        };
        // Keys become dotted column aliases in compiled statements
        if key.is_empty()
            || key.starts_with("__")
            || !key.chars().all(|c| c == '_' || c.is_ascii_alphanumeric())
        {
            return Err(StatementError::invalid_input(
                path,
                format!("invalid selection key `{}`", key),
            ));
        }
        expressions.push(parse_expression(catalog, node, key, name, value, &path)?);
    }
    NodeSelection::new(node, expressions)
}

fn parse_expression(
    catalog: &NodeCatalog,
    node: &Arc<NodeSchema>,
    key: String,
    name: &str,
    value: &Json,
    path: &str,
) -> Result<SelectionExpression, StatementError> {
    match node.component(name) {
        Some(Component::Leaf(leaf)) => {
            expect_true(value, path)?;
            return Ok(SelectionExpression::Leaf(LeafSelection {
                leaf: leaf.clone(),
                key,
            }));
        }
        Some(Component::Edge(edge)) => {
            let head = catalog.edge_head(edge)?;
            return Ok(SelectionExpression::EdgeHead(EdgeHeadSelection {
                edge: edge.clone(),
                key,
                head_selection: parse_selection(catalog, head, value, path)?,
            }));
        }
        None => {}
    }

    if let Ok(reverse_edge) = node.reverse_edge(name) {
        let head = catalog.reverse_edge_head(reverse_edge)?;
        return match reverse_edge.kind {
            ReverseEdgeKind::Unique => Ok(SelectionExpression::ReverseEdgeUniqueHead(
                ReverseEdgeUniqueHeadSelection {
                    reverse_edge: reverse_edge.clone(),
                    key,
                    head_selection: parse_selection(catalog, head, value, path)?,
                },
            )),
            ReverseEdgeKind::Multiple => {
                let args = value.as_object().ok_or_else(|| {
                    StatementError::invalid_input(path, "expected `{ first, selection }`")
                })?;
                let filter = match args.get("where") {
                    Some(input) => Some(BooleanFilter::parse(catalog, head, input)?),
                    None => None,
                };
                let ordering = match args.get("orderBy") {
                    Some(Json::Array(items)) => {
                        let items = items
                            .iter()
                            .map(|i| {
                                i.as_str().ok_or_else(|| {
                                    StatementError::invalid_input(path, "expected `orderBy` strings")
                                })
                            })
                            .collect::<Result<Vec<_>, _>>()?;
                        Some(OrderingExpression::parse(head, &items)?)
                    }
                    Some(_) => {
                        return Err(StatementError::invalid_input(path, "expected an `orderBy` list"))
                    }
                    None => None,
                };
                let count = |arg: &str| -> Result<Option<u64>, StatementError> {
                    match args.get(arg) {
                        None => Ok(None),
                        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
                            StatementError::invalid_input(
                                format!("{}.{}", path, arg),
                                "expected a non-negative integer",
                            )
                        }),
                    }
                };
                let limit = count("first")?.ok_or_else(|| {
                    StatementError::invalid_input(path, "`first` is required")
                })?;
                let head_selection = match args.get("selection") {
                    Some(input) => parse_selection(catalog, head, input, &format!("{}.selection", path))?,
                    None => NodeSelection::identifier(catalog, head)?,
                };
                Ok(SelectionExpression::ReverseEdgeMultipleHead(
                    ReverseEdgeMultipleHeadSelection {
                        reverse_edge: reverse_edge.clone(),
                        key,
                        filter,
                        ordering,
                        offset: count("skip")?.unwrap_or(0),
                        limit,
                        head_selection,
                    },
                ))
            }
        };
    }

    if let Some(reverse_edge) = name
        .strip_suffix("Count")
        .and_then(|rel| node.reverse_edge(rel).ok())
        .filter(|r| r.kind == ReverseEdgeKind::Multiple)
    {
        let filter = match value {
            Json::Bool(true) => None,
            Json::Object(args) => match args.get("where") {
                Some(input) => Some(BooleanFilter::parse(
                    catalog,
                    catalog.reverse_edge_head(reverse_edge)?,
                    input,
                )?),
                None => None,
            },
            _ => return Err(StatementError::invalid_input(path, "expected `true` or `{ where }`")),
        };
        return Ok(SelectionExpression::ReverseEdgeMultipleCount(
            ReverseEdgeCountSelection {
                reverse_edge: reverse_edge.clone(),
                key,
                filter,
            },
        ));
    }

    Err(StatementError::invalid_input(
        path,
        format!("unknown selection key `{}` on `{}`", name, node.name),
    ))
}

fn expect_true(value: &Json, path: &str) -> Result<(), StatementError> {
    match value {
        Json::Bool(true) => Ok(()),
        _ => Err(StatementError::invalid_input(path, "expected `true`")),
    }
}
