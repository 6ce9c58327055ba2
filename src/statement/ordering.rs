//! Ordering algebra: tie-break lists of sort expressions.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::change::{NodeChange, NodeUpdate};
use super::dependency::DependencyGraph;
use super::errors::StatementError;
use super::value::{NodeValue, Value};
use crate::node_catalog::{Leaf, NodeSchema, ReverseEdge, ReverseEdgeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderingDirection {
    Ascending,
    Descending,
}

impl OrderingDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            OrderingDirection::Ascending => "ASC",
            OrderingDirection::Descending => "DESC",
        }
    }

    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            OrderingDirection::Ascending => ordering,
            OrderingDirection::Descending => ordering.reverse(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafOrdering {
    pub leaf: Arc<Leaf>,
    pub direction: OrderingDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReverseEdgeCountOrdering {
    pub reverse_edge: Arc<ReverseEdge>,
    pub direction: OrderingDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortExpression {
    Leaf(LeafOrdering),
    ReverseEdgeMultipleCount(ReverseEdgeCountOrdering),
}

impl SortExpression {
    pub fn direction(&self) -> OrderingDirection {
        match self {
            SortExpression::Leaf(o) => o.direction,
            SortExpression::ReverseEdgeMultipleCount(o) => o.direction,
        }
    }

    /// Key of the sorted value in an instance value
    pub fn key(&self) -> String {
        match self {
            SortExpression::Leaf(o) => o.leaf.name.clone(),
            SortExpression::ReverseEdgeMultipleCount(o) => o.reverse_edge.count_key(),
        }
    }
}

impl fmt::Display for SortExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.key(), self.direction().sql())
    }
}

/// Sort expressions in priority order: later ones only break ties.
#[derive(Clone)]
pub struct OrderingExpression {
    node: Arc<NodeSchema>,
    expressions: Vec<SortExpression>,
    /// `Some(None)`: already reduced
    reduced: OnceLock<Option<Box<OrderingExpression>>>,
    dependencies: OnceLock<DependencyGraph>,
}

impl OrderingExpression {
    pub fn new(
        node: &Arc<NodeSchema>,
        expressions: Vec<SortExpression>,
    ) -> Result<Self, StatementError> {
        for expression in &expressions {
            let owner = match expression {
                SortExpression::Leaf(o) => &o.leaf.node,
                SortExpression::ReverseEdgeMultipleCount(o) => &o.reverse_edge.node,
            };
            if *owner != node.name {
                return Err(StatementError::NodeMismatch {
                    expected: node.name.clone(),
                    found: owner.clone(),
                });
            }
        }
        Ok(OrderingExpression {
            node: node.clone(),
            expressions,
            reduced: OnceLock::new(),
            dependencies: OnceLock::new(),
        })
    }

    /// Parse `["title_ASC", "tagsCount_DESC"]`
    pub fn parse<S: AsRef<str>>(node: &Arc<NodeSchema>, input: &[S]) -> Result<Self, StatementError> {
        let mut expressions = Vec::with_capacity(input.len());
        for item in input {
            let item = item.as_ref();
            let invalid = |reason: &str| {
                StatementError::invalid_input(
                    format!("{}.orderBy", node.name),
                    format!("`{}`: {}", item, reason),
                )
            };

            let (key, direction) = if let Some(key) = item.strip_suffix("_ASC") {
                (key, OrderingDirection::Ascending)
            } else if let Some(key) = item.strip_suffix("_DESC") {
                (key, OrderingDirection::Descending)
            } else {
                return Err(invalid("expected a `_ASC` or `_DESC` suffix"));
            };

            let expression = if let Ok(leaf) = node.leaf(key) {
                SortExpression::Leaf(LeafOrdering {
                    leaf: leaf.clone(),
                    direction,
                })
            } else if let Some(reverse_edge) = key
                .strip_suffix("Count")
                .and_then(|name| node.reverse_edge(name).ok())
                .filter(|r| r.kind == ReverseEdgeKind::Multiple)
            {
                SortExpression::ReverseEdgeMultipleCount(ReverseEdgeCountOrdering {
                    reverse_edge: reverse_edge.clone(),
                    direction,
                })
            } else {
                return Err(invalid("unknown sort key"));
            };
            expressions.push(expression);
        }
        Self::new(node, expressions)
    }

    pub fn node(&self) -> &Arc<NodeSchema> {
        &self.node
    }

    pub fn expressions(&self) -> &[SortExpression] {
        &self.expressions
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// Drop keys already sorted on, and everything after a key that is unique on its own
    pub fn reduced(&self) -> OrderingExpression {
        let cell = self.reduced.get_or_init(|| {
            let reduced = self.compute_reduced();
            if reduced.expressions == self.expressions {
                None
            } else {
                let _ = reduced.reduced.set(None);
                Some(Box::new(reduced))
            }
        });
        match cell {
            Some(reduced) => (**reduced).clone(),
            None => self.clone(),
        }
    }

    fn compute_reduced(&self) -> OrderingExpression {
        let mut expressions: Vec<SortExpression> = Vec::with_capacity(self.expressions.len());
        for expression in &self.expressions {
            if expressions.iter().any(|e| e.key() == expression.key()) {
                continue;
            }
            expressions.push(expression.clone());
            if let SortExpression::Leaf(o) = expression {
                if !o.leaf.nullable && self.is_unique_leaf(&o.leaf.name) {
                    break;
                }
            }
        }
        OrderingExpression {
            node: self.node.clone(),
            expressions,
            reduced: OnceLock::new(),
            dependencies: OnceLock::new(),
        }
    }

    fn is_unique_leaf(&self, leaf: &str) -> bool {
        self.node
            .unique_constraints()
            .iter()
            .any(|u| u.components.len() == 1 && u.components[0] == leaf)
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        self.dependencies.get_or_init(|| {
            let mut graph = DependencyGraph::new(&self.node.name);
            for expression in &self.expressions {
                match expression {
                    SortExpression::Leaf(o) => graph.add_leaf(&o.leaf.name),
                    SortExpression::ReverseEdgeMultipleCount(o) => {
                        graph.add_reverse_edge(&o.reverse_edge, None)
                    }
                }
            }
            graph
        })
    }

    /// Whether the update can move an instance within the sorted list
    pub fn is_affected_by_update(&self, update: &NodeUpdate) -> bool {
        self.expressions.iter().any(|expression| match expression {
            SortExpression::Leaf(o) => {
                update.node.name == self.node.name && update.touches(&o.leaf.name)
            }
            // Re-parenting a child changes both parents' counts
            SortExpression::ReverseEdgeMultipleCount(o) => {
                update.node.name == o.reverse_edge.head()
                    && update.touches(&o.reverse_edge.original_edge.name)
            }
        })
    }

    pub fn is_affected_by_change(&self, change: &NodeChange) -> bool {
        match change {
            NodeChange::Update(update) => self.is_affected_by_update(update),
            NodeChange::Creation(_) | NodeChange::Deletion(_) => {
                self.expressions.iter().any(|expression| match expression {
                    SortExpression::Leaf(_) => false,
                    SortExpression::ReverseEdgeMultipleCount(o) => {
                        change.node_name() == o.reverse_edge.head()
                    }
                })
            }
        }
    }

    /// Lexicographic comparison of two instance values. NULL sorts first when ascending.
    pub fn compare(&self, a: &NodeValue, b: &NodeValue) -> Ordering {
        for expression in &self.expressions {
            let key = expression.key();
            let ordering = compare_values(
                a.get(&key).unwrap_or(&Value::Null),
                b.get(&key).unwrap_or(&Value::Null),
            );
            let ordering = expression.direction().apply(ordering);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Stable in-memory sort
    pub fn sort(&self, values: &mut [NodeValue]) {
        values.sort_by(|a, b| self.compare(a, b));
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::List(a), Value::List(b)) => a.len().cmp(&b.len()),
        _ => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

impl PartialEq for OrderingExpression {
    fn eq(&self, other: &Self) -> bool {
        self.node.name == other.node.name && self.expressions == other.expressions
    }
}

impl fmt::Debug for OrderingExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderingExpression({}: {})", self.node.name, self)
    }
}

impl fmt::Display for OrderingExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, expression) in self.expressions.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", expression)?;
        }
        f.write_str("]")
    }
}
