//! Normalization of boolean filters.
//!
//! `reduced()` never changes which instances a filter matches. The result is
//! memoized on the source filter and flagged as already reduced.

use super::{
    BooleanFilter, CountOperator, EdgeExistsFilter, FilterKind, LeafFilter, LeafOperator,
    ReverseEdgeCountFilter, ReverseEdgeExistsFilter,
};
use crate::statement::value::Value;

impl BooleanFilter {
    /// Equivalent filter in normal form. `f.reduced().reduced() == f.reduced()`.
    pub fn reduced(&self) -> BooleanFilter {
        let cell = self.0.reduced.get_or_init(|| {
            let reduced = self.compute_reduced();
            if reduced == *self {
                None
            } else {
                let _ = reduced.0.reduced.set(None);
                Some(reduced)
            }
        });
        match cell {
            Some(reduced) => reduced.clone(),
            None => self.clone(),
        }
    }

    /// Logical negation pushed one level down (De Morgan). Never applied by
    /// `reduced()`, which leaves `Not` in place.
    ///
    /// Ordering comparisons on nullable leaves keep an explicit `Not`, since
    /// `NOT (x > 1)` also matches NULL while `x <= 1` does not.
    pub fn complement(&self) -> BooleanFilter {
        let node = self.node();
        match self.kind() {
            FilterKind::Value(b) => BooleanFilter::value(node, !b),
            FilterKind::And(operands) => BooleanFilter::new(
                node,
                FilterKind::Or(operands.iter().map(BooleanFilter::complement).collect()),
            ),
            FilterKind::Or(operands) => BooleanFilter::new(
                node,
                FilterKind::And(operands.iter().map(BooleanFilter::complement).collect()),
            ),
            FilterKind::Not(operand) => operand.clone(),
            FilterKind::Leaf(filter) => {
                let operator = match filter.operator {
                    LeafOperator::Eq => Some(LeafOperator::Not),
                    LeafOperator::Not => Some(LeafOperator::Eq),
                    LeafOperator::In => Some(LeafOperator::NotIn),
                    LeafOperator::NotIn => Some(LeafOperator::In),
                    _ if filter.leaf.nullable => None,
                    LeafOperator::Gt => Some(LeafOperator::Lte),
                    LeafOperator::Gte => Some(LeafOperator::Lt),
                    LeafOperator::Lt => Some(LeafOperator::Gte),
                    LeafOperator::Lte => Some(LeafOperator::Gt),
                    LeafOperator::FullText => None,
                };
                match operator {
                    Some(operator) => BooleanFilter::new(
                        node,
                        FilterKind::Leaf(LeafFilter {
                            operator,
                            ..filter.clone()
                        }),
                    ),
                    None => BooleanFilter::not(self.clone()),
                }
            }
            FilterKind::ReverseEdgeMultipleCount(filter) => {
                let operator = match filter.operator {
                    CountOperator::Eq => CountOperator::Not,
                    CountOperator::Not => CountOperator::Eq,
                    CountOperator::Gt => CountOperator::Lte,
                    CountOperator::Gte => CountOperator::Lt,
                    CountOperator::Lt => CountOperator::Gte,
                    CountOperator::Lte => CountOperator::Gt,
                };
                BooleanFilter::new(
                    node,
                    FilterKind::ReverseEdgeMultipleCount(ReverseEdgeCountFilter {
                        operator,
                        ..filter.clone()
                    }),
                )
            }
            _ => BooleanFilter::not(self.clone()),
        }
    }

    fn compute_reduced(&self) -> BooleanFilter {
        let node = self.node();
        match self.kind() {
            FilterKind::Value(_) | FilterKind::Raw(_) => self.clone(),
            FilterKind::And(operands) => self.reduce_junction(operands, true),
            FilterKind::Or(operands) => self.reduce_junction(operands, false),
            FilterKind::Not(operand) => {
                let operand = operand.reduced();
                match operand.kind() {
                    FilterKind::Value(b) => BooleanFilter::value(node, !b),
                    FilterKind::Not(inner) => inner.clone(),
                    _ => BooleanFilter::not(operand),
                }
            }
            FilterKind::Leaf(filter) => match (filter.operator, &filter.value) {
                (LeafOperator::In, Value::List(items)) if items.is_empty() => {
                    BooleanFilter::value(node, false)
                }
                (LeafOperator::NotIn, Value::List(items)) if items.is_empty() => {
                    BooleanFilter::value(node, true)
                }
                (LeafOperator::In | LeafOperator::NotIn, Value::List(items)) if items.len() == 1 => {
                    let operator = if filter.operator == LeafOperator::In {
                        LeafOperator::Eq
                    } else {
                        LeafOperator::Not
                    };
                    BooleanFilter::new(
                        node,
                        FilterKind::Leaf(LeafFilter {
                            leaf: filter.leaf.clone(),
                            operator,
                            value: items[0].clone(),
                        }),
                    )
                }
                _ => self.clone(),
            },
            FilterKind::EdgeExists(filter) => {
                let head_filter = filter.head_filter.as_ref().map(BooleanFilter::reduced);
                match head_filter {
                    Some(head) if head.is_false() => BooleanFilter::value(node, false),
                    Some(head) if !head.is_true() => BooleanFilter::new(
                        node,
                        FilterKind::EdgeExists(EdgeExistsFilter {
                            edge: filter.edge.clone(),
                            head_filter: Some(head),
                        }),
                    ),
                    _ if !filter.edge.nullable => BooleanFilter::value(node, true),
                    _ => BooleanFilter::new(
                        node,
                        FilterKind::EdgeExists(EdgeExistsFilter {
                            edge: filter.edge.clone(),
                            head_filter: None,
                        }),
                    ),
                }
            }
            FilterKind::ReverseEdgeUniqueExists(filter) => {
                self.reduce_reverse_exists(filter, FilterKind::ReverseEdgeUniqueExists)
            }
            FilterKind::ReverseEdgeMultipleExists(filter) => {
                self.reduce_reverse_exists(filter, FilterKind::ReverseEdgeMultipleExists)
            }
            FilterKind::ReverseEdgeMultipleCount(filter) => match (filter.operator, filter.value) {
                (CountOperator::Gte, 0) => BooleanFilter::value(node, true),
                (CountOperator::Lt, 0) => BooleanFilter::value(node, false),
                _ => self.clone(),
            },
        }
    }

    fn reduce_reverse_exists(
        &self,
        filter: &ReverseEdgeExistsFilter,
        wrap: fn(ReverseEdgeExistsFilter) -> FilterKind,
    ) -> BooleanFilter {
        let head_filter = filter.head_filter.as_ref().map(BooleanFilter::reduced);
        if head_filter.as_ref().is_some_and(BooleanFilter::is_false) {
            return BooleanFilter::value(self.node(), false);
        }
        BooleanFilter::new(
            self.node(),
            wrap(ReverseEdgeExistsFilter {
                reverse_edge: filter.reverse_edge.clone(),
                head_filter: head_filter.filter(|head| !head.is_true()),
            }),
        )
    }

    /// `conjunction`: AND when true, OR when false
    fn reduce_junction(&self, operands: &[BooleanFilter], conjunction: bool) -> BooleanFilter {
        let node = self.node();
        // Absorbing element of the junction: `false` for AND, `true` for OR
        let absorbing = !conjunction;

        let mut flattened: Vec<BooleanFilter> = Vec::with_capacity(operands.len());
        let mut pending: Vec<BooleanFilter> = operands.iter().rev().map(|o| o.reduced()).collect();
        while let Some(operand) = pending.pop() {
            match operand.kind() {
                FilterKind::Value(b) if *b == absorbing => {
                    return BooleanFilter::value(node, absorbing)
                }
                FilterKind::Value(_) => {}
                FilterKind::And(nested) if conjunction => {
                    pending.extend(nested.iter().rev().cloned())
                }
                FilterKind::Or(nested) if !conjunction => {
                    pending.extend(nested.iter().rev().cloned())
                }
                _ => {
                    if !flattened.contains(&operand) {
                        flattened.push(operand);
                    }
                }
            }
        }

        // x AND NOT x, x OR NOT x
        let contradicts = flattened.iter().any(|operand| match operand.kind() {
            FilterKind::Not(inner) => flattened.contains(inner),
            _ => false,
        });
        if contradicts {
            return BooleanFilter::value(node, absorbing);
        }

        match flattened.len() {
            0 => BooleanFilter::value(node, conjunction),
            1 => flattened.remove(0),
            _ if conjunction => BooleanFilter::new(node, FilterKind::And(flattened)),
            _ => BooleanFilter::new(node, FilterKind::Or(flattened)),
        }
    }
}
