//! # Change-Affected-Graph Evaluator
//!
//! Given a committed [`NodeChange`] and an expression rooted at some node `R`,
//! computes a filter on `R` matching every instance whose result may have
//! changed, or `None` when the change cannot affect the expression.
//!
//! ```text
//! filter:  Article { status = 'PUBLISHED' AND category { title = 'News' } }
//!
//! update Article#A  status: DRAFT -> PUBLISHED    =>  Some(id = A)
//! update Article#A  views: 1 -> 2                 =>  None
//! update Category#C title: Misc -> News           =>  Some(category { id = C })
//! ```
//!
//! ## Rules
//!
//! - Expressions whose dependency graph is not touched by the change are pruned
//!   without being traversed.
//! - And/Or: union of each operand's own result. Not: the operand's result.
//! - Leaf on `R`: creation, deletion, or an update of that leaf yields `{id = change.id}`.
//! - Edge `R.e -> H`: changes of `e` on `R` yield `{id}`; changes under `H` are
//!   evaluated against the head filter and wrapped back into `e { .. }`.
//! - Reverse edge `R.rel <- H.e`: creation, deletion or re-parenting of an `H`
//!   instance yields the identifier of every parent it left or joined. Other
//!   changes under `H` are wrapped back into `rel SOME { .. }`.
//! - Raw SQL cannot be traced: the answer is `true`, re-evaluate everything.
//!
//! The union rule is conservative: operands are evaluated independently and the
//! results are never intersected.

mod subscription;

use std::sync::Arc;

use crate::node_catalog::{NodeCatalog, NodeSchema, ReverseEdge};
use crate::statement::{
    BooleanFilter, FilterKind, NodeChange, NodeSelection, OrderingExpression, SelectionExpression,
    StatementError, Value,
};

pub use subscription::{ChangeImpact, SubscriptionDependencies, SubscriptionImpact};

/// Evaluator bound to the catalog the expressions were built against.
#[derive(Debug, Clone, Copy)]
pub struct AffectedGraph<'a> {
    catalog: &'a NodeCatalog,
}

impl<'a> AffectedGraph<'a> {
    pub fn new(catalog: &'a NodeCatalog) -> Self {
        AffectedGraph { catalog }
    }

    /// Instances of `filter.node()` whose match result may have changed
    pub fn filter(
        &self,
        filter: &BooleanFilter,
        change: &NodeChange,
    ) -> Result<Option<BooleanFilter>, StatementError> {
        if !filter.dependencies().is_touched_by(change) {
            log::trace!("{} pruned for filter on {}", change, filter.node().name);
            return Ok(None);
        }

        let root = filter.node();
        let mut results = Vec::new();
        match filter.kind() {
            FilterKind::Value(_) => {}
            FilterKind::Raw(sql) => {
                log::warn!(
                    "Raw filter on {} cannot be traced through {}, re-evaluating all: {}",
                    root.name,
                    change,
                    sql
                );
                return Ok(Some(BooleanFilter::value(root, true)));
            }
            FilterKind::And(operands) | FilterKind::Or(operands) => {
                for operand in operands {
                    results.extend(self.filter(operand, change)?);
                }
            }
            FilterKind::Not(operand) => return self.filter(operand, change),
            FilterKind::Leaf(leaf_filter) => {
                if self.changes_component(root, &leaf_filter.leaf.name, change) {
                    results.push(self.changed_instance(root, change)?);
                }
            }
            FilterKind::EdgeExists(edge_filter) => {
                if self.changes_component(root, &edge_filter.edge.name, change) {
                    results.push(self.changed_instance(root, change)?);
                }
                if let Some(head_filter) = &edge_filter.head_filter {
                    if let Some(head_result) = self.filter(head_filter, change)? {
                        results.push(BooleanFilter::edge_exists(
                            root,
                            &edge_filter.edge.name,
                            Some(head_result),
                        )?);
                    }
                }
            }
            FilterKind::ReverseEdgeUniqueExists(exists)
            | FilterKind::ReverseEdgeMultipleExists(exists) => {
                let head_results = match &exists.head_filter {
                    Some(head_filter) => self.filter(head_filter, change)?.into_iter().collect(),
                    None => Vec::new(),
                };
                results.extend(self.through_reverse_edge(
                    root,
                    &exists.reverse_edge,
                    head_results,
                    change,
                )?);
            }
            FilterKind::ReverseEdgeMultipleCount(count) => {
                results.extend(self.through_reverse_edge(
                    root,
                    &count.reverse_edge,
                    Vec::new(),
                    change,
                )?);
            }
        }
        union(root, results)
    }

    /// Whether the change can move an instance within an ordered result
    pub fn ordering(&self, ordering: &OrderingExpression, change: &NodeChange) -> bool {
        ordering.is_affected_by_change(change)
    }

    /// Instances of `selection.node()` whose selected value may be stale
    pub fn selection(
        &self,
        selection: &NodeSelection,
        change: &NodeChange,
    ) -> Result<Option<BooleanFilter>, StatementError> {
        if !selection.dependencies().is_touched_by(change) {
            return Ok(None);
        }

        let root = selection.node();
        let mut results = Vec::new();
        for expression in selection.expressions() {
            match expression {
                SelectionExpression::Leaf(s) => {
                    if updates_component(root, &s.leaf.name, change) {
                        results.push(self.changed_instance(root, change)?);
                    }
                }
                SelectionExpression::EdgeHead(s) => {
                    if updates_component(root, &s.edge.name, change) {
                        results.push(self.changed_instance(root, change)?);
                    }
                    if let Some(head_result) = self.selection(&s.head_selection, change)? {
                        results.push(BooleanFilter::edge_exists(
                            root,
                            &s.edge.name,
                            Some(head_result),
                        )?);
                    }
                }
                SelectionExpression::ReverseEdgeUniqueHead(s) => {
                    let head_results = self
                        .selection(&s.head_selection, change)?
                        .into_iter()
                        .collect();
                    results.extend(self.through_reverse_edge(
                        root,
                        &s.reverse_edge,
                        head_results,
                        change,
                    )?);
                }
                SelectionExpression::ReverseEdgeMultipleHead(s) => {
                    let mut head_results = Vec::new();
                    if let Some(filter) = &s.filter {
                        head_results.extend(self.filter(filter, change)?);
                    }
                    if let Some(ordering) = s.ordering.as_ref().filter(|o| self.ordering(o, change)) {
                        let head = ordering.node();
                        // Count orderings move through changes below the head
                        head_results.push(if change.node_name() == head.name {
                            self.changed_instance(head, change)?
                        } else {
                            BooleanFilter::value(head, true)
                        });
                    }
                    head_results.extend(self.selection(&s.head_selection, change)?);
                    results.extend(self.through_reverse_edge(
                        root,
                        &s.reverse_edge,
                        head_results,
                        change,
                    )?);
                }
                SelectionExpression::ReverseEdgeMultipleCount(s) => {
                    let head_results = match &s.filter {
                        Some(filter) => self.filter(filter, change)?.into_iter().collect(),
                        None => Vec::new(),
                    };
                    results.extend(self.through_reverse_edge(
                        root,
                        &s.reverse_edge,
                        head_results,
                        change,
                    )?);
                }
            }
        }
        union(root, results)
    }

    /// `{id = change.id}` on the changed node
    fn changed_instance(
        &self,
        node: &Arc<NodeSchema>,
        change: &NodeChange,
    ) -> Result<BooleanFilter, StatementError> {
        BooleanFilter::identifier(self.catalog, node, change.id())
    }

    /// Creation or deletion of a `node` instance, or an update of `component` on it
    fn changes_component(&self, node: &NodeSchema, component: &str, change: &NodeChange) -> bool {
        change.node_name() == node.name
            && match change {
                NodeChange::Update(update) => update.touches(component),
                NodeChange::Creation(_) | NodeChange::Deletion(_) => true,
            }
    }

    /// Results of a change seen through `root.reverse_edge`.
    ///
    /// `head_results` are filters on the reverse edge's head, wrapped back into
    /// existence filters on `root`.
    fn through_reverse_edge(
        &self,
        root: &Arc<NodeSchema>,
        reverse_edge: &ReverseEdge,
        head_results: Vec<BooleanFilter>,
        change: &NodeChange,
    ) -> Result<Vec<BooleanFilter>, StatementError> {
        let mut results = Vec::new();
        let original_edge = &reverse_edge.original_edge;
        let mut parents_emitted = false;

        let head = self.catalog.reverse_edge_head(reverse_edge)?;
        if self.changes_component(head, &original_edge.name, change) {
            let (before, after) = change.component_values(&original_edge.name);
            let unknown = match change {
                NodeChange::Creation(_) => after.is_none(),
                NodeChange::Deletion(_) => before.is_none(),
                NodeChange::Update(_) => before.is_none() || after.is_none(),
            };
            if unknown {
                log::warn!(
                    "{} does not carry `{}`, re-evaluating all of {}",
                    change,
                    original_edge.name,
                    root.name
                );
                return Ok(vec![BooleanFilter::value(root, true)]);
            }
            for parent in [before, after].into_iter().flatten() {
                if let Value::Node(parent_id) = parent {
                    results.push(BooleanFilter::identifier(self.catalog, root, parent_id)?);
                }
            }
            parents_emitted = true;
        }

        let changed_child = if parents_emitted {
            Some(self.changed_instance(head, change)?)
        } else {
            None
        };
        for head_result in head_results {
            // The parents of the changed child are already listed
            if changed_child.as_ref() == Some(&head_result) {
                continue;
            }
            results.push(BooleanFilter::reverse_edge_exists(
                root,
                &reverse_edge.name,
                Some(head_result),
            )?);
        }
        Ok(results)
    }
}

/// Selected values only go stale through updates; existence is the filter's concern
fn updates_component(node: &NodeSchema, component: &str, change: &NodeChange) -> bool {
    matches!(change, NodeChange::Update(update) if update.node.name == node.name && update.touches(component))
}

fn union(
    node: &Arc<NodeSchema>,
    results: Vec<BooleanFilter>,
) -> Result<Option<BooleanFilter>, StatementError> {
    if results.is_empty() {
        return Ok(None);
    }
    Ok(Some(BooleanFilter::or(node, results)?.reduced()))
}
