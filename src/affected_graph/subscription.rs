use std::fmt;
use std::sync::Arc;

use super::AffectedGraph;
use crate::node_catalog::{NodeCatalog, NodeSchema};
use crate::statement::{
    BooleanFilter, NodeChange, NodeChangeAggregation, NodeSelection, OrderingExpression,
    StatementError,
};

/// Impact of one committed change on a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeImpact {
    Unaffected,
    /// Re-select the root instances matching this filter
    Filter(BooleanFilter),
    ReevaluateAll,
}

impl fmt::Display for ChangeImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeImpact::Unaffected => f.write_str("unaffected"),
            ChangeImpact::Filter(filter) => write!(f, "re-select {}", filter),
            ChangeImpact::ReevaluateAll => f.write_str("re-evaluate all"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionImpact {
    /// One entry per change of the aggregation, in commit order
    pub impacts: Vec<ChangeImpact>,
    /// The ordered result may need to be re-sorted
    pub reordered: bool,
}

impl SubscriptionImpact {
    pub fn is_unaffected(&self) -> bool {
        !self.reordered
            && self
                .impacts
                .iter()
                .all(|impact| matches!(impact, ChangeImpact::Unaffected))
    }

    /// A single root filter covering every impact; `true` when everything must be re-evaluated
    pub fn combined(&self, node: &Arc<NodeSchema>) -> Result<Option<BooleanFilter>, StatementError> {
        let mut filters = Vec::new();
        for impact in &self.impacts {
            match impact {
                ChangeImpact::Unaffected => {}
                ChangeImpact::Filter(filter) => filters.push(filter.clone()),
                ChangeImpact::ReevaluateAll => return Ok(Some(BooleanFilter::value(node, true))),
            }
        }
        if filters.is_empty() {
            return Ok(None);
        }
        Ok(Some(BooleanFilter::or(node, filters)?.reduced()))
    }
}

/// What a live query reads: its root filter, ordering and selection.
#[derive(Debug, Clone)]
pub struct SubscriptionDependencies {
    pub node: Arc<NodeSchema>,
    pub filter: Option<BooleanFilter>,
    pub ordering: Option<OrderingExpression>,
    pub selection: NodeSelection,
}

impl SubscriptionDependencies {
    pub fn new(
        node: &Arc<NodeSchema>,
        filter: Option<BooleanFilter>,
        ordering: Option<OrderingExpression>,
        selection: NodeSelection,
    ) -> Result<Self, StatementError> {
        let owners = filter
            .iter()
            .map(|f| &f.node().name)
            .chain(ordering.iter().map(|o| &o.node().name))
            .chain([&selection.node().name]);
        for owner in owners {
            if *owner != node.name {
                return Err(StatementError::NodeMismatch {
                    expected: node.name.clone(),
                    found: owner.clone(),
                });
            }
        }
        Ok(SubscriptionDependencies {
            node: node.clone(),
            filter: filter.map(|f| f.reduced()),
            ordering,
            selection,
        })
    }

    /// Evaluate every change of a mutation, in commit order
    pub fn evaluate(
        &self,
        catalog: &NodeCatalog,
        aggregation: &NodeChangeAggregation,
    ) -> Result<SubscriptionImpact, StatementError> {
        let evaluator = AffectedGraph::new(catalog);
        let mut impacts = Vec::with_capacity(aggregation.len());
        let mut reordered = false;

        for change in aggregation.iter() {
            let impact = self.evaluate_change(&evaluator, change)?;
            log::debug!("{} on {} subscription: {}", change, self.node.name, impact);

            if let Some(ordering) = &self.ordering {
                reordered |= evaluator.ordering(ordering, change);
            }
            impacts.push(impact);
        }

        Ok(SubscriptionImpact { impacts, reordered })
    }

    fn evaluate_change(
        &self,
        evaluator: &AffectedGraph<'_>,
        change: &NodeChange,
    ) -> Result<ChangeImpact, StatementError> {
        // A root instance appearing or disappearing always matters
        if change.node_name() == self.node.name && change.is_existence_change() {
            return Ok(ChangeImpact::Filter(BooleanFilter::identifier(
                evaluator.catalog,
                &self.node,
                change.id(),
            )?));
        }

        let mut filters = Vec::with_capacity(2);
        if let Some(filter) = &self.filter {
            filters.extend(evaluator.filter(filter, change)?);
        }
        filters.extend(evaluator.selection(&self.selection, change)?);

        if filters.is_empty() {
            return Ok(ChangeImpact::Unaffected);
        }
        let filter = BooleanFilter::or(&self.node, filters)?.reduced();
        Ok(if filter.is_true() {
            ChangeImpact::ReevaluateAll
        } else {
            ChangeImpact::Filter(filter)
        })
    }
}
