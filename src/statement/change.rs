//! Committed changes and their per-mutation aggregation.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::errors::StatementError;
use super::value::{NodeValue, Value};
use crate::node_catalog::NodeSchema;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeCreation {
    pub node: Arc<NodeSchema>,
    pub id: NodeValue,
    pub new_value: NodeValue,
}

impl NodeCreation {
    pub fn new(node: &Arc<NodeSchema>, new_value: NodeValue) -> Result<Self, StatementError> {
        Ok(NodeCreation {
            id: node.parse_identifier(&new_value)?,
            node: node.clone(),
            new_value,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub node: Arc<NodeSchema>,
    pub id: NodeValue,
    pub old_value: NodeValue,
    pub new_value: NodeValue,
    updated: Vec<String>,
}

impl NodeUpdate {
    /// Build an update from full before/after values; changed components are derived
    pub fn new(
        node: &Arc<NodeSchema>,
        old_value: NodeValue,
        new_value: NodeValue,
    ) -> Result<Self, StatementError> {
        let updated = node
            .components()
            .iter()
            .map(|c| c.name())
            .filter(|name| match (old_value.get(name), new_value.get(name)) {
                (Some(old), Some(new)) => !old.loose_eq(new),
                (None, Some(_)) => true,
                _ => false,
            })
            .map(str::to_string)
            .collect();

        Ok(NodeUpdate {
            id: node.parse_identifier(&old_value)?,
            node: node.clone(),
            old_value,
            new_value,
            updated,
        })
    }

    pub fn updated_components(&self) -> impl Iterator<Item = &str> {
        self.updated.iter().map(String::as_str)
    }

    pub fn touches(&self, component: &str) -> bool {
        self.updated.iter().any(|c| c == component)
    }

    /// Before/after values of a changed component
    pub fn component_change(&self, component: &str) -> Option<(&Value, &Value)> {
        if !self.touches(component) {
            return None;
        }
        Some((
            self.old_value.get(component).unwrap_or(&Value::Null),
            self.new_value.get(component)?,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeDeletion {
    pub node: Arc<NodeSchema>,
    pub id: NodeValue,
    pub old_value: NodeValue,
}

impl NodeDeletion {
    pub fn new(node: &Arc<NodeSchema>, old_value: NodeValue) -> Result<Self, StatementError> {
        Ok(NodeDeletion {
            id: node.parse_identifier(&old_value)?,
            node: node.clone(),
            old_value,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeChange {
    Creation(NodeCreation),
    Update(NodeUpdate),
    Deletion(NodeDeletion),
}

impl NodeChange {
    pub fn node(&self) -> &Arc<NodeSchema> {
        match self {
            NodeChange::Creation(c) => &c.node,
            NodeChange::Update(u) => &u.node,
            NodeChange::Deletion(d) => &d.node,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node().name
    }

    pub fn id(&self) -> &NodeValue {
        match self {
            NodeChange::Creation(c) => &c.id,
            NodeChange::Update(u) => &u.id,
            NodeChange::Deletion(d) => &d.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeChange::Creation(_) => "creation",
            NodeChange::Update(_) => "update",
            NodeChange::Deletion(_) => "deletion",
        }
    }

    /// Creation or deletion: the instance itself appears or disappears
    pub fn is_existence_change(&self) -> bool {
        !matches!(self, NodeChange::Update(_))
    }

    /// Value of a component before (deletion/update) and after (creation/update) the change
    pub fn component_values(&self, component: &str) -> (Option<&Value>, Option<&Value>) {
        match self {
            NodeChange::Creation(c) => (None, c.new_value.get(component)),
            NodeChange::Update(u) => (u.old_value.get(component), u.new_value.get(component)),
            NodeChange::Deletion(d) => (d.old_value.get(component), None),
        }
    }

    fn instance_key(&self) -> String {
        format!("{}:{}", self.node_name(), self.id())
    }

    /// Fold a later change of the same instance into this one.
    ///
    /// `Ok(None)` means the two changes cancel out.
    fn then(self, next: NodeChange) -> Result<Option<NodeChange>, StatementError> {
        let inconsistent = |previous: &NodeChange, next: &NodeChange| {
            StatementError::InconsistentChange {
                node: next.node_name().to_string(),
                identifier: next.id().to_string(),
                previous: previous.kind().to_string(),
            }
        };

        match (self, next) {
            (NodeChange::Creation(creation), NodeChange::Update(update)) => {
                let mut new_value = creation.new_value;
                for (key, value) in update.new_value {
                    new_value.insert(key, value);
                }
                Ok(Some(NodeChange::Creation(NodeCreation::new(
                    &creation.node,
                    new_value,
                )?)))
            }
            (NodeChange::Creation(_), NodeChange::Deletion(_)) => Ok(None),
            (NodeChange::Update(first), NodeChange::Update(second)) => {
                let update = NodeUpdate::new(&first.node, first.old_value, second.new_value)?;
                Ok((!update.is_empty()).then_some(NodeChange::Update(update)))
            }
            (NodeChange::Update(update), NodeChange::Deletion(_)) => Ok(Some(
                NodeChange::Deletion(NodeDeletion::new(&update.node, update.old_value)?),
            )),
            (NodeChange::Deletion(deletion), NodeChange::Creation(creation)) => {
                let update = NodeUpdate::new(&deletion.node, deletion.old_value, creation.new_value)?;
                Ok((!update.is_empty()).then_some(NodeChange::Update(update)))
            }
            (previous, next) => Err(inconsistent(&previous, &next)),
        }
    }
}

impl fmt::Display for NodeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} {}", self.kind(), self.node_name(), self.id())
    }
}

/// Ordered list of the changes committed by one mutation, one entry per instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeChangeAggregation {
    changes: Vec<NodeChange>,
}

impl NodeChangeAggregation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_changes(
        changes: impl IntoIterator<Item = NodeChange>,
    ) -> Result<Self, StatementError> {
        let mut aggregation = Self::new();
        for change in changes {
            aggregation.append(change)?;
        }
        Ok(aggregation)
    }

    /// Append a change, folding it into an earlier change of the same instance
    pub fn append(&mut self, change: NodeChange) -> Result<(), StatementError> {
        if let NodeChange::Update(update) = &change {
            if update.is_empty() {
                return Ok(());
            }
        }

        let key = change.instance_key();
        match self.changes.iter().position(|c| c.instance_key() == key) {
            None => self.changes.push(change),
            Some(index) => {
                let previous = self.changes.remove(index);
                if let Some(folded) = previous.then(change)? {
                    self.changes.insert(index, folded);
                }
            }
        }
        Ok(())
    }

    pub fn changes(&self) -> &[NodeChange] {
        &self.changes
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeChange> {
        self.changes.iter()
    }

    /// Names of the nodes touched by this mutation
    pub fn nodes(&self) -> BTreeSet<&str> {
        self.changes.iter().map(NodeChange::node_name).collect()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
