//! Dependency graphs: which components and relations an expression reads.
//!
//! A graph is rooted at one node. It lists the leaves and edges read directly on
//! that node and, per traversed relation, a nested graph rooted at the relation's
//! head. Graphs are built from expression instances, so they are always finite even
//! when the schema itself is cyclic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::change::{NodeChange, NodeUpdate};
use crate::node_catalog::{Edge, ReverseEdge};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    node: String,
    leaves: BTreeSet<String>,
    edges: BTreeMap<String, DependencyGraph>,
    reverse_edges: BTreeMap<String, DependencyGraph>,
    /// Reads something that cannot be described (raw SQL)
    opaque: bool,
}

impl DependencyGraph {
    pub fn new(node: impl Into<String>) -> Self {
        DependencyGraph {
            node: node.into(),
            leaves: BTreeSet::new(),
            edges: BTreeMap::new(),
            reverse_edges: BTreeMap::new(),
            opaque: false,
        }
    }

    pub fn opaque(node: impl Into<String>) -> Self {
        let mut graph = Self::new(node);
        graph.opaque = true;
        graph
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn leaves(&self) -> &BTreeSet<String> {
        &self.leaves
    }

    pub fn edges(&self) -> &BTreeMap<String, DependencyGraph> {
        &self.edges
    }

    pub fn reverse_edges(&self) -> &BTreeMap<String, DependencyGraph> {
        &self.reverse_edges
    }

    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    /// Nothing is read, at any depth
    pub fn is_empty(&self) -> bool {
        !self.opaque
            && self.leaves.is_empty()
            && self.edges.is_empty()
            && self.reverse_edges.is_empty()
    }

    pub fn with_leaf(mut self, leaf: impl Into<String>) -> Self {
        self.add_leaf(leaf);
        self
    }

    pub fn add_leaf(&mut self, leaf: impl Into<String>) {
        self.leaves.insert(leaf.into());
    }

    /// Record a read of `edge` and, optionally, of its head
    pub fn add_edge(&mut self, edge: &Edge, head: Option<&DependencyGraph>) {
        let entry = self
            .edges
            .entry(edge.name.clone())
            .or_insert_with(|| DependencyGraph::new(&edge.head));
        if let Some(head) = head {
            entry.merge(head);
        }
    }

    /// Record a traversal of `reverse_edge`.
    ///
    /// The nested graph is rooted at the referencing node and always reads the
    /// original edge, since re-parenting changes the traversal's result.
    pub fn add_reverse_edge(&mut self, reverse_edge: &ReverseEdge, head: Option<&DependencyGraph>) {
        let entry = self
            .reverse_edges
            .entry(reverse_edge.name.clone())
            .or_insert_with(|| DependencyGraph::new(reverse_edge.head()));
        entry.add_edge(&reverse_edge.original_edge, None);
        if let Some(head) = head {
            entry.merge(head);
        }
    }

    /// Union with another graph rooted at the same node
    pub fn merge(&mut self, other: &DependencyGraph) {
        debug_assert_eq!(self.node, other.node);
        self.opaque |= other.opaque;
        self.leaves.extend(other.leaves.iter().cloned());
        for (name, graph) in &other.edges {
            match self.edges.get_mut(name) {
                Some(existing) => existing.merge(graph),
                None => {
                    self.edges.insert(name.clone(), graph.clone());
                }
            }
        }
        for (name, graph) in &other.reverse_edges {
            match self.reverse_edges.get_mut(name) {
                Some(existing) => existing.merge(graph),
                None => {
                    self.reverse_edges.insert(name.clone(), graph.clone());
                }
            }
        }
    }

    pub fn union<'a>(node: &str, graphs: impl IntoIterator<Item = &'a DependencyGraph>) -> Self {
        let mut result = DependencyGraph::new(node);
        for graph in graphs {
            result.merge(graph);
        }
        result
    }

    fn reads_directly(&self) -> bool {
        self.opaque || !self.leaves.is_empty() || !self.edges.is_empty()
    }

    /// Whether anything of `node` is read anywhere in the graph
    pub fn mentions_node(&self, node: &str) -> bool {
        if self.opaque || (self.node == node && self.reads_directly()) {
            return true;
        }
        self.edges
            .values()
            .chain(self.reverse_edges.values())
            .any(|graph| graph.mentions_node(node))
    }

    /// Whether the update changes a component read anywhere in the graph
    pub fn is_touched_by_update(&self, update: &NodeUpdate) -> bool {
        if self.opaque {
            return true;
        }
        if self.node == update.node.name
            && update
                .updated_components()
                .any(|name| self.leaves.contains(name) || self.edges.contains_key(name))
        {
            return true;
        }
        self.edges
            .values()
            .chain(self.reverse_edges.values())
            .any(|graph| graph.is_touched_by_update(update))
    }

    /// Whether the change can alter anything read by the graph
    pub fn is_touched_by(&self, change: &NodeChange) -> bool {
        match change {
            NodeChange::Update(update) => self.is_touched_by_update(update),
            NodeChange::Creation(_) | NodeChange::Deletion(_) => {
                self.mentions_node(change.node_name())
            }
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        if self.opaque {
            writeln!(f, "{}<opaque>", indent)?;
        }
        for leaf in &self.leaves {
            writeln!(f, "{}{}", indent, leaf)?;
        }
        for (name, head) in &self.edges {
            writeln!(f, "{}{} -> {}", indent, name, head.node)?;
            head.fmt_indented(f, depth + 1)?;
        }
        for (name, head) in &self.reverse_edges {
            writeln!(f, "{}{} <- {}", indent, name, head.node)?;
            head.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.node)?;
        self.fmt_indented(f, 1)
    }
}
