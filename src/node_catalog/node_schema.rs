use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::errors::NodeCatalogError;

/// Scalar type of a leaf component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafType {
    Boolean,
    Int,
    Float,
    String,
    Uuid,
    #[serde(alias = "date_time")]
    DateTime,
}

impl LeafType {
    /// Whether `<`, `>` comparisons are meaningful for this type
    pub fn is_comparable(&self) -> bool {
        !matches!(self, LeafType::Boolean)
    }
}

impl fmt::Display for LeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeafType::Boolean => "boolean",
            LeafType::Int => "int",
            LeafType::Float => "float",
            LeafType::String => "string",
            LeafType::Uuid => "uuid",
            LeafType::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

/// Scalar component stored in one column of the node's table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Leaf {
    pub node: String,
    pub name: String,
    pub column: String,
    pub leaf_type: LeafType,
    pub nullable: bool,
}

/// One column of an edge's foreign key, mapped to a leaf of the head's identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeyColumn {
    pub head_leaf: String,
    pub column: String,
}

/// Component referencing the identifier of another node (the "head")
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Node holding the foreign key (the "tail")
    pub node: String,
    pub name: String,
    pub head: String,
    pub nullable: bool,
    pub columns: Vec<ForeignKeyColumn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReverseEdgeKind {
    /// At most one referencing instance (0..1)
    Unique,
    /// Any number of referencing instances (0..n)
    Multiple,
}

/// Inverse view of an edge, declared on the node the edge references.
///
/// The reverse edge's head is the node that holds `original_edge`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReverseEdge {
    pub node: String,
    pub name: String,
    pub kind: ReverseEdgeKind,
    pub original_edge: Arc<Edge>,
}

impl ReverseEdge {
    /// The referencing node
    pub fn head(&self) -> &str {
        &self.original_edge.node
    }

    /// Key used for the reverse edge's count in filters, orderings and selections
    pub fn count_key(&self) -> String {
        format!("{}Count", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    Leaf(Arc<Leaf>),
    Edge(Arc<Edge>),
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Component::Leaf(leaf) => &leaf.name,
            Component::Edge(edge) => &edge.name,
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Component::Leaf(leaf) => leaf.nullable,
            Component::Edge(edge) => edge.nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub name: String,
    pub components: Vec<String>,
}

/// An entity type: its table, components, reverse edges and unique constraints
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSchema {
    pub name: String,
    pub table_name: String,
    pub(crate) components: Vec<Component>,
    pub(crate) reverse_edges: Vec<Arc<ReverseEdge>>,
    pub(crate) unique_constraints: Vec<UniqueConstraint>,
    /// Index into `unique_constraints`
    pub(crate) identifier: usize,
}

impl NodeSchema {
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn reverse_edges(&self) -> &[Arc<ReverseEdge>] {
        &self.reverse_edges
    }

    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name() == name)
    }

    pub fn leaf(&self, name: &str) -> Result<&Arc<Leaf>, NodeCatalogError> {
        match self.component(name) {
            Some(Component::Leaf(leaf)) => Ok(leaf),
            _ => Err(self.unknown(name)),
        }
    }

    pub fn edge(&self, name: &str) -> Result<&Arc<Edge>, NodeCatalogError> {
        match self.component(name) {
            Some(Component::Edge(edge)) => Ok(edge),
            _ => Err(self.unknown(name)),
        }
    }

    pub fn reverse_edge(&self, name: &str) -> Result<&Arc<ReverseEdge>, NodeCatalogError> {
        self.reverse_edges
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| self.unknown(name))
    }

    /// The unique constraint designated as the node's identifier
    pub fn identifier(&self) -> &UniqueConstraint {
        &self.unique_constraints[self.identifier]
    }

    /// The components of the identifier, in declaration order of the constraint
    pub fn identifier_components(&self) -> Vec<&Component> {
        self.identifier()
            .components
            .iter()
            .filter_map(|name| self.component(name))
            .collect()
    }

    /// Identifier leaves, when the identifier holds no edge
    pub fn identifier_leaves(&self) -> Option<Vec<&Arc<Leaf>>> {
        self.identifier_components()
            .into_iter()
            .map(|c| match c {
                Component::Leaf(leaf) => Some(leaf),
                Component::Edge(_) => None,
            })
            .collect()
    }

    fn unknown(&self, name: &str) -> NodeCatalogError {
        NodeCatalogError::Component {
            node: self.name.clone(),
            component: name.to_string(),
        }
    }
}

/// Registry of every node of the platform, built once and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct NodeCatalog {
    nodes: HashMap<String, Arc<NodeSchema>>,
    order: Vec<String>,
}

impl NodeCatalog {
    pub(crate) fn insert(&mut self, node: NodeSchema) -> Result<(), NodeCatalogError> {
        if self.nodes.contains_key(&node.name) {
            return Err(NodeCatalogError::DuplicateNode { node: node.name });
        }
        self.order.push(node.name.clone());
        self.nodes.insert(node.name.clone(), Arc::new(node));
        Ok(())
    }

    pub fn node(&self, name: &str) -> Result<&Arc<NodeSchema>, NodeCatalogError> {
        self.nodes.get(name).ok_or_else(|| NodeCatalogError::Node {
            node: name.to_string(),
        })
    }

    /// Nodes in definition order
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<NodeSchema>> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    /// The node an edge points to
    pub fn edge_head(&self, edge: &Edge) -> Result<&Arc<NodeSchema>, NodeCatalogError> {
        self.node(&edge.head)
    }

    /// The node holding a reverse edge's original edge
    pub fn reverse_edge_head(
        &self,
        reverse_edge: &ReverseEdge,
    ) -> Result<&Arc<NodeSchema>, NodeCatalogError> {
        self.node(reverse_edge.head())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
