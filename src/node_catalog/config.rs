use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::errors::NodeCatalogError;
use super::node_schema::{
    Component, Edge, ForeignKeyColumn, Leaf, LeafType, NodeCatalog, NodeSchema, ReverseEdge,
    ReverseEdgeKind, UniqueConstraint,
};

lazy_static! {
    static ref NAME_PATTERN: Regex = Regex::new(r"^[_A-Za-z][_0-9A-Za-z]*$").unwrap();
}

/// Node catalog configuration.
///
/// Nodes are defined in YAML with the following structure:
///
/// ```yaml
/// nodes:
///   - name: Article
///     table: articles
///     components:
///       - { kind: leaf, name: id, type: uuid }
///       - { kind: leaf, name: title, type: string }
///       - { kind: edge, name: category, head: Category, nullable: true }
///     unique_constraints:
///       - { components: [id], identifier: true }
///     reverse_edges:
///       - { name: tags, edge: ArticleTag.article }
/// ```
///
/// Leaf columns default to the leaf name; edge foreign-key columns default to
/// `<edge>_<head identifier leaf>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCatalogConfig {
    pub nodes: Vec<NodeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    pub table: String,
    pub components: Vec<ComponentDefinition>,
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraintDefinition>,
    #[serde(default)]
    pub reverse_edges: Vec<ReverseEdgeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ComponentDefinition {
    Leaf {
        name: String,
        #[serde(rename = "type")]
        leaf_type: LeafType,
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        nullable: bool,
    },
    Edge {
        name: String,
        head: String,
        #[serde(default)]
        nullable: bool,
        /// head identifier leaf -> foreign-key column
        #[serde(default)]
        columns: HashMap<String, String>,
    },
}

impl ComponentDefinition {
    fn name(&self) -> &str {
        match self {
            ComponentDefinition::Leaf { name, .. } | ComponentDefinition::Edge { name, .. } => {
                name
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueConstraintDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub components: Vec<String>,
    #[serde(default)]
    pub identifier: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseEdgeDefinition {
    pub name: String,
    /// `<Node>.<edge>` of the referencing edge
    pub edge: String,
}

impl NodeCatalogConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, NodeCatalogError> {
        serde_yaml::from_str(yaml).map_err(|e| NodeCatalogError::ConfigParseError {
            error: e.to_string(),
        })
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, NodeCatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| NodeCatalogError::config_read_with_path(path.display().to_string(), e))?;
        Self::from_yaml_str(&content)
    }

    /// Validate the definitions and build the catalog
    pub fn build(&self) -> Result<NodeCatalog, NodeCatalogError> {
        let definitions: HashMap<&str, &NodeDefinition> =
            self.nodes.iter().map(|n| (n.name.as_str(), n)).collect();

        // Components first: reverse edges need every edge to exist
        let mut schemas = Vec::with_capacity(self.nodes.len());
        for definition in &self.nodes {
            schemas.push(build_node(definition, &definitions)?);
        }

        let edges: HashMap<(String, String), Arc<Edge>> = schemas
            .iter()
            .flat_map(|schema| {
                schema.components.iter().filter_map(|c| match c {
                    Component::Edge(edge) => {
                        Some(((edge.node.clone(), edge.name.clone()), edge.clone()))
                    }
                    Component::Leaf(_) => None,
                })
            })
            .collect();

        let mut catalog = NodeCatalog::default();
        for (mut schema, definition) in schemas.into_iter().zip(&self.nodes) {
            for reverse in &definition.reverse_edges {
                let reverse_edge = build_reverse_edge(&schema, reverse, &edges, &definitions)?;
                schema.reverse_edges.push(Arc::new(reverse_edge));
            }
            log::debug!(
                "Registered node {} ({} components, {} reverse edges)",
                schema.name,
                schema.components.len(),
                schema.reverse_edges.len()
            );
            catalog.insert(schema)?;
        }
        Ok(catalog)
    }
}

impl NodeCatalog {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, NodeCatalogError> {
        NodeCatalogConfig::from_yaml_str(yaml)?.build()
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, NodeCatalogError> {
        NodeCatalogConfig::from_yaml_file(path)?.build()
    }
}

fn validate_name(name: &str) -> Result<(), NodeCatalogError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(NodeCatalogError::InvalidName {
            name: name.to_string(),
        })
    }
}

fn build_node(
    definition: &NodeDefinition,
    definitions: &HashMap<&str, &NodeDefinition>,
) -> Result<NodeSchema, NodeCatalogError> {
    validate_name(&definition.name)?;

    let mut seen = HashSet::new();
    let mut components = Vec::with_capacity(definition.components.len());
    for component in &definition.components {
        validate_name(component.name())?;
        if !seen.insert(component.name().to_string()) {
            return Err(NodeCatalogError::DuplicateComponent {
                node: definition.name.clone(),
                name: component.name().to_string(),
            });
        }
        components.push(match component {
            ComponentDefinition::Leaf {
                name,
                leaf_type,
                column,
                nullable,
            } => Component::Leaf(Arc::new(Leaf {
                node: definition.name.clone(),
                name: name.clone(),
                column: column.clone().unwrap_or_else(|| name.clone()),
                leaf_type: *leaf_type,
                nullable: *nullable,
            })),
            ComponentDefinition::Edge {
                name,
                head,
                nullable,
                columns,
            } => Component::Edge(Arc::new(build_edge(
                &definition.name,
                name,
                head,
                *nullable,
                columns,
                definitions,
            )?)),
        });
    }
    for reverse in &definition.reverse_edges {
        validate_name(&reverse.name)?;
        if !seen.insert(reverse.name.clone()) {
            return Err(NodeCatalogError::DuplicateComponent {
                node: definition.name.clone(),
                name: reverse.name.clone(),
            });
        }
    }

    let unique_constraints: Vec<UniqueConstraint> = definition
        .unique_constraints
        .iter()
        .map(|u| UniqueConstraint {
            name: u.name.clone().unwrap_or_else(|| u.components.join("_")),
            components: u.components.clone(),
        })
        .collect();
    if unique_constraints.is_empty() {
        return Err(NodeCatalogError::MissingUniqueConstraint {
            node: definition.name.clone(),
        });
    }
    for constraint in &unique_constraints {
        for name in &constraint.components {
            if !seen.contains(name) || components.iter().all(|c| c.name() != name) {
                return Err(NodeCatalogError::Component {
                    node: definition.name.clone(),
                    component: name.clone(),
                });
            }
        }
    }

    let flagged: Vec<usize> = definition
        .unique_constraints
        .iter()
        .enumerate()
        .filter(|(_, u)| u.identifier)
        .map(|(i, _)| i)
        .collect();
    let identifier = match flagged.as_slice() {
        [] => 0,
        [index] => *index,
        _ => {
            return Err(NodeCatalogError::AmbiguousIdentifier {
                node: definition.name.clone(),
                count: flagged.len(),
            })
        }
    };

    let schema = NodeSchema {
        name: definition.name.clone(),
        table_name: definition.table.clone(),
        components,
        reverse_edges: Vec::new(),
        unique_constraints,
        identifier,
    };
    for component in schema.identifier_components() {
        if component.is_nullable() {
            return Err(NodeCatalogError::NullableIdentifier {
                node: schema.name.clone(),
                component: component.name().to_string(),
            });
        }
    }
    Ok(schema)
}

/// Identifier leaves of a node definition, before its schema is built
fn definition_identifier_leaves(definition: &NodeDefinition) -> Option<Vec<String>> {
    let constraint = definition
        .unique_constraints
        .iter()
        .find(|u| u.identifier)
        .or_else(|| definition.unique_constraints.first())?;
    constraint
        .components
        .iter()
        .map(|name| {
            definition.components.iter().find_map(|c| match c {
                ComponentDefinition::Leaf { name: leaf, .. } if leaf == name => Some(name.clone()),
                _ => None,
            })
        })
        .collect()
}

fn build_edge(
    node: &str,
    name: &str,
    head: &str,
    nullable: bool,
    columns: &HashMap<String, String>,
    definitions: &HashMap<&str, &NodeDefinition>,
) -> Result<Edge, NodeCatalogError> {
    let head_definition = definitions.get(head).ok_or_else(|| NodeCatalogError::Node {
        node: head.to_string(),
    })?;
    let head_leaves =
        definition_identifier_leaves(head_definition).ok_or_else(|| {
            NodeCatalogError::UnsupportedEdgeHead {
                node: node.to_string(),
                edge: name.to_string(),
                head: head.to_string(),
            }
        })?;
    if let Some(unknown) = columns.keys().find(|leaf| !head_leaves.contains(leaf)) {
        return Err(NodeCatalogError::InvalidForeignKey {
            node: node.to_string(),
            edge: name.to_string(),
            leaf: unknown.clone(),
        });
    }

    Ok(Edge {
        node: node.to_string(),
        name: name.to_string(),
        head: head.to_string(),
        nullable,
        columns: head_leaves
            .into_iter()
            .map(|leaf| ForeignKeyColumn {
                column: columns
                    .get(&leaf)
                    .cloned()
                    .unwrap_or_else(|| format!("{}_{}", name, leaf)),
                head_leaf: leaf,
            })
            .collect(),
    })
}

fn build_reverse_edge(
    schema: &NodeSchema,
    definition: &ReverseEdgeDefinition,
    edges: &HashMap<(String, String), Arc<Edge>>,
    definitions: &HashMap<&str, &NodeDefinition>,
) -> Result<ReverseEdge, NodeCatalogError> {
    let invalid = |reason: String| NodeCatalogError::InvalidReverseEdge {
        node: schema.name.clone(),
        name: definition.name.clone(),
        reason,
    };

    let (origin, edge_name) = definition
        .edge
        .split_once('.')
        .ok_or_else(|| invalid(format!("`{}` is not of the form Node.edge", definition.edge)))?;
    let edge = edges
        .get(&(origin.to_string(), edge_name.to_string()))
        .ok_or_else(|| invalid(format!("edge `{}` does not exist", definition.edge)))?;
    if edge.head != schema.name {
        return Err(invalid(format!(
            "edge `{}` references `{}`, not `{}`",
            definition.edge, edge.head, schema.name
        )));
    }

    // Unique when the edge alone is a unique constraint of its node
    let origin_definition = definitions
        .get(origin)
        .ok_or_else(|| NodeCatalogError::Node {
            node: origin.to_string(),
        })?;
    let kind = if origin_definition
        .unique_constraints
        .iter()
        .any(|u| u.components.len() == 1 && u.components[0] == edge_name)
    {
        ReverseEdgeKind::Unique
    } else {
        ReverseEdgeKind::Multiple
    };

    Ok(ReverseEdge {
        node: schema.name.clone(),
        name: definition.name.clone(),
        kind,
        original_edge: edge.clone(),
    })
}
