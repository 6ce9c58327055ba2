//! Table reference tree.
//!
//! A statement reads from one root [`TableNode`]; every to-one relation it follows
//! becomes a [`JoinTable`] child. Joins are keyed by `(relation, key)` under their
//! parent, so the same logical path is joined once per statement:
//!
//! ```text
//! `articles` AS `articles`
//!   LEFT JOIN `categories` AS `articles>category`
//!     ON `articles`.`category_id` = `articles>category`.`id`
//! ```

use std::sync::Arc;

use super::errors::SqlGeneratorError;
use super::escaping::Dialect;
use crate::node_catalog::{Edge, NodeCatalog, NodeSchema, ReverseEdge, ReverseEdgeKind};

/// A to-one relation that can be joined without multiplying rows
#[derive(Debug, Clone, PartialEq)]
pub enum JoinRelation {
    Edge(Arc<Edge>),
    ReverseEdgeUnique(Arc<ReverseEdge>),
}

impl JoinRelation {
    fn name(&self) -> &str {
        match self {
            JoinRelation::Edge(edge) => &edge.name,
            JoinRelation::ReverseEdgeUnique(reverse_edge) => &reverse_edge.name,
        }
    }

    fn owner(&self) -> &str {
        match self {
            JoinRelation::Edge(edge) => &edge.node,
            JoinRelation::ReverseEdgeUnique(reverse_edge) => &reverse_edge.node,
        }
    }

    fn alias_separator(&self) -> char {
        match self {
            JoinRelation::Edge(_) => '>',
            JoinRelation::ReverseEdgeUnique(_) => '<',
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinTable {
    pub relation: JoinRelation,
    /// Disambiguates two joins of the same relation
    pub key: Option<String>,
    pub table: TableNode,
}

#[derive(Debug, Clone)]
pub struct TableNode {
    pub alias: String,
    pub table_name: String,
    pub node: Arc<NodeSchema>,
    joins: Vec<JoinTable>,
}

impl TableNode {
    pub fn new(node: &Arc<NodeSchema>, alias: impl Into<String>) -> Self {
        TableNode {
            alias: alias.into(),
            table_name: node.table_name.clone(),
            node: node.clone(),
            joins: Vec::new(),
        }
    }

    /// Root table aliased by its own table name
    pub fn root(node: &Arc<NodeSchema>) -> Self {
        Self::new(node, node.table_name.clone())
    }

    /// Alias of a nested, non-joined table reached through `relation` (used by subqueries)
    pub fn child_alias(&self, relation: &str, separator: char) -> String {
        format!("{}{}{}", self.alias, separator, relation)
    }

    pub fn joins(&self) -> &[JoinTable] {
        &self.joins
    }

    /// Number of joins in the whole subtree
    pub fn join_count(&self) -> usize {
        self.joins
            .iter()
            .map(|join| 1 + join.table.join_count())
            .sum()
    }

    /// Join `relation` from this table, reusing an existing join with the same relation and key
    pub fn join(
        &mut self,
        catalog: &NodeCatalog,
        relation: JoinRelation,
        key: Option<&str>,
    ) -> Result<&mut TableNode, SqlGeneratorError> {
        if relation.owner() != self.node.name {
            return Err(SqlGeneratorError::unexpected(
                format!("join from `{}`", self.alias),
                relation.name(),
            ));
        }
        if let JoinRelation::ReverseEdgeUnique(reverse_edge) = &relation {
            if reverse_edge.kind != ReverseEdgeKind::Unique {
                return Err(SqlGeneratorError::unexpected(
                    "join of a multiple reverse edge",
                    &reverse_edge.name,
                ));
            }
        }

        let index = match self
            .joins
            .iter()
            .position(|join| join.relation == relation && join.key.as_deref() == key)
        {
            Some(index) => index,
            None => {
                let head = match &relation {
                    JoinRelation::Edge(edge) => catalog.edge_head(edge)?,
                    JoinRelation::ReverseEdgeUnique(reverse_edge) => {
                        catalog.reverse_edge_head(reverse_edge)?
                    }
                };
                let mut alias = self.child_alias(relation.name(), relation.alias_separator());
                if let Some(key) = key {
                    alias.push('#');
                    alias.push_str(key);
                }
                log::trace!("joining {} as {}", head.name, alias);
                self.joins.push(JoinTable {
                    relation,
                    key: key.map(str::to_string),
                    table: TableNode::new(head, alias),
                });
                self.joins.len() - 1
            }
        };
        Ok(&mut self.joins[index].table)
    }

    /// Quoted `alias`.`column`
    pub fn column(&self, dialect: &dyn Dialect, column: &str) -> Result<String, SqlGeneratorError> {
        Ok(format!(
            "{}.{}",
            dialect.escape_alias(&self.alias)?,
            dialect.escape_identifier(column)?
        ))
    }

    /// `` `table` AS `alias` ``
    pub fn from_sql(&self, dialect: &dyn Dialect) -> Result<String, SqlGeneratorError> {
        Ok(format!(
            "{} AS {}",
            dialect.escape_identifier(&self.table_name)?,
            dialect.escape_alias(&self.alias)?
        ))
    }

    /// Every join of the subtree, parents before children, each prefixed by a space
    pub fn joins_sql(&self, dialect: &dyn Dialect) -> Result<String, SqlGeneratorError> {
        let mut sql = String::new();
        for join in &self.joins {
            sql.push_str(" LEFT JOIN ");
            sql.push_str(&join.table.from_sql(dialect)?);
            sql.push_str(" ON ");
            sql.push_str(&self.join_condition(dialect, join)?);
            sql.push_str(&join.table.joins_sql(dialect)?);
        }
        Ok(sql)
    }

    fn join_condition(
        &self,
        dialect: &dyn Dialect,
        join: &JoinTable,
    ) -> Result<String, SqlGeneratorError> {
        let child = &join.table;
        let conditions = match &join.relation {
            // parent holds the foreign key
            JoinRelation::Edge(edge) => edge
                .columns
                .iter()
                .map(|fk| {
                    let head_column = &child.node.leaf(&fk.head_leaf)?.column;
                    Ok(format!(
                        "{} = {}",
                        self.column(dialect, &fk.column)?,
                        child.column(dialect, head_column)?
                    ))
                })
                .collect::<Result<Vec<_>, SqlGeneratorError>>()?,
            // child holds the foreign key
            JoinRelation::ReverseEdgeUnique(reverse_edge) => {
                correlation(dialect, &reverse_edge.original_edge, child, self)?
            }
        };
        Ok(conditions.join(" AND "))
    }
}

/// Conditions tying `child` rows (holding `edge`) to the `parent` row they reference
pub(crate) fn correlation(
    dialect: &dyn Dialect,
    edge: &Edge,
    child: &TableNode,
    parent: &TableNode,
) -> Result<Vec<String>, SqlGeneratorError> {
    edge.columns
        .iter()
        .map(|fk| {
            let parent_column = &parent.node.leaf(&fk.head_leaf)?.column;
            Ok(format!(
                "{} = {}",
                child.column(dialect, &fk.column)?,
                parent.column(dialect, parent_column)?
            ))
        })
        .collect()
}
