//! Statement generation.
//!
//! A find compiles to one SQL string plus a [`DeferredFetch`] per multiple-head
//! selection. Deferred fetches run after the parent rows are read, one statement
//! per fetch and level, batched over every parent identifier:
//!
//! ```text
//! SELECT ... FROM (SELECT `article_tags`.*, ROW_NUMBER() OVER (PARTITION BY ... ORDER BY ...) AS `__rank`
//!                  FROM `article_tags` AS `article_tags` WHERE `article_tags`.`article_id` IN (...)) AS `article_tags`
//! WHERE `article_tags`.`__rank` > 0 AND `article_tags`.`__rank` <= 5
//! ```
//!
//! Every selected record also carries its identifier under `<path>.__id.*`, which is
//! how readers tell a missing relation from a present one and batch deferred fetches.

use std::sync::Arc;

use super::errors::SqlGeneratorError;
use super::escaping::Dialect;
use super::table_reference::{JoinRelation, TableNode};
use super::to_sql::{subquery, SqlContext, ToSql};
use crate::config::EngineConfig;
use crate::node_catalog::{Component, NodeCatalog, NodeSchema};
use crate::statement::{
    BooleanFilter, NodeSelection, NodeValue, OrderingExpression,
    ReverseEdgeMultipleHeadSelection, SelectionExpression, SortExpression, StatementError, Value,
};

/// Key under which a record's identifier columns are selected
pub const IDENTIFIER_KEY: &str = "__id";
/// Key under which deferred rows carry the identifier of their parent
pub const PARENT_KEY: &str = "__parent";
const RANK_COLUMN: &str = "__rank";

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Option<BooleanFilter>,
    pub ordering: Option<OrderingExpression>,
    pub offset: u64,
    pub limit: Option<u64>,
}

/// A multiple-head selection to fetch once the records holding it are known
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredFetch {
    /// Keys from the statement's record down to the relation; the last one is the relation's key
    pub path: Vec<String>,
    pub selection: ReverseEdgeMultipleHeadSelection,
}

impl DeferredFetch {
    /// Path of the records owning the relation
    pub fn parent_path(&self) -> &[String] {
        &self.path[..self.path.len().saturating_sub(1)]
    }

    pub fn key(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FindStatement {
    /// Rows are flat; column aliases are dotted key paths
    pub sql: String,
    pub deferred: Vec<DeferredFetch>,
}

#[derive(Default)]
struct SelectedColumns {
    columns: Vec<String>,
    deferred: Vec<DeferredFetch>,
}

pub struct StatementGenerator<'a> {
    catalog: &'a NodeCatalog,
    dialect: &'a dyn Dialect,
    config: &'a EngineConfig,
}

impl<'a> StatementGenerator<'a> {
    pub fn new(catalog: &'a NodeCatalog, dialect: &'a dyn Dialect, config: &'a EngineConfig) -> Self {
        StatementGenerator {
            catalog,
            dialect,
            config,
        }
    }

    pub fn catalog(&self) -> &'a NodeCatalog {
        self.catalog
    }

    fn context(&self) -> SqlContext<'a> {
        SqlContext {
            catalog: self.catalog,
            dialect: self.dialect,
        }
    }

    /// Select `selection` from every instance matching `options`
    pub fn find(
        &self,
        selection: &NodeSelection,
        options: &FindOptions,
    ) -> Result<FindStatement, SqlGeneratorError> {
        let node = selection.node();
        check_owner(node, options.filter.as_ref().map(|f| f.node()))?;
        check_owner(node, options.ordering.as_ref().map(|o| o.node()))?;

        let limit = self.limit_clause(options.offset, options.limit)?;
        let filter = options.filter.as_ref().map(BooleanFilter::reduced);
        let ordering = options.ordering.as_ref().map(OrderingExpression::reduced);

        let statement = if self.config.use_common_table_expression {
            self.find_with_common_table_expression(selection, filter.as_ref(), ordering.as_ref(), &limit)?
        } else {
            let mut table = TableNode::root(node);
            let selected = self.select(&mut table, selection)?;
            let where_clause = self.where_clause(&mut table, filter.as_ref())?;
            let order_by = self.order_by(&mut table, ordering.as_ref())?;
            FindStatement {
                sql: format!(
                    "SELECT {} FROM {}{}{} ORDER BY {}{}",
                    selected.columns.join(", "),
                    table.from_sql(self.dialect)?,
                    table.joins_sql(self.dialect)?,
                    where_clause,
                    order_by,
                    limit
                ),
                deferred: selected.deferred,
            }
        };

        log::debug!("find on {}: {}", node.name, statement.sql);
        Ok(statement)
    }

    /// Filter, sort and paginate the root table first, then join the selection on the result
    fn find_with_common_table_expression(
        &self,
        selection: &NodeSelection,
        filter: Option<&BooleanFilter>,
        ordering: Option<&OrderingExpression>,
        limit: &str,
    ) -> Result<FindStatement, SqlGeneratorError> {
        let node = selection.node();
        let dialect = self.dialect;
        let cte_name = format!("cte_{}", node.table_name);

        let mut inner = TableNode::root(node);
        let where_clause = self.where_clause(&mut inner, filter)?;
        let inner_order_by = self.order_by(&mut inner, ordering)?;
        let cte = format!(
            "WITH {} AS (SELECT {}.* FROM {}{}{} ORDER BY {}{})",
            dialect.escape_identifier(&cte_name)?,
            dialect.escape_alias(&inner.alias)?,
            inner.from_sql(dialect)?,
            inner.joins_sql(dialect)?,
            where_clause,
            inner_order_by,
            limit
        );

        let mut outer = TableNode::root(node);
        outer.table_name = cte_name;
        let selected = self.select(&mut outer, selection)?;
        let order_by = self.order_by(&mut outer, ordering)?;

        Ok(FindStatement {
            sql: format!(
                "{} SELECT {} FROM {}{} ORDER BY {}",
                cte,
                selected.columns.join(", "),
                outer.from_sql(dialect)?,
                outer.joins_sql(dialect)?,
                order_by
            ),
            deferred: selected.deferred,
        })
    }

    /// The statement of a deferred fetch for a batch of parent identifiers.
    ///
    /// Each row carries its parent's identifier under `__parent.<leaf>`; rows come
    /// grouped by parent, in the requested order within a parent.
    pub fn deferred(
        &self,
        fetch: &DeferredFetch,
        parent_ids: &[NodeValue],
    ) -> Result<FindStatement, SqlGeneratorError> {
        let selection = &fetch.selection;
        if selection.limit > self.config.max_limit {
            return Err(SqlGeneratorError::InvalidLimit {
                limit: selection.limit,
                max: self.config.max_limit,
            });
        }

        let dialect = self.dialect;
        let edge = &selection.reverse_edge.original_edge;
        let parent = self.catalog.node(&selection.reverse_edge.node)?;
        let head = self.catalog.reverse_edge_head(&selection.reverse_edge)?;

        let mut inner = TableNode::root(head);
        let foreign_keys = edge
            .columns
            .iter()
            .map(|fk| inner.column(dialect, &fk.column))
            .collect::<Result<Vec<_>, _>>()?;

        let mut tuples = Vec::with_capacity(parent_ids.len());
        for id in parent_ids {
            let mut literals = edge
                .columns
                .iter()
                .map(|fk| {
                    let value = id
                        .get(&fk.head_leaf)
                        .ok_or_else(|| StatementError::missing(&parent.name, &fk.head_leaf))?;
                    dialect.escape_leaf_value(parent.leaf(&fk.head_leaf)?, value)
                })
                .collect::<Result<Vec<_>, SqlGeneratorError>>()?;
            tuples.push(if literals.len() == 1 {
                literals.remove(0)
            } else {
                format!("({})", literals.join(", "))
            });
        }

        let mut conditions = vec![match (tuples.is_empty(), foreign_keys.len()) {
            (true, _) => "FALSE".to_string(),
            (false, 1) => format!("{} IN ({})", foreign_keys[0], tuples.join(", ")),
            (false, _) => format!("({}) IN ({})", foreign_keys.join(", "), tuples.join(", ")),
        }];
        if let Some(filter) = selection.filter.as_ref().map(BooleanFilter::reduced) {
            if !filter.is_true() {
                conditions.push(filter.to_sql(&self.context(), &mut inner)?);
            }
        }
        let ordering = selection.ordering.as_ref().map(OrderingExpression::reduced);
        let window_order = self.order_by(&mut inner, ordering.as_ref())?;

        let rank = dialect.escape_identifier(RANK_COLUMN)?;
        let ranked = format!(
            "(SELECT {}.*, ROW_NUMBER() OVER (PARTITION BY {} ORDER BY {}) AS {} FROM {}{} WHERE {}) AS {}",
            dialect.escape_alias(&inner.alias)?,
            foreign_keys.join(", "),
            window_order,
            rank,
            inner.from_sql(dialect)?,
            inner.joins_sql(dialect)?,
            conditions.join(" AND "),
            dialect.escape_alias(&inner.alias)?
        );

        let mut outer = TableNode::root(head);
        let mut selected = self.select(&mut outer, &selection.head_selection)?;
        let mut outer_keys = Vec::with_capacity(edge.columns.len());
        for fk in &edge.columns {
            let column = outer.column(dialect, &fk.column)?;
            selected.columns.push(format!(
                "{} AS {}",
                column,
                dialect.escape_alias(&format!("{}.{}", PARENT_KEY, fk.head_leaf))?
            ));
            outer_keys.push(column);
        }
        let outer_rank = outer.column(dialect, RANK_COLUMN)?;

        let sql = format!(
            "SELECT {} FROM {}{} WHERE {} > {} AND {} <= {} ORDER BY {}, {}",
            selected.columns.join(", "),
            ranked,
            outer.joins_sql(dialect)?,
            outer_rank,
            selection.offset,
            outer_rank,
            selection.offset.saturating_add(selection.limit),
            outer_keys.join(", "),
            outer_rank
        );
        log::debug!(
            "deferred fetch of {}.{} for {} parents: {}",
            parent.name,
            selection.reverse_edge.name,
            parent_ids.len(),
            sql
        );

        Ok(FindStatement {
            sql,
            deferred: selected.deferred,
        })
    }

    /// `SELECT COUNT(*) AS count` over the instances matching `filter`
    pub fn count(
        &self,
        node: &Arc<NodeSchema>,
        filter: Option<&BooleanFilter>,
    ) -> Result<String, SqlGeneratorError> {
        check_owner(node, filter.map(|f| f.node()))?;
        let mut table = TableNode::root(node);
        let where_clause = self.where_clause(&mut table, filter.map(BooleanFilter::reduced).as_ref())?;
        let sql = format!(
            "SELECT COUNT(*) AS {} FROM {}{}{}",
            self.dialect.escape_identifier("count")?,
            table.from_sql(self.dialect)?,
            table.joins_sql(self.dialect)?,
            where_clause
        );
        log::debug!("count on {}: {}", node.name, sql);
        Ok(sql)
    }

    /// Multi-row insert; components missing from a row take their column default
    pub fn insert(
        &self,
        node: &Arc<NodeSchema>,
        values: &[NodeValue],
    ) -> Result<String, SqlGeneratorError> {
        if values.is_empty() {
            return Err(SqlGeneratorError::EmptyStatement {
                node: node.name.clone(),
                statement: "INSERT",
            });
        }
        let rows = values
            .iter()
            .map(|value| node.parse_component_values(value))
            .collect::<Result<Vec<_>, _>>()?;
        let components: Vec<&Component> = node
            .components()
            .iter()
            .filter(|component| rows.iter().any(|row| row.contains_key(component.name())))
            .collect();

        let mut columns = Vec::new();
        for component in &components {
            for column in component_columns(component) {
                columns.push(self.dialect.escape_identifier(column)?);
            }
        }

        let mut tuples = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut literals = Vec::with_capacity(columns.len());
            for component in &components {
                match row.get(component.name()) {
                    Some(value) => literals.extend(self.component_literals(component, value)?),
                    None => literals.extend(
                        component_columns(component).map(|_| "DEFAULT".to_string()),
                    ),
                }
            }
            tuples.push(format!("({})", literals.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.dialect.escape_identifier(&node.table_name)?,
            columns.join(", "),
            tuples.join(", ")
        );
        log::debug!("insert into {}: {} rows", node.name, rows.len());
        Ok(sql)
    }

    /// Set the components of `value` on every instance matching `filter`
    pub fn update(
        &self,
        node: &Arc<NodeSchema>,
        filter: Option<&BooleanFilter>,
        value: &NodeValue,
    ) -> Result<String, SqlGeneratorError> {
        check_owner(node, filter.map(|f| f.node()))?;
        let changes = node.parse_component_values(value)?;
        if changes.is_empty() {
            return Err(SqlGeneratorError::EmptyStatement {
                node: node.name.clone(),
                statement: "UPDATE",
            });
        }

        let mut table = TableNode::root(node);
        let mut assignments = Vec::new();
        for (key, value) in changes.iter() {
            let component = node
                .component(key)
                .ok_or_else(|| SqlGeneratorError::unexpected("update", key))?;
            let literals = self.component_literals(component, value)?;
            for (column, literal) in component_columns(component).zip(literals) {
                assignments.push(format!("{} = {}", table.column(self.dialect, column)?, literal));
            }
        }

        let where_clause = self.where_clause(&mut table, filter.map(BooleanFilter::reduced).as_ref())?;
        let sql = format!(
            "UPDATE {}{} SET {}{}",
            table.from_sql(self.dialect)?,
            table.joins_sql(self.dialect)?,
            assignments.join(", "),
            where_clause
        );
        log::debug!("update on {}: {}", node.name, sql);
        Ok(sql)
    }

    /// Delete every instance matching `filter`
    pub fn delete(
        &self,
        node: &Arc<NodeSchema>,
        filter: Option<&BooleanFilter>,
    ) -> Result<String, SqlGeneratorError> {
        check_owner(node, filter.map(|f| f.node()))?;
        let mut table = TableNode::root(node);
        let where_clause = self.where_clause(&mut table, filter.map(BooleanFilter::reduced).as_ref())?;
        let sql = format!(
            "DELETE {} FROM {}{}{}",
            self.dialect.escape_alias(&table.alias)?,
            table.from_sql(self.dialect)?,
            table.joins_sql(self.dialect)?,
            where_clause
        );
        log::debug!("delete on {}: {}", node.name, sql);
        Ok(sql)
    }

    fn select(
        &self,
        table: &mut TableNode,
        selection: &NodeSelection,
    ) -> Result<SelectedColumns, SqlGeneratorError> {
        let mut selected = SelectedColumns::default();
        self.select_into(table, selection, &[], &mut selected)?;
        Ok(selected)
    }

    fn select_into(
        &self,
        table: &mut TableNode,
        selection: &NodeSelection,
        path: &[String],
        selected: &mut SelectedColumns,
    ) -> Result<(), SqlGeneratorError> {
        let dialect = self.dialect;
        let mut push = |expression: String, keys: &[&str]| -> Result<(), SqlGeneratorError> {
            let alias: Vec<&str> = path.iter().map(String::as_str).chain(keys.iter().copied()).collect();
            selected.columns.push(format!(
                "{} AS {}",
                expression,
                dialect.escape_alias(&alias.join("."))?
            ));
            Ok(())
        };

        for component in selection.node().identifier_components() {
            match component {
                Component::Leaf(leaf) => {
                    push(table.column(dialect, &leaf.column)?, &[IDENTIFIER_KEY, leaf.name.as_str()])?
                }
                Component::Edge(edge) => {
                    for fk in &edge.columns {
                        push(
                            table.column(dialect, &fk.column)?,
                            &[IDENTIFIER_KEY, edge.name.as_str(), fk.head_leaf.as_str()],
                        )?;
                    }
                }
            }
        }

        for expression in selection.expressions() {
            let key = expression.key();
            match expression {
                SelectionExpression::Leaf(s) => push(table.column(dialect, &s.leaf.column)?, &[key])?,
                SelectionExpression::ReverseEdgeMultipleCount(s) => push(
                    format!(
                        "({})",
                        subquery(
                            &self.context(),
                            table,
                            &s.reverse_edge,
                            s.filter.as_ref().map(BooleanFilter::reduced).as_ref(),
                            "COUNT(*)"
                        )?
                    ),
                    &[key],
                )?,
                _ => {}
            }
        }

        // Relations recurse with their own column prefix
        for expression in selection.expressions() {
            let mut nested = path.to_vec();
            nested.push(expression.key().to_string());
            match expression {
                SelectionExpression::EdgeHead(s) => {
                    let joined =
                        table.join(self.catalog, JoinRelation::Edge(s.edge.clone()), None)?;
                    self.select_into(joined, &s.head_selection, &nested, selected)?;
                }
                SelectionExpression::ReverseEdgeUniqueHead(s) => {
                    let joined = table.join(
                        self.catalog,
                        JoinRelation::ReverseEdgeUnique(s.reverse_edge.clone()),
                        None,
                    )?;
                    self.select_into(joined, &s.head_selection, &nested, selected)?;
                }
                SelectionExpression::ReverseEdgeMultipleHead(s) => {
                    if s.limit > self.config.max_limit {
                        return Err(SqlGeneratorError::InvalidLimit {
                            limit: s.limit,
                            max: self.config.max_limit,
                        });
                    }
                    selected.deferred.push(DeferredFetch {
                        path: nested,
                        selection: s.clone(),
                    });
                }
                SelectionExpression::Leaf(_) | SelectionExpression::ReverseEdgeMultipleCount(_) => {}
            }
        }
        Ok(())
    }

    fn where_clause(
        &self,
        table: &mut TableNode,
        filter: Option<&BooleanFilter>,
    ) -> Result<String, SqlGeneratorError> {
        match filter {
            Some(filter) if !filter.is_true() => {
                Ok(format!(" WHERE {}", filter.to_sql(&self.context(), table)?))
            }
            _ => Ok(String::new()),
        }
    }

    /// Requested ordering, then the identifier columns not already sorted on
    fn order_by(
        &self,
        table: &mut TableNode,
        ordering: Option<&OrderingExpression>,
    ) -> Result<String, SqlGeneratorError> {
        let mut items = Vec::new();
        let mut sorted_columns = Vec::new();
        if let Some(ordering) = ordering {
            if !ordering.is_empty() {
                items.push(ordering.to_sql(&self.context(), table)?);
            }
            for expression in ordering.expressions() {
                if let SortExpression::Leaf(o) = expression {
                    sorted_columns.push(o.leaf.column.as_str());
                }
            }
        }

        for component in table.node.identifier_components() {
            for column in component_columns(component) {
                if !sorted_columns.contains(&column) {
                    items.push(format!("{} ASC", table.column(self.dialect, column)?));
                }
            }
        }
        Ok(items.join(", "))
    }

    fn limit_clause(&self, offset: u64, limit: Option<u64>) -> Result<String, SqlGeneratorError> {
        match limit {
            Some(limit) if limit > self.config.max_limit => Err(SqlGeneratorError::InvalidLimit {
                limit,
                max: self.config.max_limit,
            }),
            Some(limit) if offset > 0 => Ok(format!(" LIMIT {} OFFSET {}", limit, offset)),
            Some(limit) => Ok(format!(" LIMIT {}", limit)),
            // MariaDB has no OFFSET without LIMIT
            None if offset > 0 => Ok(format!(" LIMIT {} OFFSET {}", u64::MAX, offset)),
            None => Ok(String::new()),
        }
    }

    fn component_literals(
        &self,
        component: &Component,
        value: &Value,
    ) -> Result<Vec<String>, SqlGeneratorError> {
        match component {
            Component::Leaf(leaf) => Ok(vec![self.dialect.escape_leaf_value(leaf, value)?]),
            Component::Edge(edge) => {
                let head = self.catalog.edge_head(edge)?;
                edge.columns
                    .iter()
                    .map(|fk| match value {
                        Value::Null => Ok("NULL".to_string()),
                        Value::Node(reference) => {
                            let leaf_value = reference.get(&fk.head_leaf).ok_or_else(|| {
                                StatementError::missing(&head.name, &fk.head_leaf)
                            })?;
                            self.dialect
                                .escape_leaf_value(head.leaf(&fk.head_leaf)?, leaf_value)
                        }
                        other => Err(SqlGeneratorError::unexpected(
                            format!("reference of `{}.{}`", edge.node, edge.name),
                            other,
                        )),
                    })
                    .collect()
            }
        }
    }
}

/// Columns backing a component, foreign key columns for edges
fn component_columns(component: &Component) -> impl Iterator<Item = &str> {
    let columns: Vec<&str> = match component {
        Component::Leaf(leaf) => vec![leaf.column.as_str()],
        Component::Edge(edge) => edge.columns.iter().map(|fk| fk.column.as_str()).collect(),
    };
    columns.into_iter()
}

fn check_owner(
    node: &Arc<NodeSchema>,
    owner: Option<&Arc<NodeSchema>>,
) -> Result<(), SqlGeneratorError> {
    match owner {
        Some(owner) if owner.name != node.name => Err(StatementError::NodeMismatch {
            expected: node.name.clone(),
            found: owner.name.clone(),
        }
        .into()),
        _ => Ok(()),
    }
}
