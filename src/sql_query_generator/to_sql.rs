//! Expression compilation.
//!
//! Predicates are two-valued: NULL-able columns are compared with `<=>` or guarded by
//! `IS NOT NULL`, so `NOT (p)` selects exactly the rows where `p` is false in memory.

use super::errors::SqlGeneratorError;
use super::escaping::Dialect;
use super::table_reference::{correlation, JoinRelation, TableNode};
use crate::node_catalog::{NodeCatalog, ReverseEdge};
use crate::statement::{
    BooleanFilter, EdgeExistsFilter, FilterKind, LeafFilter, LeafOperator, OrderingExpression,
    ReverseEdgeExistsFilter, SortExpression, StatementError, Value,
};

/// What every compilation step needs besides the table it renders against
#[derive(Clone, Copy)]
pub struct SqlContext<'a> {
    pub catalog: &'a NodeCatalog,
    pub dialect: &'a dyn Dialect,
}

pub trait ToSql {
    /// Render against `table`, adding the joins the expression needs
    fn to_sql(
        &self,
        context: &SqlContext<'_>,
        table: &mut TableNode,
    ) -> Result<String, SqlGeneratorError>;
}

impl ToSql for BooleanFilter {
    fn to_sql(
        &self,
        context: &SqlContext<'_>,
        table: &mut TableNode,
    ) -> Result<String, SqlGeneratorError> {
        if self.node().name != table.node.name {
            return Err(StatementError::NodeMismatch {
                expected: table.node.name.clone(),
                found: self.node().name.clone(),
            }
            .into());
        }

        match self.kind() {
            FilterKind::Value(value) => Ok(boolean(*value).to_string()),
            FilterKind::And(operands) => junction(context, table, operands, "AND", true),
            FilterKind::Or(operands) => junction(context, table, operands, "OR", false),
            FilterKind::Not(operand) => Ok(format!("NOT ({})", operand.to_sql(context, table)?)),
            FilterKind::Leaf(filter) => leaf(context.dialect, table, filter),
            FilterKind::EdgeExists(filter) => edge_exists(context, table, filter),
            FilterKind::ReverseEdgeUniqueExists(filter)
            | FilterKind::ReverseEdgeMultipleExists(filter) => {
                reverse_edge_exists(context, table, filter)
            }
            FilterKind::ReverseEdgeMultipleCount(filter) => Ok(format!(
                "({}) {} {}",
                subquery(
                    context,
                    table,
                    &filter.reverse_edge,
                    None,
                    "COUNT(*)"
                )?,
                filter.operator.sql(),
                filter.value
            )),
            FilterKind::Raw(sql) => Ok(format!(
                "({})",
                sql.replace("{alias}", &context.dialect.escape_alias(&table.alias)?)
            )),
        }
    }
}

impl ToSql for SortExpression {
    fn to_sql(
        &self,
        context: &SqlContext<'_>,
        table: &mut TableNode,
    ) -> Result<String, SqlGeneratorError> {
        let expression = match self {
            SortExpression::Leaf(ordering) => {
                if ordering.leaf.node != table.node.name {
                    return Err(SqlGeneratorError::unexpected(
                        format!("ordering of `{}`", table.node.name),
                        &ordering.leaf.name,
                    ));
                }
                table.column(context.dialect, &ordering.leaf.column)?
            }
            SortExpression::ReverseEdgeMultipleCount(ordering) => format!(
                "({})",
                subquery(context, table, &ordering.reverse_edge, None, "COUNT(*)")?
            ),
        };
        Ok(format!("{} {}", expression, self.direction().sql()))
    }
}

impl ToSql for OrderingExpression {
    fn to_sql(
        &self,
        context: &SqlContext<'_>,
        table: &mut TableNode,
    ) -> Result<String, SqlGeneratorError> {
        let items = self
            .expressions()
            .iter()
            .map(|expression| expression.to_sql(context, table))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items.join(", "))
    }
}

fn boolean(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn junction(
    context: &SqlContext<'_>,
    table: &mut TableNode,
    operands: &[BooleanFilter],
    operator: &str,
    identity: bool,
) -> Result<String, SqlGeneratorError> {
    if operands.is_empty() {
        return Ok(boolean(identity).to_string());
    }
    let parts = operands
        .iter()
        .map(|operand| operand.to_sql(context, table))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", parts.join(&format!(" {} ", operator))))
}

fn leaf(
    dialect: &dyn Dialect,
    table: &TableNode,
    filter: &LeafFilter,
) -> Result<String, SqlGeneratorError> {
    let leaf = &filter.leaf;
    let column = table.column(dialect, &leaf.column)?;
    let literal = |value: &Value| dialect.escape_leaf_value(leaf, value);

    let sql = match filter.operator {
        LeafOperator::Eq if filter.value.is_null() => format!("{} IS NULL", column),
        LeafOperator::Not if filter.value.is_null() => format!("{} IS NOT NULL", column),
        LeafOperator::Eq if leaf.nullable => {
            format!("{} <=> {}", column, literal(&filter.value)?)
        }
        LeafOperator::Not if leaf.nullable => {
            format!("NOT ({} <=> {})", column, literal(&filter.value)?)
        }
        LeafOperator::Eq => format!("{} = {}", column, literal(&filter.value)?),
        LeafOperator::Not => format!("{} <> {}", column, literal(&filter.value)?),
        LeafOperator::Gt | LeafOperator::Gte | LeafOperator::Lt | LeafOperator::Lte => {
            let comparison = format!(
                "{} {} {}",
                column,
                filter.operator.symbol(),
                literal(&filter.value)?
            );
            if leaf.nullable {
                format!("({} IS NOT NULL AND {})", column, comparison)
            } else {
                comparison
            }
        }
        LeafOperator::In => membership(dialect, table, filter)?,
        LeafOperator::NotIn => format!("NOT ({})", membership(dialect, table, filter)?),
        LeafOperator::FullText => match &filter.value {
            Value::String(terms) => dialect.full_text(&column, terms),
            other => {
                return Err(SqlGeneratorError::WrongLiteralType {
                    expected: "full-text terms".to_string(),
                    value: other.to_string(),
                })
            }
        },
    };
    Ok(sql)
}

fn membership(
    dialect: &dyn Dialect,
    table: &TableNode,
    filter: &LeafFilter,
) -> Result<String, SqlGeneratorError> {
    let leaf = &filter.leaf;
    let column = table.column(dialect, &leaf.column)?;
    let items = filter
        .value
        .as_list()
        .ok_or_else(|| SqlGeneratorError::unexpected("IN list", &filter.value))?;

    let literals = items
        .iter()
        .filter(|item| !item.is_null())
        .map(|item| dialect.escape_leaf_value(leaf, item))
        .collect::<Result<Vec<_>, _>>()?;

    let mut parts = Vec::with_capacity(2);
    if !literals.is_empty() {
        let list = format!("{} IN ({})", column, literals.join(", "));
        parts.push(if leaf.nullable {
            format!("({} IS NOT NULL AND {})", column, list)
        } else {
            list
        });
    }
    if items.iter().any(Value::is_null) {
        parts.push(format!("{} IS NULL", column));
    }

    Ok(match parts.len() {
        0 => boolean(false).to_string(),
        1 => parts.remove(0),
        _ => format!("({})", parts.join(" OR ")),
    })
}

fn edge_exists(
    context: &SqlContext<'_>,
    table: &mut TableNode,
    filter: &EdgeExistsFilter,
) -> Result<String, SqlGeneratorError> {
    let edge = &filter.edge;
    let guard = if edge.nullable {
        let checks = edge
            .columns
            .iter()
            .map(|fk| Ok(format!("{} IS NOT NULL", table.column(context.dialect, &fk.column)?)))
            .collect::<Result<Vec<_>, SqlGeneratorError>>()?;
        Some(checks.join(" AND "))
    } else {
        None
    };

    let head = match &filter.head_filter {
        Some(head_filter) => {
            let joined = table.join(context.catalog, JoinRelation::Edge(edge.clone()), None)?;
            Some(head_filter.to_sql(context, joined)?)
        }
        None => None,
    };

    Ok(match (guard, head) {
        (Some(guard), Some(head)) => format!("({} AND {})", guard, head),
        (Some(guard), None) if edge.columns.len() > 1 => format!("({})", guard),
        (Some(guard), None) => guard,
        (None, Some(head)) => head,
        (None, None) => boolean(true).to_string(),
    })
}

fn reverse_edge_exists(
    context: &SqlContext<'_>,
    table: &TableNode,
    filter: &ReverseEdgeExistsFilter,
) -> Result<String, SqlGeneratorError> {
    Ok(format!(
        "EXISTS ({})",
        subquery(
            context,
            table,
            &filter.reverse_edge,
            filter.head_filter.as_ref(),
            "1"
        )?
    ))
}

/// Correlated `SELECT <projection> FROM <head> WHERE <head references parent> [AND filter]`
pub(crate) fn subquery(
    context: &SqlContext<'_>,
    parent: &TableNode,
    reverse_edge: &ReverseEdge,
    filter: Option<&BooleanFilter>,
    projection: &str,
) -> Result<String, SqlGeneratorError> {
    let dialect = context.dialect;
    let head = context.catalog.reverse_edge_head(reverse_edge)?;
    let mut child = TableNode::new(head, parent.child_alias(&reverse_edge.name, '<'));

    let mut conditions = correlation(dialect, &reverse_edge.original_edge, &child, parent)?;
    if let Some(filter) = filter.filter(|f| !f.is_true()) {
        conditions.push(filter.to_sql(context, &mut child)?);
    }

    Ok(format!(
        "SELECT {} FROM {}{} WHERE {}",
        projection,
        child.from_sql(dialect)?,
        child.joins_sql(dialect)?,
        conditions.join(" AND ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_catalog::testing::blog_catalog;
    use crate::sql_query_generator::escaping::MariaDbDialect;
    use serde_json::json;
    use test_case::test_case;

    fn compile(node: &str, input: serde_json::Value) -> (String, TableNode) {
        let catalog = blog_catalog();
        let node = catalog.node(node).unwrap();
        let filter = BooleanFilter::parse(&catalog, node, &input).unwrap().reduced();
        let context = SqlContext {
            catalog: &catalog,
            dialect: &MariaDbDialect,
        };
        let mut table = TableNode::root(node);
        let sql = filter.to_sql(&context, &mut table).unwrap();
        (sql, table)
    }

    #[test]
    fn test_filter_with_edge_joins_head() {
        let (sql, table) = compile(
            "Article",
            json!({ "status": "PUBLISHED", "category": { "title": "News" } }),
        );
        assert_eq!(
            sql,
            "(`articles`.`status` = 'PUBLISHED' AND (`articles`.`category_id` IS NOT NULL AND `articles>category`.`title` = 'News'))"
        );
        assert_eq!(table.join_count(), 1);
    }

    #[test_case(json!({ "score": null }), "`articles`.`score` IS NULL" ; "null eq")]
    #[test_case(json!({ "score": 2.5 }), "`articles`.`score` <=> 2.5" ; "nullable eq")]
    #[test_case(json!({ "score_not": 2.5 }), "NOT (`articles`.`score` <=> 2.5)" ; "nullable not")]
    #[test_case(json!({ "views_gt": 10 }), "`articles`.`views` > 10" ; "comparison")]
    #[test_case(json!({ "score_lte": 1 }), "(`articles`.`score` IS NOT NULL AND `articles`.`score` <= 1)" ; "guarded comparison")]
    #[test_case(json!({ "views_in": [1, 2] }), "`articles`.`views` IN (1, 2)" ; "in list")]
    #[test_case(json!({ "score_in": [1, null] }), "((`articles`.`score` IS NOT NULL AND `articles`.`score` IN (1)) OR `articles`.`score` IS NULL)" ; "in with null")]
    #[test_case(json!({ "views_not_in": [1, 2] }), "NOT (`articles`.`views` IN (1, 2))" ; "not in")]
    #[test_case(json!({ "views_in": [] }), "FALSE" ; "empty in")]
    #[test_case(json!({ "category": null }), "NOT (`articles`.`category_id` IS NOT NULL)" ; "edge unset")]
    #[test_case(json!({ "body_full_text": "rust sql" }), "MATCH (`articles`.`body`) AGAINST ('rust sql' IN BOOLEAN MODE)" ; "full text")]
    fn test_leaf_and_edge_predicates(input: serde_json::Value, expected: &str) {
        assert_eq!(compile("Article", input).0, expected);
    }

    #[test]
    fn test_reverse_edge_filters_use_subqueries() {
        let (sql, table) = compile(
            "Article",
            json!({ "tags_some": { "tag": { "title": "x" } }, "tagsCount_gt": 2 }),
        );
        assert_eq!(
            sql,
            concat!(
                "(EXISTS (SELECT 1 FROM `article_tags` AS `articles<tags`",
                " LEFT JOIN `tags` AS `articles<tags>tag` ON `articles<tags`.`tag_id` = `articles<tags>tag`.`id`",
                " WHERE `articles<tags`.`article_id` = `articles`.`id` AND `articles<tags>tag`.`title` = 'x')",
                " AND (SELECT COUNT(*) FROM `article_tags` AS `articles<tags` WHERE `articles<tags`.`article_id` = `articles`.`id`) > 2)",
            )
        );
        assert_eq!(table.join_count(), 0);
    }

    #[test]
    fn test_raw_filter_substitutes_alias() {
        let catalog = blog_catalog();
        let node = catalog.node("Article").unwrap();
        let context = SqlContext {
            catalog: &catalog,
            dialect: &MariaDbDialect,
        };
        let mut table = TableNode::root(node);
        let sql = BooleanFilter::raw(node, "{alias}.`views` % 2 = 0")
            .to_sql(&context, &mut table)
            .unwrap();
        assert_eq!(sql, "(`articles`.`views` % 2 = 0)");
    }

    #[test]
    fn test_filter_on_other_node_is_rejected() {
        let catalog = blog_catalog();
        let context = SqlContext {
            catalog: &catalog,
            dialect: &MariaDbDialect,
        };
        let tag = catalog.node("Tag").unwrap();
        let mut table = TableNode::root(catalog.node("Article").unwrap());
        assert!(BooleanFilter::value(tag, true)
            .to_sql(&context, &mut table)
            .is_err());
    }

    #[test]
    fn test_ordering_with_count() {
        let catalog = blog_catalog();
        let node = catalog.node("Article").unwrap();
        let context = SqlContext {
            catalog: &catalog,
            dialect: &MariaDbDialect,
        };
        let ordering = OrderingExpression::parse(node, &["tagsCount_DESC", "title_ASC"]).unwrap();
        let mut table = TableNode::root(node);
        assert_eq!(
            ordering.to_sql(&context, &mut table).unwrap(),
            "(SELECT COUNT(*) FROM `article_tags` AS `articles<tags` WHERE `articles<tags`.`article_id` = `articles`.`id`) DESC, `articles`.`title` ASC"
        );
    }
}
