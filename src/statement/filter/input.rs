//! Where-input parsing: JSON objects into filters.
//!
//! ```text
//! { "status": "PUBLISHED", "views_gte": 10,
//!   "category": { "title": "News" },
//!   "tags_some": { "tag": { "title_in": ["rust", "sql"] } },
//!   "OR": [ { "score": null }, { "score_gt": 1.5 } ] }
//! ```

use std::sync::Arc;

use serde_json::Value as Json;

use super::{BooleanFilter, CountOperator, LeafOperator};
use crate::node_catalog::{Component, NodeCatalog, NodeSchema, ReverseEdgeKind};
use crate::statement::errors::StatementError;
use crate::statement::value::Value;

// Longest suffixes first, so that `_not_in` is not read as `_in`
const LEAF_OPERATORS: [LeafOperator; 8] = [
    LeafOperator::FullText,
    LeafOperator::NotIn,
    LeafOperator::Gte,
    LeafOperator::Lte,
    LeafOperator::Not,
    LeafOperator::Gt,
    LeafOperator::Lt,
    LeafOperator::In,
];

const COUNT_OPERATORS: [CountOperator; 5] = [
    CountOperator::Gte,
    CountOperator::Lte,
    CountOperator::Not,
    CountOperator::Gt,
    CountOperator::Lt,
];

impl BooleanFilter {
    /// Parse a where-input object; `null` means no constraint.
    pub fn parse(
        catalog: &NodeCatalog,
        node: &Arc<NodeSchema>,
        input: &Json,
    ) -> Result<BooleanFilter, StatementError> {
        parse_where(catalog, node, input, &node.name)
    }
}

fn parse_where(
    catalog: &NodeCatalog,
    node: &Arc<NodeSchema>,
    input: &Json,
    path: &str,
) -> Result<BooleanFilter, StatementError> {
    let object = match input {
        Json::Null => return Ok(BooleanFilter::value(node, true)),
        Json::Object(object) => object,
        _ => return Err(StatementError::invalid_input(path, "expected an object")),
    };

    let mut operands = Vec::with_capacity(object.len());
    for (key, value) in object {
        let path = format!("{}.{}", path, key);
        operands.push(parse_entry(catalog, node, key, value, &path)?);
    }
    BooleanFilter::and(node, operands)
}

fn parse_list(
    catalog: &NodeCatalog,
    node: &Arc<NodeSchema>,
    input: &Json,
    path: &str,
) -> Result<Vec<BooleanFilter>, StatementError> {
    match input {
        Json::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| parse_where(catalog, node, item, &format!("{}[{}]", path, i)))
            .collect(),
        single @ Json::Object(_) => Ok(vec![parse_where(catalog, node, single, path)?]),
        _ => Err(StatementError::invalid_input(path, "expected a list of objects")),
    }
}

fn parse_entry(
    catalog: &NodeCatalog,
    node: &Arc<NodeSchema>,
    key: &str,
    value: &Json,
    path: &str,
) -> Result<BooleanFilter, StatementError> {
    match key {
        "AND" => return BooleanFilter::and(node, parse_list(catalog, node, value, path)?),
        "OR" => return BooleanFilter::or(node, parse_list(catalog, node, value, path)?),
        "NOT" => return Ok(BooleanFilter::not(parse_where(catalog, node, value, path)?)),
        _ => {}
    }

    if let Some(component) = node.component(key) {
        return match component {
            Component::Leaf(leaf) => {
                BooleanFilter::leaf(node, &leaf.name, LeafOperator::Eq, Value::from_json(value))
            }
            Component::Edge(edge) => parse_edge(catalog, node, &edge.name, value, path),
        };
    }

    if let Some(reverse_edge) = node.reverse_edges().iter().find(|r| r.name == key) {
        if reverse_edge.kind == ReverseEdgeKind::Unique {
            let head = catalog.reverse_edge_head(reverse_edge)?;
            return match value {
                Json::Null => Ok(BooleanFilter::not(BooleanFilter::reverse_edge_exists(
                    node, key, None,
                )?)),
                _ => BooleanFilter::reverse_edge_exists(
                    node,
                    key,
                    Some(parse_where(catalog, head, value, path)?),
                ),
            };
        }
    }

    if let Some(name) = key.strip_suffix("_not") {
        if let Some(Component::Edge(_)) = node.component(name) {
            return Ok(BooleanFilter::not(parse_edge(catalog, node, name, value, path)?));
        }
    }

    for (suffix, negate_head, negate_result) in
        [("_some", false, false), ("_every", true, true), ("_none", false, true)]
    {
        let Some(name) = key.strip_suffix(suffix) else {
            continue;
        };
        let Ok(reverse_edge) = node.reverse_edge(name) else {
            continue;
        };
        if reverse_edge.kind != ReverseEdgeKind::Multiple {
            continue;
        }
        let head = catalog.reverse_edge_head(reverse_edge)?;
        let mut head_filter = parse_where(catalog, head, value, path)?;
        if negate_head {
            head_filter = BooleanFilter::not(head_filter);
        }
        let exists = BooleanFilter::reverse_edge_exists(node, name, Some(head_filter))?;
        return Ok(if negate_result {
            BooleanFilter::not(exists)
        } else {
            exists
        });
    }

    for operator in COUNT_OPERATORS.iter().chain([&CountOperator::Eq]) {
        let Some(rest) = key.strip_suffix(operator.input_suffix()) else {
            continue;
        };
        let Some(name) = rest.strip_suffix("Count") else {
            continue;
        };
        if node.reverse_edge(name).is_err() {
            continue;
        }
        let count = value
            .as_u64()
            .ok_or_else(|| StatementError::invalid_input(path, "expected a non-negative integer"))?;
        return BooleanFilter::reverse_edge_count(node, name, *operator, count);
    }

    for operator in LEAF_OPERATORS {
        let Some(name) = key.strip_suffix(operator.input_suffix()) else {
            continue;
        };
        if node.leaf(name).is_ok() {
            return BooleanFilter::leaf(node, name, operator, Value::from_json(value));
        }
    }

    Err(StatementError::invalid_input(
        path,
        format!("unknown filter key `{}` on `{}`", key, node.name),
    ))
}

fn parse_edge(
    catalog: &NodeCatalog,
    node: &Arc<NodeSchema>,
    name: &str,
    value: &Json,
    path: &str,
) -> Result<BooleanFilter, StatementError> {
    let edge = node.edge(name)?;
    match value {
        Json::Null => Ok(BooleanFilter::not(BooleanFilter::edge_exists(node, name, None)?)),
        _ => {
            let head = catalog.edge_head(edge)?;
            BooleanFilter::edge_exists(node, name, Some(parse_where(catalog, head, value, path)?))
        }
    }
}
