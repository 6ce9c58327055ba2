use std::cmp::Ordering;

use super::{BooleanFilter, FilterKind, LeafFilter, LeafOperator};
use crate::statement::errors::StatementError;
use crate::statement::value::{NodeValue, Value};

impl BooleanFilter {
    /// Evaluate against an in-memory instance value.
    ///
    /// The value must carry every component and relation the filter reads:
    /// edges as `Node`/`Null`, reverse unique edges as `Node`/`Null`, reverse
    /// multiple edges as `List`, and counts either as `Int` under `<rel>Count`
    /// or through the `List` itself.
    pub fn execute(&self, value: &NodeValue) -> Result<bool, StatementError> {
        let node = &self.node().name;
        let get = |key: &str| value.get(key).ok_or_else(|| StatementError::missing(node, key));

        match self.kind() {
            FilterKind::Value(b) => Ok(*b),
            FilterKind::And(operands) => {
                for operand in operands {
                    if !operand.execute(value)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            FilterKind::Or(operands) => {
                for operand in operands {
                    if operand.execute(value)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            FilterKind::Not(operand) => Ok(!operand.execute(value)?),
            FilterKind::Leaf(filter) => Ok(execute_leaf(filter, get(&filter.leaf.name)?)),
            FilterKind::EdgeExists(filter) => {
                execute_head(node, &filter.edge.name, &filter.head_filter, get(&filter.edge.name)?)
            }
            FilterKind::ReverseEdgeUniqueExists(filter) => execute_head(
                node,
                &filter.reverse_edge.name,
                &filter.head_filter,
                get(&filter.reverse_edge.name)?,
            ),
            FilterKind::ReverseEdgeMultipleExists(filter) => {
                let name = &filter.reverse_edge.name;
                let items = get(name)?
                    .as_list()
                    .ok_or_else(|| invalid(node, name, "list", get(name).ok()))?;
                for item in items {
                    if execute_head(node, name, &filter.head_filter, item)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            FilterKind::ReverseEdgeMultipleCount(filter) => {
                let count_key = filter.reverse_edge.count_key();
                let count = match value.get(&count_key) {
                    Some(Value::Int(n)) if *n >= 0 => *n as u64,
                    Some(other) => return Err(invalid(node, &count_key, "count", Some(other))),
                    None => match get(&filter.reverse_edge.name)? {
                        Value::List(items) => items.len() as u64,
                        other => {
                            return Err(invalid(node, &filter.reverse_edge.name, "list", Some(other)))
                        }
                    },
                };
                Ok(filter.operator.matches(count, filter.value))
            }
            FilterKind::Raw(_) => Err(StatementError::NotExecutable { node: node.clone() }),
        }
    }
}

fn invalid(node: &str, key: &str, expected: &str, value: Option<&Value>) -> StatementError {
    StatementError::InvalidValue {
        node: node.to_string(),
        component: key.to_string(),
        expected: expected.to_string(),
        value: value.map(Value::to_string).unwrap_or_default(),
    }
}

fn execute_head(
    node: &str,
    key: &str,
    head_filter: &Option<BooleanFilter>,
    value: &Value,
) -> Result<bool, StatementError> {
    match value {
        Value::Null => Ok(false),
        Value::Node(head) => match head_filter {
            Some(filter) => filter.execute(head),
            None => Ok(true),
        },
        other => Err(invalid(node, key, "node", Some(other))),
    }
}

fn execute_leaf(filter: &LeafFilter, value: &Value) -> bool {
    let compare = |expected: Ordering| -> bool {
        !value.is_null() && value.compare(&filter.value) == Some(expected)
    };
    match filter.operator {
        LeafOperator::Eq => value.loose_eq(&filter.value),
        LeafOperator::Not => !value.loose_eq(&filter.value),
        LeafOperator::Gt => compare(Ordering::Greater),
        LeafOperator::Gte => compare(Ordering::Greater) || compare(Ordering::Equal),
        LeafOperator::Lt => compare(Ordering::Less),
        LeafOperator::Lte => compare(Ordering::Less) || compare(Ordering::Equal),
        LeafOperator::In => list_contains(&filter.value, value),
        LeafOperator::NotIn => !list_contains(&filter.value, value),
        LeafOperator::FullText => match (value, &filter.value) {
            (Value::String(text), Value::String(query)) => full_text_matches(text, query),
            _ => false,
        },
    }
}

fn list_contains(list: &Value, value: &Value) -> bool {
    list.as_list()
        .is_some_and(|items| items.iter().any(|item| item.loose_eq(value)))
}

/// In-memory approximation of a boolean-mode full-text match: any query term
/// equals one of the words of the text, case-insensitively.
fn full_text_matches(text: &str, query: &str) -> bool {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    query
        .split_whitespace()
        .map(|term| term.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|term| !term.is_empty())
        .any(|term| words.contains(&term))
}
