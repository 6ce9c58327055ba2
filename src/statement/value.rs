//! Runtime values exchanged with the store and evaluated by filters.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::cmp::Ordering;
use std::fmt;

use super::errors::StatementError;
use crate::node_catalog::{Component, Edge, Leaf, LeafType, NodeSchema};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<Utc>),
    /// An edge head (identifier or selected fields) or a nested record
    Node(NodeValue),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_node(&self) -> Option<&NodeValue> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Node(_) => "node",
            Value::List(_) => "list",
        }
    }

    /// Ordering between two scalar values of compatible types.
    ///
    /// Ints and floats compare numerically; anything else across types is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality as filters see it: NULL equals NULL, numbers compare across int/float
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => self.compare(other) == Some(Ordering::Equal),
        }
    }

    /// Convert a JSON input value, without any schema knowledge
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => Value::Node(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Node(node) => node.to_json(),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Value::DateTime(dt) => write!(f, "'{}'", dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Node(node) => write!(f, "{}", node),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<NodeValue> for Value {
    fn from(node: NodeValue) -> Self {
        Value::Node(node)
    }
}

/// Insertion-ordered mapping from component/relation key to value.
///
/// Partial values are legal: only the keys a statement reads need to be present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeValue {
    entries: Vec<(String, Value)>,
}

impl NodeValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace, keeping the original position of an existing key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for NodeValue {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut node = NodeValue::new();
        for (k, v) in iter {
            node.insert(k, v);
        }
        node
    }
}

impl IntoIterator for NodeValue {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        f.write_str("}")
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whole and within `i64` (`i64::MAX as f64` is 2^63, itself out of range)
fn is_whole_i64(x: f64) -> bool {
    x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64
}

impl Leaf {
    /// Coerce a raw value (from input or from a driver row) into this leaf's type
    pub fn parse_value(&self, value: &Value) -> Result<Value, StatementError> {
        let parsed = match (self.leaf_type, value) {
            (_, Value::Null) if self.nullable => Some(Value::Null),
            (LeafType::Boolean, Value::Boolean(b)) => Some(Value::Boolean(*b)),
            (LeafType::Boolean, Value::Int(i @ (0 | 1))) => Some(Value::Boolean(*i == 1)),
            (LeafType::Int, Value::Int(i)) => Some(Value::Int(*i)),
            (LeafType::Int, Value::Float(x)) if is_whole_i64(*x) => Some(Value::Int(*x as i64)),
            (LeafType::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (LeafType::Float, Value::Float(x)) if x.is_finite() => Some(Value::Float(*x)),
            (LeafType::String, Value::String(s)) => Some(Value::String(s.clone())),
            (LeafType::Uuid, Value::String(s)) => uuid::Uuid::parse_str(s)
                .ok()
                .map(|u| Value::String(u.hyphenated().to_string())),
            (LeafType::DateTime, Value::DateTime(dt)) => Some(Value::DateTime(*dt)),
            (LeafType::DateTime, Value::String(s)) => parse_datetime(s).map(Value::DateTime),
            _ => None,
        };

        parsed.ok_or_else(|| StatementError::InvalidValue {
            node: self.node.clone(),
            component: self.name.clone(),
            expected: if self.nullable {
                format!("{} or null", self.leaf_type)
            } else {
                self.leaf_type.to_string()
            },
            value: value.to_string(),
        })
    }
}

impl Edge {
    /// Project a reference value down to the head identifier keys this edge stores
    pub fn parse_reference(&self, value: &Value) -> Result<Value, StatementError> {
        let invalid = || StatementError::InvalidValue {
            node: self.node.clone(),
            component: self.name.clone(),
            expected: format!("reference to {}", self.head),
            value: value.to_string(),
        };
        match value {
            Value::Null if self.nullable => Ok(Value::Null),
            Value::Node(head) => {
                let mut reference = NodeValue::new();
                for column in &self.columns {
                    let v = head.get(&column.head_leaf).ok_or_else(invalid)?;
                    if v.is_null() {
                        return Err(invalid());
                    }
                    reference.insert(column.head_leaf.clone(), v.clone());
                }
                Ok(Value::Node(reference))
            }
            _ => Err(invalid()),
        }
    }
}

impl NodeSchema {
    /// Extract the identifier of an instance from one of its (possibly partial) values
    pub fn parse_identifier(&self, value: &NodeValue) -> Result<NodeValue, StatementError> {
        let mut identifier = NodeValue::new();
        for component in self.identifier_components() {
            let raw = value
                .get(component.name())
                .ok_or_else(|| StatementError::missing(&self.name, component.name()))?;
            let parsed = match component {
                Component::Leaf(leaf) => leaf.parse_value(raw)?,
                Component::Edge(edge) => edge.parse_reference(raw)?,
            };
            identifier.insert(component.name(), parsed);
        }
        Ok(identifier)
    }

    /// Validate every known component of a value, leaving unknown keys out
    pub fn parse_component_values(&self, value: &NodeValue) -> Result<NodeValue, StatementError> {
        let mut parsed = NodeValue::new();
        for (key, raw) in value.iter() {
            let component =
                self.component(key)
                    .ok_or_else(|| crate::node_catalog::NodeCatalogError::Component {
                        node: self.name.clone(),
                        component: key.to_string(),
                    })?;
            let v = match component {
                Component::Leaf(leaf) => leaf.parse_value(raw)?,
                Component::Edge(edge) => edge.parse_reference(raw)?,
            };
            parsed.insert(key, v);
        }
        Ok(parsed)
    }
}
