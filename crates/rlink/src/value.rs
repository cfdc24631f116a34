//! Host-side values crossing the bridge
//!
//! `Value` is the only shape data takes on the host side of a session. It is
//! an owned tree: nothing in it points into runtime memory, so every value
//! returned from a session is an independent deep copy.

use crate::errors::BridgeError;
use indexmap::IndexMap;

/// An ordered, homogeneous sequence of scalars
#[derive(Debug, Clone, PartialEq)]
pub enum Vector {
    Numeric(Vec<f64>),
    Character(Vec<String>),
    Logical(Vec<bool>),
}

impl Vector {
    pub fn len(&self) -> usize {
        match self {
            Vector::Numeric(v) => v.len(),
            Vector::Character(v) => v.len(),
            Vector::Logical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Vector::Numeric(_) => "numeric",
            Vector::Character(_) => "character",
            Vector::Logical(_) => "logical",
        }
    }
}

/// A value on the host side of the bridge
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The runtime's `NULL`
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Vector(Vector),
    /// Named mapping, marshaled as a named list
    Record(IndexMap<String, Value>),
    /// Marker for a runtime value with no lossless host shape; holds its class
    Opaque(String),
}

impl Value {
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Vector(v) => v.type_name(),
            Value::Record(_) => "record",
            Value::Opaque(_) => "opaque",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    /// Numeric elements, treating a scalar as a sequence of one
    ///
    /// R has no scalars, so a length-1 vector comes back as `Number`; this
    /// view compares the two element for element.
    pub fn numbers(&self) -> Option<Vec<f64>> {
        match self {
            Value::Number(n) => Some(vec![*n]),
            Value::Vector(Vector::Numeric(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Character elements, treating a scalar as a sequence of one
    pub fn strings(&self) -> Option<Vec<String>> {
        match self {
            Value::Text(s) => Some(vec![s.clone()]),
            Value::Vector(Vector::Character(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Logical elements, treating a scalar as a sequence of one
    pub fn bools(&self) -> Option<Vec<bool>> {
        match self {
            Value::Bool(b) => Some(vec![*b]),
            Value::Vector(Vector::Logical(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Convert a dynamic JSON document into a typed value
    ///
    /// Arrays must hold scalars of a single JSON type; nesting deeper than
    /// `max_depth` records fails with `CyclicValue`.
    pub fn from_json(json: &serde_json::Value, max_depth: usize) -> Result<Self, BridgeError> {
        from_json_at(json, 0, max_depth)
    }

    /// Render as JSON; non-finite numbers and opaque markers become `null`
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        let number = |n: f64| serde_json::Number::from_f64(n).map_or(Json::Null, Json::Number);
        match self {
            Value::Null | Value::Opaque(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number(*n),
            Value::Text(s) => Json::String(s.clone()),
            Value::Vector(Vector::Numeric(v)) => Json::Array(v.iter().map(|n| number(*n)).collect()),
            Value::Vector(Vector::Character(v)) => {
                Json::Array(v.iter().cloned().map(Json::String).collect())
            }
            Value::Vector(Vector::Logical(v)) => Json::Array(v.iter().map(|b| Json::Bool(*b)).collect()),
            Value::Record(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// `n` as a double; integers a double would round are refused
fn json_number(n: &serde_json::Number) -> Result<f64, BridgeError> {
    let exact = if let Some(i) = n.as_i64() {
        let x = i as f64;
        (x as i128 == i128::from(i)).then_some(x)
    } else if let Some(u) = n.as_u64() {
        let x = u as f64;
        (x as i128 == i128::from(u)).then_some(x)
    } else {
        n.as_f64()
    };
    exact.ok_or_else(|| {
        BridgeError::UnrepresentableType(format!("number {} cannot be held exactly as a double", n))
    })
}

fn from_json_at(
    json: &serde_json::Value,
    depth: usize,
    max_depth: usize,
) -> Result<Value, BridgeError> {
    use serde_json::Value as Json;
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => json_number(n).map(Value::Number),
        Json::String(s) => Ok(Value::Text(s.clone())),
        Json::Array(items) => sequence_from_json(items).map(Value::Vector),
        Json::Object(fields) => {
            if depth >= max_depth {
                return Err(BridgeError::CyclicValue { depth: max_depth });
            }
            let mut record = IndexMap::with_capacity(fields.len());
            for (key, value) in fields {
                record.insert(key.clone(), from_json_at(value, depth + 1, max_depth)?);
            }
            Ok(Value::Record(record))
        }
    }
}

fn sequence_from_json(items: &[serde_json::Value]) -> Result<Vector, BridgeError> {
    use serde_json::Value as Json;
    let Some(first) = items.first() else {
        // No element to infer from; an empty JSON array is numeric(0)
        return Ok(Vector::Numeric(Vec::new()));
    };
    let expected = json_kind(first);
    for (index, item) in items.iter().enumerate() {
        match item {
            Json::Array(_) | Json::Object(_) | Json::Null => {
                return Err(BridgeError::UnrepresentableType(format!(
                    "element {} of a sequence is {}; sequences hold scalars only",
                    index,
                    json_kind(item)
                )));
            }
            _ if json_kind(item) != expected => {
                return Err(BridgeError::HeterogeneousSequence {
                    index,
                    expected,
                    found: json_kind(item),
                });
            }
            _ => {}
        }
    }

    let vector = match first {
        Json::Bool(_) => Vector::Logical(items.iter().filter_map(Json::as_bool).collect()),
        Json::String(_) => Vector::Character(
            items
                .iter()
                .filter_map(|s| s.as_str().map(str::to_string))
                .collect(),
        ),
        _ => {
            let numbers = items
                .iter()
                .filter_map(|item| match item {
                    Json::Number(n) => Some(json_number(n)),
                    _ => None,
                })
                .collect::<Result<Vec<f64>, _>>()?;
            Vector::Numeric(numbers)
        }
    };
    Ok(vector)
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Vector(Vector::Numeric(v))
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::Vector(Vector::Character(v))
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::Vector(Vector::Character(v.into_iter().map(str::to_string).collect()))
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::Vector(Vector::Logical(v))
    }
}

impl From<Vector> for Value {
    fn from(v: Vector) -> Self {
        Value::Vector(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(fields: IndexMap<String, Value>) -> Self {
        Value::Record(fields)
    }
}
