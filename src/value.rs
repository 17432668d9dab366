//! The templating data model.
//!
//! [`Value`] is the tree that flows in and out of the engine: scalars,
//! order-preserving dicts, and lists. Its one departure from a plain JSON
//! value is [`TaggedStr`]: every string scalar carries an immutable
//! "trusted for templating" flag, consulted by the engine to decide whether
//! the string may be compiled at all. Containers never carry trust; the tag
//! is a per-scalar fact.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A string scalar with an immutable trust tag.
///
/// The tag is set at construction and cannot be flipped afterwards; producing
/// a trusted copy of untrusted text goes through
/// [`trust_as_template`](crate::trust::trust_as_template).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaggedStr {
    text: String,
    trusted: bool,
}

impl TaggedStr {
    /// Create an untrusted string scalar. This is the default for any text
    /// that arrived from outside the control plane.
    pub fn untrusted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            trusted: false,
        }
    }

    /// Create a trusted string scalar. Callers assert the text originated
    /// from a source authorized to contain template syntax.
    pub fn trusted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            trusted: true,
        }
    }

    /// The string contents.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether this scalar is trusted for templating.
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Produce a copy with different text but the same trust tag.
    pub fn tag_copy(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            trusted: self.trusted,
        }
    }

    /// Consume the scalar, returning its text.
    pub fn into_string(self) -> String {
        self.text
    }
}

impl std::fmt::Display for TaggedStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// A value in the templating data model.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null / absent.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Float scalar.
    Float(f64),
    /// String scalar with trust tag.
    String(TaggedStr),
    /// List; templated element-wise, shape preserved.
    List(Vec<Value>),
    /// Dict; insertion order preserved, values templated, keys passed
    /// through untouched.
    Dict(IndexMap<String, Value>),
}

impl Value {
    /// Shorthand for a trusted string value.
    pub fn trusted(text: impl Into<String>) -> Self {
        Value::String(TaggedStr::trusted(text))
    }

    /// Shorthand for an untrusted string value.
    pub fn untrusted(text: impl Into<String>) -> Self {
        Value::String(TaggedStr::untrusted(text))
    }

    /// The string contents, for string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The boolean, for bool values.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Python-style truthiness, used by the relaxed conditional policy:
    /// null and empty collections/strings are false, zero is false,
    /// everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.as_str().is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Dict(map) => !map.is_empty(),
        }
    }

    /// A short name for the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::untrusted(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::untrusted(s)
    }
}

impl From<TaggedStr> for Value {
    fn from(s: TaggedStr) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Dict(map)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::untrusted(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Dict(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(yaml: serde_yaml::Value) -> Self {
        match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_yaml::Value::String(s) => Value::untrusted(s),
            serde_yaml::Value::Sequence(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_yaml::Value::Mapping(map) => Value::Dict(
                map.into_iter()
                    .filter_map(|(k, v)| match k {
                        serde_yaml::Value::String(key) => Some((key, Value::from(v))),
                        _ => None,
                    })
                    .collect(),
            ),
            serde_yaml::Value::Tagged(tagged) => Value::from(tagged.value),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s.as_str()),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Dict(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}
