//! Dynamic values produced by formulas and structured object properties.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::fmt;

/// Dot-separated property path, split into segments.
pub type PropertyPath = SmallVec<[String; 4]>;

/// A formula value. There is no implicit coercion between variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    String(String),
    Bool(bool),
}

/// The variant tag of a [`Value`], used in error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Number,
    String,
    Bool,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Bool => "bool",
        })
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Number(_) => ValueType::Number,
            Self::String(_) => ValueType::String,
            Self::Bool(_) => ValueType::Bool,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Bitwise identity, so that `NaN`-free values compare exactly and
    /// `-0.0` is distinguished from `0.0`.
    pub fn bit_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// A property slot on a scene object: either a leaf value or a nested record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Property {
    Value(Value),
    Record(BTreeMap<String, Property>),
}

impl Property {
    /// Look up one path segment inside a record.
    pub fn field(&self, segment: &str) -> Option<&Property> {
        match self {
            Self::Record(fields) => fields.get(segment),
            Self::Value(_) => None,
        }
    }

    /// Walk a path of segments below this property.
    pub fn lookup<S: AsRef<str>>(&self, path: &[S]) -> Option<&Property> {
        path.iter()
            .try_fold(self, |prop, segment| prop.field(segment.as_ref()))
    }

    /// The leaf value, if this property is not a record.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Record(_) => None,
        }
    }

    /// Set the value at `path`, creating intermediate records as needed.
    /// A leaf found in the middle of the path is replaced by a record.
    pub fn set_path<S: AsRef<str>>(&mut self, path: &[S], value: Value) {
        let Some((first, rest)) = path.split_first() else {
            *self = Self::Value(value);
            return;
        };
        if !matches!(self, Self::Record(_)) {
            *self = Self::Record(BTreeMap::new());
        }
        if let Self::Record(fields) = self {
            fields
                .entry(first.as_ref().to_string())
                .or_insert_with(|| Self::Record(BTreeMap::new()))
                .set_path(rest, value);
        }
    }
}

impl From<Value> for Property {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// Split a dotted path (`position.x`) into segments.
pub fn split_path(path: &str) -> PropertyPath {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
