//! Object and property identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Owner id used for variable entities in the dependency graph.
pub const VARIABLE_OWNER: &str = "$var";

/// Identifier of a scene object, as handed out by the scene layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An (object, property) pair: the unit the dependency graph is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub object: ObjectId,
    pub property: String,
}

impl EntityRef {
    pub fn new(object: impl Into<ObjectId>, property: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            property: property.into(),
        }
    }

    /// Entity standing for a named variable, regardless of scope.
    pub fn variable(name: impl Into<String>) -> Self {
        Self::new(VARIABLE_OWNER, name)
    }

    /// Whether this entity stands for a variable rather than an object property.
    pub fn is_variable(&self) -> bool {
        self.object.as_str() == VARIABLE_OWNER
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.property)
    }
}
