//! Value Resolver: read-only lookup of variables and object properties.
//!
//! The scene layer and the variable store are injected behind the
//! [`ObjectStore`] and [`VariableStore`] traits; nothing here mutates them.

use std::collections::BTreeMap;
use std::fmt;

use formwork_core::{ObjectId, Property, Value};
use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::store::VariableError;

/// Object name that resolves to the evaluating object.
pub const SELF_REF: &str = "self";
/// Object name that resolves to the evaluating object's container.
pub const PARENT_REF: &str = "parent";

/// Scope of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    Global,
    Container,
    Local,
    Template,
}

impl VariableScope {
    /// Lookup order for `$name` references. First match wins.
    pub const SEARCH_ORDER: [VariableScope; 4] = [
        VariableScope::Local,
        VariableScope::Container,
        VariableScope::Global,
        VariableScope::Template,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Container => "container",
            Self::Local => "local",
            Self::Template => "template",
        }
    }
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scene object as seen by formulas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectData {
    pub id: ObjectId,
    pub name: String,
    /// Enclosing container, if any.
    #[serde(default)]
    pub container: Option<ObjectId>,
    /// Template the object was instantiated from, if any.
    #[serde(default)]
    pub template: Option<ObjectId>,
    #[serde(default)]
    pub properties: BTreeMap<String, Property>,
}

impl ObjectData {
    pub fn new(id: impl Into<ObjectId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            container: None,
            template: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_container(mut self, container: impl Into<ObjectId>) -> Self {
        self.container = Some(container.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<ObjectId>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Set a property by dotted path (`position.x`).
    pub fn with_property(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set_property(path, value.into());
        self
    }

    /// Set a property by dotted path, creating intermediate records.
    pub fn set_property(&mut self, path: &str, value: Value) {
        let segments = formwork_core::split_path(path);
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        let slot = self
            .properties
            .entry(first.clone())
            .or_insert_with(|| Property::Record(BTreeMap::new()));
        slot.set_path(rest, value);
    }

    /// Walk a property path one segment at a time.
    pub fn property<S: AsRef<str>>(&self, path: &[S]) -> Option<&Property> {
        let (first, rest) = path.split_first()?;
        self.properties.get(first.as_ref())?.lookup(rest)
    }

    /// Leaf value at a property path.
    pub fn value<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        self.property(path).and_then(Property::as_value)
    }

    /// Numeric leaf value at a single-segment path.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.value(&[name]).and_then(Value::as_number)
    }
}

/// Read access to scene objects.
pub trait ObjectStore {
    fn get_object(&self, id: &ObjectId) -> Option<&ObjectData>;

    fn find_object_id_by_name(&self, name: &str) -> Option<ObjectId>;

    /// Resolve a property path on an object to a leaf value.
    fn get_property(&self, object: &ObjectData, path: &[String]) -> Option<Value> {
        object.value(path).cloned()
    }

    /// Ids of the objects directly inside `container`, in scene order.
    fn children_of(&self, container: &ObjectId) -> Vec<ObjectId>;
}

/// Identity of the evaluating object, used to pick variable contexts.
#[derive(Debug, Clone, Copy)]
pub struct VariableContext<'a> {
    pub object_id: &'a ObjectId,
    pub container_id: Option<&'a ObjectId>,
    pub template_id: Option<&'a ObjectId>,
}

impl<'a> VariableContext<'a> {
    /// The context id a scope is keyed by (`None` for global).
    pub fn context_for(&self, scope: VariableScope) -> Option<&'a ObjectId> {
        match scope {
            VariableScope::Global => None,
            VariableScope::Container => self.container_id,
            VariableScope::Local => Some(self.object_id),
            VariableScope::Template => self.template_id,
        }
    }
}

/// Named variable slots keyed by (scope, context id, name).
pub trait VariableStore {
    /// Look up a variable in exactly one scope.
    fn get_variable(&self, name: &str, scope: VariableScope, ctx: &VariableContext<'_>)
        -> Option<Value>;

    /// Create or overwrite a variable slot. Non-global scopes need a context id.
    fn set_variable(
        &mut self,
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
        value: Value,
    ) -> Result<(), VariableError>;
}

/// Resolves references against the injected stores.
#[derive(Clone, Copy)]
pub struct ValueResolver<'a> {
    pub objects: &'a dyn ObjectStore,
    pub variables: &'a dyn VariableStore,
}

impl<'a> ValueResolver<'a> {
    pub fn new(objects: &'a dyn ObjectStore, variables: &'a dyn VariableStore) -> Self {
        Self { objects, variables }
    }

    /// Resolve `$name` through the scope search order.
    pub fn resolve_variable(
        &self,
        name: &str,
        ctx: &VariableContext<'_>,
    ) -> Result<Value, EvalError> {
        VariableScope::SEARCH_ORDER
            .iter()
            .find_map(|&scope| self.variables.get_variable(name, scope, ctx))
            .ok_or_else(|| EvalError::VariableNotFound(name.to_string()))
    }

    /// Resolve an object by id, falling back to name lookup.
    pub fn resolve_object(
        &self,
        reference: &str,
        ctx: &VariableContext<'_>,
    ) -> Result<&'a ObjectData, EvalError> {
        let not_found = || EvalError::ObjectNotFound(reference.to_string());
        let id = match reference {
            SELF_REF => ctx.object_id.clone(),
            PARENT_REF => ctx.container_id.cloned().ok_or_else(not_found)?,
            _ => {
                let id = ObjectId::new(reference);
                if self.objects.get_object(&id).is_some() {
                    id
                } else {
                    self.objects
                        .find_object_id_by_name(reference)
                        .ok_or_else(not_found)?
                }
            }
        };
        self.objects.get_object(&id).ok_or_else(not_found)
    }

    /// Resolve `reference.path` to a leaf value.
    pub fn resolve_property(
        &self,
        reference: &str,
        path: &[String],
        ctx: &VariableContext<'_>,
    ) -> Result<Value, EvalError> {
        let object = self.resolve_object(reference, ctx)?;
        self.objects
            .get_property(object, path)
            .ok_or_else(|| EvalError::PropertyNotFound {
                object: reference.to_string(),
                path: path.join("."),
            })
    }
}
