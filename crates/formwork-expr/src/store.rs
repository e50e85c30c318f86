//! In-memory object and variable stores.
//!
//! Hosts are free to back the resolver traits with their own scene graph;
//! these tables are the reference implementation used by the orchestrator's
//! memory scene and by tests.

use std::collections::{BTreeMap, HashMap};

use formwork_core::{ObjectId, Value};
use thiserror::Error;

use crate::resolver::{ObjectData, ObjectStore, VariableContext, VariableScope, VariableStore};

/// Object table with a container → children index.
#[derive(Debug, Default, Clone)]
pub struct ObjectTable {
    objects: BTreeMap<ObjectId, ObjectData>,
    /// Children per container, in insertion order.
    children: HashMap<ObjectId, Vec<ObjectId>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object, keeping the child index in sync.
    pub fn insert(&mut self, object: ObjectData) {
        let id = object.id.clone();
        let new_container = object.container.clone();
        if let Some(old) = self.objects.insert(id.clone(), object) {
            if old.container == new_container {
                return;
            }
            if let Some(old_parent) = old.container {
                self.detach(&old_parent, &id);
            }
        }
        if let Some(parent) = new_container {
            self.children.entry(parent).or_default().push(id);
        }
    }

    /// Remove an object. Its children keep their (now dangling) container id.
    pub fn remove(&mut self, id: &ObjectId) -> Option<ObjectData> {
        let removed = self.objects.remove(id)?;
        if let Some(parent) = &removed.container {
            self.detach(parent, id);
        }
        Some(removed)
    }

    /// Move an object into another container (or to the root).
    pub fn reparent(&mut self, id: &ObjectId, container: Option<ObjectId>) -> bool {
        let Some(object) = self.objects.get(id) else {
            return false;
        };
        let mut object = object.clone();
        object.container = container;
        self.insert(object);
        true
    }

    /// Set a property by dotted path. Returns false if the object is unknown.
    pub fn set_property(&mut self, id: &ObjectId, path: &str, value: Value) -> bool {
        match self.objects.get_mut(id) {
            Some(object) => {
                object.set_property(path, value);
                true
            }
            None => false,
        }
    }

    fn detach(&mut self, parent: &ObjectId, child: &ObjectId) {
        if let Some(list) = self.children.get_mut(parent) {
            list.retain(|c| c != child);
            if list.is_empty() {
                self.children.remove(parent);
            }
        }
    }
}

impl ObjectStore for ObjectTable {
    fn get_object(&self, id: &ObjectId) -> Option<&ObjectData> {
        self.objects.get(id)
    }

    fn find_object_id_by_name(&self, name: &str) -> Option<ObjectId> {
        self.objects
            .values()
            .find(|o| o.name == name)
            .map(|o| o.id.clone())
    }

    fn children_of(&self, container: &ObjectId) -> Vec<ObjectId> {
        self.children.get(container).cloned().unwrap_or_default()
    }
}

/// Variable table errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariableError {
    #[error("variable ${name} already defined in {scope} scope")]
    AlreadyDefined { name: String, scope: VariableScope },
    #[error("variable ${name} not defined in {scope} scope")]
    NotDefined { name: String, scope: VariableScope },
    #[error("{scope} scope variables need a context id")]
    MissingContext { scope: VariableScope },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VariableKey {
    scope: VariableScope,
    context: Option<ObjectId>,
    name: String,
}

/// Variables keyed by (scope, context id, name) with explicit lifecycle.
#[derive(Debug, Default, Clone)]
pub struct VariableTable {
    slots: HashMap<VariableKey, Value>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
    ) -> Result<VariableKey, VariableError> {
        let context = match scope {
            VariableScope::Global => None,
            _ => Some(
                context
                    .cloned()
                    .ok_or(VariableError::MissingContext { scope })?,
            ),
        };
        Ok(VariableKey {
            scope,
            context,
            name: name.to_string(),
        })
    }

    /// Create a new variable. Fails if the slot already exists.
    pub fn define(
        &mut self,
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
        value: Value,
    ) -> Result<(), VariableError> {
        let key = Self::key(name, scope, context)?;
        if self.slots.contains_key(&key) {
            return Err(VariableError::AlreadyDefined {
                name: name.to_string(),
                scope,
            });
        }
        self.slots.insert(key, value);
        Ok(())
    }

    /// Replace an existing variable's value, returning the old one.
    pub fn update(
        &mut self,
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
        value: Value,
    ) -> Result<Value, VariableError> {
        let key = Self::key(name, scope, context)?;
        match self.slots.get_mut(&key) {
            Some(slot) => Ok(std::mem::replace(slot, value)),
            None => Err(VariableError::NotDefined {
                name: name.to_string(),
                scope,
            }),
        }
    }

    /// Delete a variable, returning its last value.
    pub fn delete(
        &mut self,
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
    ) -> Result<Value, VariableError> {
        let key = Self::key(name, scope, context)?;
        self.slots.remove(&key).ok_or(VariableError::NotDefined {
            name: name.to_string(),
            scope,
        })
    }

    /// Drop every variable whose context is `owner` (object deleted).
    pub fn remove_context(&mut self, owner: &ObjectId) -> usize {
        let before = self.slots.len();
        self.slots.retain(|k, _| k.context.as_ref() != Some(owner));
        before - self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl VariableStore for VariableTable {
    fn get_variable(
        &self,
        name: &str,
        scope: VariableScope,
        ctx: &VariableContext<'_>,
    ) -> Option<Value> {
        let context = match scope {
            VariableScope::Global => None,
            _ => Some(ctx.context_for(scope)?.clone()),
        };
        self.slots
            .get(&VariableKey {
                scope,
                context,
                name: name.to_string(),
            })
            .cloned()
    }

    fn set_variable(
        &mut self,
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
        value: Value,
    ) -> Result<(), VariableError> {
        let key = Self::key(name, scope, context)?;
        self.slots.insert(key, value);
        Ok(())
    }
}
