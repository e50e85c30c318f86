//! Function Registry: named operations with declared arity.
//!
//! Each engine owns its registry; there is no process-wide table. The
//! built-in set comes from [`FunctionRegistry::with_builtins`], and hosts or
//! test harnesses may register extra entries (for instance instrumented
//! stubs) on their own instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use formwork_core::{ObjectId, Value};

use crate::cache::{ContainerQuery, DerivedCache, QueryKey};
use crate::context::Deadline;
use crate::error::FunctionError;
use crate::resolver::{ObjectData, ObjectStore};

/// Native function body.
pub type FunctionBody =
    Arc<dyn Fn(&CallContext<'_>, &[Value]) -> Result<Value, FunctionError> + Send + Sync>;

/// A dependency a function call carries even though it names no reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicitDependency {
    /// A property of the evaluating object's container.
    Container(&'static str),
    /// A property of the evaluating object itself.
    Own(&'static str),
}

/// How a call's arguments are evaluated.
#[derive(Clone)]
pub enum FunctionKind {
    /// All arguments evaluated left to right, then the body runs.
    Eager(FunctionBody),
    /// `(condition, then, else)`: only the chosen branch is evaluated.
    Select,
}

/// A registry entry.
#[derive(Clone)]
pub struct FunctionDef {
    pub name: String,
    pub min_args: usize,
    pub max_args: usize,
    pub implicit: Option<ImplicitDependency>,
    pub kind: FunctionKind,
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("implicit", &self.implicit)
            .finish_non_exhaustive()
    }
}

impl FunctionDef {
    pub fn new(
        name: impl Into<String>,
        min_args: usize,
        max_args: usize,
        body: impl Fn(&CallContext<'_>, &[Value]) -> Result<Value, FunctionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            min_args,
            max_args,
            implicit: None,
            kind: FunctionKind::Eager(Arc::new(body)),
        }
    }

    /// A lazy three-way select (`if`).
    pub fn select(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_args: 3,
            max_args: 3,
            implicit: None,
            kind: FunctionKind::Select,
        }
    }

    pub fn with_implicit(mut self, dependency: ImplicitDependency) -> Self {
        self.implicit = Some(dependency);
        self
    }

    /// Whether `count` arguments satisfy the declared arity.
    pub fn accepts(&self, count: usize) -> bool {
        (self.min_args..=self.max_args).contains(&count)
    }
}

/// Table of callable functions.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDef>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in function set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtins::register_builtins(&mut registry);
        registry
    }

    /// Add or replace an entry. Returns the replaced entry.
    pub fn register(&mut self, def: FunctionDef) -> Option<FunctionDef> {
        self.functions.insert(def.name.clone(), def)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// All function names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// What a function body may see while it runs.
pub struct CallContext<'a> {
    pub object_id: &'a ObjectId,
    pub container_id: Option<&'a ObjectId>,
    pub objects: &'a dyn ObjectStore,
    pub deadline: &'a Deadline,
    pub derived: Option<&'a DerivedCache>,
    /// Upper bound on objects a query may visit.
    pub max_query_objects: usize,
}

impl<'a> CallContext<'a> {
    /// Cooperative cancellation check for long-running bodies.
    pub fn is_cancelled(&self) -> bool {
        self.deadline.expired()
    }

    /// The evaluating object's container.
    pub fn container(&self) -> Result<&'a ObjectData, FunctionError> {
        let id = self
            .container_id
            .ok_or_else(|| FunctionError::new("object has no container"))?;
        self.objects
            .get_object(id)
            .ok_or_else(|| FunctionError::new(format!("container {id} not found")))
    }

    /// Children of `container`, refusing sets larger than the query bound.
    pub fn children(&self, container: &ObjectId) -> Result<Vec<ObjectId>, FunctionError> {
        let children = self.objects.children_of(container);
        if children.len() > self.max_query_objects {
            return Err(FunctionError::new(format!(
                "{} has {} children, above the query limit of {}",
                container,
                children.len(),
                self.max_query_objects
            )));
        }
        Ok(children)
    }

    /// Run `compute` through the derived cache, if one is attached.
    pub fn cached(
        &self,
        container: &ObjectId,
        query: ContainerQuery,
        subject: Option<&ObjectId>,
        compute: impl FnOnce() -> Result<Value, FunctionError>,
    ) -> Result<Value, FunctionError> {
        let Some(cache) = self.derived else {
            return compute();
        };
        let key = QueryKey {
            container: container.clone(),
            query,
            subject: subject.cloned(),
        };
        if let Some(hit) = cache.get(&key) {
            return Ok(hit);
        }
        let value = compute()?;
        cache.insert(key, value.clone());
        Ok(value)
    }
}
