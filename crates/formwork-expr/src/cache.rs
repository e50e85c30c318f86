//! Evaluation and derived-query caches.
//!
//! Both caches are short-lived accelerators for bursts of identical work,
//! such as a drag re-evaluating the same formula many times per second.

use std::time::Duration;

use formwork_core::{ObjectId, OwnedKey, TtlCache, Value};
use parking_lot::Mutex;

use crate::formula::FormulaId;

/// Key of a cached formula result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EvalKey {
    pub object: ObjectId,
    pub formula: FormulaId,
    pub container: Option<ObjectId>,
}

impl OwnedKey for EvalKey {
    fn owner(&self) -> &ObjectId {
        &self.object
    }
}

/// Derived calculations the container-query functions can cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerQuery {
    ChildCount,
    SiblingIndex,
}

/// Key of a cached container query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub container: ObjectId,
    pub query: ContainerQuery,
    /// The asking object, for per-object queries such as sibling index.
    pub subject: Option<ObjectId>,
}

impl OwnedKey for QueryKey {
    fn owner(&self) -> &ObjectId {
        &self.container
    }
}

/// A TTL cache shared behind a lock so readers holding `&self` can fill it.
pub struct SharedCache<K, V> {
    inner: Mutex<TtlCache<K, V>>,
}

impl<K, V> SharedCache<K, V>
where
    K: std::hash::Hash + Eq + Clone + OwnedKey,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TtlCache::new(ttl, capacity)),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.lock().get(key)
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.lock().insert(key, value);
    }

    pub fn invalidate_owner(&self, owner: &ObjectId) -> usize {
        self.inner.lock().invalidate_owner(owner)
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn stats(&self) -> (u64, u64) {
        self.inner.lock().stats()
    }
}

/// Cache of formula results.
pub type EvalCache = SharedCache<EvalKey, Value>;

/// Cache of container-query results.
pub type DerivedCache = SharedCache<QueryKey, Value>;
