//! Coalescing of parent bounds recalculation.
//!
//! Child updates inside one drain report their new bounds here instead of
//! recalculating the parent each time. Each parent is flushed once at the end
//! of the drain with the latest bounds of every contributing child.

use std::collections::BTreeMap;

use formwork_core::{Bounds, ObjectId};

use crate::request::BoundsContribution;

/// Latest contributed child bounds, per parent.
#[derive(Debug, Default, Clone)]
pub struct BoundsBatch {
    parents: BTreeMap<ObjectId, BTreeMap<ObjectId, Bounds>>,
    contributions: usize,
}

impl BoundsBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a contribution. A later contribution for the same child wins.
    pub fn add(&mut self, contribution: BoundsContribution) {
        self.contributions += 1;
        self.parents
            .entry(contribution.parent)
            .or_default()
            .insert(contribution.child, contribution.bounds);
    }

    /// Number of parents waiting for a flush.
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Contributions received since the last take.
    pub fn contributions(&self) -> usize {
        self.contributions
    }

    /// Union of the contributed child bounds of `parent`.
    pub fn union_for(&self, parent: &ObjectId) -> Option<Bounds> {
        self.parents
            .get(parent)
            .map(|children| Bounds::union_all(children.values().copied()))
    }

    /// Take every pending parent, ordered by id.
    pub fn take(&mut self) -> BTreeMap<ObjectId, BTreeMap<ObjectId, Bounds>> {
        self.contributions = 0;
        std::mem::take(&mut self.parents)
    }
}
