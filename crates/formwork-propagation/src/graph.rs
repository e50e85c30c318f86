//! Dependency graph between entities.
//!
//! An edge `producer -> consumer` means the consumer must be recomputed when
//! the producer changes. The graph is kept acyclic: every insertion first
//! searches from the consumer back to the producer and is refused, with no
//! state change, if the producer is reachable.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use formwork_core::{EntityRef, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CycleError;

/// How a consumer refers to its producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// `Object.path` reference in a formula.
    ObjectRef,
    /// `$name` reference in a formula.
    Variable,
    /// Carried by a container-query or self-query function.
    Implicit,
}

/// Data attached to one edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub kind: EdgeKind,
    /// Free-form annotation, e.g. the reference as written in the formula.
    pub metadata: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    /// producer -> consumers
    dependents: BTreeMap<EntityRef, BTreeSet<EntityRef>>,
    /// consumer -> producers
    precedents: BTreeMap<EntityRef, BTreeSet<EntityRef>>,
    edges: BTreeMap<(EntityRef, EntityRef), DependencyEdge>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `producer -> consumer`. Re-inserting an existing edge replaces
    /// its data.
    pub fn add_dependency(
        &mut self,
        producer: EntityRef,
        consumer: EntityRef,
        kind: EdgeKind,
        metadata: Option<String>,
    ) -> Result<(), CycleError> {
        if producer == consumer || self.reaches(&consumer, &producer) {
            warn!(%producer, %consumer, "rejected cyclic dependency");
            return Err(CycleError { producer, consumer });
        }
        debug!(%producer, %consumer, ?kind, "dependency added");
        self.dependents
            .entry(producer.clone())
            .or_default()
            .insert(consumer.clone());
        self.precedents
            .entry(consumer.clone())
            .or_default()
            .insert(producer.clone());
        self.edges
            .insert((producer, consumer), DependencyEdge { kind, metadata });
        Ok(())
    }

    /// Remove one edge. Returns its data if it existed.
    pub fn remove_dependency(
        &mut self,
        producer: &EntityRef,
        consumer: &EntityRef,
    ) -> Option<DependencyEdge> {
        let edge = self.edges.remove(&(producer.clone(), consumer.clone()))?;
        detach(&mut self.dependents, producer, consumer);
        detach(&mut self.precedents, consumer, producer);
        Some(edge)
    }

    /// Remove every edge into `consumer`, returning them so a caller can
    /// restore them.
    pub fn remove_dependencies_by_consumer(
        &mut self,
        consumer: &EntityRef,
    ) -> Vec<(EntityRef, DependencyEdge)> {
        let Some(producers) = self.precedents.remove(consumer) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(producers.len());
        for producer in producers {
            detach(&mut self.dependents, &producer, consumer);
            if let Some(edge) = self.edges.remove(&(producer.clone(), consumer.clone())) {
                removed.push((producer, edge));
            }
        }
        if !removed.is_empty() {
            debug!(%consumer, count = removed.len(), "dependencies removed");
        }
        removed
    }

    /// Remove every edge touching an entity of `object`, on either side.
    /// Returns the number of edges removed.
    pub fn remove_object(&mut self, object: &ObjectId) -> usize {
        let doomed: Vec<(EntityRef, EntityRef)> = self
            .edges
            .keys()
            .filter(|(p, c)| &p.object == object || &c.object == object)
            .cloned()
            .collect();
        for (producer, consumer) in &doomed {
            self.remove_dependency(producer, consumer);
        }
        doomed.len()
    }

    /// Direct consumers of `producer`.
    pub fn dependents(&self, producer: &EntityRef) -> impl Iterator<Item = &EntityRef> {
        self.dependents.get(producer).into_iter().flatten()
    }

    /// Direct producers of `consumer`.
    pub fn precedents(&self, consumer: &EntityRef) -> impl Iterator<Item = &EntityRef> {
        self.precedents.get(consumer).into_iter().flatten()
    }

    pub fn edge(&self, producer: &EntityRef, consumer: &EntityRef) -> Option<&DependencyEdge> {
        self.edges.get(&(producer.clone(), consumer.clone()))
    }

    pub fn contains(&self, producer: &EntityRef, consumer: &EntityRef) -> bool {
        self.edge(producer, consumer).is_some()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All edges, ordered by (producer, consumer).
    pub fn edges(&self) -> impl Iterator<Item = (&EntityRef, &EntityRef, &DependencyEdge)> {
        self.edges.iter().map(|((p, c), e)| (p, c, e))
    }

    /// Whether `to` is reachable from `from` along producer -> consumer edges.
    pub fn reaches(&self, from: &EntityRef, to: &EntityRef) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if seen.insert(node) {
                stack.extend(self.dependents(node));
            }
        }
        false
    }

    /// Every transitive consumer of `producer`, in topological order.
    pub fn get_downstream(&self, producer: &EntityRef) -> Vec<EntityRef> {
        self.get_downstream_all(std::slice::from_ref(producer))
    }

    /// Every transitive consumer of any root, in topological order: a
    /// consumer comes after all of its producers that are in the set. Roots
    /// are excluded. Ties are broken by entity order.
    pub fn get_downstream_all(&self, roots: &[EntityRef]) -> Vec<EntityRef> {
        let root_set: BTreeSet<&EntityRef> = roots.iter().collect();
        let mut reached: BTreeSet<&EntityRef> = BTreeSet::new();
        let mut queue: VecDeque<&EntityRef> = roots.iter().collect();
        while let Some(node) = queue.pop_front() {
            for consumer in self.dependents(node) {
                if !root_set.contains(consumer) && reached.insert(consumer) {
                    queue.push_back(consumer);
                }
            }
        }

        // Kahn's algorithm over the reached subgraph.
        let mut in_degree: BTreeMap<&EntityRef, usize> = reached
            .iter()
            .map(|&node| {
                let deg = self
                    .precedents(node)
                    .filter(|p| reached.contains(p))
                    .count();
                (node, deg)
            })
            .collect();
        let mut ready: BTreeSet<&EntityRef> = in_degree
            .iter()
            .filter_map(|(&node, &deg)| (deg == 0).then_some(node))
            .collect();

        let mut order = Vec::with_capacity(reached.len());
        while let Some(node) = ready.pop_first() {
            order.push(node.clone());
            for consumer in self.dependents(node) {
                if let Some(deg) = in_degree.get_mut(consumer) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(consumer);
                    }
                }
            }
        }
        order
    }
}

fn detach(map: &mut BTreeMap<EntityRef, BTreeSet<EntityRef>>, key: &EntityRef, value: &EntityRef) {
    if let Some(set) = map.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            map.remove(key);
        }
    }
}
