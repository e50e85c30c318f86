//! Propagation engine: schedules changes, drains them through the scene
//! layer and generates cascades.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use formwork_core::{Bounds, EntityRef, ObjectId, PropagationConfig, Value};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::batch::BoundsBatch;
use crate::error::{ApplyError, CycleError, PropagationError};
use crate::graph::{DependencyEdge, DependencyGraph, EdgeKind};
use crate::queue::UpdateQueue;
use crate::request::{
    ChangePayload, Priority, RequestId, RequestState, UpdateFailure, UpdateKind, UpdateOutcome,
    UpdateRequest,
};

/// The scene-layer side of a drain.
pub trait UpdateApplier {
    /// Execute one request against its target.
    fn apply(&mut self, request: &UpdateRequest) -> Result<UpdateOutcome, ApplyError>;

    /// Recalculate `parent` from the latest bounds of the listed children.
    /// Children not listed keep their current bounds.
    fn apply_parent_bounds(
        &mut self,
        parent: &ObjectId,
        children: &BTreeMap<ObjectId, Bounds>,
    ) -> Result<(), ApplyError>;
}

/// A request that applied during a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedUpdate {
    pub request: RequestId,
    pub root: RequestId,
    pub target: EntityRef,
}

/// What one drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Applied requests, in execution order.
    pub applied: Vec<AppliedUpdate>,
    pub failed: Vec<UpdateFailure>,
    /// Requests replaced by newer changes since the previous drain.
    pub superseded: Vec<RequestId>,
    /// Parent bounds recalculations performed.
    pub bounds_flushed: usize,
    pub bounds_failed: Vec<(ObjectId, ApplyError)>,
    /// Requests left for the next drain.
    pub remaining: usize,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.bounds_failed.is_empty()
    }

    /// Targets applied, in execution order.
    pub fn applied_targets(&self) -> impl Iterator<Item = &EntityRef> {
        self.applied.iter().map(|a| &a.target)
    }
}

/// A change submitted through a [`PropagationHandle`].
#[derive(Debug, Clone)]
struct Submission {
    id: RequestId,
    target: EntityRef,
    kind: UpdateKind,
    payload: ChangePayload,
    priority: Priority,
}

/// Cloneable handle for submitting changes, including while a drain runs.
/// Submissions are picked up before the next request is served.
#[derive(Clone)]
pub struct PropagationHandle {
    inbox: Arc<Mutex<Vec<Submission>>>,
    next_id: Arc<AtomicU64>,
}

impl PropagationHandle {
    pub fn submit(
        &self,
        object: &ObjectId,
        kind: UpdateKind,
        payload: ChangePayload,
        priority: Priority,
    ) -> Result<RequestId, PropagationError> {
        if kind == UpdateKind::Recompute {
            return Err(PropagationError::UnknownUpdateKind(kind.as_str().to_string()));
        }
        let target = kind.root_target(object, &payload)?;
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inbox.lock().push(Submission {
            id,
            target,
            kind,
            payload,
            priority,
        });
        Ok(id)
    }

    /// Submissions not yet picked up.
    pub fn pending(&self) -> usize {
        self.inbox.lock().len()
    }
}

pub struct PropagationEngine {
    graph: DependencyGraph,
    queue: UpdateQueue,
    bounds: BoundsBatch,
    config: PropagationConfig,
    superseded: Vec<RequestId>,
    inbox: Arc<Mutex<Vec<Submission>>>,
    next_id: Arc<AtomicU64>,
}

impl PropagationEngine {
    pub fn new(config: PropagationConfig) -> Self {
        Self {
            graph: DependencyGraph::new(),
            queue: UpdateQueue::new(),
            bounds: BoundsBatch::new(),
            config,
            superseded: Vec::new(),
            inbox: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn handle(&self) -> PropagationHandle {
        PropagationHandle {
            inbox: Arc::clone(&self.inbox),
            next_id: Arc::clone(&self.next_id),
        }
    }

    pub fn add_dependency(
        &mut self,
        producer: EntityRef,
        consumer: EntityRef,
        kind: EdgeKind,
        metadata: Option<String>,
    ) -> Result<(), CycleError> {
        self.graph.add_dependency(producer, consumer, kind, metadata)
    }

    pub fn remove_dependencies_by_consumer(
        &mut self,
        consumer: &EntityRef,
    ) -> Vec<(EntityRef, DependencyEdge)> {
        self.graph.remove_dependencies_by_consumer(consumer)
    }

    /// Replace every edge into `consumer` with `producers`, all or nothing.
    /// On a cycle the previous edges are restored.
    pub fn replace_dependencies(
        &mut self,
        consumer: &EntityRef,
        producers: Vec<(EntityRef, DependencyEdge)>,
    ) -> Result<(), CycleError> {
        let previous = self.graph.remove_dependencies_by_consumer(consumer);
        for (producer, edge) in producers {
            if let Err(err) =
                self.graph
                    .add_dependency(producer, consumer.clone(), edge.kind, edge.metadata)
            {
                self.graph.remove_dependencies_by_consumer(consumer);
                for (producer, edge) in previous {
                    // These edges coexisted before, so they cannot cycle now.
                    let _ = self.graph.add_dependency(
                        producer,
                        consumer.clone(),
                        edge.kind,
                        edge.metadata,
                    );
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drop every edge touching `object`.
    pub fn remove_object(&mut self, object: &ObjectId) -> usize {
        self.graph.remove_object(object)
    }

    /// Schedule a change to `object`, then one recompute for every transitive
    /// consumer of the entities it affects, in topological order.
    pub fn propagate_change(
        &mut self,
        object: &ObjectId,
        kind: UpdateKind,
        payload: ChangePayload,
        priority: Priority,
    ) -> Result<RequestId, PropagationError> {
        if kind == UpdateKind::Recompute {
            return Err(PropagationError::UnknownUpdateKind(kind.as_str().to_string()));
        }
        let target = kind.root_target(object, &payload)?;
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.schedule(id, target, kind, payload, priority);
        Ok(id)
    }

    fn schedule(
        &mut self,
        id: RequestId,
        target: EntityRef,
        kind: UpdateKind,
        payload: ChangePayload,
        priority: Priority,
    ) {
        let request = UpdateRequest::new(id, id, target, kind, payload, priority);
        let downstream = self.graph.get_downstream_all(&request.affected_entities());
        debug!(
            request = %id,
            target = %request.target,
            %kind,
            %priority,
            downstream = downstream.len(),
            "change scheduled"
        );
        let trigger = request.target.clone();
        if let Some(old) = self.queue.push(request) {
            debug!(request = %old.id, by = %id, target = %trigger, "request superseded");
            self.superseded.push(old.id);
        }
        for consumer in downstream {
            self.enqueue_recompute(consumer, trigger.clone(), None, priority, id);
        }
    }

    fn enqueue_recompute(
        &mut self,
        target: EntityRef,
        trigger: EntityRef,
        trigger_value: Option<Value>,
        priority: Priority,
        root: RequestId,
    ) {
        let payload = ChangePayload::Recompute {
            property: target.property.clone(),
            trigger,
            trigger_value,
        };
        if self.queue.merge(&target, priority, payload.clone()).is_some() {
            return;
        }
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // Nothing is pending for the target once merge declined.
        let _ = self.queue.push(UpdateRequest::new(
            id,
            root,
            target,
            UpdateKind::Recompute,
            payload,
            priority,
        ));
    }

    fn pull_inbox(&mut self) {
        let submissions = std::mem::take(&mut *self.inbox.lock());
        for s in submissions {
            self.schedule(s.id, s.target, s.kind, s.payload, s.priority);
        }
    }

    /// Requests waiting, including unread handle submissions.
    pub fn pending(&self) -> usize {
        self.queue.len() + self.inbox.lock().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// The waiting request for `target`, if any.
    pub fn pending_for(&self, target: &EntityRef) -> Option<&UpdateRequest> {
        self.queue.pending_for(target)
    }

    /// One scheduling pass: serve queued requests in priority order until the
    /// queue is empty or the per-drain limit is reached, then flush coalesced
    /// parent bounds. A failing request is recorded and skipped.
    pub fn drain(&mut self, applier: &mut dyn UpdateApplier) -> DrainReport {
        let mut report = DrainReport::default();
        let mut served = 0;

        loop {
            self.pull_inbox();
            if served >= self.config.max_requests_per_drain {
                break;
            }
            let Some(mut request) = self.queue.pop() else {
                break;
            };
            served += 1;
            request.state = RequestState::Processing;

            match applier.apply(&request) {
                Ok(outcome) => {
                    request.state = RequestState::Applied;
                    self.cascade(&request, &outcome);
                    if let Some(contribution) = outcome.bounds {
                        if self.config.coalesce_bounds {
                            self.bounds.add(contribution);
                        } else {
                            let children =
                                BTreeMap::from([(contribution.child, contribution.bounds)]);
                            self.flush_parent(
                                applier,
                                &contribution.parent,
                                &children,
                                &mut report,
                            );
                        }
                    }
                    report.applied.push(AppliedUpdate {
                        request: request.id,
                        root: request.root,
                        target: request.target,
                    });
                }
                Err(err) => {
                    request.state = RequestState::Failed;
                    warn!(
                        request = %request.id,
                        root = %request.root,
                        target = %request.target,
                        error = %err,
                        "update failed"
                    );
                    report.failed.push(UpdateFailure {
                        request: request.id,
                        root: request.root,
                        target: request.target,
                        reason: err.to_string(),
                    });
                }
            }
        }

        for (parent, children) in self.bounds.take() {
            self.flush_parent(applier, &parent, &children, &mut report);
        }

        report.superseded = std::mem::take(&mut self.superseded);
        report.remaining = self.queue.len();
        if !report.applied.is_empty() || !report.failed.is_empty() {
            info!(
                applied = report.applied.len(),
                failed = report.failed.len(),
                superseded = report.superseded.len(),
                bounds = report.bounds_flushed,
                remaining = report.remaining,
                "drain complete"
            );
        }
        report
    }

    fn cascade(&mut self, request: &UpdateRequest, outcome: &UpdateOutcome) {
        for producer in request.affected_entities() {
            let consumers: Vec<EntityRef> = self.graph.dependents(&producer).cloned().collect();
            for consumer in consumers {
                self.enqueue_recompute(
                    consumer,
                    producer.clone(),
                    outcome.value.clone(),
                    request.priority,
                    request.root,
                );
            }
        }
    }

    fn flush_parent(
        &mut self,
        applier: &mut dyn UpdateApplier,
        parent: &ObjectId,
        children: &BTreeMap<ObjectId, Bounds>,
        report: &mut DrainReport,
    ) {
        match applier.apply_parent_bounds(parent, children) {
            Ok(()) => {
                debug!(%parent, children = children.len(), "parent bounds recalculated");
                report.bounds_flushed += 1;
            }
            Err(err) => {
                warn!(%parent, error = %err, "parent bounds recalculation failed");
                report.bounds_failed.push((parent.clone(), err));
            }
        }
    }
}

impl Default for PropagationEngine {
    fn default() -> Self {
        Self::new(PropagationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use glam::DVec3;

    use super::*;

    /// Records what it applies; fails for listed objects.
    #[derive(Default)]
    struct Recorder {
        applied: Vec<EntityRef>,
        failing: BTreeSet<ObjectId>,
        parents: BTreeMap<ObjectId, Bounds>,
        children: BTreeMap<ObjectId, BTreeMap<ObjectId, Bounds>>,
        bounds_calls: usize,
        on_apply: Option<Box<dyn FnMut(&UpdateRequest)>>,
    }

    impl UpdateApplier for Recorder {
        fn apply(&mut self, request: &UpdateRequest) -> Result<UpdateOutcome, ApplyError> {
            if let Some(hook) = self.on_apply.as_mut() {
                hook(request);
            }
            if self.failing.contains(&request.target.object) {
                return Err(ApplyError::ObjectNotFound(request.target.object.clone()));
            }
            self.applied.push(request.target.clone());
            let mut outcome = UpdateOutcome::value(Value::Number(self.applied.len() as f64));
            if let ChangePayload::Size { width, height, depth } = request.payload {
                outcome = outcome.with_bounds(
                    ObjectId::new("parent"),
                    request.target.object.clone(),
                    Bounds::from_origin_size(DVec3::ZERO, DVec3::new(width, height, depth)),
                );
            }
            Ok(outcome)
        }

        fn apply_parent_bounds(
            &mut self,
            parent: &ObjectId,
            children: &BTreeMap<ObjectId, Bounds>,
        ) -> Result<(), ApplyError> {
            self.bounds_calls += 1;
            let known = self.children.entry(parent.clone()).or_default();
            known.extend(children.iter().map(|(k, v)| (k.clone(), *v)));
            self.parents
                .insert(parent.clone(), Bounds::union_all(known.values().copied()));
            Ok(())
        }
    }

    fn v(name: &str) -> EntityRef {
        EntityRef::new(name, "value")
    }

    fn change(engine: &mut PropagationEngine, name: &str, priority: Priority) -> RequestId {
        engine
            .propagate_change(
                &ObjectId::new(name),
                UpdateKind::PropertyChange,
                ChangePayload::Property {
                    property: "value".into(),
                    value: None,
                },
                priority,
            )
            .unwrap()
    }

    fn link(engine: &mut PropagationEngine, p: &str, c: &str) {
        engine
            .add_dependency(v(p), v(c), EdgeKind::ObjectRef, None)
            .unwrap();
    }

    #[test]
    fn test_diamond_updates_sink_once_after_both_sides() {
        let mut engine = PropagationEngine::default();
        link(&mut engine, "a", "b");
        link(&mut engine, "a", "c");
        link(&mut engine, "b", "d");
        link(&mut engine, "c", "d");
        change(&mut engine, "a", Priority::Normal);
        let mut recorder = Recorder::default();
        let report = engine.drain(&mut recorder);
        assert!(report.is_clean());
        assert_eq!(recorder.applied, vec![v("a"), v("b"), v("c"), v("d")]);
        assert_eq!(report.remaining, 0);
    }

    #[test]
    fn test_priority_ordering_across_targets() {
        let mut engine = PropagationEngine::default();
        change(&mut engine, "n", Priority::Normal);
        change(&mut engine, "i", Priority::Immediate);
        change(&mut engine, "l", Priority::Low);
        let mut recorder = Recorder::default();
        engine.drain(&mut recorder);
        assert_eq!(recorder.applied, vec![v("i"), v("n"), v("l")]);
    }

    #[test]
    fn test_newer_change_supersedes_pending() {
        let mut engine = PropagationEngine::default();
        let first = change(&mut engine, "a", Priority::Normal);
        let second = change(&mut engine, "a", Priority::Normal);
        let mut recorder = Recorder::default();
        let report = engine.drain(&mut recorder);
        assert_eq!(report.superseded, vec![first]);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].request, second);
    }

    #[test]
    fn test_failure_is_isolated_and_reported() {
        let mut engine = PropagationEngine::default();
        link(&mut engine, "a", "b");
        link(&mut engine, "a", "c");
        let root = change(&mut engine, "a", Priority::Normal);
        let mut recorder = Recorder {
            failing: BTreeSet::from([ObjectId::new("b")]),
            ..Default::default()
        };
        let report = engine.drain(&mut recorder);
        assert_eq!(recorder.applied, vec![v("a"), v("c")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].target, v("b"));
        assert_eq!(report.failed[0].root, root);
        assert!(report.failed[0].reason.contains("b"));
    }

    #[test]
    fn test_cascade_carries_trigger_value() {
        let mut engine = PropagationEngine::default();
        link(&mut engine, "a", "b");
        change(&mut engine, "a", Priority::Normal);
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = std::rc::Rc::clone(&seen);
        let mut recorder = Recorder {
            on_apply: Some(Box::new(move |r: &UpdateRequest| {
                sink.borrow_mut().push(r.payload.clone());
            })),
            ..Default::default()
        };
        engine.drain(&mut recorder);
        let seen = seen.borrow();
        assert_eq!(
            seen[1],
            ChangePayload::Recompute {
                property: "value".into(),
                trigger: v("a"),
                trigger_value: Some(Value::Number(1.0)),
            }
        );
    }

    #[test]
    fn test_handle_submission_preempts_lower_bands() {
        let mut engine = PropagationEngine::default();
        change(&mut engine, "n1", Priority::Normal);
        change(&mut engine, "n2", Priority::Normal);
        let handle = engine.handle();
        let mut fired = false;
        let mut recorder = Recorder {
            on_apply: Some(Box::new(move |r: &UpdateRequest| {
                if !fired && r.target == v("n1") {
                    fired = true;
                    handle
                        .submit(
                            &ObjectId::new("urgent"),
                            UpdateKind::PropertyChange,
                            ChangePayload::Property {
                                property: "value".into(),
                                value: None,
                            },
                            Priority::Immediate,
                        )
                        .unwrap();
                }
            })),
            ..Default::default()
        };
        engine.drain(&mut recorder);
        assert_eq!(recorder.applied, vec![v("n1"), v("urgent"), v("n2")]);
    }

    #[test]
    fn test_drain_limit_leaves_remaining() {
        let mut engine = PropagationEngine::new(PropagationConfig {
            max_requests_per_drain: 2,
            ..Default::default()
        });
        for name in ["a", "b", "c"] {
            change(&mut engine, name, Priority::Normal);
        }
        let mut recorder = Recorder::default();
        let report = engine.drain(&mut recorder);
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.remaining, 1);
        let report = engine.drain(&mut recorder);
        assert_eq!(report.applied.len(), 1);
        assert!(engine.is_idle());
    }

    #[test]
    fn test_unknown_kind_and_payload_mismatch() {
        let mut engine = PropagationEngine::default();
        assert!(matches!(
            engine.propagate_change(
                &ObjectId::new("a"),
                UpdateKind::Recompute,
                ChangePayload::None,
                Priority::Normal
            ),
            Err(PropagationError::UnknownUpdateKind(_))
        ));
        assert!(matches!(
            engine.propagate_change(
                &ObjectId::new("a"),
                UpdateKind::PropertyChange,
                ChangePayload::None,
                Priority::Normal
            ),
            Err(PropagationError::PayloadMismatch { .. })
        ));
        assert!(engine.is_idle());
    }

    #[test]
    fn test_size_change_reaches_dimension_consumers() {
        let mut engine = PropagationEngine::default();
        engine
            .add_dependency(
                EntityRef::new("box", "width"),
                EntityRef::new("shelf", "width"),
                EdgeKind::Implicit,
                None,
            )
            .unwrap();
        engine
            .propagate_change(
                &ObjectId::new("box"),
                UpdateKind::SizeChange,
                ChangePayload::None,
                Priority::Immediate,
            )
            .unwrap();
        let mut recorder = Recorder::default();
        engine.drain(&mut recorder);
        assert_eq!(
            recorder.applied,
            vec![EntityRef::new("box", "size"), EntityRef::new("shelf", "width")]
        );
    }

    fn resize(engine: &mut PropagationEngine, child: &str, width: f64) {
        engine
            .propagate_change(
                &ObjectId::new(child),
                UpdateKind::SizeChange,
                ChangePayload::Size {
                    width,
                    height: 1.0,
                    depth: 1.0,
                },
                Priority::Normal,
            )
            .unwrap();
    }

    #[test]
    fn test_bounds_coalescing_matches_individual_flushes() {
        let run = |coalesce: bool| {
            let mut engine = PropagationEngine::new(PropagationConfig {
                coalesce_bounds: coalesce,
                ..Default::default()
            });
            let mut recorder = Recorder::default();
            resize(&mut engine, "a", 5.0);
            resize(&mut engine, "b", 3.0);
            let report = engine.drain(&mut recorder);
            resize(&mut engine, "a", 2.0);
            engine.drain(&mut recorder);
            (report.bounds_flushed, recorder)
        };
        let (flushed_coalesced, coalesced) = run(true);
        let (flushed_individual, individual) = run(false);
        assert_eq!(flushed_coalesced, 1);
        assert_eq!(flushed_individual, 2);
        assert_eq!(coalesced.parents, individual.parents);
        let parent = coalesced.parents[&ObjectId::new("parent")];
        assert_eq!(parent.size().x, 3.0);
    }

    #[test]
    fn test_replace_dependencies_rolls_back_on_cycle() {
        let mut engine = PropagationEngine::default();
        link(&mut engine, "a", "b");
        link(&mut engine, "x", "c");
        let edge = || DependencyEdge {
            kind: EdgeKind::ObjectRef,
            metadata: None,
        };
        // b already depends on c through a.
        link(&mut engine, "c", "a");
        let result = engine.replace_dependencies(&v("c"), vec![(v("y"), edge()), (v("b"), edge())]);
        assert!(result.is_err());
        assert!(engine.graph().contains(&v("x"), &v("c")));
        assert!(!engine.graph().contains(&v("y"), &v("c")));
        assert_eq!(engine.graph().edge_count(), 3);
    }
}
