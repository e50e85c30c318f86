//! Integration tests for the dependency graph and the scheduler.
//!
//! Drives formwork-propagation through a logging applier and through
//! submission handles used from other threads.

use std::collections::BTreeMap;
use std::thread;

use formwork_core::{Bounds, EntityRef, ObjectId, PropagationConfig, Value};
use formwork_propagation::{
    ApplyError, ChangePayload, DependencyEdge, EdgeKind, PropagationEngine, Priority,
    UpdateApplier, UpdateKind, UpdateOutcome, UpdateRequest,
};

// ── Helpers ────────────────────────────────────────────────────

#[derive(Default)]
struct Log {
    order: Vec<(EntityRef, UpdateKind)>,
    triggers: Vec<Option<Value>>,
}

impl UpdateApplier for Log {
    fn apply(&mut self, request: &UpdateRequest) -> Result<UpdateOutcome, ApplyError> {
        self.order.push((request.target.clone(), request.kind));
        if let ChangePayload::Recompute { trigger_value, .. } = &request.payload {
            self.triggers.push(trigger_value.clone());
        }
        Ok(UpdateOutcome::value(Value::Number(self.order.len() as f64)))
    }

    fn apply_parent_bounds(
        &mut self,
        _parent: &ObjectId,
        _children: &BTreeMap<ObjectId, Bounds>,
    ) -> Result<(), ApplyError> {
        Ok(())
    }
}

fn e(name: &str) -> EntityRef {
    EntityRef::new(name, "w")
}

fn edge() -> DependencyEdge {
    DependencyEdge {
        kind: EdgeKind::ObjectRef,
        metadata: None,
    }
}

fn link(engine: &mut PropagationEngine, producer: &str, consumer: &str) {
    engine
        .add_dependency(e(producer), e(consumer), EdgeKind::ObjectRef, None)
        .unwrap();
}

fn touch(engine: &mut PropagationEngine, name: &str, priority: Priority) {
    engine
        .propagate_change(
            &ObjectId::new(name),
            UpdateKind::PropertyChange,
            ChangePayload::Property {
                property: "w".into(),
                value: Some(Value::Number(1.0)),
            },
            priority,
        )
        .unwrap();
}

fn snapshot(engine: &PropagationEngine) -> Vec<(EntityRef, EntityRef, DependencyEdge)> {
    engine
        .graph()
        .edges()
        .map(|(p, c, d)| (p.clone(), c.clone(), d.clone()))
        .collect()
}

fn targets(log: &Log) -> Vec<EntityRef> {
    log.order.iter().map(|(t, _)| t.clone()).collect()
}

// ── Cycle rejection ────────────────────────────────────────────

#[test]
fn closing_a_cycle_is_rejected_without_side_effects() {
    let mut engine = PropagationEngine::default();
    link(&mut engine, "a", "b");
    link(&mut engine, "b", "c");
    let before = snapshot(&engine);

    let err = engine
        .add_dependency(e("c"), e("a"), EdgeKind::ObjectRef, None)
        .unwrap_err();
    assert_eq!(err.producer, e("c"));
    assert_eq!(err.consumer, e("a"));
    assert_eq!(snapshot(&engine), before);
    assert_eq!(engine.graph().get_downstream(&e("a")), vec![e("b"), e("c")]);
}

#[test]
fn self_dependency_is_rejected() {
    let mut engine = PropagationEngine::default();
    assert!(engine
        .add_dependency(e("a"), e("a"), EdgeKind::ObjectRef, None)
        .is_err());
    assert!(engine.graph().is_empty());
}

#[test]
fn replacing_edges_with_a_cycle_restores_old_edges() {
    let mut engine = PropagationEngine::default();
    link(&mut engine, "a", "b");
    link(&mut engine, "x", "a");
    let before = snapshot(&engine);

    let result = engine.replace_dependencies(&e("a"), vec![(e("y"), edge()), (e("b"), edge())]);
    assert!(result.is_err());
    assert_eq!(snapshot(&engine), before);
}

// ── Topological cascade ────────────────────────────────────────

#[test]
fn diamond_sink_applies_once_after_both_sides() {
    let mut engine = PropagationEngine::default();
    link(&mut engine, "a", "b");
    link(&mut engine, "a", "c");
    link(&mut engine, "b", "d");
    link(&mut engine, "c", "d");
    touch(&mut engine, "a", Priority::Normal);

    let mut log = Log::default();
    let report = engine.drain(&mut log);
    assert!(report.is_clean());
    let order = targets(&log);
    assert_eq!(order.iter().filter(|t| **t == e("d")).count(), 1);
    let pos = |name: &str| order.iter().position(|t| *t == e(name)).unwrap();
    assert!(pos("d") > pos("b"));
    assert!(pos("d") > pos("c"));
    assert_eq!(pos("a"), 0);
    assert!(report.applied.iter().all(|u| u.root == report.applied[0].request));
}

#[test]
fn long_chain_carries_trigger_values() {
    let mut engine = PropagationEngine::default();
    for pair in ["a", "b", "c", "d", "e"].windows(2) {
        link(&mut engine, pair[0], pair[1]);
    }
    touch(&mut engine, "a", Priority::High);
    let mut log = Log::default();
    engine.drain(&mut log);
    assert_eq!(targets(&log), vec![e("a"), e("b"), e("c"), e("d"), e("e")]);
    // Each recompute sees the value its producer produced.
    assert_eq!(
        log.triggers,
        vec![
            Some(Value::Number(1.0)),
            Some(Value::Number(2.0)),
            Some(Value::Number(3.0)),
            Some(Value::Number(4.0)),
        ]
    );
}

// ── Priority ───────────────────────────────────────────────────

#[test]
fn bands_drain_in_priority_order() {
    let mut engine = PropagationEngine::default();
    touch(&mut engine, "normal", Priority::Normal);
    touch(&mut engine, "immediate", Priority::Immediate);
    touch(&mut engine, "low", Priority::Low);
    let mut log = Log::default();
    engine.drain(&mut log);
    assert_eq!(targets(&log), vec![e("immediate"), e("normal"), e("low")]);
}

#[test]
fn all_five_bands_fifo_within_band() {
    let mut engine = PropagationEngine::default();
    touch(&mut engine, "b1", Priority::Batch);
    touch(&mut engine, "l1", Priority::Low);
    touch(&mut engine, "n1", Priority::Normal);
    touch(&mut engine, "h1", Priority::High);
    touch(&mut engine, "n2", Priority::Normal);
    touch(&mut engine, "i1", Priority::Immediate);
    let mut log = Log::default();
    engine.drain(&mut log);
    assert_eq!(
        targets(&log),
        vec![e("i1"), e("h1"), e("n1"), e("n2"), e("l1"), e("b1")]
    );
}

#[test]
fn drain_limit_leaves_work_for_next_pass() {
    let mut engine = PropagationEngine::new(PropagationConfig {
        max_requests_per_drain: 2,
        ..Default::default()
    });
    for name in ["a", "b", "c"] {
        touch(&mut engine, name, Priority::Normal);
    }
    let mut log = Log::default();
    assert_eq!(engine.drain(&mut log).remaining, 1);
    assert_eq!(engine.drain(&mut log).remaining, 0);
    assert_eq!(log.order.len(), 3);
}

// ── Handles ────────────────────────────────────────────────────

#[test]
fn handles_submit_from_other_threads() {
    let mut engine = PropagationEngine::default();
    link(&mut engine, "src", "dst");
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let handle = engine.handle();
            thread::spawn(move || {
                let object = if i == 0 { "src".to_string() } else { format!("w{i}") };
                handle
                    .submit(
                        &ObjectId::new(object),
                        UpdateKind::PropertyChange,
                        ChangePayload::Property {
                            property: "w".into(),
                            value: None,
                        },
                        Priority::Normal,
                    )
                    .unwrap()
            })
        })
        .collect();
    let mut ids: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert_eq!(engine.pending(), 4);

    let mut log = Log::default();
    let report = engine.drain(&mut log);
    assert_eq!(report.applied.len(), 5);
    assert!(targets(&log).contains(&e("dst")));
    assert!(engine.is_idle());
}

#[test]
fn handle_rejects_recompute_and_bad_payloads() {
    let engine = PropagationEngine::default();
    let handle = engine.handle();
    let object = ObjectId::new("a");
    let layout = ChangePayload::Layout {
        config: "grid".into(),
    };
    assert!(handle
        .submit(&object, UpdateKind::SizeChange, layout, Priority::Normal)
        .is_err());
    assert!(handle
        .submit(&object, UpdateKind::Recompute, ChangePayload::None, Priority::Normal)
        .is_err());
    assert_eq!(handle.pending(), 0);
}
