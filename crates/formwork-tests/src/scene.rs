//! End-to-end tests for the property update path.
//!
//! Builds scenes in formwork-orchestrator's memory host and checks that
//! edits, variable changes and hierarchy changes settle to consistent values.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use formwork_core::{EngineConfig, EntityRef, ObjectId, PropagationConfig, Value};
use formwork_expr::{FunctionDef, ObjectData, VariableScope};
use formwork_orchestrator::{MemoryScene, Orchestrator, OrchestratorError, SceneHost};
use formwork_propagation::{ChangePayload, Priority};

// ── Helpers ────────────────────────────────────────────────────

fn id(s: &str) -> ObjectId {
    ObjectId::new(s)
}

fn number(o: &Orchestrator<MemoryScene>, object: &str, property: &str) -> f64 {
    o.property_value(&id(object), property)
        .and_then(|v| v.as_number())
        .unwrap()
}

fn cabinet(config: &EngineConfig) -> Orchestrator<MemoryScene> {
    let mut scene = MemoryScene::new();
    scene.insert_object(
        ObjectData::new("cab", "Cabinet")
            .with_property("width", 100.0)
            .with_property("height", 60.0)
            .with_property("depth", 40.0),
    );
    for (i, name) in ["Left", "Right"].iter().enumerate() {
        scene.insert_object(
            ObjectData::new(format!("door{i}"), *name)
                .with_container("cab")
                .with_property("height", 10.0),
        );
    }
    Orchestrator::new(scene, config)
}

fn size(width: f64, height: f64, depth: f64) -> ChangePayload {
    ChangePayload::Size {
        width,
        height,
        depth,
    }
}

// ── Diamond through formulas ───────────────────────────────────

#[test]
fn diamond_formula_evaluates_sink_once() {
    let mut o = cabinet(&EngineConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    o.expressions_mut()
        .registry_mut()
        .register(FunctionDef::new("probe", 1, 1, move |_, args| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(args[0].clone())
        }));

    o.set_property_formula(&id("door0"), "b", "cab.width + 1").unwrap();
    o.set_property_formula(&id("door0"), "c", "cab.width * 2").unwrap();
    o.set_property_formula(&id("door0"), "d", "probe(door0.b + door0.c)")
        .unwrap();
    assert_eq!(number(&o, "door0", "d"), 301.0);
    o.drain();
    calls.store(0, Ordering::SeqCst);

    o.set_property_value(&id("cab"), "width", Value::Number(10.0), Priority::Normal)
        .unwrap();
    let report = o.drain();
    assert!(report.is_clean());
    assert_eq!(number(&o, "door0", "d"), 31.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let applied: Vec<&EntityRef> = report.applied_targets().collect();
    let pos = |p: &str| {
        applied
            .iter()
            .position(|t| **t == EntityRef::new("door0", p))
            .unwrap()
    };
    assert!(pos("d") > pos("b") && pos("d") > pos("c"));
}

// ── Container queries ──────────────────────────────────────────

#[test]
fn doors_split_container_and_follow_resize() {
    let mut o = cabinet(&EngineConfig::default());
    o.define_variable("gap", VariableScope::Container, Some(&id("cab")), Value::Number(2.0))
        .unwrap();
    for door in ["door0", "door1"] {
        o.set_property_formula(
            &id(door),
            "width",
            "(containerWidth() - $gap) / siblingCount()",
        )
        .unwrap();
    }
    o.set_property_formula(&id("door1"), "x", "Left.width + $gap").unwrap();
    o.drain();
    assert_eq!(number(&o, "door0", "width"), 49.0);
    assert_eq!(number(&o, "door1", "x"), 51.0);

    o.notify_change(&id("cab"), "size_change", size(202.0, 60.0, 40.0), Priority::Immediate)
        .unwrap();
    let report = o.drain();
    assert!(report.is_clean());
    assert_eq!(number(&o, "door0", "width"), 100.0);
    assert_eq!(number(&o, "door1", "width"), 100.0);
    assert_eq!(number(&o, "door1", "x"), 102.0);

    let bounds = o.scene().container_bounds(&id("cab")).unwrap();
    assert_eq!(bounds.size().x, 202.0);
}

#[test]
fn adding_a_sibling_reflows_every_door() {
    let mut o = cabinet(&EngineConfig::default());
    for door in ["door0", "door1"] {
        o.set_property_formula(&id(door), "width", "containerWidth() / siblingCount()")
            .unwrap();
    }
    o.drain();
    assert_eq!(number(&o, "door0", "width"), 50.0);

    o.add_object(ObjectData::new("door2", "Middle").with_container("cab"))
        .unwrap();
    o.set_property_formula(&id("door2"), "width", "containerWidth() / siblingCount()")
        .unwrap();
    assert!(o.drain().is_clean());
    for door in ["door0", "door1", "door2"] {
        let w = number(&o, door, "width");
        assert!((w - 100.0 / 3.0).abs() < 1e-9, "{door}: {w}");
    }

    o.remove_object(&id("door2")).unwrap();
    assert!(o.drain().is_clean());
    assert_eq!(number(&o, "door0", "width"), 50.0);
}

// ── Error containment ──────────────────────────────────────────

#[test]
fn bulk_edit_keeps_last_good_values_until_inputs_return() {
    let mut o = cabinet(&EngineConfig::default());
    o.set_property_formula(&id("door0"), "depth", "Cabinet.depth - 1")
        .unwrap();
    o.set_property_formula(&id("door1"), "depth", "Left.depth").unwrap();
    o.drain();
    assert_eq!(number(&o, "door1", "depth"), 39.0);

    let cab = o.remove_object(&id("cab")).unwrap();
    let report = o.drain();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].target, EntityRef::new("door0", "depth"));
    assert_eq!(number(&o, "door0", "depth"), 39.0);
    assert_eq!(number(&o, "door1", "depth"), 39.0);
    assert!(o.formula(&id("door0"), "depth").unwrap().failing);

    o.add_object(ObjectData {
        properties: cab.properties.clone(),
        ..ObjectData::new("cab", "Cabinet")
    })
    .unwrap();
    o.set_property_value(&id("cab"), "depth", Value::Number(50.0), Priority::Normal)
        .unwrap();
    assert!(o.drain().is_clean());
    assert_eq!(number(&o, "door0", "depth"), 49.0);
    assert_eq!(number(&o, "door1", "depth"), 49.0);
    assert!(!o.formula(&id("door0"), "depth").unwrap().failing);
}

#[test]
fn one_failing_branch_does_not_stop_the_cascade() {
    let mut o = cabinet(&EngineConfig::default());
    o.define_variable("k", VariableScope::Global, None, Value::Number(1.0))
        .unwrap();
    o.set_property_formula(&id("door0"), "width", "cab.width / $k").unwrap();
    o.set_property_formula(&id("door1"), "width", "cab.width - 5").unwrap();
    o.drain();

    o.update_variable("k", VariableScope::Global, None, Value::Number(0.0))
        .unwrap();
    o.set_property_value(&id("cab"), "width", Value::Number(80.0), Priority::Normal)
        .unwrap();
    let report = o.drain();
    assert!(!report.failed.is_empty());
    for failure in &report.failed {
        assert_eq!(failure.target, EntityRef::new("door0", "width"));
        assert!(failure.reason.contains("division by zero"));
    }
    assert_eq!(number(&o, "door0", "width"), 100.0);
    assert_eq!(number(&o, "door1", "width"), 75.0);
}

#[test]
fn cycle_through_formulas_is_refused() {
    let mut o = cabinet(&EngineConfig::default());
    o.set_property_formula(&id("door0"), "width", "Right.width").unwrap_err();
    o.set_property_formula(&id("door1"), "width", "20").unwrap();
    o.drain();
    assert_eq!(number(&o, "door0", "width"), 20.0);

    let err = o
        .set_property_formula(&id("door1"), "width", "Left.width + 1")
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Cycle(_)));
    assert_eq!(o.formula(&id("door1"), "width").unwrap().source_text, "20");
}

// ── Scheduling ─────────────────────────────────────────────────

#[test]
fn coalesced_and_immediate_bounds_agree() {
    let run = |coalesce: bool| {
        let config = EngineConfig {
            propagation: PropagationConfig {
                coalesce_bounds: coalesce,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut o = cabinet(&config);
        for door in ["door0", "door1"] {
            o.set_property_formula(&id(door), "width", "containerWidth() / 2")
                .unwrap();
        }
        o.set_property_formula(&id("door1"), "x", "Left.width").unwrap();
        o.drain();
        o.notify_change(&id("cab"), "size_change", size(300.0, 60.0, 40.0), Priority::High)
            .unwrap();
        let report = o.drain();
        (
            o.scene().container_bounds(&id("cab")),
            report.bounds_flushed,
        )
    };
    let (coalesced, coalesced_flushes) = run(true);
    let (immediate, immediate_flushes) = run(false);
    assert_eq!(coalesced, immediate);
    assert_eq!(coalesced.unwrap().size().x, 300.0);
    assert_eq!(coalesced_flushes, 1);
    assert!(immediate_flushes > coalesced_flushes);
}

#[test]
fn handle_submissions_join_the_next_drain() {
    let mut o = cabinet(&EngineConfig::default());
    o.set_property_formula(&id("door0"), "width", "containerWidth()").unwrap();
    o.drain();

    let handle = o.handle();
    std::thread::spawn(move || {
        let kind = "size_change".parse().unwrap();
        handle
            .submit(&id("cab"), kind, size(75.0, 1.0, 1.0), Priority::Immediate)
            .unwrap();
    })
    .join()
    .unwrap();
    assert!(o.drain().is_clean());
    assert_eq!(number(&o, "door0", "width"), 75.0);
}

#[test]
fn unknown_kind_surfaces_to_caller() {
    let mut o = cabinet(&EngineConfig::default());
    let err = o
        .notify_change(&id("cab"), "teleport", ChangePayload::None, Priority::Normal)
        .unwrap_err();
    assert_eq!(err.to_string(), "unknown update kind: teleport");
}
