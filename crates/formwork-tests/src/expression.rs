//! Integration tests for the expression engine.
//!
//! Exercises formwork-expr against formwork-core configuration and the
//! in-memory stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use formwork_core::{ExpressionConfig, ObjectId, Value};
use formwork_expr::{
    parse_source, BinaryOp, EvalContext, EvalError, Expr, ExpressionEngine, FunctionDef,
    FunctionKind, ObjectData, ObjectStore, ObjectTable, UnaryOp, VariableScope, VariableTable,
};
use proptest::prelude::*;
use smallvec::SmallVec;

// ── Helpers ────────────────────────────────────────────────────

/// Replace a registered function with a wrapper that counts its calls.
fn instrument(engine: &mut ExpressionEngine, name: &str) -> Arc<AtomicUsize> {
    let calls = Arc::new(AtomicUsize::new(0));
    let original = engine.registry().get(name).cloned().unwrap();
    let FunctionKind::Eager(body) = original.kind.clone() else {
        panic!("{name} is not an eager function");
    };
    let counter = Arc::clone(&calls);
    let mut wrapped = FunctionDef::new(name, original.min_args, original.max_args, move |ctx, args| {
        counter.fetch_add(1, Ordering::SeqCst);
        body(ctx, args)
    });
    wrapped.implicit = original.implicit;
    engine.registry_mut().register(wrapped);
    calls
}

/// Object store that counts every lookup.
struct CountingStore {
    inner: ObjectTable,
    lookups: AtomicUsize,
}

impl CountingStore {
    fn new(inner: ObjectTable) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl ObjectStore for CountingStore {
    fn get_object(&self, id: &ObjectId) -> Option<&ObjectData> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get_object(id)
    }

    fn find_object_id_by_name(&self, name: &str) -> Option<ObjectId> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_object_id_by_name(name)
    }

    fn children_of(&self, container: &ObjectId) -> Vec<ObjectId> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.children_of(container)
    }
}

fn container_with_children(width: f64, children: usize) -> ObjectTable {
    let mut objects = ObjectTable::new();
    objects.insert(ObjectData::new("box", "Box").with_property("width", width));
    for i in 0..children {
        objects.insert(ObjectData::new(format!("c{i}"), format!("Child{i}")).with_container("box"));
    }
    objects
}

// ── Round-trip ─────────────────────────────────────────────────

fn identifier() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,5}".prop_filter("literal keyword", |s| s != "true" && s != "false")
}

fn leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        (0.0..1.0e6f64).prop_map(Expr::number),
        any::<bool>().prop_map(|b| Expr::Literal(Value::Bool(b))),
        "[a-zA-Z0-9 _'\"\\\\\n\t]{0,8}".prop_map(|s| Expr::Literal(Value::String(s))),
        identifier().prop_map(Expr::Variable),
        (identifier(), prop::collection::vec(identifier(), 1..3)).prop_map(|(object, path)| {
            Expr::ObjectRef {
                object,
                path: SmallVec::from_vec(path),
            }
        }),
    ]
}

fn binary_op() -> impl Strategy<Value = BinaryOp> {
    prop_oneof![
        Just(BinaryOp::Or),
        Just(BinaryOp::And),
        Just(BinaryOp::Eq),
        Just(BinaryOp::Ne),
        Just(BinaryOp::Lt),
        Just(BinaryOp::Gt),
        Just(BinaryOp::Le),
        Just(BinaryOp::Ge),
        Just(BinaryOp::Add),
        Just(BinaryOp::Sub),
        Just(BinaryOp::Mul),
        Just(BinaryOp::Div),
        Just(BinaryOp::Rem),
    ]
}

fn expr() -> impl Strategy<Value = Expr> {
    leaf().prop_recursive(4, 48, 3, |inner| {
        prop_oneof![
            (binary_op(), inner.clone(), inner.clone())
                .prop_map(|(op, l, r)| Expr::binary(op, l, r)),
            (prop_oneof![Just(UnaryOp::Not), Just(UnaryOp::Neg)], inner.clone()).prop_map(
                |(op, operand)| Expr::Unary {
                    op,
                    operand: Box::new(operand),
                }
            ),
            (inner.clone(), inner.clone(), inner.clone()).prop_map(|(c, t, e)| {
                Expr::Conditional {
                    condition: Box::new(c),
                    then_branch: Box::new(t),
                    else_branch: Box::new(e),
                }
            }),
            (identifier(), prop::collection::vec(inner, 0..3))
                .prop_map(|(name, args)| Expr::call(name, args)),
        ]
    })
}

proptest! {
    #[test]
    fn printed_tree_parses_back_identically(tree in expr()) {
        let source = tree.to_string();
        let reparsed = parse_source(&source);
        prop_assert_eq!(reparsed.as_ref(), Ok(&tree), "source: {}", source);
    }

    #[test]
    fn compiled_source_round_trips(a in 0u32..1000, b in 1u32..1000, name in identifier()) {
        let source = format!("{name}.width * {a} + $gap / {b} > 3 ? min({a}, {b}) : -{b}");
        let engine = ExpressionEngine::default();
        let formula = engine.compile_formula(&source, "o").unwrap();
        let again = parse_source(&formula.ast.to_string()).unwrap();
        prop_assert_eq!(again, formula.ast);
    }
}

// ── Idempotence ────────────────────────────────────────────────

#[test]
fn constant_formula_is_evaluated_once() {
    let mut engine = ExpressionEngine::default();
    let rounds = instrument(&mut engine, "round");
    let store = CountingStore::new(ObjectTable::new());
    let vars = VariableTable::new();
    let ctx = EvalContext::new("o", &store, &vars);

    let mut formula = engine.compile_formula("round(pi() * 1000) / 1000", "o").unwrap();
    assert!(formula.is_constant);
    let first = engine.evaluate_formula(&mut formula, &ctx).unwrap();
    let second = engine.evaluate_formula(&mut formula, &ctx).unwrap();
    assert!(first.bit_eq(&second));
    assert_eq!(rounds.load(Ordering::SeqCst), 1);
    assert_eq!(store.lookups(), 0);
}

#[test]
fn non_constant_formula_resolves_each_time() {
    let engine = ExpressionEngine::default();
    let mut objects = ObjectTable::new();
    objects.insert(ObjectData::new("a", "A").with_property("width", 2.0));
    let store = CountingStore::new(objects);
    let vars = VariableTable::new();
    let ctx = EvalContext::new("o", &store, &vars);

    let mut formula = engine.compile_formula("a.width + a.width", "o").unwrap();
    engine.evaluate_formula(&mut formula, &ctx).unwrap();
    let per_pass = store.lookups();
    assert!(per_pass > 0);
    engine.evaluate_formula(&mut formula, &ctx).unwrap();
    assert_eq!(store.lookups(), per_pass * 2);
}

// ── Timeout ────────────────────────────────────────────────────

#[test]
fn runaway_function_times_out() {
    let config = ExpressionConfig {
        evaluation_timeout_ms: 100,
        ..Default::default()
    };
    let mut engine = ExpressionEngine::new(config);
    // Never returns a value of its own; only the deadline stops it.
    engine.registry_mut().register(FunctionDef::new("hang", 0, 0, |ctx, _| {
        while !ctx.is_cancelled() {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(Value::Number(1.0))
    }));
    let objects = ObjectTable::new();
    let vars = VariableTable::new();
    let ctx = EvalContext::new("o", &objects, &vars);

    let mut formula = engine.compile_formula("2 * hang()", "o").unwrap();
    let started = Instant::now();
    let result = engine.evaluate_formula(&mut formula, &ctx);
    let elapsed = started.elapsed();
    assert_eq!(
        result,
        Err(EvalError::EvaluationTimeout(Duration::from_millis(100)))
    );
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));
    assert!(formula.last_value.is_none());
    assert_eq!(formula.error_list.len(), 1);
}

// ── Scenarios ──────────────────────────────────────────────────

#[test]
fn scenario_container_width_half() {
    let engine = ExpressionEngine::default();
    let mut objects = ObjectTable::new();
    objects.insert(ObjectData::new("box", "Box").with_property("width", 100.0));
    objects.insert(ObjectData::new("obj1", "Obj1").with_container("box"));
    let vars = VariableTable::new();

    let mut formula = engine.compile_formula("containerWidth() * 0.5", "obj1").unwrap();
    let ctx = EvalContext::for_object("obj1", &objects, &vars);
    assert_eq!(
        engine.evaluate_formula(&mut formula, &ctx),
        Ok(Value::Number(50.0))
    );
}

#[test]
fn scenario_reference_plus_local_variable() {
    let engine = ExpressionEngine::default();
    let mut objects = ObjectTable::new();
    objects.insert(ObjectData::new("obj1", "Object1").with_property("width", 40.0));
    objects.insert(ObjectData::new("obj2", "Object2"));
    let obj2 = ObjectId::new("obj2");

    let mut vars = VariableTable::new();
    vars.define("gap", VariableScope::Local, Some(&obj2), Value::Number(10.0))
        .unwrap();
    let mut formula = engine.compile_formula("Object1.width + $gap", "obj2").unwrap();
    {
        let ctx = EvalContext::for_object("obj2", &objects, &vars);
        assert_eq!(
            engine.evaluate_formula(&mut formula, &ctx),
            Ok(Value::Number(50.0))
        );
    }

    let empty = VariableTable::new();
    let ctx = EvalContext::for_object("obj2", &objects, &empty);
    assert_eq!(
        engine.evaluate_formula(&mut formula, &ctx),
        Err(EvalError::VariableNotFound("gap".into()))
    );
    // The failed pass leaves the last good value in place.
    assert_eq!(formula.last_value, Some(Value::Number(50.0)));
}

#[test]
fn scenario_sibling_conditional_is_lazy() {
    let source = "siblingCount() > 3 ? containerWidth() / siblingCount() : 100";

    let mut engine = ExpressionEngine::default();
    let widths = instrument(&mut engine, "containerWidth");
    let counts = instrument(&mut engine, "siblingCount");
    let objects = container_with_children(200.0, 5);
    let vars = VariableTable::new();
    let mut formula = engine.compile_formula(source, "c0").unwrap();
    let ctx = EvalContext::for_object("c0", &objects, &vars);
    assert_eq!(
        engine.evaluate_formula(&mut formula, &ctx),
        Ok(Value::Number(40.0))
    );
    assert_eq!(widths.load(Ordering::SeqCst), 1);
    assert_eq!(counts.load(Ordering::SeqCst), 2);

    let mut engine = ExpressionEngine::default();
    let widths = instrument(&mut engine, "containerWidth");
    let counts = instrument(&mut engine, "siblingCount");
    let objects = container_with_children(200.0, 2);
    let mut formula = engine.compile_formula(source, "c0").unwrap();
    let ctx = EvalContext::for_object("c0", &objects, &vars);
    assert_eq!(
        engine.evaluate_formula(&mut formula, &ctx),
        Ok(Value::Number(100.0))
    );
    assert_eq!(widths.load(Ordering::SeqCst), 0);
    assert_eq!(counts.load(Ordering::SeqCst), 1);
}

#[test]
fn if_function_skips_untaken_branch() {
    let mut engine = ExpressionEngine::default();
    let widths = instrument(&mut engine, "containerWidth");
    let objects = container_with_children(200.0, 2);
    let vars = VariableTable::new();
    let mut formula = engine
        .compile_formula("if(siblingCount() > 3, containerWidth(), 7)", "c1")
        .unwrap();
    let ctx = EvalContext::for_object("c1", &objects, &vars);
    assert_eq!(
        engine.evaluate_formula(&mut formula, &ctx),
        Ok(Value::Number(7.0))
    );
    assert_eq!(widths.load(Ordering::SeqCst), 0);
}

#[test]
fn validation_reports_without_failing_compile() {
    let engine = ExpressionEngine::default();
    let formula = engine.compile_formula("nope(1) + min()", "o").unwrap();
    let issues = engine.validate_formula(&formula);
    assert_eq!(issues.len(), 2);
}
