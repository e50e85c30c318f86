//! Tree-walking evaluator.
//!
//! One [`Evaluator::evaluate`] call is one pass: it owns the deadline and a
//! resolution memo, so each distinct reference is resolved at most once per
//! pass and nothing leaks into the next pass.

use std::cmp::Ordering;
use std::collections::HashMap;

use formwork_core::{PropertyPath, Value, ValueType};
use tracing::trace;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::cache::DerivedCache;
use crate::context::{Deadline, EvalContext, EvalLimits};
use crate::error::EvalError;
use crate::registry::{CallContext, FunctionKind, FunctionRegistry};

/// Default bound on objects a container query may visit.
pub const DEFAULT_MAX_QUERY_OBJECTS: usize = 10_000;

/// Evaluates expression trees against an [`EvalContext`].
pub struct Evaluator<'a> {
    registry: &'a FunctionRegistry,
    limits: EvalLimits,
    derived: Option<&'a DerivedCache>,
    max_query_objects: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(registry: &'a FunctionRegistry, limits: EvalLimits) -> Self {
        Self {
            registry,
            limits,
            derived: None,
            max_query_objects: DEFAULT_MAX_QUERY_OBJECTS,
        }
    }

    pub fn with_derived_cache(mut self, cache: &'a DerivedCache) -> Self {
        self.derived = Some(cache);
        self
    }

    pub fn with_query_limit(mut self, max_objects: usize) -> Self {
        self.max_query_objects = max_objects;
        self
    }

    /// Evaluate `expr` as one pass, starting the wall-clock budget now.
    pub fn evaluate(&self, expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value, EvalError> {
        let mut pass = Pass {
            evaluator: self,
            ctx,
            deadline: Deadline::new(self.limits.timeout),
            memo: HashMap::new(),
        };
        pass.eval(expr, 1)
    }
}

#[derive(Hash, PartialEq, Eq)]
enum MemoKey {
    Variable(String),
    Property(String, PropertyPath),
}

struct Pass<'e, 'c> {
    evaluator: &'e Evaluator<'e>,
    ctx: &'c EvalContext<'c>,
    deadline: Deadline,
    memo: HashMap<MemoKey, Value>,
}

impl Pass<'_, '_> {
    fn check_deadline(&self) -> Result<(), EvalError> {
        if self.deadline.expired() {
            return Err(EvalError::EvaluationTimeout(self.deadline.budget()));
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, depth: u32) -> Result<Value, EvalError> {
        let limit = self.evaluator.limits.max_recursion_depth;
        if depth > limit {
            return Err(EvalError::RecursionLimitExceeded(limit));
        }
        self.check_deadline()?;

        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable(name) => {
                let key = MemoKey::Variable(name.clone());
                if let Some(hit) = self.memo.get(&key) {
                    return Ok(hit.clone());
                }
                let vars = self.ctx.variable_context();
                let value = self.ctx.resolver.resolve_variable(name, &vars)?;
                self.memo.insert(key, value.clone());
                Ok(value)
            }
            Expr::ObjectRef { object, path } => {
                let key = MemoKey::Property(object.clone(), path.clone());
                if let Some(hit) = self.memo.get(&key) {
                    return Ok(hit.clone());
                }
                let vars = self.ctx.variable_context();
                let value = self.ctx.resolver.resolve_property(object, path, &vars)?;
                self.memo.insert(key, value.clone());
                Ok(value)
            }
            Expr::Call { function, args } => self.call(function, args, depth),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, depth + 1)?;
                match (op, value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOp::Not, other) => Err(unexpected(ValueType::Bool, &other)),
                    (UnaryOp::Neg, other) => Err(unexpected(ValueType::Number, &other)),
                }
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right, depth),
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => self.select(condition, then_branch, else_branch, depth),
        }
    }

    /// Evaluate the condition, then exactly one branch.
    fn select(
        &mut self,
        condition: &Expr,
        then_branch: &Expr,
        else_branch: &Expr,
        depth: u32,
    ) -> Result<Value, EvalError> {
        let chosen = if self.condition(condition, depth + 1)? {
            then_branch
        } else {
            else_branch
        };
        self.eval(chosen, depth + 1)
    }

    fn condition(&mut self, expr: &Expr, depth: u32) -> Result<bool, EvalError> {
        match self.eval(expr, depth)? {
            Value::Bool(b) => Ok(b),
            other => Err(unexpected(ValueType::Bool, &other)),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr], depth: u32) -> Result<Value, EvalError> {
        let registry = self.evaluator.registry;
        let def = registry.get(name);
        let arity = |min: usize, max: usize, got: usize| EvalError::Arity {
            name: name.to_string(),
            min,
            max,
            got,
        };

        let body = match def.map(|d| (d, &d.kind)) {
            // `if` evaluates its condition and one branch only.
            Some((def, FunctionKind::Select)) => {
                let [condition, then_branch, else_branch] = args else {
                    return Err(arity(def.min_args, def.max_args, args.len()));
                };
                return self.select(condition, then_branch, else_branch, depth + 1);
            }
            Some((_, FunctionKind::Eager(body))) => Some(body),
            None => None,
        };

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, depth + 1)?);
        }

        let (Some(def), Some(body)) = (def, body) else {
            return Err(EvalError::FunctionNotFound(name.to_string()));
        };
        if !def.accepts(values.len()) {
            return Err(arity(def.min_args, def.max_args, values.len()));
        }

        let call_ctx = CallContext {
            object_id: &self.ctx.object_id,
            container_id: self.ctx.container_id.as_ref(),
            objects: self.ctx.objects(),
            deadline: &self.deadline,
            derived: self.evaluator.derived,
            max_query_objects: self.evaluator.max_query_objects,
        };
        let result = body(&call_ctx, &values);
        // A body that overran its budget is reported as a timeout even if it
        // eventually produced a value.
        self.check_deadline()?;
        let value = result.map_err(|e| EvalError::FunctionExecutionFailed {
            name: name.to_string(),
            cause: e.0,
        })?;
        if let Value::Number(n) = value {
            if !n.is_finite() {
                return Err(EvalError::FunctionExecutionFailed {
                    name: name.to_string(),
                    cause: "non-finite result".to_string(),
                });
            }
        }
        trace!(function = name, ?value, "call");
        Ok(value)
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        depth: u32,
    ) -> Result<Value, EvalError> {
        match op {
            BinaryOp::And => {
                let l = self.condition(left, depth + 1)?;
                return Ok(Value::Bool(l && self.condition(right, depth + 1)?));
            }
            BinaryOp::Or => {
                let l = self.condition(left, depth + 1)?;
                return Ok(Value::Bool(l || self.condition(right, depth + 1)?));
            }
            _ => {}
        }

        let l = self.eval(left, depth + 1)?;
        let r = self.eval(right, depth + 1)?;
        apply_binary(op, l, r)
    }
}

fn unexpected(expected: ValueType, got: &Value) -> EvalError {
    EvalError::UnexpectedType {
        expected,
        got: got.value_type(),
    }
}

fn mismatch(op: BinaryOp, l: &Value, r: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op.symbol(),
        left: l.value_type(),
        right: r.value_type(),
    }
}

/// Apply a strict (non-short-circuit) binary operator.
pub fn apply_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, EvalError> {
    use BinaryOp::*;

    match op {
        Eq | Ne => {
            if l.value_type() != r.value_type() {
                return Err(mismatch(op, &l, &r));
            }
            let equal = l == r;
            Ok(Value::Bool(if op == Eq { equal } else { !equal }))
        }
        Lt | Gt | Le | Ge => {
            let ordering = match (&l, &r) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
                _ => return Err(mismatch(op, &l, &r)),
            };
            let result = match ordering {
                Some(Ordering::Less) => matches!(op, Lt | Le),
                Some(Ordering::Greater) => matches!(op, Gt | Ge),
                Some(Ordering::Equal) => matches!(op, Le | Ge),
                None => false,
            };
            Ok(Value::Bool(result))
        }
        Add => match (l, r) {
            (Value::Number(a), Value::Number(b)) => finite(op, a + b),
            (Value::String(mut a), Value::String(b)) => {
                a.push_str(&b);
                Ok(Value::String(a))
            }
            (l, r) => Err(mismatch(op, &l, &r)),
        },
        Sub | Mul | Div | Rem => {
            let (Value::Number(a), Value::Number(b)) = (&l, &r) else {
                return Err(mismatch(op, &l, &r));
            };
            let (a, b) = (*a, *b);
            if matches!(op, Div | Rem) && b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let n = match op {
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                _ => a % b,
            };
            finite(op, n)
        }
        And | Or => match (l, r) {
            (Value::Bool(a), Value::Bool(b)) => {
                Ok(Value::Bool(if op == And { a && b } else { a || b }))
            }
            (l, r) => Err(mismatch(op, &l, &r)),
        },
    }
}

fn finite(op: BinaryOp, n: f64) -> Result<Value, EvalError> {
    if n.is_finite() {
        Ok(Value::Number(n))
    } else {
        Err(EvalError::NonFinite(op.symbol()))
    }
}
