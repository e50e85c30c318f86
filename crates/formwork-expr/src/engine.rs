//! Expression engine: compiles formulas and evaluates them against the
//! injected stores.

use formwork_core::{ExpressionConfig, ObjectId, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ast::Expr;
use crate::cache::{DerivedCache, EvalCache, EvalKey};
use crate::context::{EvalContext, EvalLimits};
use crate::error::{CompileError, EvalError};
use crate::evaluator::Evaluator;
use crate::formula::Formula;
use crate::parser::parse_source;
use crate::registry::FunctionRegistry;

/// A problem found by static validation. Compilation still succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationIssue {
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("{name}() takes {min}..={max} arguments, got {got}")]
    Arity {
        name: String,
        min: usize,
        max: usize,
        got: usize,
    },
}

/// Compiles and evaluates formulas. Owns its function registry and caches.
pub struct ExpressionEngine {
    registry: FunctionRegistry,
    config: ExpressionConfig,
    eval_cache: EvalCache,
    derived_cache: DerivedCache,
}

impl ExpressionEngine {
    pub fn new(config: ExpressionConfig) -> Self {
        Self::with_registry(FunctionRegistry::with_builtins(), config)
    }

    pub fn with_registry(registry: FunctionRegistry, config: ExpressionConfig) -> Self {
        Self {
            eval_cache: EvalCache::new(config.eval_cache_ttl(), config.cache_capacity),
            derived_cache: DerivedCache::new(config.derived_cache_ttl(), config.cache_capacity),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Mutable registry access, for installing host or test functions.
    pub fn registry_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.registry
    }

    /// Tokenize, parse and extract dependencies. No evaluation happens, so
    /// references to objects that do not exist yet are fine.
    pub fn compile_formula(
        &self,
        source: &str,
        object_id: impl Into<ObjectId>,
    ) -> Result<Formula, CompileError> {
        let object_id = object_id.into();
        let ast = parse_source(source).map_err(|e| {
            debug!(object = %object_id, source, error = %e, "formula rejected");
            e
        })?;
        let formula = Formula::from_ast(source, ast, object_id, &self.registry);
        debug!(
            object = %formula.object_id,
            formula = %formula.id,
            dependencies = formula.dependency_list.len(),
            variables = formula.variable_list.len(),
            constant = formula.is_constant,
            "compiled formula"
        );
        Ok(formula)
    }

    /// Report unknown functions and arity mismatches.
    pub fn validate_formula(&self, formula: &Formula) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        formula.ast.walk(&mut |node| {
            let Expr::Call { function, args } = node else {
                return;
            };
            match self.registry.get(function) {
                None => issues.push(ValidationIssue::UnknownFunction(function.clone())),
                Some(def) if !def.accepts(args.len()) => issues.push(ValidationIssue::Arity {
                    name: function.clone(),
                    min: def.min_args,
                    max: def.max_args,
                    got: args.len(),
                }),
                Some(_) => {}
            }
        });
        issues
    }

    /// Evaluate a formula and record the outcome on it.
    ///
    /// A constant formula that already has a value returns it without
    /// evaluating again. On failure `last_value` is kept and the error is
    /// appended to `error_list`.
    pub fn evaluate_formula(
        &self,
        formula: &mut Formula,
        ctx: &EvalContext<'_>,
    ) -> Result<Value, EvalError> {
        if let Some(value) = constant_value(formula) {
            return Ok(value);
        }
        let result = self.evaluator(false).evaluate(&formula.ast, ctx);
        self.record(formula, result)
    }

    /// Like [`evaluate_formula`](Self::evaluate_formula), but served from the
    /// evaluation and derived caches when possible.
    pub fn evaluate_cached(
        &self,
        formula: &mut Formula,
        ctx: &EvalContext<'_>,
    ) -> Result<Value, EvalError> {
        if let Some(value) = constant_value(formula) {
            return Ok(value);
        }
        let key = EvalKey {
            object: ctx.object_id.clone(),
            formula: formula.id,
            container: ctx.container_id.clone(),
        };
        if let Some(hit) = self.eval_cache.get(&key) {
            return Ok(hit);
        }
        let result = self.evaluator(true).evaluate(&formula.ast, ctx);
        let value = self.record(formula, result)?;
        self.eval_cache.insert(key, value.clone());
        Ok(value)
    }

    /// Drop cached results owned by `object`, both as evaluating object and
    /// as queried container.
    pub fn invalidate_object(&self, object: &ObjectId) -> usize {
        self.eval_cache.invalidate_owner(object) + self.derived_cache.invalidate_owner(object)
    }

    pub fn clear_caches(&self) {
        self.eval_cache.clear();
        self.derived_cache.clear();
    }

    /// `(hits, misses)` of the evaluation cache.
    pub fn eval_cache_stats(&self) -> (u64, u64) {
        self.eval_cache.stats()
    }

    fn evaluator(&self, cached: bool) -> Evaluator<'_> {
        let evaluator = Evaluator::new(&self.registry, EvalLimits::from(&self.config))
            .with_query_limit(self.config.max_query_objects);
        if cached {
            evaluator.with_derived_cache(&self.derived_cache)
        } else {
            evaluator
        }
    }

    fn record(
        &self,
        formula: &mut Formula,
        result: Result<Value, EvalError>,
    ) -> Result<Value, EvalError> {
        match result {
            Ok(value) => {
                formula.record_success(value.clone());
                Ok(value)
            }
            Err(error) => {
                warn!(
                    object = %formula.object_id,
                    formula = %formula.id,
                    source = %formula.source_text,
                    %error,
                    "formula evaluation failed"
                );
                formula.record_error(error.clone(), self.config.max_error_history);
                Err(error)
            }
        }
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new(ExpressionConfig::default())
    }
}

fn constant_value(formula: &Formula) -> Option<Value> {
    if formula.is_constant && !formula.failing {
        formula.last_value.clone()
    } else {
        None
    }
}
