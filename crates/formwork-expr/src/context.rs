//! Evaluation context and limits.

use std::time::{Duration, Instant};

use formwork_core::{ExpressionConfig, ObjectId};

use crate::resolver::{ObjectStore, ValueResolver, VariableContext, VariableStore};

/// Limits applied to one top-level evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Maximum nesting depth the evaluator will descend.
    pub max_recursion_depth: u32,
    /// Wall-clock budget from the start of the evaluation.
    pub timeout: Duration,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_recursion_depth: 50,
            timeout: Duration::from_secs(5),
        }
    }
}

impl From<&ExpressionConfig> for EvalLimits {
    fn from(config: &ExpressionConfig) -> Self {
        Self {
            max_recursion_depth: config.max_recursion_depth,
            timeout: config.evaluation_timeout(),
        }
    }
}

/// Cooperative cancellation point for one evaluation.
///
/// Nothing is preempted: the evaluator checks the deadline between nodes and
/// long-running functions are expected to poll [`Deadline::expired`].
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

/// Who is being evaluated, and where its references resolve.
pub struct EvalContext<'a> {
    pub object_id: ObjectId,
    pub container_id: Option<ObjectId>,
    pub template_id: Option<ObjectId>,
    pub resolver: ValueResolver<'a>,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        object_id: impl Into<ObjectId>,
        objects: &'a dyn ObjectStore,
        variables: &'a dyn VariableStore,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            container_id: None,
            template_id: None,
            resolver: ValueResolver::new(objects, variables),
        }
    }

    /// Build a context whose container and template come from the object itself.
    pub fn for_object(
        object_id: impl Into<ObjectId>,
        objects: &'a dyn ObjectStore,
        variables: &'a dyn VariableStore,
    ) -> Self {
        let mut ctx = Self::new(object_id, objects, variables);
        if let Some(object) = objects.get_object(&ctx.object_id) {
            ctx.container_id = object.container.clone();
            ctx.template_id = object.template.clone();
        }
        ctx
    }

    pub fn variable_context(&self) -> VariableContext<'_> {
        VariableContext {
            object_id: &self.object_id,
            container_id: self.container_id.as_ref(),
            template_id: self.template_id.as_ref(),
        }
    }

    pub fn objects(&self) -> &'a dyn ObjectStore {
        self.resolver.objects
    }
}
