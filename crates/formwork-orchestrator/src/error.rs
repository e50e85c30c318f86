use formwork_core::{EntityRef, ObjectId};
use formwork_expr::{CompileError, EvalError, VariableError};
use formwork_propagation::{ApplyError, CycleError, PropagationError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Propagation(#[from] PropagationError),
    #[error(transparent)]
    Variable(#[from] VariableError),
    #[error("scene rejected update: {0}")]
    Apply(#[from] ApplyError),
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
    #[error("property not found: {0}")]
    PropertyNotFound(EntityRef),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
