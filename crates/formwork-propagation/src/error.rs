//! Propagation errors.

use formwork_core::{EntityRef, ObjectId};
use thiserror::Error;

/// Inserting the edge would close a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency {producer} -> {consumer} would create a cycle")]
pub struct CycleError {
    pub producer: EntityRef,
    pub consumer: EntityRef,
}

/// Failure to schedule a change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropagationError {
    #[error("unknown update kind: {0}")]
    UnknownUpdateKind(String),
    #[error("{kind} cannot carry a {payload} payload")]
    PayloadMismatch {
        kind: &'static str,
        payload: &'static str,
    },
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

/// Failure reported by the scene layer while applying one request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),
    #[error("{0}")]
    Failed(String),
}

impl ApplyError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}
