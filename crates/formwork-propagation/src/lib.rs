//! Formwork Propagation - dependency graph and change scheduling.
//!
//! Changes enter through [`PropagationEngine::propagate_change`] (or a
//! [`PropagationHandle`]), are queued in five priority bands, and are drained
//! once per frame through an [`UpdateApplier`] supplied by the scene layer.
//! Applying a request cascades recomputes to its consumers in topological
//! order; parent bounds recalculation is coalesced per drain.

pub mod batch;
pub mod engine;
pub mod error;
pub mod graph;
pub mod queue;
pub mod request;

pub use batch::BoundsBatch;
pub use engine::{AppliedUpdate, DrainReport, PropagationEngine, PropagationHandle, UpdateApplier};
pub use error::{ApplyError, CycleError, PropagationError};
pub use graph::{DependencyEdge, DependencyGraph, EdgeKind};
pub use queue::UpdateQueue;
pub use request::{
    BoundsContribution, ChangePayload, Priority, RequestId, RequestState, UpdateFailure,
    UpdateKind, UpdateOutcome, UpdateRequest,
};
