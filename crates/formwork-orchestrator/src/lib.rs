//! Formwork Orchestrator - the property update path.
//!
//! [`Orchestrator`] owns the expression and propagation engines, the formula
//! table and the variable store. It drives any [`SceneHost`]; [`MemoryScene`]
//! is the in-memory host used by the demo binary and the tests.

pub mod error;
pub mod orchestrator;
pub mod scene;

pub use error::{OrchestratorError, Result};
pub use orchestrator::Orchestrator;
pub use scene::{MemoryScene, SceneHost};
