//! Engine configuration.
//!
//! Every field has a default, so a config file only needs to name the
//! settings it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{FormworkError, Result};

/// Settings for the expression engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionConfig {
    /// Maximum AST nesting depth visited by the evaluator.
    pub max_recursion_depth: u32,
    /// Wall-clock budget of one top-level evaluation, in milliseconds.
    pub evaluation_timeout_ms: u64,
    /// Lifetime of cached evaluation results, in milliseconds.
    pub eval_cache_ttl_ms: u64,
    /// Lifetime of cached container-query results, in milliseconds.
    pub derived_cache_ttl_ms: u64,
    /// Maximum entries held by each cache.
    pub cache_capacity: usize,
    /// Number of recent errors retained per formula.
    pub max_error_history: usize,
    /// Upper bound on objects a container query may visit.
    pub max_query_objects: usize,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: 50,
            evaluation_timeout_ms: 5_000,
            eval_cache_ttl_ms: 1_000,
            derived_cache_ttl_ms: 5_000,
            cache_capacity: 1024,
            max_error_history: 8,
            max_query_objects: 10_000,
        }
    }
}

impl ExpressionConfig {
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }

    pub fn eval_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.eval_cache_ttl_ms)
    }

    pub fn derived_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.derived_cache_ttl_ms)
    }
}

/// Settings for the propagation scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Requests processed by one drain before the rest yields to the next drain.
    pub max_requests_per_drain: usize,
    /// Coalesce parent bounds recalculation to once per parent per drain.
    pub coalesce_bounds: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_requests_per_drain: 10_000,
            coalesce_bounds: true,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub expression: ExpressionConfig,
    pub propagation: PropagationConfig,
}

impl EngineConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject settings the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.expression.max_recursion_depth == 0 {
            return Err(FormworkError::InvalidConfig(
                "expression.max_recursion_depth must be at least 1".into(),
            ));
        }
        if self.expression.evaluation_timeout_ms == 0 {
            return Err(FormworkError::InvalidConfig(
                "expression.evaluation_timeout_ms must be positive".into(),
            ));
        }
        if self.propagation.max_requests_per_drain == 0 {
            return Err(FormworkError::InvalidConfig(
                "propagation.max_requests_per_drain must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
