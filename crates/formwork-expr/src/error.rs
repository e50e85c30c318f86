//! Expression engine errors.

use std::time::Duration;

use formwork_core::ValueType;
use thiserror::Error;

/// No token pattern matched at `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected character {found:?} at offset {offset}")]
pub struct LexError {
    pub offset: usize,
    pub found: char,
}

/// The token stream does not follow the formula grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at offset {offset}: expected {expected}, found {found}")]
pub struct ParseError {
    pub offset: usize,
    pub expected: String,
    pub found: String,
}

/// Failure to turn source text into a formula.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Failure reported by a function body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FunctionError(pub String);

impl FunctionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Failure of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("undefined variable: ${0}")]
    VariableNotFound(String),
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("property not found: {object}.{path}")]
    PropertyNotFound { object: String, path: String },
    #[error("unknown function: {0}")]
    FunctionNotFound(String),
    #[error("{name}() takes {min}..={max} arguments, got {got}")]
    Arity {
        name: String,
        min: usize,
        max: usize,
        got: usize,
    },
    #[error("{name}() failed: {cause}")]
    FunctionExecutionFailed { name: String, cause: String },
    #[error("recursion limit of {0} exceeded")]
    RecursionLimitExceeded(u32),
    #[error("evaluation exceeded its {0:?} budget")]
    EvaluationTimeout(Duration),
    #[error("division by zero")]
    DivisionByZero,
    #[error("type error: {op} cannot be applied to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: ValueType,
        right: ValueType,
    },
    #[error("type error: expected {expected}, got {got}")]
    UnexpectedType {
        expected: ValueType,
        got: ValueType,
    },
    #[error("non-finite result from {0}")]
    NonFinite(&'static str),
}
