//! Formwork Expr - formula language for parametric properties.
//!
//! Source text is tokenized, parsed into an immutable [`Expr`] tree and
//! compiled into a [`Formula`] carrying its structural dependencies. The
//! [`Evaluator`] walks the tree against injected object and variable stores
//! under a recursion limit and a cooperative wall-clock budget.

pub mod ast;
pub mod builtins;
pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod formula;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod token;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use cache::{ContainerQuery, DerivedCache, EvalCache, EvalKey, QueryKey};
pub use context::{Deadline, EvalContext, EvalLimits};
pub use engine::{ExpressionEngine, ValidationIssue};
pub use error::{CompileError, EvalError, FunctionError, LexError, ParseError};
pub use evaluator::Evaluator;
pub use formula::{Dependency, Formula, FormulaId};
pub use parser::{parse_source, parse_tokens};
pub use registry::{CallContext, FunctionDef, FunctionKind, FunctionRegistry, ImplicitDependency};
pub use resolver::{
    ObjectData, ObjectStore, ValueResolver, VariableContext, VariableScope, VariableStore,
    PARENT_REF, SELF_REF,
};
pub use store::{ObjectTable, VariableError, VariableTable};
pub use token::{tokenize, Token, TokenKind};
