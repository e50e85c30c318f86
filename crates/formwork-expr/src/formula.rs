//! Compiled formulas and structural dependency extraction.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use formwork_core::{ObjectId, PropertyPath, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ast::Expr;
use crate::error::EvalError;
use crate::registry::{FunctionRegistry, ImplicitDependency};

/// Stable identity of one compiled formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormulaId(pub Uuid);

impl FormulaId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FormulaId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something outside the formula whose change can change its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dependency {
    /// `reference.path` as written; `reference` may be an id, a name,
    /// `self` or `parent`.
    Object {
        reference: String,
        path: PropertyPath,
    },
    /// A property of the evaluating object's container, carried by a
    /// container-query call.
    Container { property: String },
    /// A property of the evaluating object itself, carried by a call.
    Own { property: String },
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object { reference, path } => write!(f, "{reference}.{}", path.join(".")),
            Self::Container { property } => write!(f, "parent.{property}"),
            Self::Own { property } => write!(f, "self.{property}"),
        }
    }
}

/// A compiled formula bound to one object.
#[derive(Debug, Clone)]
pub struct Formula {
    pub id: FormulaId,
    pub source_text: String,
    pub ast: Expr,
    pub object_id: ObjectId,
    pub dependency_list: Vec<Dependency>,
    /// Referenced variable names, without the `$`.
    pub variable_list: Vec<String>,
    /// No dependencies and no variables: the result never changes.
    pub is_constant: bool,
    /// Last successful result. Kept across failed evaluations.
    pub last_value: Option<Value>,
    pub last_eval_time: Option<Instant>,
    /// Most recent evaluation failures, oldest first.
    pub error_list: VecDeque<EvalError>,
    /// The latest evaluation failed; `last_value` is stale.
    pub failing: bool,
}

impl Formula {
    /// Build a formula from an already-parsed tree.
    pub fn from_ast(
        source_text: impl Into<String>,
        ast: Expr,
        object_id: impl Into<ObjectId>,
        registry: &FunctionRegistry,
    ) -> Self {
        let (dependency_list, variable_list) = extract_dependencies(&ast, registry);
        let is_constant = dependency_list.is_empty() && variable_list.is_empty();
        Self {
            id: FormulaId::new(),
            source_text: source_text.into(),
            ast,
            object_id: object_id.into(),
            dependency_list,
            variable_list,
            is_constant,
            last_value: None,
            last_eval_time: None,
            error_list: VecDeque::new(),
            failing: false,
        }
    }

    pub(crate) fn record_success(&mut self, value: Value) {
        self.last_value = Some(value);
        self.last_eval_time = Some(Instant::now());
        self.failing = false;
    }

    pub(crate) fn record_error(&mut self, error: EvalError, max_history: usize) {
        self.failing = true;
        self.last_eval_time = Some(Instant::now());
        if max_history == 0 {
            return;
        }
        while self.error_list.len() >= max_history {
            self.error_list.pop_front();
        }
        self.error_list.push_back(error);
    }

    pub fn last_error(&self) -> Option<&EvalError> {
        self.error_list.back()
    }

    /// References to objects, by id or name as written.
    pub fn object_references(&self) -> impl Iterator<Item = &str> {
        self.dependency_list.iter().filter_map(|dep| match dep {
            Dependency::Object { reference, .. } => Some(reference.as_str()),
            _ => None,
        })
    }
}

/// Collect object, implicit and variable references, in first-seen order
/// without duplicates.
pub fn extract_dependencies(
    ast: &Expr,
    registry: &FunctionRegistry,
) -> (Vec<Dependency>, Vec<String>) {
    let mut dependencies: Vec<Dependency> = Vec::new();
    let mut variables: Vec<String> = Vec::new();
    ast.walk(&mut |node| match node {
        Expr::ObjectRef { object, path } => {
            let dep = Dependency::Object {
                reference: object.clone(),
                path: path.clone(),
            };
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
        Expr::Variable(name) => {
            if !variables.contains(name) {
                variables.push(name.clone());
            }
        }
        Expr::Call { function, .. } => {
            let implicit = registry.get(function).and_then(|def| def.implicit);
            let dep = match implicit {
                Some(ImplicitDependency::Container(p)) => Dependency::Container {
                    property: p.to_string(),
                },
                Some(ImplicitDependency::Own(p)) => Dependency::Own {
                    property: p.to_string(),
                },
                None => return,
            };
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
        _ => {}
    });
    (dependencies, variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn compile(source: &str) -> Formula {
        let registry = FunctionRegistry::with_builtins();
        Formula::from_ast(source, parse_source(source).unwrap(), "obj1", &registry)
    }

    #[test]
    fn test_constant_formula() {
        let f = compile("1 + 2 * max(3, 4)");
        assert!(f.is_constant);
        assert!(f.dependency_list.is_empty());
        assert!(f.variable_list.is_empty());
    }

    #[test]
    fn test_extraction_dedups_in_order() {
        let f = compile("Object1.width + $gap + Object1.width + $k + $gap");
        assert!(!f.is_constant);
        assert_eq!(f.dependency_list.len(), 1);
        assert_eq!(f.dependency_list[0].to_string(), "Object1.width");
        assert_eq!(f.variable_list, vec!["gap".to_string(), "k".to_string()]);
        assert_eq!(f.object_references().collect::<Vec<_>>(), vec!["Object1"]);
    }

    #[test]
    fn test_container_query_is_not_constant() {
        let f = compile("containerWidth() * 0.5");
        assert!(!f.is_constant);
        assert_eq!(
            f.dependency_list,
            vec![Dependency::Container { property: "width".into() }]
        );
        let f = compile("childCount()");
        assert_eq!(
            f.dependency_list,
            vec![Dependency::Own { property: "children".into() }]
        );
    }

    #[test]
    fn test_unknown_function_has_no_implicit_dependency() {
        let f = compile("mystery(1)");
        assert!(f.is_constant);
    }

    #[test]
    fn test_error_history_is_bounded() {
        let mut f = compile("$x");
        f.record_success(Value::Number(1.0));
        for i in 0..5 {
            f.record_error(EvalError::VariableNotFound(format!("x{i}")), 3);
        }
        assert_eq!(f.error_list.len(), 3);
        assert_eq!(f.last_error(), Some(&EvalError::VariableNotFound("x4".into())));
        assert!(f.failing);
        assert_eq!(f.last_value, Some(Value::Number(1.0)));
        f.record_success(Value::Number(2.0));
        assert!(!f.failing);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(compile("1").id, compile("1").id);
    }
}
