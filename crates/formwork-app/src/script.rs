//! Scene scripts: objects, variables, formulas and a list of edits, run
//! against an in-memory scene.

use std::path::Path;

use anyhow::{Context, Result};
use formwork_core::{EngineConfig, ObjectId, Value};
use formwork_expr::{ObjectData, VariableScope};
use formwork_orchestrator::{MemoryScene, Orchestrator, SceneHost};
use formwork_propagation::{ChangePayload, Priority};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneScript {
    pub objects: Vec<ObjectData>,
    pub variables: Vec<VariableDef>,
    pub formulas: Vec<FormulaDef>,
    pub edits: Vec<Edit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,
    #[serde(default = "global_scope")]
    pub scope: VariableScope,
    #[serde(default)]
    pub context: Option<ObjectId>,
    pub value: Value,
}

fn global_scope() -> VariableScope {
    VariableScope::Global
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormulaDef {
    pub object: ObjectId,
    pub property: String,
    pub source: String,
}

/// One step applied after the initial scene is built. Each edit is followed
/// by a drain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit {
    SetValue {
        object: ObjectId,
        property: String,
        value: Value,
    },
    SetFormula(FormulaDef),
    Notify {
        object: ObjectId,
        kind: String,
        #[serde(default)]
        payload: ChangePayload,
        #[serde(default)]
        priority: Priority,
    },
    UpdateVariable(VariableDef),
    AddObject {
        object: ObjectData,
    },
    RemoveObject {
        object: ObjectId,
    },
}

impl SceneScript {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading scene script {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("parsing scene script {}", path.display()))
    }

    /// Cabinet with two doors split by a shared gap.
    pub fn demo() -> Self {
        let cabinet = ObjectData::new("cabinet", "Cabinet")
            .with_property("width", 120.0)
            .with_property("height", 80.0)
            .with_property("depth", 60.0);
        let door = |id: &str, name: &str| {
            ObjectData::new(id, name)
                .with_container("cabinet")
                .with_property("height", 0.0)
        };
        let formula = |object: &str, property: &str, source: &str| FormulaDef {
            object: ObjectId::new(object),
            property: property.to_string(),
            source: source.to_string(),
        };
        Self {
            objects: vec![cabinet, door("door1", "LeftDoor"), door("door2", "RightDoor")],
            variables: vec![VariableDef {
                name: "gap".into(),
                scope: VariableScope::Global,
                context: None,
                value: Value::Number(2.0),
            }],
            formulas: vec![
                formula(
                    "door1",
                    "width",
                    "(containerWidth() - $gap * (siblingCount() + 1)) / siblingCount()",
                ),
                formula("door1", "height", "containerHeight() - $gap * 2"),
                formula("door2", "width", "LeftDoor.width"),
                formula("door2", "height", "LeftDoor.height"),
                formula("door1", "x", "$gap"),
                formula("door2", "x", "LeftDoor.x + LeftDoor.width + $gap"),
            ],
            edits: vec![
                Edit::Notify {
                    object: ObjectId::new("cabinet"),
                    kind: "size_change".into(),
                    payload: ChangePayload::Size {
                        width: 160.0,
                        height: 90.0,
                        depth: 60.0,
                    },
                    priority: Priority::Immediate,
                },
                Edit::UpdateVariable(VariableDef {
                    name: "gap".into(),
                    scope: VariableScope::Global,
                    context: None,
                    value: Value::Number(3.0),
                }),
            ],
        }
    }

    /// Build the scene, apply every edit and return the orchestrator.
    pub fn run(&self, config: &EngineConfig) -> Result<Orchestrator<MemoryScene>> {
        let mut scene = MemoryScene::new();
        for object in &self.objects {
            scene.insert_object(object.clone());
        }
        let mut orchestrator = Orchestrator::new(scene, config);

        for v in &self.variables {
            orchestrator
                .define_variable(&v.name, v.scope, v.context.as_ref(), v.value.clone())
                .with_context(|| format!("defining ${}", v.name))?;
        }
        for f in &self.formulas {
            // A formula may fail until the scene settles; the failure is
            // recorded on the formula and shown in the report.
            if let Err(e) = orchestrator.set_property_formula(&f.object, &f.property, &f.source) {
                warn!(object = %f.object, property = %f.property, error = %e, "formula not applied");
            }
        }
        orchestrator.drain();

        for (step, edit) in self.edits.iter().enumerate() {
            if let Err(e) = apply_edit(&mut orchestrator, edit) {
                warn!(step, error = %e, "edit rejected");
                continue;
            }
            let report = orchestrator.drain();
            info!(
                step,
                applied = report.applied.len(),
                failed = report.failed.len(),
                "edit applied"
            );
        }
        Ok(orchestrator)
    }
}

fn apply_edit(o: &mut Orchestrator<MemoryScene>, edit: &Edit) -> Result<()> {
    match edit {
        Edit::SetValue {
            object,
            property,
            value,
        } => {
            o.set_property_value(object, property, value.clone(), Priority::Normal)?;
        }
        Edit::SetFormula(f) => {
            o.set_property_formula(&f.object, &f.property, &f.source)?;
        }
        Edit::Notify {
            object,
            kind,
            payload,
            priority,
        } => {
            o.notify_change(object, kind, payload.clone(), *priority)?;
        }
        Edit::UpdateVariable(v) => {
            o.update_variable(&v.name, v.scope, v.context.as_ref(), v.value.clone())?;
        }
        Edit::AddObject { object } => {
            o.add_object(object.clone())?;
        }
        Edit::RemoveObject { object } => {
            o.remove_object(object)?;
        }
    }
    Ok(())
}

/// One line per formula property: its value, or its error with the last
/// good value.
pub fn report(orchestrator: &Orchestrator<MemoryScene>) -> Vec<String> {
    orchestrator
        .formulas()
        .map(|(target, formula)| {
            let shown = orchestrator
                .property_value(&target.object, &target.property)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            match (formula.failing, formula.last_error()) {
                (true, Some(error)) => {
                    format!("{target} = {shown}  [error: {error}]  ({})", formula.source_text)
                }
                _ => format!("{target} = {shown}  ({})", formula.source_text),
            }
        })
        .collect()
}
