//! Property update path.
//!
//! Turns an edit into compile → edge swap → evaluate → apply → schedule, and
//! adapts the scene host to the propagation engine's drain so cascaded
//! recomputes re-evaluate the formulas they target.

use std::collections::BTreeMap;

use formwork_core::{split_path, Bounds, EngineConfig, EntityRef, ObjectId, Value};
use formwork_expr::{
    Dependency, EvalContext, ExpressionEngine, Formula, ObjectData, VariableScope, VariableTable,
    PARENT_REF, SELF_REF,
};
use formwork_propagation::{
    ApplyError, ChangePayload, DependencyEdge, DrainReport, EdgeKind, PropagationEngine,
    PropagationHandle, Priority, RequestId, UpdateApplier, UpdateKind, UpdateOutcome,
    UpdateRequest,
};
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::scene::SceneHost;

/// Owns both engines, the formula table and the variable store, and drives
/// a scene host.
pub struct Orchestrator<S: SceneHost> {
    expressions: ExpressionEngine,
    propagation: PropagationEngine,
    formulas: BTreeMap<EntityRef, Formula>,
    variables: VariableTable,
    scene: S,
}

impl<S: SceneHost> Orchestrator<S> {
    pub fn new(scene: S, config: &EngineConfig) -> Self {
        Self {
            expressions: ExpressionEngine::new(config.expression.clone()),
            propagation: PropagationEngine::new(config.propagation.clone()),
            formulas: BTreeMap::new(),
            variables: VariableTable::new(),
            scene,
        }
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn expressions(&self) -> &ExpressionEngine {
        &self.expressions
    }

    /// Mutable engine access, e.g. to register extra functions.
    pub fn expressions_mut(&mut self) -> &mut ExpressionEngine {
        &mut self.expressions
    }

    pub fn propagation(&self) -> &PropagationEngine {
        &self.propagation
    }

    pub fn variables(&self) -> &VariableTable {
        &self.variables
    }

    /// Submission handle usable while a drain is running.
    pub fn handle(&self) -> PropagationHandle {
        self.propagation.handle()
    }

    pub fn formula(&self, object: &ObjectId, property: &str) -> Option<&Formula> {
        self.formulas.get(&EntityRef::new(object.clone(), property))
    }

    /// Every formula-driven property, in entity order.
    pub fn formulas(&self) -> impl Iterator<Item = (&EntityRef, &Formula)> {
        self.formulas.iter()
    }

    /// Current scene value of `object.property` (dotted paths allowed).
    pub fn property_value(&self, object: &ObjectId, property: &str) -> Option<Value> {
        let object = self.scene.get_object(object)?;
        self.scene.get_property(object, &split_path(property))
    }

    /// Attach a formula to a property.
    ///
    /// A compile error or a cycle leaves the previous formula and its edges
    /// in place. An evaluation error still installs the formula, so it picks
    /// up once its inputs appear, and is returned to the caller.
    pub fn set_property_formula(
        &mut self,
        object: &ObjectId,
        property: &str,
        source: &str,
    ) -> Result<Value> {
        if self.scene.get_object(object).is_none() {
            return Err(OrchestratorError::ObjectNotFound(object.clone()));
        }
        let mut formula = self.expressions.compile_formula(source, object.clone())?;
        for issue in self.expressions.validate_formula(&formula) {
            warn!(%object, property, source, %issue, "formula will fail when evaluated");
        }

        let target = EntityRef::new(object.clone(), property);
        let container = self.container_of(object);
        let producers = self.producers(&formula, container.as_ref());
        self.propagation.replace_dependencies(&target, producers)?;

        let result = {
            let ctx = EvalContext::for_object(object.clone(), &self.scene, &self.variables);
            self.expressions.evaluate_formula(&mut formula, &ctx)
        };
        self.formulas.insert(target.clone(), formula);
        let value = result?;

        self.scene.apply_value(&target, &value)?;
        self.invalidate_downstream(std::slice::from_ref(&target));
        let payload = ChangePayload::Property {
            property: property.to_string(),
            value: Some(value.clone()),
        };
        self.propagation
            .propagate_change(object, UpdateKind::PropertyChange, payload, Priority::Normal)?;
        info!(%target, source, %value, "formula set");
        Ok(value)
    }

    /// Write a plain value, replacing any formula on the property.
    pub fn set_property_value(
        &mut self,
        object: &ObjectId,
        property: &str,
        value: Value,
        priority: Priority,
    ) -> Result<RequestId> {
        let target = EntityRef::new(object.clone(), property);
        self.detach_formula(&target);
        self.scene.apply_value(&target, &value)?;
        self.invalidate_downstream(std::slice::from_ref(&target));
        let payload = ChangePayload::Property {
            property: property.to_string(),
            value: Some(value),
        };
        Ok(self
            .propagation
            .propagate_change(object, UpdateKind::PropertyChange, payload, priority)?)
    }

    /// Drop the formula on a property, keeping its last applied value.
    pub fn clear_property(&mut self, object: &ObjectId, property: &str) -> Option<Formula> {
        self.detach_formula(&EntityRef::new(object.clone(), property))
    }

    /// Insert an object and bind formulas that were waiting for it.
    pub fn add_object(&mut self, object: ObjectData) -> Result<RequestId> {
        let id = object.id.clone();
        let name = object.name.clone();
        let container = object.container.clone();
        self.scene.insert_object(object);

        let waiting: Vec<EntityRef> = self
            .formulas
            .iter()
            .filter(|(target, formula)| {
                formula
                    .object_references()
                    .any(|r| r == id.as_str() || r == name)
                    || self.container_of(&target.object).as_ref() == Some(&id)
            })
            .map(|(target, _)| target.clone())
            .collect();
        self.invalidate_downstream(&waiting);
        for target in waiting {
            let container = self.container_of(&target.object);
            self.rebind(&target, container.as_ref());
            self.schedule_reevaluation(&target, Priority::Normal)?;
        }

        debug!(object = %id, "object added");
        let payload = ChangePayload::Hierarchy {
            previous_parent: None,
            parent: container,
        };
        Ok(self
            .propagation
            .propagate_change(&id, UpdateKind::HierarchyChange, payload, Priority::Normal)?)
    }

    /// Remove an object with its formulas, edges and context variables.
    /// Consumers elsewhere are scheduled and fail until it comes back.
    pub fn remove_object(&mut self, id: &ObjectId) -> Result<ObjectData> {
        let removed = self
            .scene
            .remove_object(id)
            .ok_or_else(|| OrchestratorError::ObjectNotFound(id.clone()))?;

        let owned: Vec<EntityRef> = self
            .formulas
            .keys()
            .filter(|target| &target.object == id)
            .cloned()
            .collect();
        for target in &owned {
            self.detach_formula(target);
        }
        let variables = self.variables.remove_context(id);

        let mut produced: Vec<String> = self
            .propagation
            .graph()
            .edges()
            .filter(|(producer, _, _)| &producer.object == id)
            .map(|(producer, _, _)| producer.property.clone())
            .collect();
        produced.sort();
        produced.dedup();
        let changed: Vec<EntityRef> = produced
            .iter()
            .map(|property| EntityRef::new(id.clone(), property.as_str()))
            .collect();
        self.invalidate_downstream(&changed);
        for property in produced {
            let payload = ChangePayload::Property {
                property,
                value: None,
            };
            self.propagation
                .propagate_change(id, UpdateKind::PropertyChange, payload, Priority::Normal)?;
        }
        if let Some(parent) = &removed.container {
            self.propagation.propagate_change(
                parent,
                UpdateKind::HierarchyChange,
                ChangePayload::None,
                Priority::Normal,
            )?;
        }
        let edges = self.propagation.remove_object(id);
        info!(object = %id, formulas = owned.len(), variables, edges, "object removed");
        Ok(removed)
    }

    pub fn define_variable(
        &mut self,
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
        value: Value,
    ) -> Result<RequestId> {
        self.variables.define(name, scope, context, value.clone())?;
        self.schedule_variable(name, Some(value))
    }

    pub fn update_variable(
        &mut self,
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
        value: Value,
    ) -> Result<RequestId> {
        self.variables.update(name, scope, context, value.clone())?;
        self.schedule_variable(name, Some(value))
    }

    pub fn delete_variable(
        &mut self,
        name: &str,
        scope: VariableScope,
        context: Option<&ObjectId>,
    ) -> Result<RequestId> {
        self.variables.delete(name, scope, context)?;
        self.schedule_variable(name, None)
    }

    /// Forward a scene-layer change such as `size_change` or `hierarchy_change`.
    pub fn notify_change(
        &mut self,
        object: &ObjectId,
        kind: &str,
        payload: ChangePayload,
        priority: Priority,
    ) -> Result<RequestId> {
        let kind: UpdateKind = kind.parse()?;
        let target = kind.root_target(object, &payload)?;
        self.invalidate_downstream(&kind.affected_entities(&target, &payload));
        let moved_to = match (&kind, &payload) {
            (UpdateKind::HierarchyChange, ChangePayload::Hierarchy { parent, .. }) => {
                Some(parent.clone())
            }
            _ => None,
        };
        let id = self
            .propagation
            .propagate_change(object, kind, payload, priority)?;

        // Formulas on a moved object now read from the new container.
        if let Some(parent) = moved_to {
            let owned: Vec<EntityRef> = self
                .formulas
                .keys()
                .filter(|target| &target.object == object)
                .cloned()
                .collect();
            for target in owned {
                self.rebind(&target, parent.as_ref());
                self.schedule_reevaluation(&target, priority)?;
            }
        }
        Ok(id)
    }

    /// Run one scheduling pass against the scene.
    pub fn drain(&mut self) -> DrainReport {
        let mut applier = Applier {
            scene: &mut self.scene,
            expressions: &self.expressions,
            formulas: &mut self.formulas,
            variables: &self.variables,
        };
        let report = self.propagation.drain(&mut applier);
        // Consumers left for the next drain may have cached pre-change results.
        if report.remaining > 0 {
            self.expressions.clear_caches();
        }
        report
    }

    /// Re-evaluate a formula property now, through the evaluation cache.
    /// The result is not applied to the scene.
    pub fn evaluate_property(&mut self, object: &ObjectId, property: &str) -> Result<Value> {
        let target = EntityRef::new(object.clone(), property);
        let formula = self
            .formulas
            .get_mut(&target)
            .ok_or_else(|| OrchestratorError::PropertyNotFound(target.clone()))?;
        let ctx = EvalContext::for_object(object.clone(), &self.scene, &self.variables);
        Ok(self.expressions.evaluate_cached(formula, &ctx)?)
    }

    fn container_of(&self, object: &ObjectId) -> Option<ObjectId> {
        self.scene.get_object(object)?.container.clone()
    }

    /// Graph producers for a formula owned by `formula.object_id`.
    fn producers(
        &self,
        formula: &Formula,
        container: Option<&ObjectId>,
    ) -> Vec<(EntityRef, DependencyEdge)> {
        let owner = &formula.object_id;
        let mut producers = Vec::new();
        for dependency in &formula.dependency_list {
            let (entity, kind) = match dependency {
                Dependency::Object { reference, path } => {
                    let object = match reference.as_str() {
                        SELF_REF => owner.clone(),
                        PARENT_REF => match container {
                            Some(c) => c.clone(),
                            None => continue,
                        },
                        other => self.resolve_reference(other),
                    };
                    let property = path.first().cloned().unwrap_or_default();
                    (EntityRef::new(object, property), EdgeKind::ObjectRef)
                }
                Dependency::Container { property } => match container {
                    Some(c) => (EntityRef::new(c.clone(), property.as_str()), EdgeKind::Implicit),
                    None => continue,
                },
                Dependency::Own { property } => {
                    (EntityRef::new(owner.clone(), property.as_str()), EdgeKind::Implicit)
                }
            };
            producers.push((
                entity,
                DependencyEdge {
                    kind,
                    metadata: Some(dependency.to_string()),
                },
            ));
        }
        for variable in &formula.variable_list {
            producers.push((
                EntityRef::variable(variable.as_str()),
                DependencyEdge {
                    kind: EdgeKind::Variable,
                    metadata: Some(format!("${variable}")),
                },
            ));
        }
        producers
    }

    /// Id first, then name. Unresolved references are keyed by the raw text
    /// so the edge matches once an object with that id appears.
    fn resolve_reference(&self, reference: &str) -> ObjectId {
        let id = ObjectId::new(reference);
        if self.scene.get_object(&id).is_some() {
            return id;
        }
        self.scene.find_object_id_by_name(reference).unwrap_or(id)
    }

    fn rebind(&mut self, target: &EntityRef, container: Option<&ObjectId>) {
        let Some(formula) = self.formulas.get(target) else {
            return;
        };
        let producers = self.producers(formula, container);
        if let Err(err) = self.propagation.replace_dependencies(target, producers) {
            warn!(%target, error = %err, "rebinding would create a cycle, keeping old edges");
        }
    }

    /// A property change on a formula property re-evaluates it.
    fn schedule_reevaluation(&mut self, target: &EntityRef, priority: Priority) -> Result<()> {
        let payload = ChangePayload::Property {
            property: target.property.clone(),
            value: None,
        };
        self.propagation.propagate_change(
            &target.object,
            UpdateKind::PropertyChange,
            payload,
            priority,
        )?;
        Ok(())
    }

    fn schedule_variable(&mut self, name: &str, value: Option<Value>) -> Result<RequestId> {
        let variable = EntityRef::variable(name);
        self.invalidate_downstream(std::slice::from_ref(&variable));
        let payload = ChangePayload::Property {
            property: variable.property,
            value,
        };
        Ok(self.propagation.propagate_change(
            &variable.object,
            UpdateKind::PropertyChange,
            payload,
            Priority::Normal,
        )?)
    }

    /// Drop cached results that read any of `changed`, directly or through
    /// other formulas.
    fn invalidate_downstream(&self, changed: &[EntityRef]) {
        let downstream = self.propagation.graph().get_downstream_all(changed);
        let mut owners: Vec<&ObjectId> = changed.iter().map(|e| &e.object).collect();
        owners.extend(downstream.iter().map(|e| &e.object));
        owners.sort();
        owners.dedup();
        for owner in owners {
            self.expressions.invalidate_object(owner);
        }
    }

    fn detach_formula(&mut self, target: &EntityRef) -> Option<Formula> {
        let formula = self.formulas.remove(target)?;
        let edges = self.propagation.remove_dependencies_by_consumer(target);
        debug!(%target, edges = edges.len(), "formula detached");
        Some(formula)
    }
}

/// Borrowed view handed to the propagation drain.
struct Applier<'a, S: SceneHost> {
    scene: &'a mut S,
    expressions: &'a ExpressionEngine,
    formulas: &'a mut BTreeMap<EntityRef, Formula>,
    variables: &'a VariableTable,
}

impl<S: SceneHost> Applier<'_, S> {
    fn evaluate(&mut self, target: &EntityRef) -> std::result::Result<Option<UpdateOutcome>, ApplyError> {
        let Some(formula) = self.formulas.get_mut(target) else {
            return Ok(None);
        };
        let result = {
            let ctx =
                EvalContext::for_object(target.object.clone(), &*self.scene, self.variables);
            self.expressions.evaluate_cached(formula, &ctx)
        };
        let value = result.map_err(|e| ApplyError::failed(format!("{target}: {e}")))?;
        let bounds = self.scene.apply_value(target, &value)?;
        Ok(Some(UpdateOutcome {
            value: Some(value),
            bounds,
        }))
    }
}

impl<S: SceneHost> UpdateApplier for Applier<'_, S> {
    fn apply(&mut self, request: &UpdateRequest) -> std::result::Result<UpdateOutcome, ApplyError> {
        let target = &request.target;
        if target.is_variable() {
            let value = match &request.payload {
                ChangePayload::Property { value, .. } => value.clone(),
                _ => None,
            };
            return Ok(UpdateOutcome {
                value,
                bounds: None,
            });
        }

        self.expressions.invalidate_object(&target.object);
        if let Some(container) = self
            .scene
            .get_object(&target.object)
            .and_then(|o| o.container.clone())
        {
            self.expressions.invalidate_object(&container);
        }

        // A formula owns its property: any change to it re-runs the formula.
        if matches!(
            request.kind,
            UpdateKind::Recompute | UpdateKind::PropertyChange
        ) {
            if let Some(outcome) = self.evaluate(target)? {
                return Ok(outcome);
            }
        }
        match (&request.kind, &request.payload) {
            (UpdateKind::Recompute, _) => Ok(UpdateOutcome::default()),
            // Notification about an object the scene no longer has.
            (UpdateKind::PropertyChange, ChangePayload::Property { value: None, .. })
                if self.scene.get_object(&target.object).is_none() =>
            {
                Ok(UpdateOutcome::default())
            }
            _ => self.scene.apply_change(request),
        }
    }

    fn apply_parent_bounds(
        &mut self,
        parent: &ObjectId,
        children: &BTreeMap<ObjectId, Bounds>,
    ) -> std::result::Result<(), ApplyError> {
        self.scene.apply_parent_bounds(parent, children)
    }
}
