//! Scene-layer seam and an in-memory reference scene.

use std::collections::BTreeMap;

use formwork_core::{props, Bounds, EntityRef, ObjectId, Value};
use formwork_expr::{ObjectData, ObjectStore, ObjectTable};
use formwork_propagation::{
    ApplyError, BoundsContribution, ChangePayload, UpdateKind, UpdateOutcome, UpdateRequest,
};
use glam::DVec3;

/// What the orchestrator needs from the scene layer beyond read access.
pub trait SceneHost: ObjectStore {
    /// Write an evaluated value onto an object property. Returns a parent
    /// bounds contribution when the write moved or resized a contained object.
    fn apply_value(
        &mut self,
        entity: &EntityRef,
        value: &Value,
    ) -> Result<Option<BoundsContribution>, ApplyError>;

    /// Execute a size, layout, hierarchy or property change.
    fn apply_change(&mut self, request: &UpdateRequest) -> Result<UpdateOutcome, ApplyError>;

    /// Recalculate a container from the latest bounds of the listed children.
    fn apply_parent_bounds(
        &mut self,
        parent: &ObjectId,
        children: &BTreeMap<ObjectId, Bounds>,
    ) -> Result<(), ApplyError>;

    fn insert_object(&mut self, object: ObjectData);

    fn remove_object(&mut self, id: &ObjectId) -> Option<ObjectData>;
}

const GEOMETRY: [&str; 6] = [
    props::X,
    props::Y,
    props::Z,
    props::WIDTH,
    props::HEIGHT,
    props::DEPTH,
];

/// Scene held entirely in memory. Object bounds come from the `x y z`
/// position and `width height depth` size properties (missing ones read as 0).
#[derive(Debug, Default, Clone)]
pub struct MemoryScene {
    objects: ObjectTable,
    container_bounds: BTreeMap<ObjectId, Bounds>,
    recalculations: usize,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaf value at `object.path`.
    pub fn value(&self, object: &ObjectId, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        self.objects.get_object(object)?.value(&segments).cloned()
    }

    /// Bounds of one object from its own geometry properties.
    pub fn object_bounds(&self, id: &ObjectId) -> Option<Bounds> {
        let object = self.objects.get_object(id)?;
        let read = |name: &str| object.number(name).unwrap_or(0.0);
        Some(Bounds::from_origin_size(
            DVec3::new(read(props::X), read(props::Y), read(props::Z)),
            DVec3::new(read(props::WIDTH), read(props::HEIGHT), read(props::DEPTH)),
        ))
    }

    /// Last recalculated bounds of a container.
    pub fn container_bounds(&self, id: &ObjectId) -> Option<Bounds> {
        self.container_bounds.get(id).copied()
    }

    /// Number of container recalculations performed so far.
    pub fn recalculations(&self) -> usize {
        self.recalculations
    }

    fn contribution(&self, id: &ObjectId) -> Option<BoundsContribution> {
        let parent = self.objects.get_object(id)?.container.clone()?;
        Some(BoundsContribution {
            parent,
            child: id.clone(),
            bounds: self.object_bounds(id)?,
        })
    }

    fn require(&self, id: &ObjectId) -> Result<&ObjectData, ApplyError> {
        self.objects
            .get_object(id)
            .ok_or_else(|| ApplyError::ObjectNotFound(id.clone()))
    }

    fn recalculate(&mut self, parent: &ObjectId, overrides: &BTreeMap<ObjectId, Bounds>) {
        let union = Bounds::union_all(self.objects.children_of(parent).iter().filter_map(|c| {
            overrides
                .get(c)
                .copied()
                .or_else(|| self.object_bounds(c))
        }));
        self.container_bounds.insert(parent.clone(), union);
        self.recalculations += 1;
    }
}

impl ObjectStore for MemoryScene {
    fn get_object(&self, id: &ObjectId) -> Option<&ObjectData> {
        self.objects.get_object(id)
    }

    fn find_object_id_by_name(&self, name: &str) -> Option<ObjectId> {
        self.objects.find_object_id_by_name(name)
    }

    fn children_of(&self, container: &ObjectId) -> Vec<ObjectId> {
        self.objects.children_of(container)
    }
}

impl SceneHost for MemoryScene {
    fn apply_value(
        &mut self,
        entity: &EntityRef,
        value: &Value,
    ) -> Result<Option<BoundsContribution>, ApplyError> {
        if !self
            .objects
            .set_property(&entity.object, &entity.property, value.clone())
        {
            return Err(ApplyError::ObjectNotFound(entity.object.clone()));
        }
        if GEOMETRY.contains(&entity.property.as_str()) {
            Ok(self.contribution(&entity.object))
        } else {
            Ok(None)
        }
    }

    fn apply_change(&mut self, request: &UpdateRequest) -> Result<UpdateOutcome, ApplyError> {
        let id = &request.target.object;
        self.require(id)?;
        match (&request.kind, &request.payload) {
            (UpdateKind::SizeChange, payload) => {
                if let ChangePayload::Size {
                    width,
                    height,
                    depth,
                } = *payload
                {
                    let dims = [
                        (props::WIDTH, width),
                        (props::HEIGHT, height),
                        (props::DEPTH, depth),
                    ];
                    for (name, v) in dims {
                        self.objects.set_property(id, name, Value::Number(v));
                    }
                }
                Ok(UpdateOutcome {
                    value: None,
                    bounds: self.contribution(id),
                })
            }
            (UpdateKind::LayoutConfig, payload) => {
                if let ChangePayload::Layout { config } = payload {
                    self.objects
                        .set_property(id, props::LAYOUT, Value::String(config.clone()));
                }
                Ok(UpdateOutcome {
                    value: self.value(id, props::LAYOUT),
                    bounds: None,
                })
            }
            (UpdateKind::HierarchyChange, payload) => {
                let mut bounds = None;
                if let ChangePayload::Hierarchy {
                    previous_parent,
                    parent,
                } = payload
                {
                    let current = self.require(id)?.container.clone();
                    if current != *parent {
                        self.objects.reparent(id, parent.clone());
                    }
                    let left = previous_parent
                        .as_ref()
                        .filter(|p| Some(*p) != parent.as_ref());
                    if let Some(old) = left {
                        if self.objects.get_object(old).is_some() {
                            self.recalculate(old, &BTreeMap::new());
                        }
                    }
                    bounds = self.contribution(id);
                }
                let children = self.objects.children_of(id).len();
                Ok(UpdateOutcome {
                    value: Some(Value::Number(children as f64)),
                    bounds,
                })
            }
            (UpdateKind::PropertyChange, ChangePayload::Property { property, value }) => {
                let entity = EntityRef::new(id.clone(), property.as_str());
                let bounds = match value {
                    Some(v) => self.apply_value(&entity, v)?,
                    None if GEOMETRY.contains(&property.as_str()) => self.contribution(id),
                    None => None,
                };
                Ok(UpdateOutcome {
                    value: self.value(id, property),
                    bounds,
                })
            }
            (kind, payload) => Err(ApplyError::failed(format!(
                "scene cannot apply {kind} with a {} payload",
                payload.name()
            ))),
        }
    }

    fn apply_parent_bounds(
        &mut self,
        parent: &ObjectId,
        children: &BTreeMap<ObjectId, Bounds>,
    ) -> Result<(), ApplyError> {
        self.require(parent)?;
        self.recalculate(parent, children);
        Ok(())
    }

    fn insert_object(&mut self, object: ObjectData) {
        self.objects.insert(object);
    }

    fn remove_object(&mut self, id: &ObjectId) -> Option<ObjectData> {
        self.container_bounds.remove(id);
        self.objects.remove(id)
    }
}
