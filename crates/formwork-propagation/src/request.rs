//! Update requests and the vocabulary around them.

use std::fmt;
use std::str::FromStr;

use formwork_core::{props, Bounds, EntityRef, ObjectId, Value};
use serde::{Deserialize, Serialize};

use crate::error::PropagationError;

/// Identifier of one update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling band. Lower value is served first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Direct user manipulation.
    Immediate = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    /// Background optimization.
    Batch = 4,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Immediate,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Batch,
    ];

    pub fn band(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of change a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    SizeChange,
    LayoutConfig,
    HierarchyChange,
    PropertyChange,
    /// Re-evaluation of a consumer after one of its producers changed.
    /// Only the scheduler creates these.
    Recompute,
}

impl UpdateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SizeChange => "size_change",
            Self::LayoutConfig => "layout_config",
            Self::HierarchyChange => "hierarchy_change",
            Self::PropertyChange => "property_change",
            Self::Recompute => "recompute",
        }
    }

    /// Entity a change of this kind to `object` is keyed by.
    pub fn root_target(
        self,
        object: &ObjectId,
        payload: &ChangePayload,
    ) -> Result<EntityRef, PropagationError> {
        let property = match (self, payload) {
            (Self::SizeChange, ChangePayload::Size { .. } | ChangePayload::None) => props::SIZE,
            (Self::LayoutConfig, ChangePayload::Layout { .. } | ChangePayload::None) => {
                props::LAYOUT
            }
            (Self::HierarchyChange, ChangePayload::Hierarchy { .. } | ChangePayload::None) => {
                props::CHILDREN
            }
            (Self::PropertyChange, ChangePayload::Property { property, .. })
            | (Self::Recompute, ChangePayload::Recompute { property, .. }) => property.as_str(),
            (kind, payload) => {
                return Err(PropagationError::PayloadMismatch {
                    kind: kind.as_str(),
                    payload: payload.name(),
                })
            }
        };
        Ok(EntityRef::new(object.clone(), property))
    }

    /// Entities whose consumers must re-run after a change of this kind.
    pub fn affected_entities(self, target: &EntityRef, payload: &ChangePayload) -> Vec<EntityRef> {
        let object = &target.object;
        match self {
            Self::SizeChange => [props::WIDTH, props::HEIGHT, props::DEPTH]
                .into_iter()
                .map(|p| EntityRef::new(object.clone(), p))
                .collect(),
            Self::LayoutConfig => vec![EntityRef::new(object.clone(), props::LAYOUT)],
            Self::HierarchyChange => {
                let mut entities = vec![EntityRef::new(object.clone(), props::CHILDREN)];
                if let ChangePayload::Hierarchy {
                    previous_parent,
                    parent,
                } = payload
                {
                    for p in [previous_parent, parent].into_iter().flatten() {
                        let entity = EntityRef::new(p.clone(), props::CHILDREN);
                        if !entities.contains(&entity) {
                            entities.push(entity);
                        }
                    }
                }
                entities
            }
            Self::PropertyChange | Self::Recompute => vec![target.clone()],
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateKind {
    type Err = PropagationError;

    /// Parses the four externally submitted kinds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "size_change" => Ok(Self::SizeChange),
            "layout_config" => Ok(Self::LayoutConfig),
            "hierarchy_change" => Ok(Self::HierarchyChange),
            "property_change" => Ok(Self::PropertyChange),
            other => Err(PropagationError::UnknownUpdateKind(other.to_string())),
        }
    }
}

/// Data carried by a request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangePayload {
    #[default]
    None,
    Size {
        width: f64,
        height: f64,
        depth: f64,
    },
    Layout {
        config: String,
    },
    Hierarchy {
        previous_parent: Option<ObjectId>,
        parent: Option<ObjectId>,
    },
    Property {
        property: String,
        value: Option<Value>,
    },
    Recompute {
        property: String,
        /// Producer whose change triggered this request.
        trigger: EntityRef,
        /// Producer's new value, when it has one.
        trigger_value: Option<Value>,
    },
}

impl ChangePayload {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Size { .. } => "size",
            Self::Layout { .. } => "layout",
            Self::Hierarchy { .. } => "hierarchy",
            Self::Property { .. } => "property",
            Self::Recompute { .. } => "recompute",
        }
    }
}

/// Lifecycle of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Queued,
    Processing,
    Applied,
    Failed,
    /// Replaced by a newer external change to the same target before it ran.
    Superseded,
}

/// One scheduled unit of work.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub id: RequestId,
    /// The external change this request descends from.
    pub root: RequestId,
    pub target: EntityRef,
    pub kind: UpdateKind,
    pub payload: ChangePayload,
    pub priority: Priority,
    pub state: RequestState,
}

impl UpdateRequest {
    pub fn new(
        id: RequestId,
        root: RequestId,
        target: EntityRef,
        kind: UpdateKind,
        payload: ChangePayload,
        priority: Priority,
    ) -> Self {
        Self {
            id,
            root,
            target,
            kind,
            payload,
            priority,
            state: RequestState::Queued,
        }
    }

    /// Entities whose consumers cascade once this request applies.
    pub fn affected_entities(&self) -> Vec<EntityRef> {
        self.kind.affected_entities(&self.target, &self.payload)
    }
}

/// A child's new bounds, contributed toward its parent's recalculation.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundsContribution {
    pub parent: ObjectId,
    pub child: ObjectId,
    pub bounds: Bounds,
}

/// What applying a request produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// New value of the target, handed to cascaded consumers.
    pub value: Option<Value>,
    /// Parent recalculation this update asks for.
    pub bounds: Option<BoundsContribution>,
}

impl UpdateOutcome {
    pub fn value(value: Value) -> Self {
        Self {
            value: Some(value),
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, parent: ObjectId, child: ObjectId, bounds: Bounds) -> Self {
        self.bounds = Some(BoundsContribution {
            parent,
            child,
            bounds,
        });
        self
    }
}

/// A request that failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateFailure {
    pub request: RequestId,
    pub root: RequestId,
    pub target: EntityRef,
    pub reason: String,
}
