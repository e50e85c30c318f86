//! Formwork Core - Shared vocabulary for the formula and propagation engines
//!
//! This crate provides the fundamental types used throughout formwork:
//! - Object and property identity (ObjectId, EntityRef)
//! - Dynamic formula values and structured object properties
//! - Axis-aligned bounds for container recalculation
//! - The time-boxed cache shared by the evaluation layers
//! - Engine configuration

pub mod cache;
pub mod config;
pub mod error;
pub mod geometry;
pub mod id;
pub mod value;

pub use cache::{OwnedKey, TtlCache};
pub use config::{EngineConfig, ExpressionConfig, PropagationConfig};
pub use error::{FormworkError, Result};
pub use geometry::Bounds;
pub use id::{EntityRef, ObjectId, VARIABLE_OWNER};
pub use value::{split_path, Property, PropertyPath, Value, ValueType};

/// Well-known property names the engines agree on.
pub mod props {
    /// Horizontal extent of an object.
    pub const WIDTH: &str = "width";
    /// Vertical extent of an object.
    pub const HEIGHT: &str = "height";
    /// Depth extent of an object.
    pub const DEPTH: &str = "depth";
    /// Pseudo-property standing for an object's whole extent.
    pub const SIZE: &str = "size";
    /// Pseudo-property standing for an object's child list.
    pub const CHILDREN: &str = "children";
    /// Pseudo-property standing for an object's layout configuration.
    pub const LAYOUT: &str = "layout";
    /// Position along x.
    pub const X: &str = "x";
    /// Position along y.
    pub const Y: &str = "y";
    /// Position along z.
    pub const Z: &str = "z";
}
