//! Axis-aligned bounds used for container recalculation.

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in scene units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: DVec3,
    pub max: DVec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Bounds {
    /// The empty box: union identity.
    pub const EMPTY: Self = Self {
        min: DVec3::splat(f64::INFINITY),
        max: DVec3::splat(f64::NEG_INFINITY),
    };

    /// Create bounds from an origin corner and a size.
    pub fn from_origin_size(origin: DVec3, size: DVec3) -> Self {
        let a = origin;
        let b = origin + size;
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Whether the box contains no points.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Size along each axis; zero for an empty box.
    #[inline]
    pub fn size(self) -> DVec3 {
        if self.is_empty() {
            DVec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// Smallest box containing both.
    pub fn union(self, other: Self) -> Self {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Union of an arbitrary set of boxes.
    pub fn union_all(boxes: impl IntoIterator<Item = Self>) -> Self {
        boxes.into_iter().fold(Self::EMPTY, Self::union)
    }
}
