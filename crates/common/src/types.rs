use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique 64-bit identifier for an entity in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// World-partition instance number. Entities in different instances share
/// coordinates but never see each other.
pub type InstanceNumber = u32;

/// Position, heading and world-partition instance of an entity.
///
/// For a top-level entity this is its world location. For an entity held
/// inside a container it is relative to the parent and treated as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub position: Vec3,
    /// Heading in degrees.
    pub heading: f32,
    pub instance: InstanceNumber,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            heading: 0.0,
            instance: 0,
        }
    }
}

impl Location {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            position: Vec3::new(x, y, z),
            ..Self::default()
        }
    }

    pub fn with_instance(mut self, instance: InstanceNumber) -> Self {
        self.instance = instance;
        self
    }

    pub fn with_heading(mut self, heading: f32) -> Self {
        self.heading = heading;
        self
    }

    /// Squared distance on the horizontal (x/z) plane.
    pub fn planar_distance_squared(&self, other: &Location) -> f32 {
        let dx = self.position.x - other.position.x;
        let dz = self.position.z - other.position.z;
        dx * dx + dz * dz
    }

    /// Full 3-D distance, ignoring instance.
    pub fn distance_to(&self, other: &Location) -> f32 {
        self.position.distance(other.position)
    }
}

/// A 2-D cell coordinate in the spatial grid (the Y axis is not partitioned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub x: i32,
    pub z: i32,
}

impl CellCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chebyshev distance between two coordinates.
    pub fn chebyshev(&self, other: CellCoord) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}
