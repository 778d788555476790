//! Shared types for the interest engine: entity ids, locations, cell coordinates.

mod types;

pub use types::{CellCoord, EntityId, InstanceNumber, Location};
