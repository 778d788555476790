use interest_common::EntityId;
use interest_kernel::{EntityKind, World};
use serde::{Deserialize, Serialize};

/// Where a move, teleport or transfer should leave the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Directly in the world, top-level.
    World,
    /// Inside an existing container.
    Parent(EntityId),
    /// Inside a building's interior cell, looked up by its number.
    BuildingCell { building: EntityId, number: u32 },
}

impl From<Option<EntityId>> for Destination {
    fn from(parent: Option<EntityId>) -> Self {
        parent.map_or(Self::World, Self::Parent)
    }
}

/// Building layout lookups.
pub trait Geometry: Send + Sync {
    /// The interior cell `number` of `building`, if there is one.
    fn cell_by_number(&self, world: &World, building: EntityId, number: u32) -> Option<EntityId>;
}

/// Resolves interior cells from the containment graph: a building's cells are
/// its contained children of kind [`EntityKind::Cell`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphGeometry;

impl Geometry for GraphGeometry {
    fn cell_by_number(&self, world: &World, building: EntityId, number: u32) -> Option<EntityId> {
        let building = world.get(building)?;
        building.contained().iter().copied().find(|child| {
            world
                .get(*child)
                .is_some_and(|c| c.kind() == EntityKind::Cell { number })
        })
    }
}
