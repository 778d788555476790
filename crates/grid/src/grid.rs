use std::collections::{BTreeMap, BTreeSet};

use interest_common::{CellCoord, EntityId, Location};
use interest_kernel::World;

use crate::cell::RegionCell;
use crate::config::{GridConfig, GridError};

/// A broken grid invariant found by [`SpatialGrid::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("top-level entity {0} has no region cell")]
    NotPlaced(EntityId),
    #[error("entity {entity} references cell {actual:?} but should be in {expected:?}")]
    CellMismatch {
        entity: EntityId,
        expected: Option<CellCoord>,
        actual: Option<CellCoord>,
    },
    #[error("entity {entity} references cell {cell} but is not a member of it")]
    MissingMembership { entity: EntityId, cell: CellCoord },
    #[error("cell {cell} holds {entity}, which does not reference it")]
    StrayMember { entity: EntityId, cell: CellCoord },
    #[error("entity {0} is a member of more than one cell")]
    DuplicateMembership(EntityId),
}

/// Fixed 2-D array of region cells covering the bounded world plane.
///
/// Cell membership is only changed through `place`, `move_entity` and
/// `remove`, which take the world mutably; a caller holding the world
/// read-only therefore sees membership and cell references in agreement.
pub struct SpatialGrid {
    config: GridConfig,
    chunk_width: f32,
    half_width: f32,
    cells: Vec<RegionCell>,
}

impl SpatialGrid {
    /// Build the grid and link every cell to its Chebyshev neighbours,
    /// clamped at the world edges.
    pub fn new(config: GridConfig) -> Result<Self, GridError> {
        config.validate()?;
        let n = config.chunks_across as i32;
        let mut cells = Vec::with_capacity((n * n) as usize);
        for z in 0..n {
            for x in 0..n {
                let mut neighbors = Vec::with_capacity(8);
                for nz in (z - 1).max(0)..=(z + 1).min(n - 1) {
                    for nx in (x - 1).max(0)..=(x + 1).min(n - 1) {
                        if nx == x && nz == z {
                            continue;
                        }
                        neighbors.push((nz * n + nx) as usize);
                    }
                }
                cells.push(RegionCell::new(CellCoord::new(x, z), neighbors));
            }
        }
        Ok(Self {
            chunk_width: config.chunk_width(),
            half_width: config.half_width(),
            config,
            cells,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// All cells, row-major by z then x.
    pub fn cells(&self) -> &[RegionCell] {
        &self.cells
    }

    pub fn cell(&self, coord: CellCoord) -> Option<&RegionCell> {
        let n = self.config.chunks_across as i32;
        if coord.x < 0 || coord.z < 0 || coord.x >= n || coord.z >= n {
            return None;
        }
        self.cells.get((coord.z * n + coord.x) as usize)
    }

    /// Map a world position to its cell. Coordinates outside the map clamp
    /// to the nearest edge cell.
    pub fn resolve_cell(&self, x: f32, z: f32) -> CellCoord {
        let max = i64::from(self.config.chunks_across) - 1;
        let index = |v: f32| (((v + self.half_width) / self.chunk_width).floor() as i64).clamp(0, max) as i32;
        CellCoord::new(index(x), index(z))
    }

    /// Put an entity into the grid. Contained entities inherit the cell of
    /// their topmost ancestor.
    pub fn place(&self, world: &mut World, id: EntityId) {
        self.move_entity(world, id);
    }

    /// Re-resolve an entity's cell after its position or parent changed,
    /// re-homing its children if the cell changed.
    pub fn move_entity(&self, world: &mut World, id: EntityId) {
        match world.super_parent(id) {
            Some(root) => self.move_in_parent(world, id, root),
            None => self.move_in_world(world, id),
        }
    }

    /// Clear cell membership for the entity and all of its children.
    pub fn remove(&self, world: &mut World, id: EntityId) {
        let Some(entity) = world.get_mut(id) else {
            return;
        };
        let Some(current) = entity.set_cell(None) else {
            return;
        };
        let children = entity.children();
        if let Some(cell) = self.cell(current) {
            cell.remove(id);
        }
        tracing::trace!(%id, cell = %current, "removed from grid");
        for child in children {
            self.remove(world, child);
        }
    }

    fn move_in_world(&self, world: &mut World, id: EntityId) {
        let Some(entity) = world.get_mut(id) else {
            return;
        };
        let coord = self.resolve_cell(entity.location.position.x, entity.location.position.z);
        let current = entity.set_cell(Some(coord));
        if current == Some(coord) {
            return;
        }
        let children = entity.children();
        self.rehome(id, current, coord);
        for child in children {
            self.move_in_parent(world, child, id);
        }
    }

    fn move_in_parent(&self, world: &mut World, id: EntityId, root: EntityId) {
        let Some(coord) = world.get(root).and_then(|r| r.cell()) else {
            // Root not in the grid yet; this entity joins when the root does.
            self.remove(world, id);
            return;
        };
        let Some(entity) = world.get_mut(id) else {
            return;
        };
        let current = entity.set_cell(Some(coord));
        if current == Some(coord) {
            return;
        }
        let children = entity.children();
        self.rehome(id, current, coord);
        for child in children {
            self.move_in_parent(world, child, root);
        }
    }

    fn rehome(&self, id: EntityId, from: Option<CellCoord>, to: CellCoord) {
        if let Some(old) = from.and_then(|c| self.cell(c)) {
            old.remove(id);
        }
        if let Some(cell) = self.cell(to) {
            cell.add(id);
        }
        tracing::debug!(%id, from = ?from, to = %to, "entity changed region cell");
    }

    /// Everything observable from `id`: members of its cell and the
    /// neighbouring cells that share its instance and are within
    /// `max(load ranges)`, plus every child of each accepted candidate.
    /// Contained entities are measured with their root's location and load
    /// range on both sides of the test.
    pub fn query(&self, world: &World, id: EntityId) -> BTreeSet<EntityId> {
        let mut within = BTreeSet::new();
        let Some(entity) = world.get(id) else {
            return within;
        };
        let coord = entity.cell().or_else(|| {
            world
                .super_parent(id)
                .and_then(|root| world.get(root))
                .and_then(|root| root.cell())
        });
        let (Some(coord), Some(origin)) = (coord, world.world_location(id)) else {
            return within;
        };
        let Some(cell) = self.cell(coord) else {
            return within;
        };

        let load_range = world.effective_load_range(id).unwrap_or(entity.load_range);
        self.scan(world, cell, id, &origin, load_range, &mut within);
        for &neighbor in cell.neighbors() {
            self.scan(world, &self.cells[neighbor], id, &origin, load_range, &mut within);
        }
        // Own children are picked up through the parent's recursion.
        within.remove(&id);
        within
    }

    fn scan(
        &self,
        world: &World,
        cell: &RegionCell,
        id: EntityId,
        origin: &Location,
        load_range: f32,
        within: &mut BTreeSet<EntityId>,
    ) {
        for &candidate in cell.members().iter() {
            if candidate == id {
                continue;
            }
            let (Some(test_range), Some(location)) = (
                world.effective_load_range(candidate),
                world.world_location(candidate),
            ) else {
                continue;
            };
            if location.instance != origin.instance {
                continue;
            }
            let range = load_range.max(test_range);
            if range >= self.config.unlimited_range
                || origin.planar_distance_squared(&location) <= range * range
            {
                recursive_add(world, candidate, within);
            }
        }
    }

    /// Check both grid invariants: every placed entity is in exactly the cell
    /// it references, and contained entities share their root's cell.
    pub fn validate(&self, world: &World) -> Result<(), InvariantViolation> {
        let mut seen: BTreeMap<EntityId, CellCoord> = BTreeMap::new();
        for cell in &self.cells {
            for &member in cell.members().iter() {
                if seen.insert(member, cell.coord()).is_some() {
                    return Err(InvariantViolation::DuplicateMembership(member));
                }
                if world.get(member).and_then(|e| e.cell()) != Some(cell.coord()) {
                    return Err(InvariantViolation::StrayMember {
                        entity: member,
                        cell: cell.coord(),
                    });
                }
            }
        }
        for (&id, entity) in world.entities() {
            match world.super_parent(id) {
                None => {
                    let Some(coord) = entity.cell() else {
                        return Err(InvariantViolation::NotPlaced(id));
                    };
                    if !seen.contains_key(&id) {
                        return Err(InvariantViolation::MissingMembership { entity: id, cell: coord });
                    }
                }
                Some(root) => {
                    let expected = world.get(root).and_then(|r| r.cell());
                    if entity.cell() != expected {
                        return Err(InvariantViolation::CellMismatch {
                            entity: id,
                            expected,
                            actual: entity.cell(),
                        });
                    }
                    if let Some(coord) = expected {
                        if !seen.contains_key(&id) {
                            return Err(InvariantViolation::MissingMembership { entity: id, cell: coord });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of non-empty cells.
    pub fn occupied_cells(&self) -> usize {
        self.cells.iter().filter(|c| !c.is_empty()).count()
    }

    /// Total number of entity placements across all cells.
    pub fn total_placements(&self) -> usize {
        self.cells.iter().map(|c| c.len()).sum()
    }
}

fn recursive_add(world: &World, id: EntityId, within: &mut BTreeSet<EntityId>) {
    if !within.insert(id) {
        return;
    }
    if let Some(entity) = world.get(id) {
        for child in entity.children() {
            recursive_add(world, child, within);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interest_kernel::{Containment, Entity, EntityKind};

    fn grid() -> SpatialGrid {
        SpatialGrid::new(GridConfig::default()).unwrap()
    }

    fn spawn(world: &mut World, grid: &SpatialGrid, id: u64, x: f32, z: f32, range: f32) -> EntityId {
        let id = world
            .spawn(
                Entity::new(EntityId(id), EntityKind::Creature, Location::new(x, 0.0, z))
                    .with_load_range(range),
            )
            .unwrap();
        grid.place(world, id);
        id
    }

    fn spawn_in(world: &mut World, grid: &SpatialGrid, id: u64, parent: EntityId) -> EntityId {
        let id = world
            .spawn(
                Entity::new(EntityId(id), EntityKind::Item, Location::default())
                    .with_parent(parent, Containment::Contained),
            )
            .unwrap();
        grid.place(world, id);
        id
    }

    #[test]
    fn resolve_cell_basic_and_clamped() {
        let grid = grid();
        assert_eq!(grid.resolve_cell(0.0, 0.0), CellCoord::new(8, 8));
        assert_eq!(grid.resolve_cell(-8192.0, -8192.0), CellCoord::new(0, 0));
        assert_eq!(grid.resolve_cell(1023.0, 500.0), CellCoord::new(8, 8));
        assert_eq!(grid.resolve_cell(1025.0, 500.0), CellCoord::new(9, 8));
        // outside the map clamps to the edge rather than failing
        assert_eq!(grid.resolve_cell(-90_000.0, 90_000.0), CellCoord::new(0, 15));
        assert_eq!(grid.resolve_cell(f32::NAN, 0.0).x, 0);
    }

    #[test]
    fn neighbor_links_are_clamped_at_edges() {
        let grid = grid();
        let corner = grid.cell(CellCoord::new(0, 0)).unwrap();
        assert_eq!(corner.neighbors().len(), 3);
        let edge = grid.cell(CellCoord::new(5, 0)).unwrap();
        assert_eq!(edge.neighbors().len(), 5);
        let inner = grid.cell(CellCoord::new(5, 5)).unwrap();
        assert_eq!(inner.neighbors().len(), 8);
        for &n in inner.neighbors() {
            assert_eq!(grid.cells()[n].coord().chebyshev(inner.coord()), 1);
        }
        assert!(grid.cell(CellCoord::new(16, 0)).is_none());
    }

    #[test]
    fn place_and_move_keep_single_membership() {
        let mut world = World::new();
        let grid = grid();
        let a = spawn(&mut world, &grid, 1, 0.0, 0.0, 100.0);
        assert_eq!(world.get(a).unwrap().cell(), Some(CellCoord::new(8, 8)));

        world.get_mut(a).unwrap().location = Location::new(3000.0, 0.0, 0.0);
        grid.move_entity(&mut world, a);
        assert_eq!(world.get(a).unwrap().cell(), Some(CellCoord::new(10, 8)));
        assert!(!grid.cell(CellCoord::new(8, 8)).unwrap().contains(a));
        assert!(grid.cell(CellCoord::new(10, 8)).unwrap().contains(a));
        assert_eq!(grid.total_placements(), 1);
        assert!(grid.validate(&world).is_ok());
    }

    #[test]
    fn children_inherit_and_follow_parent_cell() {
        let mut world = World::new();
        let grid = grid();
        let c = spawn(&mut world, &grid, 1, 0.0, 0.0, 100.0);
        let bag = spawn_in(&mut world, &grid, 2, c);
        let coin = spawn_in(&mut world, &grid, 3, bag);
        assert_eq!(world.get(coin).unwrap().cell(), Some(CellCoord::new(8, 8)));

        world.get_mut(c).unwrap().location = Location::new(-5000.0, 0.0, 0.0);
        grid.move_entity(&mut world, c);
        let expected = Some(CellCoord::new(3, 8));
        assert_eq!(world.get(bag).unwrap().cell(), expected);
        assert_eq!(world.get(coin).unwrap().cell(), expected);
        assert_eq!(grid.cell(CellCoord::new(3, 8)).unwrap().len(), 3);
        assert!(grid.validate(&world).is_ok());
    }

    #[test]
    fn nested_in_unplaced_root_is_not_placed() {
        let mut world = World::new();
        let grid = grid();
        let chest = world
            .spawn(Entity::new(EntityId(1), EntityKind::Item, Location::default()))
            .unwrap();
        let gem = spawn_in(&mut world, &grid, 2, chest);
        assert!(world.get(gem).unwrap().cell().is_none());
        assert_eq!(grid.total_placements(), 0);

        grid.place(&mut world, chest);
        assert!(world.get(gem).unwrap().cell().is_some());
        assert_eq!(grid.total_placements(), 2);
    }

    #[test]
    fn remove_clears_entity_and_children() {
        let mut world = World::new();
        let grid = grid();
        let c = spawn(&mut world, &grid, 1, 0.0, 0.0, 100.0);
        let bag = spawn_in(&mut world, &grid, 2, c);
        grid.remove(&mut world, c);
        assert!(world.get(c).unwrap().cell().is_none());
        assert!(world.get(bag).unwrap().cell().is_none());
        assert_eq!(grid.total_placements(), 0);
        assert_eq!(grid.occupied_cells(), 0);
    }

    #[test]
    fn query_range_uses_larger_load_range() {
        let mut world = World::new();
        let grid = grid();
        let a = spawn(&mut world, &grid, 1, 0.0, 0.0, 200.0);
        let b = spawn(&mut world, &grid, 2, 150.0, 0.0, 50.0);
        let far = spawn(&mut world, &grid, 3, 260.0, 0.0, 50.0);

        let seen = grid.query(&world, a);
        assert!(seen.contains(&b));
        assert!(!seen.contains(&far));
        assert!(!seen.contains(&a));
        // B sees A because A's range covers the gap
        assert!(grid.query(&world, b).contains(&a));
    }

    #[test]
    fn query_crosses_cell_boundary() {
        let mut world = World::new();
        let grid = grid();
        let a = spawn(&mut world, &grid, 1, 1023.0, 500.0, 50.0);
        let b = spawn(&mut world, &grid, 2, 1025.0, 500.0, 50.0);
        assert_ne!(world.get(a).unwrap().cell(), world.get(b).unwrap().cell());
        assert!(grid.query(&world, a).contains(&b));
    }

    #[test]
    fn query_filters_other_instances() {
        let mut world = World::new();
        let grid = grid();
        let a = spawn(&mut world, &grid, 1, 0.0, 0.0, 200.0);
        let b = world
            .spawn(
                Entity::new(
                    EntityId(2),
                    EntityKind::Creature,
                    Location::new(1.0, 0.0, 1.0).with_instance(7),
                )
                .with_load_range(200.0),
            )
            .unwrap();
        grid.place(&mut world, b);
        assert!(grid.query(&world, a).is_empty());
        assert!(grid.query(&world, b).is_empty());
    }

    #[test]
    fn unlimited_range_sees_across_neighbors_only_by_distance_rule() {
        let mut world = World::new();
        let grid = grid();
        let beacon = spawn(&mut world, &grid, 1, 0.0, 0.0, 16384.0);
        // adjacent cell, far beyond any finite range we set
        let b = spawn(&mut world, &grid, 2, 1500.0, 1500.0, 0.0);
        assert!(grid.query(&world, b).contains(&beacon));
    }

    #[test]
    fn query_includes_children_of_accepted_candidates() {
        let mut world = World::new();
        let grid = grid();
        let d = spawn(&mut world, &grid, 1, 0.0, 0.0, 100.0);
        let c = spawn(&mut world, &grid, 2, 10.0, 0.0, 100.0);
        let bag = spawn_in(&mut world, &grid, 3, c);
        let coin = spawn_in(&mut world, &grid, 4, bag);

        let seen = grid.query(&world, d);
        assert!(seen.contains(&c));
        assert!(seen.contains(&bag));
        assert!(seen.contains(&coin));

        // a contained item sees its carrier's surroundings but never itself
        let from_coin = grid.query(&world, coin);
        assert!(from_coin.contains(&d));
        assert!(!from_coin.contains(&coin));
    }

    #[test]
    fn contained_entities_are_measured_with_their_root_range() {
        let mut world = World::new();
        let grid = grid();
        let c = spawn(&mut world, &grid, 1, 0.0, 0.0, 200.0);
        let bag = spawn_in(&mut world, &grid, 2, c);
        let d = spawn(&mut world, &grid, 3, 150.0, 0.0, 100.0);

        // D takes the bag in through C; the bag must see D back
        assert!(grid.query(&world, d).contains(&bag));
        assert!(grid.query(&world, bag).contains(&d));

        // a long-range item inside a short-range carrier does not widen it
        let e = spawn(&mut world, &grid, 4, 2000.0, 0.0, 0.0);
        let lamp = world
            .spawn(
                Entity::new(EntityId(5), EntityKind::Item, Location::default())
                    .with_parent(e, Containment::Contained)
                    .with_load_range(5000.0),
            )
            .unwrap();
        grid.place(&mut world, lamp);
        assert!(!grid.query(&world, d).contains(&lamp));
        assert!(!grid.query(&world, lamp).contains(&d));
    }

    #[test]
    fn validate_detects_stray_reference() {
        let mut world = World::new();
        let grid = grid();
        let a = spawn(&mut world, &grid, 1, 0.0, 0.0, 100.0);
        world.get_mut(a).unwrap().set_cell(Some(CellCoord::new(0, 0)));
        assert!(matches!(
            grid.validate(&world),
            Err(InvariantViolation::StrayMember { .. })
        ));
    }
}
