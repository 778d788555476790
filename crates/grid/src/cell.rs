use interest_common::{CellCoord, EntityId};
use parking_lot::RwLock;
use std::sync::Arc;

/// A bucket of entities sharing one coarse spatial partition.
///
/// Membership is copy-on-write: readers take an `Arc` snapshot and iterate it
/// without holding any lock, writers clone the list only while a snapshot is
/// still alive.
#[derive(Debug)]
pub struct RegionCell {
    coord: CellCoord,
    members: RwLock<Arc<Vec<EntityId>>>,
    neighbors: Vec<usize>,
}

impl RegionCell {
    pub(crate) fn new(coord: CellCoord, neighbors: Vec<usize>) -> Self {
        Self {
            coord,
            members: RwLock::new(Arc::new(Vec::new())),
            neighbors,
        }
    }

    pub fn coord(&self) -> CellCoord {
        self.coord
    }

    /// Indices (into the grid's cell list) of the Chebyshev-adjacent cells.
    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    /// A stable snapshot of the current members.
    pub fn members(&self) -> Arc<Vec<EntityId>> {
        Arc::clone(&*self.members.read())
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.members.read().contains(&id)
    }

    pub(crate) fn add(&self, id: EntityId) {
        let mut guard = self.members.write();
        if !guard.contains(&id) {
            Arc::make_mut(&mut *guard).push(id);
        }
    }

    pub(crate) fn remove(&self, id: EntityId) -> bool {
        let mut guard = self.members.write();
        match guard.iter().position(|m| *m == id) {
            Some(index) => {
                Arc::make_mut(&mut *guard).swap_remove(index);
                true
            }
            None => false,
        }
    }
}
