use std::collections::BTreeMap;
use std::sync::Arc;

use interest_common::EntityId;
use parking_lot::Mutex;

/// One exclusive lock per entity, serialising that entity's grid update and
/// awareness recompute.
///
/// Never hold two of these at once.
#[derive(Debug, Default)]
pub struct AwarenessLocks {
    locks: Mutex<BTreeMap<EntityId, Arc<Mutex<()>>>>,
}

impl AwarenessLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `id`, created on first use.
    pub fn get(&self, id: EntityId) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(id).or_default())
    }

    /// Drop the map entry for `id` when `held` is the only handle outside
    /// the map. An idle entry can always be recreated, so this never splits
    /// one entity across two locks; a contended entry is left for the last
    /// waiter, which finds the entity gone and releases it in turn.
    pub fn release(&self, id: EntityId, held: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        if locks
            .get(&id)
            .is_some_and(|lock| Arc::ptr_eq(lock, held) && Arc::strong_count(lock) == 2)
        {
            locks.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
