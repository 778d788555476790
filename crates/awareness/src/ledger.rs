use std::collections::{BTreeMap, BTreeSet};

use interest_common::EntityId;
use interest_grid::SpatialGrid;
use interest_kernel::World;
use parking_lot::Mutex;

use crate::notify::{Notification, NotificationSink};

/// Two entities whose awareness records disagree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{observer} is aware of {subject} but not the other way round")]
pub struct AsymmetricPair {
    pub observer: EntityId,
    pub subject: EntityId,
}

/// Number of mutual relationships created and torn down by one update.
///
/// Each relationship produces two notifications, one per direction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Transitions {
    pub appeared: usize,
    pub disappeared: usize,
}

impl Transitions {
    pub fn is_empty(&self) -> bool {
        self.appeared == 0 && self.disappeared == 0
    }
}

impl std::ops::AddAssign for Transitions {
    fn add_assign(&mut self, other: Self) {
        self.appeared += other.appeared;
        self.disappeared += other.disappeared;
    }
}

/// Per-entity cache of the last computed awareness set.
///
/// Every relationship is stored on both sides and both sides change inside
/// one critical section, so the ledger is symmetric at every instant. Only
/// registered entities may appear in a set; unregistering clears the entity
/// from every counterpart.
#[derive(Debug, Default)]
pub struct AwarenessLedger {
    entries: Mutex<BTreeMap<EntityId, BTreeSet<EntityId>>>,
}

impl AwarenessLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an entity. Returns false if it was already tracked.
    pub fn register(&self, id: EntityId) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, BTreeSet::new());
        true
    }

    pub fn is_registered(&self, id: EntityId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Clear the entity's relationships and stop tracking it.
    pub fn unregister(&self, id: EntityId, sink: &dyn NotificationSink) -> Transitions {
        let mut entries = self.entries.lock();
        let transitions = clear_locked(&mut entries, id, sink);
        entries.remove(&id);
        transitions
    }

    /// Query the grid for what `id` can observe now and apply the difference.
    ///
    /// The caller passes the world it read the grid under, so the query sees
    /// a consistent graph and cell membership.
    pub fn recompute(
        &self,
        grid: &SpatialGrid,
        world: &World,
        id: EntityId,
        sink: &dyn NotificationSink,
    ) -> Transitions {
        let observed = grid.query(world, id);
        self.apply(id, &observed, sink)
    }

    /// Diff `observed` against the cached set: new entries become mutual
    /// relationships, vanished entries are torn down on both sides.
    pub fn apply(
        &self,
        id: EntityId,
        observed: &BTreeSet<EntityId>,
        sink: &dyn NotificationSink,
    ) -> Transitions {
        let mut entries = self.entries.lock();
        let Some(current) = entries.get(&id) else {
            return Transitions::default();
        };
        let removed: Vec<EntityId> = current
            .iter()
            .filter(|other| !observed.contains(other))
            .copied()
            .collect();
        let added: Vec<EntityId> = observed
            .iter()
            .filter(|other| **other != id && !current.contains(other) && entries.contains_key(other))
            .copied()
            .collect();

        for &other in &added {
            link(&mut entries, id, other);
            sink.notify(Notification::appeared(id, other));
            sink.notify(Notification::appeared(other, id));
        }
        for &other in &removed {
            unlink(&mut entries, id, other);
            sink.notify(Notification::disappeared(id, other));
            sink.notify(Notification::disappeared(other, id));
        }

        let transitions = Transitions {
            appeared: added.len(),
            disappeared: removed.len(),
        };
        if !transitions.is_empty() {
            tracing::trace!(%id, appeared = transitions.appeared, disappeared = transitions.disappeared, "awareness updated");
        }
        transitions
    }

    /// Forcibly empty the entity's awareness, removing it from every
    /// counterpart as well. The entity stays registered.
    pub fn clear(&self, id: EntityId, sink: &dyn NotificationSink) -> Transitions {
        let mut entries = self.entries.lock();
        clear_locked(&mut entries, id, sink)
    }

    /// Everyone currently aware of `id` (equivalently, everyone `id` is
    /// aware of).
    pub fn observed_by(&self, id: EntityId) -> BTreeSet<EntityId> {
        self.entries.lock().get(&id).cloned().unwrap_or_default()
    }

    pub fn is_aware(&self, observer: EntityId, subject: EntityId) -> bool {
        self.entries
            .lock()
            .get(&observer)
            .is_some_and(|set| set.contains(&subject))
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of distinct mutual relationships.
    pub fn relationship_count(&self) -> usize {
        self.entries.lock().values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Check that every relationship is recorded on both sides and refers
    /// only to tracked entities.
    pub fn verify_symmetry(&self) -> Result<(), AsymmetricPair> {
        let entries = self.entries.lock();
        for (&observer, set) in entries.iter() {
            for &subject in set {
                if !entries.get(&subject).is_some_and(|s| s.contains(&observer)) {
                    return Err(AsymmetricPair { observer, subject });
                }
            }
        }
        Ok(())
    }
}

fn link(entries: &mut BTreeMap<EntityId, BTreeSet<EntityId>>, a: EntityId, b: EntityId) {
    if let Some(set) = entries.get_mut(&a) {
        set.insert(b);
    }
    if let Some(set) = entries.get_mut(&b) {
        set.insert(a);
    }
}

fn unlink(entries: &mut BTreeMap<EntityId, BTreeSet<EntityId>>, a: EntityId, b: EntityId) {
    if let Some(set) = entries.get_mut(&a) {
        set.remove(&b);
    }
    if let Some(set) = entries.get_mut(&b) {
        set.remove(&a);
    }
}

fn clear_locked(
    entries: &mut BTreeMap<EntityId, BTreeSet<EntityId>>,
    id: EntityId,
    sink: &dyn NotificationSink,
) -> Transitions {
    let Some(set) = entries.get_mut(&id) else {
        return Transitions::default();
    };
    let previous = std::mem::take(set);
    for &other in &previous {
        if let Some(counterpart) = entries.get_mut(&other) {
            counterpart.remove(&id);
        }
        sink.notify(Notification::disappeared(id, other));
        sink.notify(Notification::disappeared(other, id));
    }
    Transitions {
        appeared: 0,
        disappeared: previous.len(),
    }
}
