use interest_common::{CellCoord, EntityId, Location};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Coarse classification of a world object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Creature,
    Item,
    Building,
    /// An interior cell of a building, addressed by its number.
    Cell { number: u32 },
    Structure,
}

/// How an entity is held by its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Containment {
    /// Unordered inventory-style containment.
    Contained,
    /// Occupies a named equipment or seat slot.
    Slotted(String),
}

/// A server-side world object.
///
/// Relationship fields are private: they are only changed through
/// [`crate::World`] so both ends of a link stay in sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    id: EntityId,
    kind: EntityKind,
    pub location: Location,
    /// How far this entity can see.
    pub load_range: f32,
    /// Set on riders: moving this entity moves its carrier instead.
    pub expose_with_world: bool,
    parent: Option<EntityId>,
    containment: Option<Containment>,
    contained: BTreeSet<EntityId>,
    slots: BTreeMap<String, EntityId>,
    cell: Option<CellCoord>,
}

impl Entity {
    pub fn new(id: EntityId, kind: EntityKind, location: Location) -> Self {
        Self {
            id,
            kind,
            location,
            load_range: 0.0,
            expose_with_world: false,
            parent: None,
            containment: None,
            contained: BTreeSet::new(),
            slots: BTreeMap::new(),
            cell: None,
        }
    }

    pub fn with_load_range(mut self, load_range: f32) -> Self {
        self.load_range = load_range;
        self
    }

    /// Request that the entity be spawned inside `parent`.
    pub fn with_parent(mut self, parent: EntityId, containment: Containment) -> Self {
        self.parent = Some(parent);
        self.containment = Some(containment);
        self
    }

    pub fn exposed_with_world(mut self) -> Self {
        self.expose_with_world = true;
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub fn containment(&self) -> Option<&Containment> {
        self.containment.as_ref()
    }

    pub fn contained(&self) -> &BTreeSet<EntityId> {
        &self.contained
    }

    pub fn slotted(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots.values().copied()
    }

    pub fn slot(&self, name: &str) -> Option<EntityId> {
        self.slots.get(name).copied()
    }

    /// Direct children: slotted first, then contained.
    pub fn children(&self) -> Vec<EntityId> {
        self.slotted().chain(self.contained.iter().copied()).collect()
    }

    pub fn has_children(&self) -> bool {
        !self.slots.is_empty() || !self.contained.is_empty()
    }

    /// The Region Cell this entity currently belongs to.
    pub fn cell(&self) -> Option<CellCoord> {
        self.cell
    }

    /// Replace the Region Cell reference, returning the previous one.
    ///
    /// Only the spatial grid should call this; it keeps cell membership in
    /// step with the reference.
    pub fn set_cell(&mut self, cell: Option<CellCoord>) -> Option<CellCoord> {
        std::mem::replace(&mut self.cell, cell)
    }

    pub(crate) fn link_parent(&mut self, parent: EntityId, containment: Containment) {
        self.parent = Some(parent);
        self.containment = Some(containment);
    }

    pub(crate) fn unlink_parent(&mut self) -> Option<(EntityId, Containment)> {
        let parent = self.parent.take()?;
        let containment = self.containment.take().unwrap_or(Containment::Contained);
        Some((parent, containment))
    }

    pub(crate) fn add_child(&mut self, child: EntityId, containment: Containment) {
        match containment {
            Containment::Contained => {
                self.contained.insert(child);
            }
            Containment::Slotted(slot) => {
                self.slots.insert(slot, child);
            }
        }
    }

    pub(crate) fn remove_child(&mut self, child: EntityId, containment: &Containment) {
        match containment {
            Containment::Contained => {
                self.contained.remove(&child);
            }
            Containment::Slotted(slot) => {
                if self.slots.get(slot) == Some(&child) {
                    self.slots.remove(slot);
                }
            }
        }
    }

    /// Remove every child link, returning the former children.
    pub(crate) fn take_children(&mut self) -> Vec<EntityId> {
        let children = self.children();
        self.slots.clear();
        self.contained.clear();
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let e = Entity::new(EntityId(1), EntityKind::Creature, Location::new(1.0, 2.0, 3.0))
            .with_load_range(200.0)
            .with_parent(EntityId(9), Containment::Slotted("rider".into()))
            .exposed_with_world();
        assert_eq!(e.id(), EntityId(1));
        assert_eq!(e.load_range, 200.0);
        assert_eq!(e.parent(), Some(EntityId(9)));
        assert_eq!(e.containment(), Some(&Containment::Slotted("rider".into())));
        assert!(e.expose_with_world);
        assert!(e.cell().is_none());
    }

    #[test]
    fn children_lists_slots_before_contained() {
        let mut e = Entity::new(EntityId(1), EntityKind::Creature, Location::default());
        e.add_child(EntityId(5), Containment::Contained);
        e.add_child(EntityId(7), Containment::Slotted("hat".into()));
        assert_eq!(e.children(), vec![EntityId(7), EntityId(5)]);
        assert_eq!(e.slot("hat"), Some(EntityId(7)));
    }

    #[test]
    fn remove_child_ignores_other_slot_occupant() {
        let mut e = Entity::new(EntityId(1), EntityKind::Creature, Location::default());
        e.add_child(EntityId(7), Containment::Slotted("hat".into()));
        e.remove_child(EntityId(8), &Containment::Slotted("hat".into()));
        assert_eq!(e.slot("hat"), Some(EntityId(7)));
    }

    #[test]
    fn set_cell_returns_previous() {
        let mut e = Entity::new(EntityId(1), EntityKind::Item, Location::default());
        assert_eq!(e.set_cell(Some(CellCoord::new(1, 2))), None);
        assert_eq!(e.set_cell(None), Some(CellCoord::new(1, 2)));
    }
}
