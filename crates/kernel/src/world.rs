use crate::entity::{Containment, Entity};
use interest_common::{EntityId, Location};
use std::collections::BTreeMap;

/// Errors from containment graph operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("entity {0} not found")]
    UnknownEntity(EntityId),
    #[error("entity {0} already exists")]
    DuplicateEntity(EntityId),
    #[error("parent {parent} of {child} not found")]
    UnknownParent { child: EntityId, parent: EntityId },
    #[error("moving {child} into {parent} would create a containment cycle")]
    ContainmentCycle { child: EntityId, parent: EntityId },
    #[error("slot '{slot}' on {parent} is already held by {occupant}")]
    SlotOccupied {
        parent: EntityId,
        slot: String,
        occupant: EntityId,
    },
}

/// The entity arena and containment graph.
///
/// Entities are keyed by id in a BTreeMap for deterministic iteration. All
/// parent/child links are ids; this type keeps both ends of every link
/// consistent.
#[derive(Debug, Clone, Default)]
pub struct World {
    entities: BTreeMap<EntityId, Entity>,
}

impl World {
    /// Create an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities in the world.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Read-only access to all entities.
    pub fn entities(&self) -> &BTreeMap<EntityId, Entity> {
        &self.entities
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable access to an entity. Relationship fields stay private to the
    /// graph; location, load range and the cell reference may be changed.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Insert a fully constructed entity. If it names a parent, it is linked
    /// into that parent's children.
    pub fn spawn(&mut self, mut entity: Entity) -> Result<EntityId, GraphError> {
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(GraphError::DuplicateEntity(id));
        }
        let link = entity.unlink_parent();
        if let Some((parent, containment)) = &link {
            self.check_attach(id, *parent, containment)?;
        }
        entity.take_children();
        entity.set_cell(None);
        self.entities.insert(id, entity);
        if let Some((parent, containment)) = link {
            self.link(id, parent, containment);
        }
        Ok(id)
    }

    /// Remove an entity from the graph. Any children still attached become
    /// top-level entities at their current location.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        self.unlink(id);
        let mut entity = self.entities.remove(&id)?;
        for child in entity.take_children() {
            if let Some(c) = self.entities.get_mut(&child) {
                tracing::warn!(%id, %child, "despawned entity still had a child; orphaning it");
                c.unlink_parent();
            }
        }
        Some(entity)
    }

    /// Update an entity's own location.
    pub fn set_location(&mut self, id: EntityId, location: Location) -> Result<(), GraphError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(GraphError::UnknownEntity(id))?;
        entity.location = location;
        Ok(())
    }

    /// Move `id` under a new parent (or to the top level with `None`).
    /// Returns the previous parent. Validation happens before any change.
    pub fn set_parent(
        &mut self,
        id: EntityId,
        parent: Option<(EntityId, Containment)>,
    ) -> Result<Option<EntityId>, GraphError> {
        let current = self.entities.get(&id).ok_or(GraphError::UnknownEntity(id))?;
        let old_parent = current.parent();
        if let Some((new_parent, containment)) = &parent {
            if old_parent == Some(*new_parent) && current.containment() == Some(containment) {
                return Ok(old_parent);
            }
            self.check_attach(id, *new_parent, containment)?;
        }
        self.unlink(id);
        if let Some((new_parent, containment)) = parent {
            self.link(id, new_parent, containment);
        }
        Ok(old_parent)
    }

    /// The topmost ancestor of `id`, excluding `id` itself. `None` for
    /// top-level entities.
    pub fn super_parent(&self, id: EntityId) -> Option<EntityId> {
        let mut current = self.entities.get(&id)?.parent()?;
        while let Some(next) = self.entities.get(&current).and_then(|e| e.parent()) {
            current = next;
        }
        Some(current)
    }

    /// The topmost ancestor of `id`, or `id` itself when it is top-level.
    pub fn root(&self, id: EntityId) -> Option<EntityId> {
        if !self.entities.contains_key(&id) {
            return None;
        }
        Some(self.super_parent(id).unwrap_or(id))
    }

    /// True if `ancestor` is `id` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: EntityId, id: EntityId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.entities.get(&c).and_then(|e| e.parent());
        }
        false
    }

    /// Effective world location: a contained entity is where its root is.
    pub fn world_location(&self, id: EntityId) -> Option<Location> {
        let root = self.root(id)?;
        self.entities.get(&root).map(|e| e.location)
    }

    /// Effective load range: a contained entity observes and is observed
    /// with its root's range, so a subtree always agrees with its root.
    pub fn effective_load_range(&self, id: EntityId) -> Option<f32> {
        let root = self.root(id)?;
        self.entities.get(&root).map(|e| e.load_range)
    }

    /// Every entity below `id`, children before parents (slots, then
    /// contained, depth-first), ending with `id` itself.
    pub fn subtree_post_order(&self, id: EntityId) -> Vec<EntityId> {
        let mut out = Vec::new();
        if self.entities.contains_key(&id) {
            self.collect_post_order(id, &mut out);
        }
        out
    }

    fn collect_post_order(&self, id: EntityId, out: &mut Vec<EntityId>) {
        if let Some(entity) = self.entities.get(&id) {
            for child in entity.children() {
                self.collect_post_order(child, out);
            }
        }
        out.push(id);
    }

    fn check_attach(
        &self,
        child: EntityId,
        parent: EntityId,
        containment: &Containment,
    ) -> Result<(), GraphError> {
        let target = self
            .entities
            .get(&parent)
            .ok_or(GraphError::UnknownParent { child, parent })?;
        if self.is_ancestor_or_self(child, parent) {
            return Err(GraphError::ContainmentCycle { child, parent });
        }
        if let Containment::Slotted(slot) = containment {
            if let Some(occupant) = target.slot(slot) {
                if occupant != child {
                    return Err(GraphError::SlotOccupied {
                        parent,
                        slot: slot.clone(),
                        occupant,
                    });
                }
            }
        }
        Ok(())
    }

    fn link(&mut self, child: EntityId, parent: EntityId, containment: Containment) {
        if let Some(p) = self.entities.get_mut(&parent) {
            p.add_child(child, containment.clone());
        }
        if let Some(c) = self.entities.get_mut(&child) {
            c.link_parent(parent, containment);
        }
    }

    fn unlink(&mut self, child: EntityId) {
        let Some((parent, containment)) = self.entities.get_mut(&child).and_then(|c| c.unlink_parent())
        else {
            return;
        };
        if let Some(p) = self.entities.get_mut(&parent) {
            p.remove_child(child, &containment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityKind;

    fn creature(id: u64, x: f32) -> Entity {
        Entity::new(EntityId(id), EntityKind::Creature, Location::new(x, 0.0, 0.0))
    }

    fn item(id: u64) -> Entity {
        Entity::new(EntityId(id), EntityKind::Item, Location::default())
    }

    #[test]
    fn world_starts_empty() {
        let w = World::new();
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn spawn_and_despawn() {
        let mut w = World::new();
        let id = w.spawn(creature(1, 0.0)).unwrap();
        assert_eq!(w.entity_count(), 1);
        assert!(w.get(id).is_some());

        assert!(w.despawn(id).is_some());
        assert_eq!(w.entity_count(), 0);
        assert!(w.despawn(id).is_none());
    }

    #[test]
    fn duplicate_spawn_rejected() {
        let mut w = World::new();
        w.spawn(creature(1, 0.0)).unwrap();
        assert_eq!(
            w.spawn(creature(1, 5.0)),
            Err(GraphError::DuplicateEntity(EntityId(1)))
        );
    }

    #[test]
    fn spawn_with_parent_links_both_ends() {
        let mut w = World::new();
        w.spawn(creature(1, 0.0)).unwrap();
        w.spawn(item(2).with_parent(EntityId(1), Containment::Contained))
            .unwrap();
        assert_eq!(w.get(EntityId(2)).unwrap().parent(), Some(EntityId(1)));
        assert!(w.get(EntityId(1)).unwrap().contained().contains(&EntityId(2)));
    }

    #[test]
    fn spawn_with_unknown_parent_fails_cleanly() {
        let mut w = World::new();
        let err = w
            .spawn(item(2).with_parent(EntityId(1), Containment::Contained))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownParent {
                child: EntityId(2),
                parent: EntityId(1)
            }
        );
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn contained_entity_uses_root_load_range() {
        let mut w = World::new();
        w.spawn(creature(1, 0.0).with_load_range(200.0)).unwrap();
        w.spawn(item(2).with_parent(EntityId(1), Containment::Contained))
            .unwrap();
        w.spawn(item(3).with_load_range(40.0).with_parent(EntityId(2), Containment::Contained))
            .unwrap();
        assert_eq!(w.effective_load_range(EntityId(3)), Some(200.0));
        assert_eq!(w.effective_load_range(EntityId(1)), Some(200.0));
        assert_eq!(w.effective_load_range(EntityId(9)), None);
    }

    #[test]
    fn set_parent_moves_between_containers() {
        let mut w = World::new();
        w.spawn(creature(1, 0.0)).unwrap();
        w.spawn(creature(2, 10.0)).unwrap();
        w.spawn(item(3).with_parent(EntityId(1), Containment::Contained))
            .unwrap();

        let old = w
            .set_parent(EntityId(3), Some((EntityId(2), Containment::Contained)))
            .unwrap();
        assert_eq!(old, Some(EntityId(1)));
        assert!(w.get(EntityId(1)).unwrap().contained().is_empty());
        assert!(w.get(EntityId(2)).unwrap().contained().contains(&EntityId(3)));

        let old = w.set_parent(EntityId(3), None).unwrap();
        assert_eq!(old, Some(EntityId(2)));
        assert!(w.get(EntityId(3)).unwrap().parent().is_none());
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let mut w = World::new();
        w.spawn(item(1)).unwrap();
        w.spawn(item(2).with_parent(EntityId(1), Containment::Contained))
            .unwrap();
        let err = w
            .set_parent(EntityId(1), Some((EntityId(2), Containment::Contained)))
            .unwrap_err();
        assert!(matches!(err, GraphError::ContainmentCycle { .. }));
        let err = w
            .set_parent(EntityId(1), Some((EntityId(1), Containment::Contained)))
            .unwrap_err();
        assert!(matches!(err, GraphError::ContainmentCycle { .. }));
        // unchanged
        assert_eq!(w.get(EntityId(2)).unwrap().parent(), Some(EntityId(1)));
    }

    #[test]
    fn occupied_slot_rejected() {
        let mut w = World::new();
        w.spawn(creature(1, 0.0)).unwrap();
        w.spawn(item(2).with_parent(EntityId(1), Containment::Slotted("hat".into())))
            .unwrap();
        w.spawn(item(3)).unwrap();
        let err = w
            .set_parent(EntityId(3), Some((EntityId(1), Containment::Slotted("hat".into()))))
            .unwrap_err();
        assert!(matches!(err, GraphError::SlotOccupied { occupant, .. } if occupant == EntityId(2)));
    }

    #[test]
    fn super_parent_and_world_location() {
        let mut w = World::new();
        w.spawn(creature(1, 50.0)).unwrap();
        w.spawn(item(2).with_parent(EntityId(1), Containment::Contained))
            .unwrap();
        w.spawn(item(3).with_parent(EntityId(2), Containment::Contained))
            .unwrap();

        assert_eq!(w.super_parent(EntityId(3)), Some(EntityId(1)));
        assert_eq!(w.super_parent(EntityId(1)), None);
        assert_eq!(w.root(EntityId(1)), Some(EntityId(1)));
        assert_eq!(w.world_location(EntityId(3)).unwrap().position.x, 50.0);
        assert!(w.is_ancestor_or_self(EntityId(1), EntityId(3)));
        assert!(!w.is_ancestor_or_self(EntityId(3), EntityId(1)));
    }

    #[test]
    fn post_order_visits_slots_then_contained_then_self() {
        let mut w = World::new();
        w.spawn(creature(1, 0.0)).unwrap();
        w.spawn(item(2).with_parent(EntityId(1), Containment::Contained))
            .unwrap();
        w.spawn(item(3).with_parent(EntityId(1), Containment::Slotted("hat".into())))
            .unwrap();
        w.spawn(item(4).with_parent(EntityId(2), Containment::Contained))
            .unwrap();

        let order = w.subtree_post_order(EntityId(1));
        assert_eq!(order, vec![EntityId(3), EntityId(4), EntityId(2), EntityId(1)]);
    }

    #[test]
    fn despawn_orphans_remaining_children() {
        let mut w = World::new();
        w.spawn(creature(1, 0.0)).unwrap();
        w.spawn(item(2).with_parent(EntityId(1), Containment::Contained))
            .unwrap();
        w.despawn(EntityId(1));
        assert!(w.get(EntityId(2)).unwrap().parent().is_none());
    }
}
