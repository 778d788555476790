use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use interest_awareness::{
    AsymmetricPair, AwarenessLedger, DisconnectReason, Notification, NotificationSink, Transitions,
};
use interest_common::{EntityId, Location};
use interest_grid::{InvariantViolation, SpatialGrid};
use interest_kernel::{Containment, Entity, GraphError, World};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rayon::prelude::*;

use crate::config::{ConfigError, EngineConfig};
use crate::geometry::{Destination, Geometry, GraphGeometry};
use crate::locks::AwarenessLocks;
use crate::session::{PlayerState, Sessions};
use crate::sweep::SweepStats;

/// Errors from movement entry points. Every error leaves the entity as it was.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MovementError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("building {building} has no cell numbered {number}")]
    UnknownCell { building: EntityId, number: u32 },
    #[error("{0} has no player session")]
    NotAPlayer(EntityId),
    #[error("{player} sent {request} while {state:?}")]
    ProtocolViolation {
        player: EntityId,
        request: &'static str,
        state: PlayerState,
    },
    #[error("{0} is not mounted")]
    NotMounted(EntityId),
}

/// Cross-structure consistency failure found by [`MovementCoordinator::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsistencyError {
    #[error(transparent)]
    Grid(#[from] InvariantViolation),
    #[error(transparent)]
    Awareness(#[from] AsymmetricPair),
    #[error("{0} is in the world but not in the awareness ledger")]
    Unregistered(EntityId),
    #[error("awareness ledger tracks {tracked} entities but the world holds {live}")]
    StaleLedger { tracked: usize, live: usize },
}

/// What a movement entry point did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The entity no longer exists; nothing changed.
    Ignored,
    /// Moved with a lightweight transform update.
    Moved,
    /// A full zone-in started; the player is now `ZoningIn`.
    ZoneIn,
    /// The entity changed container.
    Transferred,
}

/// Owns the world, grid, awareness ledger and player sessions, and keeps them
/// consistent across every create, destroy, move and transfer.
///
/// Lock order: entity lock, then the world lock, then the ledger. Entity
/// locks are never nested; work on a second entity (old container, carried
/// passengers) runs after the first entity's lock is released.
pub struct MovementCoordinator {
    config: EngineConfig,
    world: RwLock<World>,
    grid: SpatialGrid,
    ledger: AwarenessLedger,
    locks: AwarenessLocks,
    sessions: Sessions,
    geometry: Box<dyn Geometry>,
    sink: Arc<dyn NotificationSink>,
}

impl MovementCoordinator {
    pub fn new(config: EngineConfig, sink: Arc<dyn NotificationSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        let grid = SpatialGrid::new(config.grid.clone())?;
        tracing::info!(
            map_width = config.grid.map_width,
            chunks_across = config.grid.chunks_across,
            zone_in_distance = config.zone_in_distance,
            "movement coordinator ready"
        );
        Ok(Self {
            config,
            world: RwLock::new(World::new()),
            grid,
            ledger: AwarenessLedger::new(),
            locks: AwarenessLocks::new(),
            sessions: Sessions::new(),
            geometry: Box::new(GraphGeometry),
            sink,
        })
    }

    /// Replace the building-cell lookup.
    pub fn with_geometry(mut self, geometry: impl Geometry + 'static) -> Self {
        self.geometry = Box::new(geometry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    pub fn ledger(&self) -> &AwarenessLedger {
        &self.ledger
    }

    /// Read access to the world. Hold it briefly: movers wait on it.
    pub fn world(&self) -> RwLockReadGuard<'_, World> {
        self.world.read()
    }

    /// A copy of one entity's current state.
    pub fn entity(&self, id: EntityId) -> Option<Entity> {
        self.world.read().get(id).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.world.read().entity_count()
    }

    /// Everyone currently aware of `id`.
    pub fn observed_by(&self, id: EntityId) -> BTreeSet<EntityId> {
        self.ledger.observed_by(id)
    }

    fn sink(&self) -> &dyn NotificationSink {
        self.sink.as_ref()
    }

    /// Insert an entity, place it in the grid and compute its awareness.
    pub fn create(&self, entity: Entity) -> Result<EntityId, MovementError> {
        let id = entity.id();
        let lock = self.locks.get(id);
        let _guard = lock.lock();

        let mut world = self.world.write();
        if let Err(err) = world.spawn(entity) {
            self.locks.release(id, &lock);
            tracing::error!(%id, %err, "create rejected");
            return Err(err.into());
        }
        self.grid.place(&mut world, id);
        self.ledger.register(id);

        let world = RwLockWriteGuard::downgrade(world);
        let transitions = self.ledger.recompute(&self.grid, &world, id, self.sink());
        tracing::debug!(%id, observed = transitions.appeared, "entity created");
        Ok(id)
    }

    /// Destroy `id` and everything it contains, children first. Returns the
    /// number of entities removed; zero if `id` was already gone.
    pub fn destroy(&self, id: EntityId) -> usize {
        let order = self.world.read().subtree_post_order(id);
        let destroyed: usize = order.into_iter().map(|target| self.destroy_one(target)).sum();
        if destroyed > 0 {
            tracing::debug!(%id, destroyed, "destroyed subtree");
        }
        destroyed
    }

    /// Remove `id` under its lock. Children attached since the caller read
    /// the subtree go with it, so nothing is ever orphaned by a destroy.
    fn destroy_one(&self, id: EntityId) -> usize {
        let lock = self.locks.get(id);
        let guard = lock.lock();
        let mut world = self.world.write();
        let subtree = world.subtree_post_order(id);
        if subtree.len() > 1 {
            tracing::debug!(%id, late = subtree.len() - 1, "destroying children attached during destroy");
        }
        for &target in &subtree {
            self.ledger.unregister(target, self.sink());
            self.grid.remove(&mut world, target);
            world.despawn(target);
            if self.sessions.remove(target).is_some() {
                tracing::info!(player = %target, "player session closed with its entity");
            }
        }
        drop(world);
        drop(guard);
        self.locks.release(id, &lock);
        for &target in subtree.iter().filter(|&&target| target != id) {
            let held = self.locks.get(target);
            self.locks.release(target, &held);
        }
        subtree.len()
    }

    /// Open a session for an existing entity. A repeated login restarts the
    /// handshake from `LoggedIn`.
    pub fn login(&self, player: EntityId) -> Result<(), MovementError> {
        let lock = self.locks.get(player);
        let _guard = lock.lock();
        if !self.world.read().contains(player) {
            self.locks.release(player, &lock);
            let err = GraphError::UnknownEntity(player);
            tracing::error!(%player, %err, "login rejected");
            return Err(err.into());
        }
        match self.sessions.login(player) {
            Some(previous) => tracing::info!(%player, ?previous, "player reconnected"),
            None => tracing::info!(%player, "player logged in"),
        }
        Ok(())
    }

    pub fn player_state(&self, player: EntityId) -> Option<PlayerState> {
        self.sessions.state(player)
    }

    /// The player's connection ended for good: drop the session and destroy
    /// the player's entity with everything it carries.
    pub fn player_destroyed(&self, player: EntityId) -> usize {
        self.sessions.remove(player);
        self.destroy(player)
    }

    /// Start a full zone-in: legal from `LoggedIn` (first zone) or `ZonedIn`.
    /// From `ZoningIn` the connection is closed as a suspected hack.
    pub fn request_zone_in(
        &self,
        player: EntityId,
        destination: Destination,
        location: Location,
    ) -> Result<MoveOutcome, MovementError> {
        let followups = {
            let lock = self.locks.get(player);
            let _guard = lock.lock();
            let world = self.world.write();
            if !world.contains(player) {
                return Ok(self.ignore(player, &lock));
            }
            let first_zone = self.zone_in_state(player)?;
            let parent = self.resolve(&world, player, destination)?;
            self.zone_in_locked(world, player, first_zone, parent, location)?
        };
        self.refresh_each(&followups);
        Ok(MoveOutcome::ZoneIn)
    }

    /// The client finished loading the scene sent with the last full resync.
    pub fn scene_ready(&self, player: EntityId) -> Result<(), MovementError> {
        let lock = self.locks.get(player);
        let _guard = lock.lock();
        match self.sessions.state(player) {
            Some(PlayerState::ZoningIn) => {
                self.sessions.set(player, PlayerState::ZonedIn);
                self.sink.notify(Notification::ZonedIn { player });
                tracing::info!(%player, "player zoned in");
                Ok(())
            }
            Some(state) => Err(self.protocol_violation(player, "scene-ready", state)),
            None => {
                self.locks.release(player, &lock);
                tracing::warn!(%player, "scene-ready without a session");
                Err(MovementError::NotAPlayer(player))
            }
        }
    }

    /// Organic movement reported for `id`. A rider exposed with the world
    /// steers its carrier instead, and the carrier's passengers follow.
    pub fn move_object(
        &self,
        id: EntityId,
        destination: Destination,
        location: Location,
        speed: f32,
    ) -> Result<MoveOutcome, MovementError> {
        if destination == Destination::World {
            let carrier = {
                let world = self.world.read();
                world
                    .get(id)
                    .filter(|e| e.expose_with_world)
                    .and_then(|e| e.parent())
            };
            if let Some(carrier) = carrier {
                tracing::trace!(rider = %id, %carrier, "rider moves its carrier");
                return self.transform(carrier, Destination::World, location, speed, false);
            }
        }
        self.transform(id, destination, location, speed, false)
    }

    /// Server-initiated jump. The mover's own client is told too, and the old
    /// parent is always recomputed.
    pub fn teleport(
        &self,
        id: EntityId,
        destination: Destination,
        location: Location,
    ) -> Result<MoveOutcome, MovementError> {
        self.transform(id, destination, location, 0.0, true)
    }

    fn transform(
        &self,
        id: EntityId,
        destination: Destination,
        location: Location,
        speed: f32,
        teleport: bool,
    ) -> Result<MoveOutcome, MovementError> {
        let lock = self.locks.get(id);
        let guard = lock.lock();
        let mut world = self.world.write();
        let Some(entity) = world.get(id) else {
            return Ok(self.ignore(id, &lock));
        };
        let (old_parent, old_location) = (entity.parent(), entity.location);
        let parent = self.resolve(&world, id, destination)?;
        let is_player = self.sessions.is_player(id);

        if is_player && self.needs_zone_in(&world, id, parent, &location) {
            let first_zone = self.zone_in_state(id)?;
            let followups = self.zone_in_locked(world, id, first_zone, parent, location)?;
            drop(guard);
            self.refresh_each(&followups);
            return Ok(MoveOutcome::ZoneIn);
        }

        let passengers = self.reposition(&mut world, id, parent, location)?;
        self.sink.notify(Notification::TransformUpdate {
            entity: id,
            parent,
            location,
            speed,
            include_self: teleport,
        });
        if is_player {
            self.sink.notify(Notification::PlayerTransformed {
                player: id,
                old_parent,
                new_parent: parent,
                old_location,
                new_location: location,
            });
        }
        for &(passenger, previous) in &passengers {
            if self.sessions.is_player(passenger) {
                self.sink.notify(Notification::PlayerTransformed {
                    player: passenger,
                    old_parent: Some(id),
                    new_parent: Some(id),
                    old_location: previous,
                    new_location: location,
                });
            }
        }

        let world = RwLockWriteGuard::downgrade(world);
        self.ledger.recompute(&self.grid, &world, id, self.sink());
        drop(world);
        drop(guard);

        let mut followups: Vec<EntityId> = passengers.iter().map(|(p, _)| *p).collect();
        if teleport || old_parent != parent {
            followups.extend(old_parent);
        }
        self.refresh_each(&followups);
        Ok(MoveOutcome::Moved)
    }

    /// Move `id` into another container, or out to the world with
    /// [`Destination::World`] (it lands where its root stood).
    pub fn transfer(&self, id: EntityId, destination: Destination) -> Result<MoveOutcome, MovementError> {
        let (old_parent, parent) = {
            let lock = self.locks.get(id);
            let _guard = lock.lock();
            let mut world = self.world.write();
            let Some(entity) = world.get(id) else {
                return Ok(self.ignore(id, &lock));
            };
            let unchanged = (entity.parent(), entity.containment());
            let parent = self.resolve(&world, id, destination)?;
            match (parent, unchanged) {
                (None, (None, _)) => return Ok(MoveOutcome::Transferred),
                (Some(p), (Some(q), Some(Containment::Contained))) if p == q => {
                    return Ok(MoveOutcome::Transferred);
                }
                _ => {}
            }
            let old_parent = self.reparent(&mut world, id, parent.map(|p| (p, Containment::Contained)))?;
            let world = RwLockWriteGuard::downgrade(world);
            self.ledger.recompute(&self.grid, &world, id, self.sink());
            (old_parent, parent)
        };
        self.refresh_each(&[old_parent, parent].into_iter().flatten().collect::<Vec<_>>());
        Ok(MoveOutcome::Transferred)
    }

    /// Seat `rider` in `slot` of `vehicle` and expose it with the world, so
    /// its organic movement drives the vehicle.
    pub fn mount(&self, rider: EntityId, vehicle: EntityId, slot: &str) -> Result<MoveOutcome, MovementError> {
        let old_parent = {
            let lock = self.locks.get(rider);
            let _guard = lock.lock();
            let mut world = self.world.write();
            if !world.contains(rider) {
                return Ok(self.ignore(rider, &lock));
            }
            let link = Some((vehicle, Containment::Slotted(slot.to_owned())));
            let old_parent = self.reparent(&mut world, rider, link)?;
            let seat = world.world_location(vehicle);
            if let Some(e) = world.get_mut(rider) {
                e.expose_with_world = true;
                if let Some(seat) = seat {
                    e.location = seat;
                }
            }
            let world = RwLockWriteGuard::downgrade(world);
            self.ledger.recompute(&self.grid, &world, rider, self.sink());
            old_parent
        };
        tracing::debug!(%rider, %vehicle, slot, "mounted");
        let mut followups = vec![vehicle];
        followups.extend(old_parent.filter(|p| *p != vehicle));
        self.refresh_each(&followups);
        Ok(MoveOutcome::Transferred)
    }

    /// Take a mounted rider off its vehicle; it is left standing at the
    /// vehicle's position.
    pub fn dismount(&self, rider: EntityId) -> Result<MoveOutcome, MovementError> {
        let vehicle = {
            let lock = self.locks.get(rider);
            let _guard = lock.lock();
            let mut world = self.world.write();
            let Some(entity) = world.get(rider) else {
                return Ok(self.ignore(rider, &lock));
            };
            let vehicle = match (entity.parent(), entity.containment()) {
                (Some(vehicle), Some(Containment::Slotted(_))) if entity.expose_with_world => vehicle,
                _ => {
                    tracing::warn!(%rider, "dismount requested but not mounted");
                    return Err(MovementError::NotMounted(rider));
                }
            };
            self.reparent(&mut world, rider, None)?;
            let world = RwLockWriteGuard::downgrade(world);
            self.ledger.recompute(&self.grid, &world, rider, self.sink());
            vehicle
        };
        tracing::debug!(%rider, %vehicle, "dismounted");
        self.refresh_each(&[vehicle]);
        Ok(MoveOutcome::Transferred)
    }

    /// Recompute one entity's awareness now. `None` if it does not exist.
    pub fn force_update(&self, id: EntityId) -> Option<Transitions> {
        self.refresh(id)
    }

    /// Recompute every placed entity's awareness, one region cell per task.
    /// Failures are logged per entity and never stop the sweep.
    pub fn refresh_all(&self) -> SweepStats {
        let _span = tracing::info_span!("awareness_sweep").entered();
        let start = Instant::now();

        let (entities, totals) = self
            .grid
            .cells()
            .par_iter()
            .map(|cell| {
                let mut refreshed = 0;
                let mut totals = Transitions::default();
                for &id in cell.members().iter() {
                    if let Some(step) = self.refresh(id) {
                        refreshed += 1;
                        totals += step;
                    }
                }
                (refreshed, totals)
            })
            .reduce(
                || (0, Transitions::default()),
                |(n, mut a), (m, b)| {
                    a += b;
                    (n + m, a)
                },
            );

        let stats = SweepStats {
            entities,
            appeared: totals.appeared,
            disappeared: totals.disappeared,
            elapsed: start.elapsed(),
        };
        tracing::trace!(
            entities = stats.entities,
            appeared = stats.appeared,
            disappeared = stats.disappeared,
            elapsed_us = stats.elapsed.as_micros() as u64,
            "awareness sweep complete"
        );
        stats
    }

    /// Check grid invariants, ledger symmetry, and that the ledger tracks
    /// exactly the live entities.
    pub fn validate(&self) -> Result<(), ConsistencyError> {
        let world = self.world.read();
        self.grid.validate(&world)?;
        self.ledger.verify_symmetry()?;
        if let Some(&id) = world.entities().keys().find(|id| !self.ledger.is_registered(**id)) {
            return Err(ConsistencyError::Unregistered(id));
        }
        let tracked = self.ledger.len();
        if tracked != world.entity_count() {
            return Err(ConsistencyError::StaleLedger {
                tracked,
                live: world.entity_count(),
            });
        }
        Ok(())
    }

    fn refresh(&self, id: EntityId) -> Option<Transitions> {
        let lock = self.locks.get(id);
        let _guard = lock.lock();
        let world = self.world.read();
        let Some(entity) = world.get(id) else {
            self.locks.release(id, &lock);
            return None;
        };
        if let Some(coord) = entity.cell() {
            if !self.grid.cell(coord).is_some_and(|cell| cell.contains(id)) {
                tracing::error!(%id, cell = %coord, "entity references a cell that does not hold it; skipping");
                debug_assert!(false, "{id} references {coord} but is not a member");
                return None;
            }
        }
        Some(self.ledger.recompute(&self.grid, &world, id, self.sink()))
    }

    fn refresh_each(&self, ids: &[EntityId]) {
        for &id in ids {
            self.refresh(id);
        }
    }

    fn ignore(&self, id: EntityId, lock: &Arc<Mutex<()>>) -> MoveOutcome {
        self.locks.release(id, lock);
        tracing::debug!(%id, "entity is gone; request ignored");
        MoveOutcome::Ignored
    }

    fn resolve(
        &self,
        world: &World,
        id: EntityId,
        destination: Destination,
    ) -> Result<Option<EntityId>, MovementError> {
        let parent = match destination {
            Destination::World => return Ok(None),
            Destination::Parent(parent) => world
                .contains(parent)
                .then_some(parent)
                .ok_or(MovementError::Graph(GraphError::UnknownParent { child: id, parent })),
            Destination::BuildingCell { building, number } => self
                .geometry
                .cell_by_number(world, building, number)
                .ok_or(MovementError::UnknownCell { building, number }),
        };
        parent
            .map(Some)
            .inspect_err(|err| tracing::error!(%id, %err, "destination could not be resolved"))
    }

    fn needs_zone_in(&self, world: &World, id: EntityId, parent: Option<EntityId>, location: &Location) -> bool {
        match parent {
            Some(parent) => !self.ledger.is_aware(id, parent),
            None => world.world_location(id).is_none_or(|current| {
                current.instance != location.instance
                    || current.distance_to(location) > self.config.zone_in_distance
            }),
        }
    }

    /// Whether a zone-in now would be the player's first.
    fn zone_in_state(&self, player: EntityId) -> Result<bool, MovementError> {
        match self.sessions.state(player) {
            Some(PlayerState::LoggedIn) => Ok(true),
            Some(PlayerState::ZonedIn) => Ok(false),
            Some(state @ PlayerState::ZoningIn) => Err(self.protocol_violation(player, "zone-in", state)),
            None => {
                tracing::warn!(%player, "zone-in without a session");
                Err(MovementError::NotAPlayer(player))
            }
        }
    }

    fn protocol_violation(&self, player: EntityId, request: &'static str, state: PlayerState) -> MovementError {
        tracing::warn!(%player, request, ?state, "zone-in protocol violation; closing connection");
        self.sink.notify(Notification::CloseConnection {
            player,
            reason: DisconnectReason::SuspectedHack,
        });
        MovementError::ProtocolViolation {
            player,
            request,
            state,
        }
    }

    /// Reposition, drop all awareness, send the full resync and rebuild
    /// awareness from scratch. Returns the entities to recompute once the
    /// player's lock is released.
    fn zone_in_locked(
        &self,
        mut world: RwLockWriteGuard<'_, World>,
        player: EntityId,
        first_zone: bool,
        parent: Option<EntityId>,
        location: Location,
    ) -> Result<Vec<EntityId>, MovementError> {
        let (old_parent, old_location) = world
            .get(player)
            .map(|e| (e.parent(), e.location))
            .ok_or(GraphError::UnknownEntity(player))?;
        self.reposition(&mut world, player, parent, location)?;
        self.ledger.clear(player, self.sink());
        self.sessions.set(player, PlayerState::ZoningIn);
        self.sink.notify(Notification::FullResync {
            player,
            first_zone,
            parent,
            location,
        });
        self.sink.notify(Notification::PlayerTransformed {
            player,
            old_parent,
            new_parent: parent,
            old_location,
            new_location: location,
        });
        tracing::info!(%player, first_zone, ?parent, instance = location.instance, "zoning in");

        let world = RwLockWriteGuard::downgrade(world);
        self.ledger.recompute(&self.grid, &world, player, self.sink());

        let mut followups = world.subtree_post_order(player);
        followups.pop();
        followups.extend(old_parent.filter(|p| Some(*p) != parent));
        Ok(followups)
    }

    /// Apply a new parent and location and re-home in the grid. Graph checks
    /// run before anything changes. Slotted passengers of a top-level mover
    /// are put at its new location; they are returned with their previous
    /// location.
    fn reposition(
        &self,
        world: &mut World,
        id: EntityId,
        parent: Option<EntityId>,
        location: Location,
    ) -> Result<Vec<(EntityId, Location)>, MovementError> {
        let current = world
            .get(id)
            .map(|e| e.parent())
            .ok_or(GraphError::UnknownEntity(id))?;
        if parent != current {
            world
                .set_parent(id, parent.map(|p| (p, Containment::Contained)))
                .inspect_err(|err| tracing::error!(%id, %err, "move rejected"))?;
            if let Some(e) = world.get_mut(id) {
                e.expose_with_world = false;
            }
        }
        world.set_location(id, location)?;

        let mut passengers = Vec::new();
        if parent.is_none() {
            let seated: Vec<EntityId> = world.get(id).map(|e| e.slotted().collect()).unwrap_or_default();
            for passenger in seated {
                if let Some(e) = world.get_mut(passenger) {
                    passengers.push((passenger, e.location));
                    e.location = location;
                }
            }
        }
        self.grid.move_entity(world, id);
        Ok(passengers)
    }

    /// Change container and re-home. Leaving for the world puts the entity at
    /// its root's position. Only a slotted entity stays exposed with the world.
    fn reparent(
        &self,
        world: &mut World,
        id: EntityId,
        link: Option<(EntityId, Containment)>,
    ) -> Result<Option<EntityId>, MovementError> {
        let standing = world.world_location(id).ok_or(GraphError::UnknownEntity(id))?;
        let parent = link.as_ref().map(|(p, _)| *p);
        let slotted = matches!(link, Some((_, Containment::Slotted(_))));
        let old_parent = world
            .set_parent(id, link)
            .inspect_err(|err| tracing::error!(%id, %err, "container transfer rejected"))?;
        if let Some(e) = world.get_mut(id) {
            if !slotted {
                e.expose_with_world = false;
            }
            if parent.is_none() {
                e.location = standing;
            }
        }
        self.grid.move_entity(world, id);
        self.sink.notify(Notification::ContainmentUpdate { entity: id, parent });
        tracing::debug!(%id, from = ?old_parent, to = ?parent, "container changed");
        Ok(old_parent)
    }
}
