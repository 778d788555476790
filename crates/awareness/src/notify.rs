use crossbeam_channel::{Receiver, Sender};
use interest_common::{EntityId, Location};
use serde::{Deserialize, Serialize};

/// Whether a subject entered or left an observer's awareness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Appeared,
    Disappeared,
}

/// One (observer, subject) awareness transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AwarenessChange {
    pub observer: EntityId,
    pub subject: EntityId,
    pub direction: Direction,
}

/// Why the engine asked the network layer to drop a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The client broke the zone-in sequence.
    SuspectedHack,
}

/// Everything the engine tells the network layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    Awareness(AwarenessChange),
    /// The client must receive a complete scene snapshot instead of deltas.
    FullResync {
        player: EntityId,
        first_zone: bool,
        parent: Option<EntityId>,
        location: Location,
    },
    /// The client acknowledged the scene; buffered deltas may be flushed.
    ZonedIn { player: EntityId },
    /// Lightweight position update for the entity's observers (and the entity
    /// itself when `include_self` is set).
    TransformUpdate {
        entity: EntityId,
        parent: Option<EntityId>,
        location: Location,
        speed: f32,
        include_self: bool,
    },
    ContainmentUpdate {
        entity: EntityId,
        parent: Option<EntityId>,
    },
    CloseConnection {
        player: EntityId,
        reason: DisconnectReason,
    },
    /// A logged-in player changed position or container.
    PlayerTransformed {
        player: EntityId,
        old_parent: Option<EntityId>,
        new_parent: Option<EntityId>,
        old_location: Location,
        new_location: Location,
    },
}

impl Notification {
    pub fn appeared(observer: EntityId, subject: EntityId) -> Self {
        Self::Awareness(AwarenessChange {
            observer,
            subject,
            direction: Direction::Appeared,
        })
    }

    pub fn disappeared(observer: EntityId, subject: EntityId) -> Self {
        Self::Awareness(AwarenessChange {
            observer,
            subject,
            direction: Direction::Disappeared,
        })
    }

    pub fn as_awareness(&self) -> Option<&AwarenessChange> {
        match self {
            Self::Awareness(change) => Some(change),
            _ => None,
        }
    }
}

/// Fire-and-forget consumer of engine notifications.
///
/// Called while engine locks are held: implementations must not block and
/// must not call back into the engine.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl NotificationSink for Sender<Notification> {
    fn notify(&self, notification: Notification) {
        if self.send(notification).is_err() {
            tracing::trace!("notification receiver dropped");
        }
    }
}

/// Unbounded notification channel; sends never block.
pub fn channel() -> (Sender<Notification>, Receiver<Notification>) {
    crossbeam_channel::unbounded()
}
