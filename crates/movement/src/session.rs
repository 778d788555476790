use std::collections::BTreeMap;

use interest_common::EntityId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Zone-in handshake state of a connected player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    /// Connected, never zoned.
    LoggedIn,
    /// A full resync was sent; waiting for the client's scene-ready.
    ZoningIn,
    ZonedIn,
}

/// Handshake state for every logged-in player, keyed by the player's entity.
#[derive(Debug, Default)]
pub struct Sessions {
    states: Mutex<BTreeMap<EntityId, PlayerState>>,
}

impl Sessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a session in `LoggedIn`. Returns the previous state.
    pub fn login(&self, player: EntityId) -> Option<PlayerState> {
        self.states.lock().insert(player, PlayerState::LoggedIn)
    }

    pub fn state(&self, player: EntityId) -> Option<PlayerState> {
        self.states.lock().get(&player).copied()
    }

    /// Overwrite the state of an existing session. Returns false if the
    /// player has no session.
    pub fn set(&self, player: EntityId, state: PlayerState) -> bool {
        match self.states.lock().get_mut(&player) {
            Some(current) => {
                *current = state;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, player: EntityId) -> Option<PlayerState> {
        self.states.lock().remove(&player)
    }

    pub fn is_player(&self, id: EntityId) -> bool {
        self.states.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}
