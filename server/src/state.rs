//! Shared application state and per-room session state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! handed to the LAN listener. It holds the configuration and the room
//! registry. `Session` is the authoritative state of one room: roster, lock
//! flag, and the history/redo timeline. A `Session` is owned by exactly one
//! room actor task and is never shared, so it needs no locking.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use actions::{Action, Timeline};
use serde::Serialize;

use crate::config::RelayConfig;
use crate::services::registry::RoomRegistry;

// =============================================================================
// CONNECTION ID
// =============================================================================

/// Relay-assigned participant id. Ids grow monotonically within a room, so
/// ordering by id is join order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The room's own host participant.
    pub const HOST: ConnectionId = ConnectionId(0);

    #[must_use]
    pub fn is_host(self) -> bool {
        self == Self::HOST
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() { f.write_str("host") } else { write!(f, "conn-{}", self.0) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: ConnectionId,
    pub name: String,
    pub is_host: bool,
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Default)]
pub struct Session {
    roster: BTreeMap<ConnectionId, Participant>,
    locked: bool,
    timeline: Timeline,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Session whose roster starts with the host under [`ConnectionId::HOST`].
    #[must_use]
    pub fn hosted(host_name: &str) -> Self {
        let mut session = Self::new();
        session.add_participant(ConnectionId::HOST, host_name);
        session
    }

    /// Record a stroke. Returns false, leaving state untouched, for any
    /// action that does not belong in history.
    pub fn apply_mutating(&mut self, action: &Action) -> bool {
        if !action.is_mutating() {
            return false;
        }
        self.timeline.push(action.clone());
        true
    }

    pub fn undo(&mut self) -> bool {
        self.timeline.undo()
    }

    pub fn redo(&mut self) -> bool {
        self.timeline.redo()
    }

    pub fn clear(&mut self) {
        self.timeline.clear();
    }

    /// History, oldest first.
    #[must_use]
    pub fn replay_snapshot(&self) -> &[Action] {
        self.timeline.history()
    }

    /// Redo stack, bottom first.
    #[must_use]
    pub fn redo_snapshot(&self) -> &[Action] {
        self.timeline.redo_stack()
    }

    pub fn set_lock(&mut self, locked: bool) {
        self.locked = locked;
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn add_participant(&mut self, id: ConnectionId, name: &str) {
        let participant = Participant { id, name: name.to_owned(), is_host: id.is_host() };
        self.roster.insert(id, participant);
    }

    pub fn remove_participant(&mut self, id: ConnectionId) -> Option<Participant> {
        self.roster.remove(&id)
    }

    /// Display names in join order, host first.
    #[must_use]
    pub fn roster(&self) -> Vec<String> {
        self.roster.values().map(|p| p.name.clone()).collect()
    }

    #[must_use]
    pub fn participants(&self) -> Vec<Participant> {
        self.roster.values().cloned().collect()
    }

    #[must_use]
    pub fn participant(&self, id: ConnectionId) -> Option<&Participant> {
        self.roster.get(&id)
    }

    /// Remove the earliest-joined guest called `name`. The host cannot be
    /// kicked.
    pub fn kick(&mut self, name: &str) -> Option<ConnectionId> {
        let id = self
            .roster
            .values()
            .find(|p| !p.is_host && p.name == name)
            .map(|p| p.id)?;
        self.roster.remove(&id);
        Some(id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roster.len()
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.timeline.history_len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.timeline.redo_len()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub rooms: RoomRegistry,
}

impl AppState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let config = Arc::new(config);
        let rooms = RoomRegistry::new(Arc::clone(&config));
        Self { config, rooms }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
