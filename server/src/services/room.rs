//! Room actor: the relay for one board.
//!
//! ARCHITECTURE
//! ============
//! Each room runs as one tokio task that owns its `Session`, the outbound
//! `Channel` of every participant, and the host's `Renderer`. Connections,
//! the host console and HTTP routes talk to it through a cloneable
//! `RoomHandle` that enqueues `RoomEvent`s. The order in which the actor
//! dequeues events is the canonical order of the board.
//!
//! DESIGN
//! ======
//! - `classify` is pure business logic: it validates, mutates the session
//!   and returns an `Outcome`. `deliver` owns all outbound concerns.
//! - Fan-out never blocks. A participant whose outbound queue is full is
//!   retired on the spot, and retiring broadcasts the new roster, which may
//!   retire further participants. Retirements are processed from a queue so
//!   that cascade stays iterative.
//! - A guest action refused by the lock is answered with a resync of that
//!   guest alone. Its mirror applied the action when sending it.
//! - A hostless room stops once its last participant leaves. Events queued
//!   behind that moment fail with `RoomError::Closed` and callers reopen.

use std::collections::{BTreeMap, VecDeque};

use actions::{Action, ActionClass, Renderer};
use peer::{Channel, SendError};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::state::{ConnectionId, Session};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room is closed")]
    Closed,
}

impl frames::ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "E_ROOM_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct RoomOptions {
    pub code: String,
    /// Display name of the room's own host. `None` for cloud rooms that
    /// exist only to relay between guests.
    pub host_name: Option<String>,
    pub replay_on_join: bool,
    pub evict_when_empty: bool,
    pub queue: usize,
}

/// Point-in-time view of a room for the HTTP surface and the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub hosted: bool,
    pub participants: Vec<String>,
    pub locked: bool,
    pub lock_holder: Option<String>,
    pub history_len: usize,
    pub redo_len: usize,
}

pub enum RoomEvent {
    Join { name: String, channel: Channel, reply: oneshot::Sender<ConnectionId> },
    Action { id: ConnectionId, action: Action },
    Leave { id: ConnectionId },
    Host { action: Action },
    Kick { name: String, reply: oneshot::Sender<bool> },
    Snapshot { reply: oneshot::Sender<RoomSnapshot> },
    History { reply: oneshot::Sender<Vec<Action>> },
}

/// Result of classifying one action. The delivery layer uses this to decide
/// who receives what; `classify` never sends anything itself.
#[derive(Debug, PartialEq)]
enum Outcome {
    /// Deliver to every participant including the sender.
    Broadcast(Action),
    /// Deliver to every participant except the sender.
    BroadcastExcludeSender(Action),
    /// Deliver to everyone; the local consumer redraws from the snapshot.
    Resync(Action),
    /// Drop the action and log why.
    Reject(&'static str),
    /// Drop a gated action and resync the sender, whose mirror has already
    /// applied it.
    Refuse(&'static str),
}

// =============================================================================
// HANDLE
// =============================================================================

#[derive(Debug, Clone)]
pub struct RoomHandle {
    code: String,
    tx: mpsc::Sender<RoomEvent>,
}

impl RoomHandle {
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Register a participant and broadcast the new roster.
    ///
    /// # Errors
    ///
    /// [`RoomError::Closed`] if the room stopped before handling the join.
    pub async fn join(&self, name: &str, channel: Channel) -> Result<ConnectionId, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomEvent::Join { name: name.to_owned(), channel, reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    /// # Errors
    ///
    /// [`RoomError::Closed`] if the room has stopped.
    pub async fn submit(&self, id: ConnectionId, action: Action) -> Result<(), RoomError> {
        self.send(RoomEvent::Action { id, action }).await
    }

    /// Deregister a participant. Unknown ids are ignored, so this may race
    /// with a kick or a slow-consumer eviction.
    pub async fn leave(&self, id: ConnectionId) {
        let _ = self.send(RoomEvent::Leave { id }).await;
    }

    /// # Errors
    ///
    /// [`RoomError::Closed`] if the room has stopped.
    pub async fn host_action(&self, action: Action) -> Result<(), RoomError> {
        self.send(RoomEvent::Host { action }).await
    }

    /// Remove the earliest-joined guest called `name`. Returns whether one
    /// was found.
    ///
    /// # Errors
    ///
    /// [`RoomError::Closed`] if the room has stopped.
    pub async fn kick(&self, name: &str) -> Result<bool, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomEvent::Kick { name: name.to_owned(), reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    /// # Errors
    ///
    /// [`RoomError::Closed`] if the room has stopped.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomEvent::Snapshot { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    /// Current history, oldest first.
    ///
    /// # Errors
    ///
    /// [`RoomError::Closed`] if the room has stopped.
    pub async fn history(&self) -> Result<Vec<Action>, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomEvent::History { reply }).await?;
        rx.await.map_err(|_| RoomError::Closed)
    }

    async fn send(&self, event: RoomEvent) -> Result<(), RoomError> {
        self.tx.send(event).await.map_err(|_| RoomError::Closed)
    }
}

/// Spawn a room actor and return its handle.
pub fn spawn_room(opts: RoomOptions, renderer: Box<dyn Renderer>) -> RoomHandle {
    let (tx, rx) = mpsc::channel(opts.queue.max(1));
    let session = match &opts.host_name {
        Some(host) => Session::hosted(host),
        None => Session::new(),
    };
    let room = Room {
        code: opts.code.clone(),
        session,
        channels: BTreeMap::new(),
        renderer,
        lock_holder: None,
        next_id: 1,
        hosted: opts.host_name.is_some(),
        replay_on_join: opts.replay_on_join,
        evict_when_empty: opts.evict_when_empty,
        emptied: false,
    };
    tokio::spawn(room.run(rx));
    RoomHandle { code: opts.code, tx }
}

// =============================================================================
// ACTOR
// =============================================================================

struct Room {
    code: String,
    session: Session,
    channels: BTreeMap<ConnectionId, Channel>,
    renderer: Box<dyn Renderer>,
    /// Guest whose `LOCK_BOARD` set the current lock. `None` while unlocked
    /// or when the host locked.
    lock_holder: Option<ConnectionId>,
    next_id: u64,
    hosted: bool,
    replay_on_join: bool,
    evict_when_empty: bool,
    /// Set once a departure leaves the roster empty.
    emptied: bool,
}

impl Room {
    async fn run(mut self, mut rx: mpsc::Receiver<RoomEvent>) {
        info!(room = %self.code, hosted = self.hosted, "room: opened");
        while let Some(event) = rx.recv().await {
            self.handle(event);
            if self.should_evict() {
                break;
            }
        }
        for channel in self.channels.values() {
            channel.close();
        }
        info!(room = %self.code, "room: closed");
    }

    fn should_evict(&self) -> bool {
        self.evict_when_empty && !self.hosted && self.emptied && self.session.is_empty()
    }

    fn handle(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Join { name, channel, reply } => self.join(name, channel, reply),
            RoomEvent::Action { id, action } => {
                if !self.channels.contains_key(&id) {
                    debug!(room = %self.code, conn = %id, "room: action from departed participant");
                    return;
                }
                let outcome = self.classify(id, action);
                self.deliver(id, outcome);
            }
            RoomEvent::Leave { id } => self.retire(vec![id], "left"),
            RoomEvent::Host { action } => {
                let outcome = self.classify(ConnectionId::HOST, action);
                self.deliver(ConnectionId::HOST, outcome);
            }
            RoomEvent::Kick { name, reply } => {
                let kicked = self.kick(&name);
                let _ = reply.send(kicked);
            }
            RoomEvent::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            RoomEvent::History { reply } => {
                let _ = reply.send(self.session.replay_snapshot().to_vec());
            }
        }
    }

    // =========================================================================
    // MEMBERSHIP
    // =========================================================================

    fn join(&mut self, name: String, channel: Channel, reply: oneshot::Sender<ConnectionId>) {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.session.add_participant(id, &name);
        self.channels.insert(id, channel);

        if reply.send(id).is_err() {
            // The connection task is gone; undo the registration.
            self.retire(vec![id], "abandoned join");
            return;
        }
        info!(room = %self.code, conn = %id, %name, participants = self.session.len(), "room: joined");

        let roster = Action::UserList { names: self.session.roster() };
        let mut failed = self.send_all(&roster, None);
        self.renderer.apply(&roster);

        if self.replay_on_join && !failed.contains(&id) {
            if let Err(e) = self.replay_to(id) {
                debug!(room = %self.code, conn = %id, error = %e, "room: replay failed");
                failed.push(id);
            }
        }
        self.retire(failed, "slow consumer");
    }

    /// Bring one participant's mirror in line with the session: `CLEAR`, the
    /// history, the redo stack rebuilt as strokes plus one `UNDO` each, then
    /// the lock.
    fn replay_to(&self, id: ConnectionId) -> Result<(), SendError> {
        let Some(channel) = self.channels.get(&id) else {
            return Ok(());
        };
        channel.send(actions::encode(&Action::Clear))?;
        for action in self.session.replay_snapshot() {
            channel.send(actions::encode(action))?;
        }
        let redo = self.session.redo_snapshot();
        for action in redo.iter().rev() {
            channel.send(actions::encode(action))?;
        }
        for _ in redo {
            channel.send(actions::encode(&Action::Undo))?;
        }
        if self.session.is_locked() {
            channel.send(actions::encode(&Action::LockBoard))?;
        }
        Ok(())
    }

    fn kick(&mut self, name: &str) -> bool {
        let Some(id) = self.session.kick(name) else {
            info!(room = %self.code, %name, "room: kick target not found");
            return false;
        };
        if let Some(channel) = self.channels.get(&id) {
            if let Err(e) = channel.send(actions::encode(&Action::Kicked)) {
                debug!(room = %self.code, conn = %id, error = %e, "room: kick notice not delivered");
            }
        }
        info!(room = %self.code, conn = %id, %name, "room: kicked");
        self.retire(vec![id], "kicked");
        true
    }

    /// Close and deregister participants, broadcasting each roster change.
    fn retire(&mut self, ids: Vec<ConnectionId>, reason: &'static str) {
        let mut pending: VecDeque<ConnectionId> = ids.into();
        while let Some(id) = pending.pop_front() {
            let Some(channel) = self.channels.remove(&id) else {
                continue;
            };
            channel.close();
            let name = self.session.remove_participant(id).map(|p| p.name);
            info!(room = %self.code, conn = %id, name = ?name, reason, participants = self.session.len(), "room: left");
            if self.session.is_empty() {
                self.emptied = true;
            }

            let roster = Action::UserList { names: self.session.roster() };
            let mut failed = self.send_all(&roster, None);
            self.renderer.apply(&roster);

            if self.lock_holder == Some(id) {
                self.lock_holder = None;
                self.session.set_lock(false);
                info!(room = %self.code, conn = %id, "room: lock released by departure");
                failed.extend(self.send_all(&Action::UnlockBoard, None));
                self.renderer.apply(&Action::UnlockBoard);
            }
            pending.extend(failed);
        }
    }

    // =========================================================================
    // CLASSIFY
    // =========================================================================

    fn classify(&mut self, sender: ConnectionId, action: Action) -> Outcome {
        let gated = !sender.is_host() && self.session.is_locked() && self.lock_holder != Some(sender);
        if gated && action.is_gated() {
            return Outcome::Refuse("board is locked");
        }

        match action.class() {
            ActionClass::Stroke => {
                self.session.apply_mutating(&action);
                Outcome::BroadcastExcludeSender(action)
            }
            ActionClass::Resync => {
                // Undo and redo on an empty stack are still echoed.
                match action {
                    Action::Clear => self.session.clear(),
                    Action::Undo => {
                        self.session.undo();
                    }
                    Action::Redo => {
                        self.session.redo();
                    }
                    _ => {}
                }
                Outcome::Resync(action)
            }
            ActionClass::Chat => {
                let Action::Chat { text, .. } = action else {
                    return Outcome::Reject("malformed chat");
                };
                let author = self
                    .session
                    .participant(sender)
                    .map_or_else(|| sender.to_string(), |p| p.name.clone());
                Outcome::BroadcastExcludeSender(Action::Chat { author, text })
            }
            ActionClass::Lock => {
                let locked = matches!(action, Action::LockBoard);
                self.session.set_lock(locked);
                self.lock_holder = (locked && !sender.is_host()).then_some(sender);
                Outcome::Broadcast(action)
            }
            ActionClass::Passthrough => Outcome::BroadcastExcludeSender(action),
            ActionClass::Handshake => Outcome::Reject("identify after handshake"),
            ActionClass::Roster => Outcome::Reject("user list is relay-only"),
            ActionClass::Kicked => Outcome::Reject("kick notice is relay-only"),
            ActionClass::Unknown => Outcome::Reject("unknown action kind"),
        }
    }

    // =========================================================================
    // DELIVER
    // =========================================================================

    fn deliver(&mut self, sender: ConnectionId, outcome: Outcome) {
        let failed = match outcome {
            Outcome::Broadcast(action) => {
                debug!(room = %self.code, conn = %sender, kind = action.kind(), "room: broadcast");
                let failed = self.send_all(&action, None);
                self.renderer.apply(&action);
                failed
            }
            Outcome::BroadcastExcludeSender(action) => {
                debug!(room = %self.code, conn = %sender, kind = action.kind(), "room: forward");
                let failed = self.send_all(&action, Some(sender));
                if !sender.is_host() {
                    self.renderer.apply(&action);
                }
                failed
            }
            Outcome::Resync(action) => {
                debug!(room = %self.code, conn = %sender, kind = action.kind(), "room: resync");
                let failed = self.send_all(&action, None);
                self.renderer.snapshot_replay(self.session.replay_snapshot());
                failed
            }
            Outcome::Reject(reason) => {
                warn!(room = %self.code, conn = %sender, reason, "room: dropped action");
                Vec::new()
            }
            Outcome::Refuse(reason) => {
                warn!(room = %self.code, conn = %sender, reason, "room: refused action, resyncing sender");
                match self.replay_to(sender) {
                    Ok(()) => Vec::new(),
                    Err(e) => {
                        debug!(room = %self.code, conn = %sender, error = %e, "room: resync failed");
                        vec![sender]
                    }
                }
            }
        };
        self.retire(failed, "slow consumer");
    }

    /// Enqueue one line on every channel except `exclude`. Returns the ids
    /// whose queue was full or already closed.
    fn send_all(&self, action: &Action, exclude: Option<ConnectionId>) -> Vec<ConnectionId> {
        let line = actions::encode(action);
        let mut failed = Vec::new();
        for (id, channel) in &self.channels {
            if Some(*id) == exclude {
                continue;
            }
            if let Err(e) = channel.send(line.clone()) {
                warn!(room = %self.code, conn = %id, error = %e, "room: dropping participant");
                failed.push(*id);
            }
        }
        failed
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            code: self.code.clone(),
            hosted: self.hosted,
            participants: self.session.roster(),
            locked: self.session.is_locked(),
            lock_holder: self
                .lock_holder
                .and_then(|id| self.session.participant(id))
                .map(|p| p.name.clone()),
            history_len: self.session.history_len(),
            redo_len: self.session.redo_len(),
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
