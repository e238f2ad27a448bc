//! Guest-side mirror of the board.
//!
//! The relay never echoes a guest's own strokes or chat back to it, so the
//! guest renders those locally as it sends them. Resync commands (`CLEAR`,
//! `UNDO`, `REDO`) and lock changes are applied only when the relay's echo
//! arrives, which keeps every mirror in the relay's order.

use actions::{Action, ActionClass, Effect, Renderer, Timeline};
use tracing::debug;

use crate::channel::SendError;
use crate::connector::Peer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    #[error("board is locked")]
    Locked,
    #[error("{0} cannot be sent by a guest")]
    NotSendable(&'static str),
    #[error("removed from the board")]
    Kicked,
}

// =============================================================================
// MIRROR
// =============================================================================

#[derive(Debug, Default)]
pub struct Mirror {
    timeline: Timeline,
    locked: bool,
    holds_lock: bool,
    pending_lock: bool,
    roster: Vec<String>,
    kicked: bool,
}

impl Mirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an action received from the relay.
    pub fn receive(&mut self, action: &Action, renderer: &mut dyn Renderer) {
        match action.class() {
            ActionClass::Stroke => {
                self.timeline.push(action.clone());
                renderer.apply(action);
            }
            ActionClass::Resync => {
                if self.timeline.apply(action) == Effect::Redraw {
                    renderer.snapshot_replay(self.timeline.history());
                }
            }
            ActionClass::Lock => {
                self.locked = matches!(action, Action::LockBoard);
                self.holds_lock = self.locked && self.pending_lock;
                self.pending_lock = false;
                renderer.apply(action);
            }
            ActionClass::Roster => {
                if let Action::UserList { names } = action {
                    self.roster.clone_from(names);
                }
                renderer.apply(action);
            }
            ActionClass::Kicked => {
                self.kicked = true;
                renderer.apply(action);
            }
            ActionClass::Chat | ActionClass::Passthrough => renderer.apply(action),
            ActionClass::Handshake | ActionClass::Unknown => {
                debug!(kind = action.kind(), "mirror: ignored");
            }
        }
    }

    /// Whether a guest may send `action` right now.
    ///
    /// # Errors
    ///
    /// [`Rejected::Locked`] while someone else holds the lock,
    /// [`Rejected::NotSendable`] for relay-only kinds, and
    /// [`Rejected::Kicked`] after removal.
    pub fn check(&self, action: &Action) -> Result<(), Rejected> {
        if self.kicked {
            return Err(Rejected::Kicked);
        }
        match action.class() {
            ActionClass::Handshake => Err(Rejected::NotSendable(actions::KIND_IDENTIFY)),
            ActionClass::Roster => Err(Rejected::NotSendable(actions::KIND_USER_LIST)),
            ActionClass::Kicked => Err(Rejected::NotSendable(actions::KIND_KICKED)),
            ActionClass::Unknown => Err(Rejected::NotSendable("unknown action")),
            _ if action.is_gated() && self.locked && !self.holds_lock => Err(Rejected::Locked),
            _ => Ok(()),
        }
    }

    /// Local effect of an action this guest has just sent.
    pub fn sent(&mut self, action: &Action, renderer: &mut dyn Renderer) {
        match action.class() {
            ActionClass::Stroke => {
                self.timeline.push(action.clone());
                renderer.apply(action);
            }
            ActionClass::Chat | ActionClass::Passthrough => renderer.apply(action),
            ActionClass::Lock => self.pending_lock = matches!(action, Action::LockBoard),
            _ => {}
        }
    }

    #[must_use]
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub fn holds_lock(&self) -> bool {
        self.holds_lock
    }

    #[must_use]
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    #[must_use]
    pub fn is_kicked(&self) -> bool {
        self.kicked
    }
}

// =============================================================================
// GUEST
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Rejected(#[from] Rejected),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// A connected peer driving a renderer through its mirror.
pub struct Guest<R> {
    peer: Peer,
    mirror: Mirror,
    renderer: R,
}

impl<R: Renderer> Guest<R> {
    pub fn new(peer: Peer, renderer: R) -> Self {
        Self { peer, mirror: Mirror::new(), renderer }
    }

    /// Gate, transmit, and locally echo one action. Chat is stamped with
    /// this guest's name.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Rejected`] if the mirror refuses the action,
    /// [`SubmitError::Send`] if the channel does.
    pub fn submit(&mut self, action: Action) -> Result<(), SubmitError> {
        let action = match action {
            Action::Chat { text, .. } => Action::Chat { author: self.peer.name().to_owned(), text },
            other => other,
        };
        self.mirror.check(&action)?;
        self.peer.send(&action)?;
        self.mirror.sent(&action, &mut self.renderer);
        Ok(())
    }

    /// Receive and apply the next action. `None` once the relay is gone.
    pub async fn next(&mut self) -> Option<Action> {
        let action = self.peer.recv().await?;
        self.mirror.receive(&action, &mut self.renderer);
        if self.mirror.is_kicked() {
            self.peer.close();
        }
        Some(action)
    }

    pub fn close(&self) {
        self.peer.close();
    }

    #[must_use]
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    #[must_use]
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    #[must_use]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        applied: Vec<Action>,
        replays: Vec<Vec<Action>>,
    }

    impl Renderer for Recording {
        fn apply(&mut self, action: &Action) {
            self.applied.push(action.clone());
        }

        fn snapshot_replay(&mut self, actions: &[Action]) {
            self.replays.push(actions.to_vec());
        }
    }

    fn rect(x: f64) -> Action {
        Action::Rectangle { x, y: 0.0, w: 1.0, h: 1.0, color: "red".into() }
    }

    #[test]
    fn own_strokes_render_on_send_and_resync_waits_for_echo() {
        let mut mirror = Mirror::new();
        let mut r = Recording::default();

        mirror.sent(&rect(1.0), &mut r);
        mirror.receive(&rect(2.0), &mut r);
        assert_eq!(r.applied, vec![rect(1.0), rect(2.0)]);

        mirror.sent(&Action::Undo, &mut r);
        assert_eq!(mirror.timeline().history_len(), 2);
        assert!(r.replays.is_empty());

        mirror.receive(&Action::Undo, &mut r);
        assert_eq!(r.replays, vec![vec![rect(1.0)]]);
    }

    #[test]
    fn undo_with_empty_history_does_not_redraw() {
        let mut mirror = Mirror::new();
        let mut r = Recording::default();
        mirror.receive(&Action::Undo, &mut r);
        assert!(r.replays.is_empty());

        mirror.receive(&Action::Clear, &mut r);
        assert_eq!(r.replays, vec![Vec::<Action>::new()]);
    }

    #[test]
    fn lock_gates_guest_until_unlock() {
        let mut mirror = Mirror::new();
        let mut r = Recording::default();
        mirror.receive(&Action::LockBoard, &mut r);

        assert_eq!(mirror.check(&rect(0.0)), Err(Rejected::Locked));
        assert_eq!(mirror.check(&Action::Undo), Err(Rejected::Locked));
        assert_eq!(mirror.check(&Action::UnlockBoard), Err(Rejected::Locked));
        assert_eq!(mirror.check(&Action::Chat { author: "G".into(), text: "let me draw".into() }), Ok(()));

        mirror.receive(&Action::UnlockBoard, &mut r);
        assert_eq!(mirror.check(&rect(0.0)), Ok(()));
    }

    #[test]
    fn lock_holder_may_keep_drawing() {
        let mut mirror = Mirror::new();
        let mut r = Recording::default();
        mirror.sent(&Action::LockBoard, &mut r);
        mirror.receive(&Action::LockBoard, &mut r);

        assert!(mirror.is_locked());
        assert!(mirror.holds_lock());
        assert_eq!(mirror.check(&rect(0.0)), Ok(()));
        assert_eq!(mirror.check(&Action::UnlockBoard), Ok(()));
    }

    #[test]
    fn relay_only_kinds_are_not_sendable() {
        let mirror = Mirror::new();
        assert!(matches!(mirror.check(&Action::Kicked), Err(Rejected::NotSendable(_))));
        assert!(matches!(mirror.check(&Action::UserList { names: vec![] }), Err(Rejected::NotSendable(_))));
        assert!(matches!(
            mirror.check(&Action::Identify { name: "again".into() }),
            Err(Rejected::NotSendable(_))
        ));
    }

    #[test]
    fn roster_and_kick_are_tracked() {
        let mut mirror = Mirror::new();
        let mut r = Recording::default();
        mirror.receive(&Action::UserList { names: vec!["Host".into(), "G".into()] }, &mut r);
        assert_eq!(mirror.roster(), ["Host".to_owned(), "G".to_owned()]);

        mirror.receive(&Action::Kicked, &mut r);
        assert!(mirror.is_kicked());
        assert_eq!(mirror.check(&Action::Chat { author: "G".into(), text: "hey".into() }), Err(Rejected::Kicked));
    }
}
