//! Relay-side local consumer that logs what a board would render.

use actions::{Action, Renderer};
use tracing::{debug, info};

pub struct TracingRenderer {
    room: String,
}

impl TracingRenderer {
    #[must_use]
    pub fn new(room: &str) -> Self {
        Self { room: room.to_owned() }
    }
}

impl Renderer for TracingRenderer {
    fn apply(&mut self, action: &Action) {
        match action {
            Action::Chat { author, text } => info!(room = %self.room, %author, %text, "board: chat"),
            Action::UserList { names } => info!(room = %self.room, participants = ?names, "board: roster"),
            Action::LockBoard => info!(room = %self.room, "board: locked"),
            Action::UnlockBoard => info!(room = %self.room, "board: unlocked"),
            other => debug!(room = %self.room, kind = other.kind(), "board: apply"),
        }
    }

    fn snapshot_replay(&mut self, actions: &[Action]) {
        debug!(room = %self.room, strokes = actions.len(), "board: redraw");
    }
}
