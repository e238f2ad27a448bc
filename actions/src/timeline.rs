//! History and redo stacks for one board.
//!
//! The stacks are global to the board: undo removes the most recent stroke
//! regardless of who drew it. The relay keeps the authoritative copy and
//! every guest keeps a mirror it replays from after a resync command.

use crate::{Action, ActionClass};

/// What a caller must do after [`Timeline::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// A stroke was appended; render it incrementally.
    Append,
    /// The history changed shape; redraw from [`Timeline::history`].
    Redraw,
    /// Nothing changed.
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    history: Vec<Action>,
    redo: Vec<Action>,
}

impl Timeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stroke. Any redo entries are discarded.
    pub fn push(&mut self, action: Action) {
        self.history.push(action);
        self.redo.clear();
    }

    /// Move the newest stroke onto the redo stack. Returns false when empty.
    pub fn undo(&mut self) -> bool {
        let Some(action) = self.history.pop() else {
            return false;
        };
        self.redo.push(action);
        true
    }

    /// Move the newest undone stroke back into history. Returns false when empty.
    pub fn redo(&mut self) -> bool {
        let Some(action) = self.redo.pop() else {
            return false;
        };
        self.history.push(action);
        true
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.redo.clear();
    }

    /// Apply any timeline-relevant action: strokes, clear, undo, redo.
    /// Everything else leaves the stacks alone.
    pub fn apply(&mut self, action: &Action) -> Effect {
        match action {
            Action::Clear => {
                self.clear();
                Effect::Redraw
            }
            Action::Undo => changed(self.undo()),
            Action::Redo => changed(self.redo()),
            _ if action.class() == ActionClass::Stroke => {
                self.push(action.clone());
                Effect::Append
            }
            _ => Effect::Unchanged,
        }
    }

    /// History, oldest first.
    #[must_use]
    pub fn history(&self) -> &[Action] {
        &self.history
    }

    /// Undone strokes, bottom of the stack first. The last entry is the next
    /// one `redo` restores.
    #[must_use]
    pub fn redo_stack(&self) -> &[Action] {
        &self.redo
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }
}

fn changed(moved: bool) -> Effect {
    if moved { Effect::Redraw } else { Effect::Unchanged }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(n: u32) -> Action {
        Action::Draw { x0: 0.0, y0: 0.0, x1: f64::from(n), y1: f64::from(n), color: "0x000000".into() }
    }

    #[test]
    fn undo_and_redo_on_empty_stacks_are_noops() {
        let mut t = Timeline::new();
        assert!(!t.undo());
        assert!(!t.redo());
        assert_eq!(t.apply(&Action::Undo), Effect::Unchanged);
        assert_eq!(t.history_len(), 0);
        assert_eq!(t.redo_len(), 0);
    }

    #[test]
    fn undo_removes_latest_regardless_of_author() {
        // Alice draws, then Bob draws; one undo takes Bob's stroke.
        let mut t = Timeline::new();
        let alice = stroke(1);
        let bob = Action::Rectangle { x: 5.0, y: 5.0, w: 2.0, h: 2.0, color: "red".into() };
        t.push(alice.clone());
        t.push(bob.clone());

        assert!(t.undo());
        assert_eq!(t.history(), &[alice]);
        assert_eq!(t.redo_len(), 1);

        assert!(t.redo());
        assert_eq!(t.history().last(), Some(&bob));
    }

    #[test]
    fn stroke_after_undo_discards_redo() {
        let mut t = Timeline::new();
        t.push(stroke(1));
        t.push(stroke(2));
        t.undo();
        assert_eq!(t.redo_len(), 1);

        assert_eq!(t.apply(&stroke(3)), Effect::Append);
        assert_eq!(t.redo_len(), 0);
        assert_eq!(t.history_len(), 2);
    }

    #[test]
    fn clear_empties_both_stacks() {
        let mut t = Timeline::new();
        t.push(stroke(1));
        t.push(stroke(2));
        t.undo();

        assert_eq!(t.apply(&Action::Clear), Effect::Redraw);
        assert_eq!(t.history_len(), 0);
        assert_eq!(t.redo_len(), 0);
    }

    #[test]
    fn stack_sizes_track_strokes_since_last_clear() {
        let mut t = Timeline::new();
        let script = [
            stroke(1),
            stroke(2),
            Action::Undo,
            Action::Undo,
            Action::Undo,
            Action::Redo,
            Action::Clear,
            stroke(3),
            stroke(4),
            stroke(5),
            Action::Undo,
            Action::Redo,
            Action::Redo,
            Action::Undo,
        ];
        for action in &script {
            t.apply(action);
        }
        // Three strokes after the clear, none discarded by a later stroke.
        assert_eq!(t.history_len() + t.redo_len(), 3);
        assert_eq!(t.history_len(), 2);
    }

    #[test]
    fn history_is_oldest_first() {
        let mut t = Timeline::new();
        t.push(stroke(1));
        t.push(stroke(2));
        t.push(stroke(3));
        assert_eq!(t.history(), &[stroke(1), stroke(2), stroke(3)]);
    }

    #[test]
    fn non_timeline_actions_are_unchanged() {
        let mut t = Timeline::new();
        let chat = Action::Chat { author: "a".into(), text: "hi".into() };
        assert_eq!(t.apply(&chat), Effect::Unchanged);
        assert_eq!(t.apply(&Action::LockBoard), Effect::Unchanged);
        assert_eq!(t.history_len(), 0);
    }
}
