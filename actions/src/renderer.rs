//! Rendering seam.
//!
//! The engine never paints anything itself. Whoever owns a drawing surface
//! implements [`Renderer`]; the relay and the guest connector call it, never
//! the reverse.

use crate::Action;

/// Consumer of decoded actions, usually a drawing surface.
pub trait Renderer: Send {
    /// Apply one action incrementally.
    fn apply(&mut self, action: &Action);

    /// Redraw from scratch. `actions` is the full history, oldest first.
    ///
    /// Called after clear, undo, and redo: erasures cannot be subtracted
    /// from a raster, so the whole history is replayed.
    fn snapshot_replay(&mut self, actions: &[Action]);
}

/// Renderer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn apply(&mut self, _action: &Action) {}

    fn snapshot_replay(&mut self, _actions: &[Action]) {}
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn apply(&mut self, action: &Action) {
        (**self).apply(action);
    }

    fn snapshot_replay(&mut self, actions: &[Action]) {
        (**self).snapshot_replay(actions);
    }
}
