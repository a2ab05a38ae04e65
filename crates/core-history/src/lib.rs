//! Canvas history: the authoritative, versioned canvas state.
//!
//! The history owns the current `CanvasState` and advances it by applying
//! command messages. Consumers on other threads never see intermediate
//! states: they hold the snapshot they last observed and call
//! `compare_and_get`, which hands out a new snapshot (and the user-cursor
//! positions accumulated since) only when the state identity moved.
//!
//! Undo model: `UndoPoint` commands push a save point (bounded depth),
//! `Undo` restores the most recent one. Save points are also reported
//! through the save-point callback so a host can persist session resets;
//! `snapshot()` flags the next report as an explicitly requested snapshot.
//!
//! Thread contract: every method locks the single internal mutex, so the
//! history is freely shared between the paint thread (writer) and the tick
//! thread (reader); the paint engine's invariant that the paint thread is
//! the sole writer is a usage contract, not enforced here.

mod apply;

use core_canvas::{CanvasState, DrawContext};
use core_message::{ContextId, Message, SharedMessage};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound of user-cursor slots, one per possible context id.
pub const USER_CURSOR_COUNT: usize = 256;

/// Undo save points retained before the oldest is dropped.
pub const UNDO_DEPTH_LIMIT: usize = 30;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("unknown layer {0}")]
    UnknownLayer(i32),
    #[error("layer {0} already exists")]
    DuplicateLayer(i32),
    #[error("unknown annotation {0}")]
    UnknownAnnotation(u16),
    #[error("nothing to undo")]
    NothingToUndo,
    #[error("message type {0} is not a command")]
    NotACommand(u8),
    #[error("no save point callback configured")]
    NoSavePointFn,
}

#[derive(Debug, Clone, Copy)]
pub struct UserCursor {
    pub context_id: ContextId,
    pub layer_id: u16,
    pub x: i32,
    pub y: i32,
}

/// Out-buffer for `compare_and_get`. Latest-wins per user, insertion
/// ordered, at most `USER_CURSOR_COUNT` entries.
#[derive(Debug, Default)]
pub struct UserCursorBuffer {
    pub cursors: Vec<UserCursor>,
}

impl UserCursorBuffer {
    pub fn clear(&mut self) {
        self.cursors.clear();
    }
}

/// Called at every save point with the state and whether an explicit
/// snapshot had been requested.
pub type SavePointFn = Box<dyn FnMut(&CanvasState, bool) + Send>;

#[derive(Debug)]
struct CursorChanges {
    active: [bool; USER_CURSOR_COUNT],
    order: Vec<ContextId>,
    slots: [(u16, i32, i32); USER_CURSOR_COUNT],
}

impl Default for CursorChanges {
    fn default() -> Self {
        CursorChanges {
            active: [false; USER_CURSOR_COUNT],
            order: Vec::new(),
            slots: [(0, 0, 0); USER_CURSOR_COUNT],
        }
    }
}

impl CursorChanges {
    fn record(&mut self, context_id: ContextId, layer_id: u16, x: i32, y: i32) {
        let i = usize::from(context_id);
        if !self.active[i] {
            self.active[i] = true;
            self.order.push(context_id);
        }
        self.slots[i] = (layer_id, x, y);
    }

    fn drain_into(&mut self, out: &mut UserCursorBuffer) {
        for &context_id in &self.order {
            let i = usize::from(context_id);
            let (layer_id, x, y) = self.slots[i];
            out.cursors.push(UserCursor { context_id, layer_id, x, y });
            self.active[i] = false;
        }
        self.order.clear();
    }
}

struct HistoryInner {
    current: CanvasState,
    undo_stack: Vec<CanvasState>,
    cursors: CursorChanges,
    save_point_fn: Option<SavePointFn>,
    snapshot_requested: bool,
    local_drawing_in_progress: bool,
}

pub struct CanvasHistory {
    inner: Mutex<HistoryInner>,
}

impl CanvasHistory {
    pub fn new(initial_state: Option<CanvasState>, save_point_fn: Option<SavePointFn>) -> Self {
        Self {
            inner: Mutex::new(HistoryInner {
                current: initial_state.unwrap_or_default(),
                undo_stack: Vec::new(),
                cursors: CursorChanges::default(),
                save_point_fn,
                snapshot_requested: false,
                local_drawing_in_progress: false,
            }),
        }
    }

    /// Apply a remote command message.
    pub fn handle(&self, dc: &mut DrawContext, msg: &Message) -> Result<(), HistoryError> {
        self.handle_one(dc, msg)
    }

    /// Apply a local command message. Local messages share the remote code
    /// path; the distinction exists for logging and future fork handling.
    pub fn handle_local(&self, dc: &mut DrawContext, msg: &Message) -> Result<(), HistoryError> {
        self.handle_one(dc, msg)
    }

    fn handle_one(&self, dc: &mut DrawContext, msg: &Message) -> Result<(), HistoryError> {
        let Some(command) = msg.as_command() else {
            return Err(HistoryError::NotACommand(msg.type_id()));
        };
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        apply::apply_command(&mut inner, dc, msg.context_id(), command)
    }

    /// Apply a batch of draw-dabs messages, taking ownership of the batch.
    /// Per-message failures are logged and skipped; a dab batch never
    /// aborts part-way through on one bad message.
    pub fn handle_multidab(&self, dc: &mut DrawContext, msgs: Vec<SharedMessage>) {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        for msg in &msgs {
            let result = match msg.as_command() {
                Some(command) => apply::apply_command(&mut inner, dc, msg.context_id(), command),
                None => Err(HistoryError::NotACommand(msg.type_id())),
            };
            if let Err(e) = result {
                warn!(target: "history", error = %e, "multidab message failed");
            }
        }
    }

    /// Local variant of `handle_multidab`; see `handle_local`.
    pub fn handle_local_multidab(&self, dc: &mut DrawContext, msgs: Vec<SharedMessage>) {
        self.handle_multidab(dc, msgs);
    }

    /// Hard reset to an empty canvas, forgetting undo history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        debug!(target: "history", "reset");
        inner.current = CanvasState::new();
        inner.undo_stack.clear();
    }

    /// Forget undo history but keep the current canvas.
    pub fn soft_reset(&self) {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        debug!(target: "history", "soft_reset");
        inner.undo_stack.clear();
    }

    /// Request that the next save point be reported as a snapshot. Fires
    /// an immediate save point when a callback is configured.
    pub fn snapshot(&self) -> Result<(), HistoryError> {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        inner.snapshot_requested = true;
        if inner.save_point_fn.is_some() {
            let state = inner.current.clone();
            let requested = std::mem::replace(&mut inner.snapshot_requested, false);
            if let Some(f) = inner.save_point_fn.as_mut() {
                f(&state, requested);
            }
            Ok(())
        } else {
            Err(HistoryError::NoSavePointFn)
        }
    }

    /// Flush transient painting state: merges every pending indirect
    /// stroke sublayer down into its layer.
    pub fn cleanup(&self, dc: &mut DrawContext) {
        let _ = dc;
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        apply::merge_all_indirect(&mut inner.current);
    }

    /// Hand out the current state if it moved past `prev`, together with
    /// the cursor positions accumulated since the last hand-out. `out` is
    /// cleared either way.
    pub fn compare_and_get(
        &self,
        prev: &CanvasState,
        out: &mut UserCursorBuffer,
    ) -> Option<CanvasState> {
        out.clear();
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        if CanvasState::same_identity(&inner.current, prev) {
            None
        } else {
            inner.cursors.drain_into(out);
            Some(inner.current.clone())
        }
    }

    pub fn set_local_drawing_in_progress(&self, in_progress: bool) {
        let mut inner = self.inner.lock().expect("history mutex poisoned");
        inner.local_drawing_in_progress = in_progress;
    }
}

impl std::fmt::Debug for CanvasHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasHistory").finish_non_exhaustive()
    }
}
