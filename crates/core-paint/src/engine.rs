//! The paint engine: intake, paint thread, view ticking and rendering.
//!
//! Thread roles (the engine is `Sync`; share it behind an `Arc`):
//! * Producer threads call `handle_messages` and the preview installers.
//! * The paint thread (spawned in `new`, owned here) drains the queues
//!   into canvas history.
//! * One tick thread at a time calls `tick`, `prepare_render` and the
//!   `render_*` methods; the local-view setters belong to it too. All of
//!   that state sits behind one mutex, so a misplaced concurrent call
//!   serialises instead of racing.
//!
//! Invariants:
//! * `view_cs` is always derived from `history_cs` (possibly identical).
//! * `history_cs` is exactly the last state `compare_and_get` returned.
//! * The queue semaphore's count equals the entries sitting in both
//!   queues, plus one shutdown wake-up once `running` drops.
//! * Exactly one preview is installed at a time; a replaced preview is
//!   dropped (disposed) exactly once.

use crate::dispatch::{self, Dispatch, QueueEntry, Queues};
use crate::observer::{MetaObserver, RenderTileFn, TickObserver};
use crate::preview::{CutPreview, DabsPreview, InstalledPreview, PreviewRender, PreviewSwap};
use crate::render::{RenderJob, RenderPass, RenderTarget, run_render_job};
use crate::sync::Semaphore;
use crate::view::{self, LayerViewMode, LocalView};
use crate::worker::WorkerPool;
use core_acl::{AclResult, AclState, CHANGE_MASK};
use core_canvas::{
    BIT15, CanvasDiff, CanvasState, DrawContext, LayerId, Pixel15, SharedTile, Tile,
};
use core_history::{CanvasHistory, SavePointFn, UserCursorBuffer};
use core_message::{ContextId, InternalMessage, Message, MessageBody, SharedMessage};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// Capacity of the render job queue.
const RENDER_QUEUE_CAPACITY: usize = 1024;

/// Where a message batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    Local,
    Remote,
}

impl MessageSource {
    fn is_local(self) -> bool {
        matches!(self, MessageSource::Local)
    }
}

/// State shared with the paint thread and the producers.
struct EngineShared {
    queues: Mutex<Queues>,
    queue_sem: Semaphore,
    running: AtomicBool,
    catchup: AtomicI32,
    next_preview: Mutex<Option<PreviewSwap>>,
    history: CanvasHistory,
    acls: Mutex<AclState>,
}

/// Tick-thread state: everything the composition and render paths touch.
struct ViewState {
    history_cs: CanvasState,
    view_cs: CanvasState,
    local_view: LocalView,
    preview: Option<InstalledPreview>,
    preview_dc: DrawContext,
    diff: CanvasDiff,
    checker: SharedTile,
    target: Arc<RenderTarget>,
    cursors: UserCursorBuffer,
    tiles_waiting: usize,
}

pub struct PaintEngine {
    shared: Arc<EngineShared>,
    view: Mutex<ViewState>,
    render_pool: WorkerPool<RenderJob>,
    tiles_done: Arc<Semaphore>,
    paint_thread: Mutex<Option<JoinHandle<()>>>,
}

impl PaintEngine {
    /// Build the engine and spawn its paint thread and render workers.
    /// `initial_state` seeds history (not the view; the first tick picks
    /// it up through `compare_and_get`).
    pub fn new(
        acls: AclState,
        initial_state: Option<CanvasState>,
        save_point_fn: Option<SavePointFn>,
    ) -> Self {
        let shared = Arc::new(EngineShared {
            queues: Mutex::new(Queues::new()),
            queue_sem: Semaphore::new(0),
            running: AtomicBool::new(true),
            catchup: AtomicI32::new(-1),
            next_preview: Mutex::new(None),
            history: CanvasHistory::new(initial_state, save_point_fn),
            acls: Mutex::new(acls),
        });

        let paint_thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("paint".into())
                .spawn(move || run_paint_engine(shared))
                .expect("failed to spawn paint thread")
        };

        let render_threads = thread::available_parallelism().map_or(1, |n| n.get());
        let render_pool =
            WorkerPool::new("render", RENDER_QUEUE_CAPACITY, render_threads, run_render_job);

        let history_cs = CanvasState::new();
        let view_cs = history_cs.clone();
        Self {
            shared,
            view: Mutex::new(ViewState {
                history_cs,
                view_cs,
                local_view: LocalView::default(),
                preview: None,
                preview_dc: DrawContext::new(),
                diff: CanvasDiff::new(),
                checker: Arc::new(Tile::new_checker(
                    0,
                    Pixel15::new(BIT15 / 2, BIT15 / 2, BIT15 / 2, BIT15),
                    Pixel15::new(BIT15, BIT15, BIT15, BIT15),
                )),
                target: Arc::new(RenderTarget::new(0, 0)),
                cursors: UserCursorBuffer::default(),
                tiles_waiting: 0,
            }),
            render_pool,
            tiles_done: Arc::new(Semaphore::new(0)),
            paint_thread: Mutex::new(Some(paint_thread)),
        }
    }

    pub fn render_thread_count(&self) -> usize {
        self.render_pool.thread_count()
    }

    pub fn set_local_drawing_in_progress(&self, in_progress: bool) {
        self.shared.history.set_local_drawing_in_progress(in_progress);
    }

    // --- intake -----------------------------------------------------------

    /// Feed a batch of messages into the engine. Local messages skip the
    /// ACL filter but drop meta traffic; remote messages are filtered and
    /// their meta traffic folded into per-call notifications. Returns how
    /// many messages were queued for the paint thread.
    pub fn handle_messages(
        &self,
        source: MessageSource,
        msgs: &[SharedMessage],
        observer: &mut dyn MetaObserver,
    ) -> usize {
        let local = source.is_local();
        let mut meta = MetaBuffer::new();
        let mut pushed = 0;
        {
            let mut acls = self.shared.acls.lock().expect("acl mutex poisoned");
            // Nothing is locked beyond the filter until a message actually
            // needs pushing.
            let mut i = 0;
            while i < msgs.len() && !should_push(&mut acls, &mut meta, local, &msgs[i]) {
                i += 1;
            }
            if i < msgs.len() {
                let mut queues = self.shared.queues.lock().expect("queue mutex poisoned");
                let queue = if local { &mut queues.local } else { &mut queues.remote };
                queue.push_back(QueueEntry::Canvas(Arc::clone(&msgs[i])));
                pushed = 1;
                for msg in &msgs[i + 1..] {
                    if should_push(&mut acls, &mut meta, local, msg) {
                        queue.push_back(QueueEntry::Canvas(Arc::clone(msg)));
                        pushed += 1;
                    }
                }
                self.shared.queue_sem.post_n(pushed);
            }
        }

        // Callbacks fire after the locks are gone, ACL change first: the
        // UI wants permissions settled before visual meta state.
        let mask = meta.acl_change_flags & CHANGE_MASK;
        if mask != 0 {
            observer.acls_changed(mask);
        }
        for &context_id in &meta.laser_order {
            let (persistence, color) = meta.lasers[usize::from(context_id)];
            observer.laser_trail(context_id, persistence, color);
        }
        for &context_id in &meta.cursor_order {
            let (x, y) = meta.cursors[usize::from(context_id)];
            observer.move_pointer(context_id, x, y);
        }
        if let Some(layer_id) = meta.default_layer {
            observer.default_layer_set(layer_id);
        }
        pushed
    }

    // --- ticking ----------------------------------------------------------

    /// Advance the view: pick up catchup progress, a new history state and
    /// preview swaps, recompose if anything moved, and report the
    /// differences against the previous view.
    pub fn tick(&self, observer: &mut dyn TickObserver) {
        let mut view = self.view.lock().expect("view mutex poisoned");
        let v = &mut *view;

        let progress = self.shared.catchup.swap(-1, Ordering::AcqRel);
        if progress != -1 {
            observer.catchup(progress);
        }

        let next_history = self.shared.history.compare_and_get(&v.history_cs, &mut v.cursors);
        let history_changed = next_history.is_some();
        if let Some(cs) = next_history {
            v.history_cs = cs;
        }

        let swap = self.shared.next_preview.lock().expect("preview slot poisoned").take();
        let preview_changed = swap.is_some();
        if let Some(swap) = swap {
            // Assignment drops (disposes) whatever was installed before.
            v.preview = match swap {
                PreviewSwap::Clear => None,
                PreviewSwap::Install(preview) => Some(preview),
            };
        }

        let local_view_changed = v.local_view.prev_lpl.is_none();
        if !(history_changed || preview_changed || local_view_changed) {
            return;
        }

        // Local overlays stack on top of whatever history produced.
        let composed = view::apply_preview(v.preview.as_mut(), &v.history_cs, &mut v.preview_dc);
        let composed = view::apply_inspect(v.local_view.inspect_context_id, composed);
        let composed = view::apply_local_layer_props(&mut v.local_view, composed);
        let prev_view = std::mem::replace(&mut v.view_cs, composed);
        emit_changes(v, &prev_view, observer);
    }

    // --- rendering --------------------------------------------------------

    /// Report the current view size and (re)allocate the render target if
    /// it changed.
    pub fn prepare_render(&self, render_size: impl FnOnce(i32, i32)) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        let width = v.view_cs.width();
        let height = v.view_cs.height();
        render_size(width, height);
        if v.target.width() != width || v.target.height() != height {
            v.target = Arc::new(RenderTarget::new(width, height));
        }
    }

    /// Render every tile the last tick dirtied, blocking until all tile
    /// callbacks have run.
    pub fn render_everything(&self, render_tile: RenderTileFn) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        self.render_pass(&mut v, render_tile, None);
    }

    /// Like `render_everything`, restricted to a tile rectangle
    /// (inclusive bounds).
    pub fn render_tile_bounds(
        &self,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
        render_tile: RenderTileFn,
    ) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        self.render_pass(&mut v, render_tile, Some((left, top, right, bottom)));
    }

    fn render_pass(
        &self,
        v: &mut ViewState,
        render_tile: RenderTileFn,
        bounds: Option<(i32, i32, i32, i32)>,
    ) {
        let pass = Arc::new(RenderPass {
            view_cs: v.view_cs.clone(),
            target: Arc::clone(&v.target),
            checker: Arc::clone(&v.checker),
            render_tile,
            done: Arc::clone(&self.tiles_done),
        });
        let pool = &self.render_pool;
        let mut waiting = 0usize;
        {
            let enqueue = |x: i32, y: i32| {
                pool.push(RenderJob { pass: Arc::clone(&pass), x, y });
            };
            match bounds {
                None => v.diff.each_pos_reset(|x, y| {
                    waiting += 1;
                    enqueue(x, y);
                }),
                Some((left, top, right, bottom)) => {
                    v.diff.each_pos_tile_bounds_reset(left, top, right, bottom, |x, y| {
                        waiting += 1;
                        enqueue(x, y);
                    })
                }
            }
        }
        v.tiles_waiting = waiting;
        if waiting != 0 {
            self.tiles_done.wait_n(waiting);
            v.tiles_waiting = 0;
        }
    }

    /// Copy of the flattened display tile last rendered at a position.
    pub fn rendered_tile_at(&self, tile_x: i32, tile_y: i32) -> Option<Tile> {
        let v = self.view.lock().expect("view mutex poisoned");
        v.target.tile_at(tile_x, tile_y)
    }

    /// Snapshot of the current view state.
    pub fn canvas_state(&self) -> CanvasState {
        self.view.lock().expect("view mutex poisoned").view_cs.clone()
    }

    // --- local view -------------------------------------------------------

    pub fn set_active_layer_id(&self, layer_id: LayerId) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        if v.local_view.active_layer_id != layer_id {
            v.local_view.active_layer_id = layer_id;
            if v.local_view.layer_view_mode != LayerViewMode::Normal {
                v.local_view.invalidate();
            }
        }
    }

    pub fn set_active_frame_index(&self, frame_index: usize) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        if v.local_view.active_frame_index != frame_index {
            v.local_view.active_frame_index = frame_index;
            if matches!(
                v.local_view.layer_view_mode,
                LayerViewMode::Frame | LayerViewMode::OnionSkin
            ) {
                v.local_view.invalidate();
            }
        }
    }

    pub fn set_view_mode(&self, mode: LayerViewMode) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        if v.local_view.layer_view_mode != mode {
            v.local_view.layer_view_mode = mode;
            v.local_view.invalidate();
        }
    }

    pub fn reveal_censored(&self) -> bool {
        self.view.lock().expect("view mutex poisoned").local_view.reveal_censored
    }

    pub fn set_reveal_censored(&self, reveal_censored: bool) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        if v.local_view.reveal_censored != reveal_censored {
            v.local_view.reveal_censored = reveal_censored;
            v.local_view.invalidate();
        }
    }

    /// Hide or show one layer in this client's view only.
    pub fn set_layer_visibility(&self, layer_id: LayerId, hidden: bool) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        let index = v.local_view.hidden_layers.iter().position(|&id| id == layer_id);
        match (hidden, index) {
            (true, None) => {
                v.local_view.hidden_layers.push(layer_id);
                v.local_view.invalidate();
            }
            (false, Some(i)) => {
                v.local_view.hidden_layers.swap_remove(i);
                v.local_view.invalidate();
            }
            _ => {}
        }
    }

    pub fn set_inspect_context_id(&self, context_id: ContextId) {
        let mut v = self.view.lock().expect("view mutex poisoned");
        if v.local_view.inspect_context_id != context_id {
            v.local_view.inspect_context_id = context_id;
            v.local_view.invalidate();
        }
    }

    // --- previews ---------------------------------------------------------

    /// Install a cut preview: the rectangle (or mask) shows as erased on
    /// the target layer until cleared or replaced.
    pub fn preview_cut(
        &self,
        layer_id: LayerId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        mask: Option<Vec<u8>>,
    ) {
        self.install_preview(Box::new(CutPreview::new(layer_id, x, y, width, height, mask)));
    }

    /// Install a dabs preview replaying the held messages over the target
    /// layer.
    pub fn preview_dabs(&self, layer_id: LayerId, messages: Vec<SharedMessage>) {
        if !messages.is_empty() {
            self.install_preview(Box::new(DabsPreview::new(layer_id, messages)));
        }
    }

    /// Remove the installed preview.
    pub fn preview_clear(&self) {
        self.sync_preview(PreviewSwap::Clear);
    }

    fn install_preview(&self, kind: Box<dyn PreviewRender>) {
        let (offset_x, offset_y) = {
            let v = self.view.lock().expect("view mutex poisoned");
            (v.view_cs.offset_x(), v.view_cs.offset_y())
        };
        self.sync_preview(PreviewSwap::Install(InstalledPreview::new(offset_x, offset_y, kind)));
    }

    /// Route the swap through the local queue so preview changes keep
    /// their order relative to the strokes around them; the paint thread
    /// moves it into the swap slot for the next tick.
    fn sync_preview(&self, swap: PreviewSwap) {
        let mut queues = self.shared.queues.lock().expect("queue mutex poisoned");
        queues.local.push_back(QueueEntry::PreviewInstall(swap));
        self.shared.queue_sem.post();
    }

    // --- shutdown ---------------------------------------------------------

    /// Stop the paint thread and render workers, then drain both queues.
    /// Dropping the drained entries releases their message references and
    /// disposes any still-queued preview installs. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(target: "paint.thread", "shutdown");
        self.render_pool.free_join();
        self.shared.queue_sem.post();
        if let Some(handle) = self.paint_thread.lock().expect("join slot poisoned").take() {
            if handle.join().is_err() {
                warn!(target: "paint.thread", "paint thread panicked");
            }
        }
        self.shared.next_preview.lock().expect("preview slot poisoned").take();
        let mut queues = self.shared.queues.lock().expect("queue mutex poisoned");
        queues.local.clear();
        queues.remote.clear();
    }
}

impl Drop for PaintEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// --- paint thread -----------------------------------------------------------

fn run_paint_engine(shared: Arc<EngineShared>) {
    info!(target: "paint.thread", "paint_thread_started");
    let mut dc = DrawContext::new();
    loop {
        shared.queue_sem.wait();
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        handle_next(&shared, &mut dc);
    }
    info!(target: "paint.thread", "paint_thread_stopped");
}

fn handle_next(shared: &EngineShared, dc: &mut DrawContext) {
    let shifted = {
        let mut queues = shared.queues.lock().expect("queue mutex poisoned");
        dispatch::shift_dispatch(&mut queues, &shared.queue_sem)
    };
    let Some((local, dispatch)) = shifted else {
        return;
    };
    match dispatch {
        Dispatch::Preview(swap) => {
            // Swap in the new preview; the displaced one is disposed here.
            drop(
                shared
                    .next_preview
                    .lock()
                    .expect("preview slot poisoned")
                    .replace(swap),
            );
        }
        Dispatch::Single(msg) => match msg.body() {
            MessageBody::Internal(internal) => handle_internal(shared, dc, *internal),
            _ => {
                let result = if local {
                    shared.history.handle_local(dc, &msg)
                } else {
                    shared.history.handle(dc, &msg)
                };
                if let Err(e) = result {
                    warn!(target: "paint.thread", error = %e, local, "command failed");
                }
            }
        },
        Dispatch::Batch(batch) => {
            if local {
                shared.history.handle_local_multidab(dc, batch);
            } else {
                shared.history.handle_multidab(dc, batch);
            }
        }
    }
}

fn handle_internal(shared: &EngineShared, dc: &mut DrawContext, internal: InternalMessage) {
    match internal {
        InternalMessage::Reset => shared.history.reset(),
        InternalMessage::SoftReset => shared.history.soft_reset(),
        InternalMessage::Snapshot => {
            if let Err(e) = shared.history.snapshot() {
                warn!(target: "paint.thread", error = %e, "snapshot request failed");
            }
        }
        InternalMessage::Catchup { progress } => {
            shared.catchup.store(progress, Ordering::Release);
        }
        InternalMessage::Cleanup => shared.history.cleanup(dc),
    }
}

// --- intake meta accumulation ------------------------------------------------

/// Per-call fold of remote meta traffic: latest wins per context id, first
/// appearance fixes the notification order.
struct MetaBuffer {
    acl_change_flags: u8,
    laser_active: [bool; 256],
    laser_order: Vec<ContextId>,
    lasers: [(u8, u32); 256],
    cursor_active: [bool; 256],
    cursor_order: Vec<ContextId>,
    cursors: [(i32, i32); 256],
    default_layer: Option<u16>,
}

impl MetaBuffer {
    fn new() -> Self {
        Self {
            acl_change_flags: 0,
            laser_active: [false; 256],
            laser_order: Vec::new(),
            lasers: [(0, 0); 256],
            cursor_active: [false; 256],
            cursor_order: Vec::new(),
            cursors: [(0, 0); 256],
            default_layer: None,
        }
    }

    fn record_laser(&mut self, context_id: ContextId, persistence: u8, color: u32) {
        let i = usize::from(context_id);
        if !self.laser_active[i] {
            self.laser_active[i] = true;
            self.laser_order.push(context_id);
        }
        self.lasers[i] = (persistence, color);
    }

    fn record_cursor(&mut self, context_id: ContextId, x: i32, y: i32) {
        let i = usize::from(context_id);
        if !self.cursor_active[i] {
            self.cursor_active[i] = true;
            self.cursor_order.push(context_id);
        }
        self.cursors[i] = (x, y);
    }
}

fn should_push(acls: &mut AclState, meta: &mut MetaBuffer, local: bool, msg: &Message) -> bool {
    if local {
        // Local meta traffic (lasers, pointers) is the UI's own echo; only
        // commands and internal control messages reach the queue.
        return msg.is_internal() || msg.is_command();
    }
    let result = acls.handle(msg);
    meta.acl_change_flags |= result.bits();
    if result.contains(AclResult::FILTERED) {
        return false;
    }
    if msg.is_internal() || msg.is_command() {
        return true;
    }
    match msg.body() {
        MessageBody::LaserTrail { persistence, color } => {
            meta.record_laser(msg.context_id(), *persistence, *color);
            false
        }
        MessageBody::MovePointer { x, y } => {
            meta.record_cursor(msg.context_id(), *x, *y);
            false
        }
        MessageBody::DefaultLayer { layer_id } => {
            meta.default_layer = Some(*layer_id);
            false
        }
        _ => false,
    }
}

fn emit_changes(v: &mut ViewState, prev: &CanvasState, observer: &mut dyn TickObserver) {
    let cs = &v.view_cs;
    if prev.width() != cs.width() || prev.height() != cs.height() {
        observer.resized(
            prev.offset_x() - cs.offset_x(),
            prev.offset_y() - cs.offset_y(),
            prev.width(),
            prev.height(),
        );
    }

    v.diff.diff(cs, prev);
    v.diff.each_pos(|x, y| observer.tile_changed(x, y));

    if v.diff.layer_props_changed_reset() {
        observer.layer_props_changed(cs.layer_props());
    }
    if !Arc::ptr_eq(cs.annotations(), prev.annotations()) {
        observer.annotations_changed(cs.annotations());
    }
    if !Arc::ptr_eq(cs.metadata(), prev.metadata()) {
        observer.document_metadata_changed(cs.metadata());
    }
    if !Arc::ptr_eq(cs.timeline(), prev.timeline()) {
        observer.timeline_changed(cs.timeline());
    }
    for cursor in v.cursors.cursors.drain(..) {
        observer.cursor_moved(cursor.context_id, cursor.layer_id, cursor.x, cursor.y);
    }
}
