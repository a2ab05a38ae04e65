//! Observer traits at the engine boundary.
//!
//! The engine reports side effects through these hooks instead of return
//! values because one call can fan out into many notifications (a message
//! batch touches lasers, cursors and ACLs; one tick emits dozens of tile
//! changes). All methods default to no-ops so callers implement only what
//! they present.
//!
//! Ordering contracts (callers rely on these):
//! * `MetaObserver`: `acls_changed` fires before any laser/cursor/default
//!   layer notification from the same intake call, and only when change
//!   bits were reported by the filter.
//! * `TickObserver`: `resized` before `tile_changed`, tiles before
//!   `layer_props_changed`, then annotations, metadata, timeline, cursors.

use core_canvas::{AnnotationList, DocumentMetadata, LayerPropsList, Pixel8, Timeline};
use core_message::ContextId;
use std::sync::Arc;

/// Hooks fired from `PaintEngine::handle_messages` on the producer thread.
pub trait MetaObserver {
    fn acls_changed(&mut self, _change_mask: u8) {}
    fn laser_trail(&mut self, _context_id: ContextId, _persistence: u8, _color: u32) {}
    fn move_pointer(&mut self, _context_id: ContextId, _x: i32, _y: i32) {}
    fn default_layer_set(&mut self, _layer_id: u16) {}
}

/// Hooks fired from `PaintEngine::tick` on the tick thread.
pub trait TickObserver {
    fn catchup(&mut self, _progress: i32) {}
    fn resized(&mut self, _offset_x: i32, _offset_y: i32, _prev_width: i32, _prev_height: i32) {}
    fn tile_changed(&mut self, _tile_x: i32, _tile_y: i32) {}
    fn layer_props_changed(&mut self, _lpl: &Arc<LayerPropsList>) {}
    fn annotations_changed(&mut self, _annotations: &Arc<AnnotationList>) {}
    fn document_metadata_changed(&mut self, _metadata: &Arc<DocumentMetadata>) {}
    fn timeline_changed(&mut self, _timeline: &Arc<Timeline>) {}
    fn cursor_moved(&mut self, _context_id: ContextId, _layer_id: u16, _x: i32, _y: i32) {}
}

/// Default no-op observers for callers that only want the state advanced.
pub struct NoopObserver;

impl MetaObserver for NoopObserver {}
impl TickObserver for NoopObserver {}

/// Per-tile render callback. Crosses into the worker pool, hence `Arc` and
/// the `Send + Sync` bound; arguments are tile x, tile y, the 8-bit pixel
/// rows and the index of the worker thread that produced them.
pub type RenderTileFn = Arc<dyn Fn(i32, i32, &[Pixel8], usize) + Send + Sync>;
