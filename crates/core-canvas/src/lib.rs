//! Canvas data model: tiles, layers, snapshots, diffing and painting.
//!
//! The model is built around immutable snapshots with structural sharing:
//! a `CanvasState` is a small struct of `Arc`s, cloning one is the incref,
//! and mutation goes through copy-on-write (`Arc::make_mut`) so untouched
//! subtrees keep their identity. Identity is what makes the rest of the
//! pipeline cheap: `CanvasDiff` compares pointers, not pixels, and the
//! paint engine's change emission compares the shared metadata pointers.
//!
//! Module map:
//! * `pixels` / `blend`: bit-15 pixel math.
//! * `tile`: 64x64 shared tiles, checker and censor patterns.
//! * `layer`: parallel content/props trees, sublayers.
//! * `routes`: layer id to index path.
//! * `canvas_state`: snapshots and transient mutation.
//! * `diff`: tile-granular dirty tracking.
//! * `flatten`: per-tile compositor used by the render workers.
//! * `paint`: dab rasterisation.
//! * `draw_context`: reusable painting scratch.

mod blend;
mod canvas_state;
mod diff;
mod draw_context;
mod flatten;
mod layer;
mod meta;
mod paint;
mod pixels;
mod routes;
mod tile;

pub use blend::blend_pixel;
pub use canvas_state::CanvasState;
pub use diff::CanvasDiff;
pub use draw_context::DrawContext;
pub use flatten::{censor_tile, flatten_tile};
pub use layer::{
    LayerContent, LayerId, LayerList, LayerListEntry, LayerProps, LayerPropsList, Sublayer,
};
pub use meta::{Annotation, AnnotationList, DocumentMetadata, Frame, Timeline};
pub use paint::{DabsFamily, DabsParams, draw_dabs};
pub use pixels::{BIT15, Pixel8, Pixel15, channel8_to_15, channel15_to_8, pixels15_to_8};
pub use routes::LayerRoutes;
pub use tile::{SharedTile, TILE_LENGTH, TILE_SIZE, Tile, tile_count_round};
