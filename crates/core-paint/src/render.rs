//! Render fan-out: per-tile jobs on the worker pool.
//!
//! A render pass snapshots everything a worker needs (view state, target,
//! checker tile, callback, completion semaphore) behind one `Arc`; each
//! job is that snapshot plus a tile position. Workers flatten their tile,
//! put the checkerboard underneath at half alpha, convert to 8-bit in a
//! thread-local scratch buffer, hand the pixels to the caller and post the
//! barrier semaphore. The tick thread waits for exactly as many posts as
//! it enqueued jobs, so when `render_*` returns every callback has fired.

use crate::observer::RenderTileFn;
use crate::sync::Semaphore;
use core_canvas::{
    BIT15, CanvasState, Pixel8, SharedTile, TILE_LENGTH, Tile, flatten_tile, pixels15_to_8,
    tile_count_round,
};
use core_message::BlendMode;
use std::cell::RefCell;
use std::sync::{Arc, Mutex};

/// Flattened display tiles for the current view, one slot per position.
/// Slots are individually locked; within one pass every job owns a
/// distinct position, so locks never contend.
#[derive(Debug)]
pub(crate) struct RenderTarget {
    width: i32,
    height: i32,
    xtiles: i32,
    ytiles: i32,
    slots: Vec<Mutex<Option<Tile>>>,
}

impl RenderTarget {
    pub fn new(width: i32, height: i32) -> Self {
        let xtiles = tile_count_round(width);
        let ytiles = tile_count_round(height);
        let mut slots = Vec::with_capacity((xtiles * ytiles) as usize);
        slots.resize_with((xtiles * ytiles) as usize, || Mutex::new(None));
        Self { width, height, xtiles, ytiles, slots }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn store(&self, tx: i32, ty: i32, tile: Tile) {
        if tx < 0 || ty < 0 || tx >= self.xtiles || ty >= self.ytiles {
            return;
        }
        let slot = &self.slots[(ty * self.xtiles + tx) as usize];
        *slot.lock().expect("render slot poisoned") = Some(tile);
    }

    /// Copy of the flattened tile last rendered at a position.
    pub fn tile_at(&self, tx: i32, ty: i32) -> Option<Tile> {
        if tx < 0 || ty < 0 || tx >= self.xtiles || ty >= self.ytiles {
            return None;
        }
        self.slots[(ty * self.xtiles + tx) as usize]
            .lock()
            .expect("render slot poisoned")
            .clone()
    }
}

/// Shared per-pass context.
pub(crate) struct RenderPass {
    pub view_cs: CanvasState,
    pub target: Arc<RenderTarget>,
    pub checker: SharedTile,
    pub render_tile: RenderTileFn,
    pub done: Arc<Semaphore>,
}

pub(crate) struct RenderJob {
    pub pass: Arc<RenderPass>,
    pub x: i32,
    pub y: i32,
}

thread_local! {
    static PIXEL_SCRATCH: RefCell<Vec<Pixel8>> = const { RefCell::new(Vec::new()) };
}

/// Worker body: one tile from flatten to callback.
pub(crate) fn run_render_job(job: RenderJob, thread_index: usize) {
    let pass = &job.pass;
    let mut tile = flatten_tile(&pass.view_cs, job.x, job.y);
    tile.merge(&pass.checker, BIT15 / 2, BlendMode::Behind);

    PIXEL_SCRATCH.with(|scratch| {
        let mut pixels = scratch.borrow_mut();
        if pixels.len() != TILE_LENGTH {
            pixels.resize(TILE_LENGTH, Pixel8::default());
        }
        pixels15_to_8(&mut pixels, tile.pixels());
        (pass.render_tile)(job.x, job.y, &pixels, thread_index);
    });

    pass.target.store(job.x, job.y, tile);
    pass.done.post();
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_canvas::{LayerProps, Pixel15};

    #[test]
    fn render_job_composites_checker_and_reports_pixels() {
        let mut cs = CanvasState::new();
        cs.resize(0, 64, 64, 0);
        cs.push_layer(LayerProps::new(1, "l".into()), None);
        let path = cs.search_route(1).unwrap();
        cs.content_mut_at(&path)
            .unwrap()
            .set_pixel_at(1, 0, 0, Pixel15::new(0, 0, BIT15, BIT15));

        let target = Arc::new(RenderTarget::new(64, 64));
        let done = Arc::new(Semaphore::new(0));
        let seen: Arc<Mutex<Vec<(i32, i32, Pixel8)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let pass = Arc::new(RenderPass {
            view_cs: cs,
            target: Arc::clone(&target),
            checker: Arc::new(Tile::new_checker(
                0,
                Pixel15::new(BIT15 / 2, BIT15 / 2, BIT15 / 2, BIT15),
                Pixel15::new(BIT15, BIT15, BIT15, BIT15),
            )),
            render_tile: Arc::new(move |x, y, pixels, _t| {
                sink.lock().unwrap().push((x, y, pixels[0]));
            }),
            done: Arc::clone(&done),
        });

        run_render_job(RenderJob { pass, x: 0, y: 0 }, 0);
        assert_eq!(done.value(), 1, "barrier posted");

        let calls = seen.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (x, y, first_pixel) = calls[0];
        assert_eq!((x, y), (0, 0));
        // Painted pixel stays paint-colored; full red converts to 255.
        assert_eq!(first_pixel.r, 255);

        let stored = target.tile_at(0, 0).expect("tile stored");
        // An unpainted pixel shows the checker through at half alpha.
        assert_eq!(stored.pixel_at(1, 0).a, BIT15 / 2);
    }
}
