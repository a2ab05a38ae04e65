//! Cross-module scenarios: snapshot sharing, diffing and flattening as
//! the paint engine composes them.

use core_canvas::{
    BIT15, CanvasDiff, CanvasState, DabsFamily, DabsParams, DrawContext, LayerProps, Pixel15,
    censor_tile, flatten_tile,
};
use core_message::{BlendMode, PixelDab};
use std::collections::BTreeSet;
use std::sync::Arc;

fn dirty_set(diff: &CanvasDiff) -> BTreeSet<(i32, i32)> {
    let mut out = BTreeSet::new();
    diff.each_pos(|x, y| {
        out.insert((x, y));
    });
    out
}

fn canvas_with_layer(id: i32, width: i32, height: i32) -> CanvasState {
    let mut cs = CanvasState::new();
    cs.resize(0, width, height, 0);
    cs.push_layer(LayerProps::new(id, "layer".into()), None);
    cs
}

#[test]
fn stroke_then_diff_then_flatten() {
    let base = canvas_with_layer(1, 256, 256);

    let mut painted = base.clone();
    let path = painted.search_route(1).unwrap();
    let mut dc = DrawContext::new();
    let dabs = [
        PixelDab { x: 0, y: 0, size: 4, opacity: 255 },
        PixelDab { x: 130, y: 130, size: 4, opacity: 255 },
    ];
    core_canvas::draw_dabs(
        &mut dc,
        painted.content_mut_at(&path).unwrap(),
        &DabsParams {
            context_id: 6,
            origin_x: 10,
            origin_y: 10,
            color: 0x00_00_80_ff,
            blend_mode: BlendMode::Normal,
            family: DabsFamily::Pixel(&dabs),
        },
    );

    let mut diff = CanvasDiff::new();
    diff.diff(&painted, &base);
    let dirty = dirty_set(&diff);
    assert!(dirty.contains(&(0, 0)));
    assert!(dirty.contains(&(2, 2)));
    assert_eq!(dirty.len(), 2, "only the stamped tiles are dirty");

    let tile = flatten_tile(&painted, 0, 0);
    assert!(tile.pixel_at(10, 10).a > 0);
    // Untouched snapshot still flattens empty.
    let tile = flatten_tile(&base, 0, 0);
    assert_eq!(tile.pixel_at(10, 10).a, 0);
}

#[test]
fn censoring_is_a_props_only_change() {
    let mut base = canvas_with_layer(3, 128, 128);
    let path = base.search_route(3).unwrap();
    base.content_mut_at(&path)
        .unwrap()
        .set_pixel_at(2, 5, 5, Pixel15::new(0, 0, BIT15, BIT15));

    let mut censored = base.clone();
    let path = censored.search_route(3).unwrap();
    censored.props_mut_at(&path).unwrap().censored = true;

    // Content tree identity is preserved: only props were touched.
    assert!(Arc::ptr_eq(base.layers(), censored.layers()));

    let mut diff = CanvasDiff::new();
    diff.diff(&censored, &base);
    assert!(diff.layer_props_changed_reset());
    assert_eq!(dirty_set(&diff), BTreeSet::from([(0, 0)]));

    let flat = flatten_tile(&censored, 0, 0);
    let pattern = censor_tile();
    assert_eq!(flat.pixel_at(20, 20), pattern.pixel_at(20, 20));
}

#[test]
fn background_change_dirties_every_tile() {
    let base = canvas_with_layer(1, 128, 128);
    let mut recolored = base.clone();
    recolored.set_background_color(Some(0xff_20_20_20));

    let mut diff = CanvasDiff::new();
    diff.diff(&recolored, &base);
    assert_eq!(dirty_set(&diff).len(), 4);

    let flat = flatten_tile(&recolored, 1, 1);
    assert_eq!(flat.pixel_at(0, 0).a, BIT15);
}

#[test]
fn put_tile_style_sharing_keeps_diff_quiet_elsewhere() {
    let base = canvas_with_layer(1, 192, 64);
    let mut next = base.clone();
    let path = next.search_route(1).unwrap();
    let tile = Arc::new(core_canvas::Tile::new_solid(
        1,
        Pixel15::new(BIT15, BIT15, 0, BIT15),
    ));
    {
        let content = next.content_mut_at(&path).unwrap();
        content.set_tile(0, 0, Arc::clone(&tile));
        content.set_tile(2, 0, tile);
    }

    let mut diff = CanvasDiff::new();
    diff.diff(&next, &base);
    assert_eq!(dirty_set(&diff), BTreeSet::from([(0, 0), (2, 0)]));
}
