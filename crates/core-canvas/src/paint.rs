//! Dab rasterisation.
//!
//! Stamps one draw-dabs message's worth of dabs into a layer content. The
//! shapes are deliberately plain: hardness-feathered discs for classic and
//! MyPaint dabs, hard discs for pixel dabs, filled squares for the square
//! family. Dab positions are message-relative; the caller supplies the
//! already-offset origin.

use crate::draw_context::DrawContext;
use crate::layer::LayerContent;
use crate::pixels::{BIT15, Pixel15};
use core_message::{BlendMode, ClassicDab, ContextId, MyPaintDab, PixelDab};

pub enum DabsFamily<'a> {
    Classic(&'a [ClassicDab]),
    Pixel(&'a [PixelDab]),
    PixelSquare(&'a [PixelDab]),
    MyPaint { dabs: &'a [MyPaintDab], lock_alpha: u8 },
}

pub struct DabsParams<'a> {
    pub context_id: ContextId,
    pub origin_x: i32,
    pub origin_y: i32,
    /// BGRA; the alpha byte is ignored for direct stamping (per-dab opacity
    /// rules) and only meaningful to indirect-sublayer setup upstream.
    pub color: u32,
    pub blend_mode: BlendMode,
    pub family: DabsFamily<'a>,
}

/// Stamp every dab of `params` into `target`.
pub fn draw_dabs(dc: &mut DrawContext, target: &mut LayerContent, params: &DabsParams) {
    let color = {
        let mut c = Pixel15::from_bgra(params.color);
        c.a = BIT15;
        c
    };
    match &params.family {
        DabsFamily::Classic(dabs) => {
            for dab in *dabs {
                let radius = f32::from(dab.size) / 256.0;
                stamp_disc(
                    dc,
                    target,
                    params,
                    color,
                    dab.x,
                    dab.y,
                    radius,
                    f32::from(dab.hardness) / 255.0,
                    dab.opacity,
                    params.blend_mode,
                );
            }
        }
        DabsFamily::Pixel(dabs) => {
            for dab in *dabs {
                stamp_disc(
                    dc,
                    target,
                    params,
                    color,
                    dab.x,
                    dab.y,
                    f32::from(dab.size),
                    1.0,
                    dab.opacity,
                    params.blend_mode,
                );
            }
        }
        DabsFamily::PixelSquare(dabs) => {
            for dab in *dabs {
                stamp_square(dc, target, params, color, dab);
            }
        }
        DabsFamily::MyPaint { dabs, lock_alpha } => {
            // Lock-alpha strokes recolor existing pixels instead of adding
            // coverage; otherwise MyPaint paints and erases in one mode.
            let mode = if *lock_alpha > 0 {
                BlendMode::Recolor
            } else {
                BlendMode::NormalAndEraser
            };
            for dab in *dabs {
                let radius = f32::from(dab.size) / 256.0 / 2.0;
                stamp_disc(
                    dc,
                    target,
                    params,
                    color,
                    dab.x,
                    dab.y,
                    radius,
                    f32::from(dab.hardness) / 255.0,
                    dab.opacity,
                    mode,
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn stamp_disc(
    dc: &mut DrawContext,
    target: &mut LayerContent,
    params: &DabsParams,
    color: Pixel15,
    dab_x: i32,
    dab_y: i32,
    radius: f32,
    hardness: f32,
    opacity: u8,
    mode: BlendMode,
) {
    let radius = radius.max(0.5);
    let cx = params.origin_x + dab_x;
    let cy = params.origin_y + dab_y;
    let r = radius.ceil() as i32;
    let side = (r * 2 + 1) as usize;
    let opacity15 = u32::from(crate::pixels::channel8_to_15(opacity));

    let coverage = dc.coverage_buffer(side * side);
    for iy in 0..side {
        for ix in 0..side {
            let dx = ix as i32 - r;
            let dy = iy as i32 - r;
            let dist = ((dx * dx + dy * dy) as f32).sqrt();
            let nd = dist / radius;
            let shape = if nd >= 1.0 {
                0.0
            } else if nd <= hardness || hardness >= 1.0 {
                1.0
            } else {
                (1.0 - nd) / (1.0 - hardness)
            };
            let c = (shape * opacity15 as f32) as u32;
            coverage[iy * side + ix] = c.min(u32::from(BIT15)) as u16;
        }
    }

    for iy in 0..side {
        for ix in 0..side {
            let c = coverage[iy * side + ix];
            if c != 0 {
                target.blend_pixel_at(
                    params.context_id,
                    cx + ix as i32 - r,
                    cy + iy as i32 - r,
                    color,
                    c,
                    mode,
                );
            }
        }
    }
}

fn stamp_square(
    dc: &mut DrawContext,
    target: &mut LayerContent,
    params: &DabsParams,
    color: Pixel15,
    dab: &PixelDab,
) {
    let _ = dc;
    let r = i32::from(dab.size);
    let cx = params.origin_x + dab.x;
    let cy = params.origin_y + dab.y;
    let coverage = crate::pixels::channel8_to_15(dab.opacity);
    for y in (cy - r)..(cy + r) {
        for x in (cx - r)..(cx + r) {
            target.blend_pixel_at(params.context_id, x, y, color, coverage, params.blend_mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_dab_paints_a_disc() {
        let mut dc = DrawContext::new();
        let mut lc = LayerContent::new(64, 64);
        let dabs = [PixelDab { x: 0, y: 0, size: 4, opacity: 255 }];
        draw_dabs(
            &mut dc,
            &mut lc,
            &DabsParams {
                context_id: 2,
                origin_x: 32,
                origin_y: 32,
                color: 0x00ff0000,
                blend_mode: BlendMode::Normal,
                family: DabsFamily::Pixel(&dabs),
            },
        );
        let tile = lc.tile_at(0, 0).expect("painted tile");
        assert_eq!(tile.context_id(), 2);
        assert!(tile.pixel_at(32, 32).a > 0, "center covered");
        assert!(tile.pixel_at(32, 32).r > 0);
        assert_eq!(tile.pixel_at(32 - 6, 32).a, 0, "outside radius untouched");
    }

    #[test]
    fn square_dab_fills_square() {
        let mut dc = DrawContext::new();
        let mut lc = LayerContent::new(64, 64);
        let dabs = [PixelDab { x: 0, y: 0, size: 3, opacity: 255 }];
        draw_dabs(
            &mut dc,
            &mut lc,
            &DabsParams {
                context_id: 1,
                origin_x: 10,
                origin_y: 10,
                color: 0x000000ff,
                blend_mode: BlendMode::Normal,
                family: DabsFamily::PixelSquare(&dabs),
            },
        );
        let tile = lc.tile_at(0, 0).expect("painted tile");
        assert!(tile.pixel_at(8, 8).b > 0);
        assert!(tile.pixel_at(12, 12).b > 0);
        assert_eq!(tile.pixel_at(14, 10).a, 0);
    }

    #[test]
    fn erase_mode_removes_coverage() {
        let mut dc = DrawContext::new();
        let mut lc = LayerContent::new(64, 64);
        lc.fill_rect(
            1,
            BlendMode::Replace,
            0,
            0,
            64,
            64,
            Pixel15::new(0, 0, BIT15, BIT15),
        );
        let dabs = [PixelDab { x: 0, y: 0, size: 5, opacity: 255 }];
        draw_dabs(
            &mut dc,
            &mut lc,
            &DabsParams {
                context_id: 1,
                origin_x: 20,
                origin_y: 20,
                color: 0,
                blend_mode: BlendMode::Erase,
                family: DabsFamily::Pixel(&dabs),
            },
        );
        let tile = lc.tile_at(0, 0).expect("tile");
        assert_eq!(tile.pixel_at(20, 20).a, 0, "center erased");
        assert_eq!(tile.pixel_at(40, 40).a, BIT15, "far pixels intact");
    }
}
