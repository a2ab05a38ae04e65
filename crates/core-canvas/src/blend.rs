//! Pixel blending in bit-15 fixed point.
//!
//! The subset of modes implemented here is exactly what the engine's own
//! pipeline exercises: direct strokes (Normal, Multiply, Screen, Erase,
//! Replace), checkerboard compositing (Behind), the inspect overlay
//! (Recolor) and MyPaint strokes (NormalAndEraser). All math is straight
//! (non-premultiplied) alpha.

use crate::pixels::{BIT15, Pixel15};
use core_message::BlendMode;

pub(crate) fn mul15(a: u16, b: u16) -> u16 {
    ((u32::from(a) * u32::from(b)) / u32::from(BIT15)) as u16
}

fn lerp15(from: u16, to: u16, t: u16) -> u16 {
    let from = i32::from(from);
    let to = i32::from(to);
    (from + (to - from) * i32::from(t) / i32::from(BIT15)) as u16
}

/// Blend `src` over `dst` with the given coverage (`opacity`, bit-15).
pub fn blend_pixel(dst: Pixel15, src: Pixel15, opacity: u16, mode: BlendMode) -> Pixel15 {
    let coverage = mul15(src.a, opacity);
    match mode {
        BlendMode::Normal => blend_normal(dst, src, coverage),
        BlendMode::Erase => {
            let mut out = dst;
            out.a = out.a.saturating_sub(coverage);
            if out.a == 0 {
                Pixel15::TRANSPARENT
            } else {
                out
            }
        }
        BlendMode::Behind => {
            // Only paint where the destination is (partially) transparent.
            let hole = BIT15 - dst.a;
            let behind_coverage = mul15(coverage, hole);
            let mut painted = blend_normal(src, dst, dst.a);
            painted.a = dst.a.saturating_add(behind_coverage).min(BIT15);
            if dst.a == 0 {
                Pixel15 { a: behind_coverage, ..src }
            } else {
                painted
            }
        }
        BlendMode::Recolor => Pixel15 {
            b: lerp15(dst.b, src.b, opacity),
            g: lerp15(dst.g, src.g, opacity),
            r: lerp15(dst.r, src.r, opacity),
            a: dst.a,
        },
        BlendMode::Replace => {
            if opacity == BIT15 {
                src
            } else {
                Pixel15 {
                    b: lerp15(dst.b, src.b, opacity),
                    g: lerp15(dst.g, src.g, opacity),
                    r: lerp15(dst.r, src.r, opacity),
                    a: lerp15(dst.a, src.a, opacity),
                }
            }
        }
        BlendMode::Multiply => {
            let blended = Pixel15 {
                b: mul15(dst.b, src.b),
                g: mul15(dst.g, src.g),
                r: mul15(dst.r, src.r),
                a: src.a,
            };
            blend_normal(dst, blended, mul15(coverage, dst.a.max(1)))
        }
        BlendMode::Screen => {
            let blended = Pixel15 {
                b: BIT15 - mul15(BIT15 - dst.b, BIT15 - src.b),
                g: BIT15 - mul15(BIT15 - dst.g, BIT15 - src.g),
                r: BIT15 - mul15(BIT15 - dst.r, BIT15 - src.r),
                a: src.a,
            };
            blend_normal(dst, blended, mul15(coverage, dst.a.max(1)))
        }
        BlendMode::NormalAndEraser => {
            if src.a == 0 {
                blend_pixel(dst, src, opacity, BlendMode::Erase)
            } else {
                blend_normal(dst, src, coverage)
            }
        }
    }
}

fn blend_normal(dst: Pixel15, src: Pixel15, coverage: u16) -> Pixel15 {
    if coverage == 0 {
        return dst;
    }
    let out_a = u32::from(coverage) + u32::from(mul15(dst.a, BIT15 - coverage));
    if out_a == 0 {
        return Pixel15::TRANSPARENT;
    }
    let mix = |d: u16, s: u16| -> u16 {
        let s_part = u32::from(s) * u32::from(coverage);
        let d_part = u32::from(d) * u32::from(mul15(dst.a, BIT15 - coverage));
        ((s_part + d_part) / out_a) as u16
    };
    Pixel15 {
        b: mix(dst.b, src.b),
        g: mix(dst.g, src.g),
        r: mix(dst.r, src.r),
        a: out_a.min(u32::from(BIT15)) as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPAQUE_RED: Pixel15 = Pixel15 { b: 0, g: 0, r: BIT15, a: BIT15 };
    const OPAQUE_BLUE: Pixel15 = Pixel15 { b: BIT15, g: 0, r: 0, a: BIT15 };

    #[test]
    fn normal_full_coverage_replaces() {
        let out = blend_pixel(OPAQUE_BLUE, OPAQUE_RED, BIT15, BlendMode::Normal);
        assert_eq!(out, OPAQUE_RED);
    }

    #[test]
    fn erase_full_coverage_clears() {
        let out = blend_pixel(OPAQUE_BLUE, OPAQUE_RED, BIT15, BlendMode::Erase);
        assert_eq!(out, Pixel15::TRANSPARENT);
    }

    #[test]
    fn behind_leaves_opaque_destination_alone() {
        let out = blend_pixel(OPAQUE_BLUE, OPAQUE_RED, BIT15, BlendMode::Behind);
        assert_eq!(out, OPAQUE_BLUE);
    }

    #[test]
    fn behind_fills_transparent_destination() {
        let out = blend_pixel(Pixel15::TRANSPARENT, OPAQUE_RED, BIT15, BlendMode::Behind);
        assert_eq!(out.r, BIT15);
        assert_eq!(out.a, BIT15);
    }

    #[test]
    fn recolor_keeps_destination_alpha() {
        let half = BIT15 / 2;
        let out = blend_pixel(OPAQUE_BLUE, OPAQUE_RED, half, BlendMode::Recolor);
        assert_eq!(out.a, BIT15);
        assert!(out.r > 0 && out.b > 0);
    }
}
