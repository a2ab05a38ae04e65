//! Layer tree flattening for one tile position.
//!
//! Produces the 15-bit composite the render workers convert for display.
//! Walks the content and props trees in lockstep, bottom to top, honoring
//! visibility flags, opacity (multiplied down through groups), blend modes,
//! censoring, and sublayers (indirect strokes and view overlays) stacked
//! above their leaf's own tiles.

use crate::blend::mul15;
use crate::canvas_state::CanvasState;
use crate::layer::{LayerContent, LayerList, LayerProps, LayerPropsList};
use crate::pixels::BIT15;
use crate::tile::{SharedTile, Tile};
use core_message::BlendMode;
use std::sync::OnceLock;

static CENSOR_TILE: OnceLock<SharedTile> = OnceLock::new();

/// The shared pattern tile shown in place of censored content.
pub fn censor_tile() -> &'static SharedTile {
    CENSOR_TILE.get_or_init(Tile::new_censored)
}

/// Flatten the visible layer stack at tile position `(tx, ty)`.
pub fn flatten_tile(cs: &CanvasState, tx: i32, ty: i32) -> Tile {
    let mut out = match cs.background() {
        Some(bg) => (**bg).clone(),
        None => Tile::new_blank(0),
    };
    flatten_list(&mut out, cs.layers(), cs.layer_props(), tx, ty, BIT15);
    out
}

fn flatten_list(
    out: &mut Tile,
    list: &LayerList,
    props: &LayerPropsList,
    tx: i32,
    ty: i32,
    parent_opacity: u16,
) {
    use crate::layer::LayerListEntry;
    for (i, entry) in list.iter().enumerate() {
        let p = props.at(i);
        if !p.visible() {
            continue;
        }
        let opacity = mul15(parent_opacity, p.opacity);
        match entry {
            LayerListEntry::Group(children) => {
                if let Some(child_props) = &p.children {
                    flatten_list(out, children, child_props, tx, ty, opacity);
                }
            }
            LayerListEntry::Content(content) => {
                flatten_leaf(out, content, p, tx, ty, opacity);
            }
        }
    }
}

fn flatten_leaf(
    out: &mut Tile,
    content: &LayerContent,
    props: &LayerProps,
    tx: i32,
    ty: i32,
    opacity: u16,
) {
    if props.censored {
        out.merge(censor_tile(), opacity, BlendMode::Normal);
        return;
    }

    let base = content.tile_at(tx, ty);
    let covered: Vec<_> = content
        .sublayers()
        .iter()
        .filter(|s| s.props.visible() && s.content.tile_at(tx, ty).is_some())
        .collect();

    if covered.is_empty() {
        if let Some(tile) = base {
            out.merge(tile, opacity, props.blend_mode);
        }
        return;
    }

    let mut scratch = match base {
        Some(tile) => (**tile).clone(),
        None => Tile::new_blank(0),
    };
    for sub in covered {
        let tile = sub.content.tile_at(tx, ty).expect("filtered on presence");
        scratch.merge(tile, sub.props.opacity, sub.props.blend_mode);
    }
    out.merge(&scratch, opacity, props.blend_mode);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerProps;
    use crate::pixels::Pixel15;

    fn canvas_with_red_dot() -> CanvasState {
        let mut cs = CanvasState::new();
        cs.resize(0, 64, 64, 0);
        cs.push_layer(LayerProps::new(1, "paint".into()), None);
        let path = cs.search_route(1).unwrap();
        cs.content_mut_at(&path)
            .unwrap()
            .set_pixel_at(1, 5, 5, Pixel15::new(0, 0, BIT15, BIT15));
        cs
    }

    #[test]
    fn visible_layer_contributes() {
        let cs = canvas_with_red_dot();
        let tile = flatten_tile(&cs, 0, 0);
        assert_eq!(tile.pixel_at(5, 5).r, BIT15);
        assert_eq!(tile.pixel_at(6, 6).a, 0);
    }

    #[test]
    fn hidden_layer_is_skipped() {
        let mut cs = canvas_with_red_dot();
        let path = cs.search_route(1).unwrap();
        cs.props_mut_at(&path).unwrap().hidden = true;
        let tile = flatten_tile(&cs, 0, 0);
        assert_eq!(tile.pixel_at(5, 5).a, 0);
    }

    #[test]
    fn censored_layer_renders_pattern() {
        let mut cs = canvas_with_red_dot();
        let path = cs.search_route(1).unwrap();
        cs.props_mut_at(&path).unwrap().censored = true;
        let tile = flatten_tile(&cs, 0, 0);
        // Pattern is opaque everywhere, original pixels are not visible.
        assert_eq!(tile.pixel_at(6, 6).a, BIT15);
    }

    #[test]
    fn erase_sublayer_cuts_hole() {
        let mut cs = canvas_with_red_dot();
        let path = cs.search_route(1).unwrap();
        {
            let content = cs.content_mut_at(&path).unwrap();
            content.fill_rect(
                1,
                BlendMode::Replace,
                0,
                0,
                64,
                64,
                Pixel15::new(0, 0, BIT15, BIT15),
            );
            let sub = content.get_or_insert_sublayer(-100);
            let props = std::sync::Arc::make_mut(&mut sub.props);
            props.blend_mode = BlendMode::Erase;
            let sub_content = std::sync::Arc::make_mut(&mut sub.content);
            sub_content.fill_rect(
                1,
                BlendMode::Replace,
                0,
                0,
                8,
                8,
                Pixel15::new(0, 0, 0, BIT15),
            );
        }
        let tile = flatten_tile(&cs, 0, 0);
        assert_eq!(tile.pixel_at(2, 2).a, 0, "erased by sublayer");
        assert_eq!(tile.pixel_at(20, 20).r, BIT15, "rest of layer intact");
    }
}
