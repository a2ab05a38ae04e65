//! Tile-granular canvas diffing.
//!
//! The diff owns a dirty grid sized to the newer state and a sticky
//! `layer_props_changed` flag. Comparison is identity-based: shared nodes
//! compare by pointer, so an untouched subtree costs one comparison.
//!
//! Consumption contract (mirrors the dirty-tracking style used elsewhere in
//! this workspace): `each_pos` observes without clearing so change
//! notification and rendering can both walk the same pass; the `*_reset`
//! variants clear what they visit, making a render pass one-shot.

use crate::canvas_state::CanvasState;
use crate::layer::{LayerContent, LayerList, LayerListEntry, LayerPropsList, Sublayer};
use crate::tile::tile_count_round;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct CanvasDiff {
    xtiles: i32,
    ytiles: i32,
    dirty: Vec<bool>,
    layer_props_changed: bool,
}

impl CanvasDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn xtiles(&self) -> i32 {
        self.xtiles
    }

    pub fn ytiles(&self) -> i32 {
        self.ytiles
    }

    /// Compare `cs` against `prev`, accumulating dirty tiles. The grid is
    /// resized (and fully marked) when the canvas dimensions changed.
    pub fn diff(&mut self, cs: &CanvasState, prev: &CanvasState) {
        let xtiles = tile_count_round(cs.width());
        let ytiles = tile_count_round(cs.height());
        if xtiles != self.xtiles || ytiles != self.ytiles {
            self.xtiles = xtiles;
            self.ytiles = ytiles;
            self.dirty = vec![false; (xtiles * ytiles) as usize];
        }

        if cs.width() != prev.width() || cs.height() != prev.height() {
            self.mark_all();
            if !Arc::ptr_eq(cs.layer_props(), prev.layer_props()) {
                self.layer_props_changed = true;
            }
            return;
        }

        let background_changed = match (cs.background(), prev.background()) {
            (None, None) => false,
            (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
            _ => true,
        };
        if background_changed {
            self.mark_all();
        }

        if !Arc::ptr_eq(cs.layer_props(), prev.layer_props()) {
            self.layer_props_changed = true;
        }

        if !Arc::ptr_eq(cs.layers(), prev.layers())
            || !Arc::ptr_eq(cs.layer_props(), prev.layer_props())
        {
            self.diff_lists(
                cs.layers(),
                prev.layers(),
                cs.layer_props(),
                prev.layer_props(),
            );
        }
    }

    fn diff_lists(
        &mut self,
        a: &LayerList,
        b: &LayerList,
        a_props: &LayerPropsList,
        b_props: &LayerPropsList,
    ) {
        if a.len() != b.len() {
            self.mark_all();
            self.layer_props_changed = true;
            return;
        }
        for i in 0..a.len() {
            let props_differ = !Arc::ptr_eq(a_props.at(i), b_props.at(i));
            match (a.at(i), b.at(i)) {
                (LayerListEntry::Content(ca), LayerListEntry::Content(cb)) => {
                    if !Arc::ptr_eq(ca, cb) || props_differ {
                        self.diff_leaf(ca, cb, props_differ);
                    }
                }
                (LayerListEntry::Group(ga), LayerListEntry::Group(gb)) => {
                    let (Some(ca), Some(cb)) =
                        (&a_props.at(i).children, &b_props.at(i).children)
                    else {
                        self.mark_all();
                        self.layer_props_changed = true;
                        return;
                    };
                    if !Arc::ptr_eq(ga, gb) || props_differ {
                        self.diff_lists(ga, gb, ca, cb);
                    }
                }
                _ => {
                    // Structural change: a leaf became a group or vice versa.
                    self.mark_all();
                    self.layer_props_changed = true;
                    return;
                }
            }
        }
    }

    fn diff_leaf(&mut self, a: &LayerContent, b: &LayerContent, props_differ: bool) {
        for ty in 0..self.ytiles {
            for tx in 0..self.xtiles {
                if self.is_dirty(tx, ty) {
                    continue;
                }
                let ta = a.tile_at(tx, ty);
                let tb = b.tile_at(tx, ty);
                let base_differs = match (ta, tb) {
                    (None, None) => false,
                    (Some(x), Some(y)) => !Arc::ptr_eq(x, y),
                    _ => true,
                };
                let any_present = ta.is_some()
                    || tb.is_some()
                    || sublayer_tile_present(a.sublayers(), tx, ty)
                    || sublayer_tile_present(b.sublayers(), tx, ty);
                let dirty = base_differs
                    || (props_differ && any_present)
                    || sublayer_tile_differs(a.sublayers(), b.sublayers(), tx, ty);
                if dirty {
                    self.mark(tx, ty);
                }
            }
        }
    }

    fn is_dirty(&self, tx: i32, ty: i32) -> bool {
        self.dirty[(ty * self.xtiles + tx) as usize]
    }

    fn mark(&mut self, tx: i32, ty: i32) {
        self.dirty[(ty * self.xtiles + tx) as usize] = true;
    }

    fn mark_all(&mut self) {
        self.dirty.fill(true);
    }

    /// Visit every dirty position without clearing it.
    pub fn each_pos(&self, mut f: impl FnMut(i32, i32)) {
        for ty in 0..self.ytiles {
            for tx in 0..self.xtiles {
                if self.is_dirty(tx, ty) {
                    f(tx, ty);
                }
            }
        }
    }

    /// Visit and clear every dirty position.
    pub fn each_pos_reset(&mut self, mut f: impl FnMut(i32, i32)) {
        for ty in 0..self.ytiles {
            for tx in 0..self.xtiles {
                let i = (ty * self.xtiles + tx) as usize;
                if self.dirty[i] {
                    self.dirty[i] = false;
                    f(tx, ty);
                }
            }
        }
    }

    /// Visit and clear dirty positions inside the clip rectangle
    /// (inclusive tile bounds).
    pub fn each_pos_tile_bounds_reset(
        &mut self,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
        mut f: impl FnMut(i32, i32),
    ) {
        let left = left.max(0);
        let top = top.max(0);
        let right = right.min(self.xtiles - 1);
        let bottom = bottom.min(self.ytiles - 1);
        for ty in top..=bottom {
            for tx in left..=right {
                let i = (ty * self.xtiles + tx) as usize;
                if self.dirty[i] {
                    self.dirty[i] = false;
                    f(tx, ty);
                }
            }
        }
    }

    /// Consume the layer-props-changed flag.
    pub fn layer_props_changed_reset(&mut self) -> bool {
        std::mem::replace(&mut self.layer_props_changed, false)
    }
}

fn sublayer_tile_present(subs: &[Sublayer], tx: i32, ty: i32) -> bool {
    subs.iter().any(|s| s.content.tile_at(tx, ty).is_some())
}

fn sublayer_tile_differs(a: &[Sublayer], b: &[Sublayer], tx: i32, ty: i32) -> bool {
    if a.len() != b.len() {
        return sublayer_tile_present(a, tx, ty) || sublayer_tile_present(b, tx, ty);
    }
    for (sa, sb) in a.iter().zip(b) {
        let props_differ = !Arc::ptr_eq(&sa.props, &sb.props);
        let ta = sa.content.tile_at(tx, ty);
        let tb = sb.content.tile_at(tx, ty);
        let tiles_differ = match (ta, tb) {
            (None, None) => false,
            (Some(x), Some(y)) => !Arc::ptr_eq(x, y),
            _ => true,
        };
        if tiles_differ || (props_differ && (ta.is_some() || tb.is_some())) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerProps;
    use crate::pixels::{BIT15, Pixel15};

    fn canvas(width: i32, height: i32) -> CanvasState {
        let mut cs = CanvasState::new();
        cs.resize(0, width, height, 0);
        cs.push_layer(LayerProps::new(1, "base".into()), None);
        cs
    }

    fn dirty_positions(diff: &CanvasDiff) -> Vec<(i32, i32)> {
        let mut out = Vec::new();
        diff.each_pos(|x, y| out.push((x, y)));
        out
    }

    #[test]
    fn identical_states_produce_no_dirt() {
        let cs = canvas(256, 256);
        let clone = cs.clone();
        let mut diff = CanvasDiff::new();
        diff.diff(&clone, &cs);
        assert!(dirty_positions(&diff).is_empty());
        assert!(!diff.layer_props_changed_reset());
    }

    #[test]
    fn pixel_edit_dirties_only_its_tile() {
        let cs = canvas(256, 256);
        let mut next = cs.clone();
        let path = next.search_route(1).unwrap();
        next.content_mut_at(&path)
            .unwrap()
            .set_pixel_at(1, 70, 70, Pixel15::new(0, 0, BIT15, BIT15));
        let mut diff = CanvasDiff::new();
        diff.diff(&next, &cs);
        assert_eq!(dirty_positions(&diff), vec![(1, 1)]);
        assert!(!diff.layer_props_changed_reset());
    }

    #[test]
    fn props_change_dirties_populated_tiles_and_sets_flag() {
        let mut cs = canvas(256, 256);
        let path = cs.search_route(1).unwrap();
        cs.content_mut_at(&path)
            .unwrap()
            .set_pixel_at(1, 10, 10, Pixel15::new(0, 0, BIT15, BIT15));

        let mut next = cs.clone();
        let path = next.search_route(1).unwrap();
        next.props_mut_at(&path).unwrap().hidden = true;

        let mut diff = CanvasDiff::new();
        diff.diff(&next, &cs);
        assert_eq!(dirty_positions(&diff), vec![(0, 0)]);
        assert!(diff.layer_props_changed_reset());
        assert!(!diff.layer_props_changed_reset());
    }

    #[test]
    fn each_pos_reset_is_one_shot() {
        let cs = canvas(128, 128);
        let mut next = cs.clone();
        let path = next.search_route(1).unwrap();
        next.content_mut_at(&path)
            .unwrap()
            .set_pixel_at(1, 0, 0, Pixel15::new(0, 0, BIT15, BIT15));
        let mut diff = CanvasDiff::new();
        diff.diff(&next, &cs);

        let mut first = 0;
        diff.each_pos_reset(|_, _| first += 1);
        assert_eq!(first, 1);
        let mut second = 0;
        diff.each_pos_reset(|_, _| second += 1);
        assert_eq!(second, 0);
    }

    #[test]
    fn resize_marks_everything() {
        let cs = canvas(128, 128);
        let mut next = cs.clone();
        next.resize(0, 64, 0, 0);
        let mut diff = CanvasDiff::new();
        diff.diff(&next, &cs);
        assert_eq!(dirty_positions(&diff).len(), (diff.xtiles() * diff.ytiles()) as usize);
    }
}
