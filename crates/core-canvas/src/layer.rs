//! Layer tree data model.
//!
//! The drawable is two parallel trees sharing one shape: `LayerList` holds
//! pixel content (leaves) and groups (interior nodes), `LayerPropsList`
//! holds the matching properties. Keeping props separate from content lets
//! the view composer swap out the whole props tree without touching any
//! pixels, which is what keeps tile diffs quiet while local overlays are
//! stationary.
//!
//! Invariants:
//! * `LayerList` and the corresponding `LayerPropsList` always have equal
//!   entry counts, and groups align with props that have `children`.
//! * Sublayer ids are negative for view overlays (preview, inspect) and
//!   positive (the context id) for indirect strokes.

use crate::pixels::{BIT15, Pixel15};
use crate::tile::{SharedTile, TILE_SIZE, Tile, tile_count_round};
use core_message::{BlendMode, ContextId};
use std::sync::Arc;

/// Layer identifier. Protocol layers use the positive u16 range; negative
/// ids are engine-local sublayers.
pub type LayerId = i32;

#[derive(Debug, Clone, PartialEq)]
pub struct LayerProps {
    pub id: LayerId,
    pub title: String,
    /// Bit-15 opacity.
    pub opacity: u16,
    /// Persistent user-set visibility flag.
    pub hidden: bool,
    /// Transient visibility applied by the local view composer.
    pub hidden_by_view_mode: bool,
    pub censored: bool,
    pub isolated: bool,
    pub blend_mode: BlendMode,
    /// Present iff this props node describes a group.
    pub children: Option<Arc<LayerPropsList>>,
}

impl LayerProps {
    pub fn new(id: LayerId, title: String) -> Self {
        Self {
            id,
            title,
            opacity: BIT15,
            hidden: false,
            hidden_by_view_mode: false,
            censored: false,
            isolated: false,
            blend_mode: BlendMode::Normal,
            children: None,
        }
    }

    pub fn visible(&self) -> bool {
        !self.hidden && !self.hidden_by_view_mode && self.opacity > 0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerPropsList {
    entries: Vec<Arc<LayerProps>>,
}

impl LayerPropsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn at(&self, index: usize) -> &Arc<LayerProps> {
        &self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LayerProps>> {
        self.entries.iter()
    }

    pub fn push(&mut self, props: Arc<LayerProps>) {
        self.entries.push(props);
    }

    pub fn insert(&mut self, index: usize, props: Arc<LayerProps>) {
        self.entries.insert(index, props);
    }

    pub fn remove(&mut self, index: usize) -> Arc<LayerProps> {
        self.entries.remove(index)
    }

    /// Mutable access to one entry, cloning shared nodes on demand.
    pub fn entry_mut(&mut self, index: usize) -> &mut LayerProps {
        Arc::make_mut(&mut self.entries[index])
    }
}

/// An indirect-stroke or overlay sublayer attached to a leaf layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Sublayer {
    pub props: Arc<LayerProps>,
    pub content: Arc<LayerContent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerContent {
    width: i32,
    height: i32,
    tiles: Vec<Option<SharedTile>>,
    sublayers: Vec<Sublayer>,
}

impl LayerContent {
    pub fn new(width: i32, height: i32) -> Self {
        let xtiles = tile_count_round(width);
        let ytiles = tile_count_round(height);
        Self {
            width,
            height,
            tiles: vec![None; (xtiles * ytiles) as usize],
            sublayers: Vec::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn xtiles(&self) -> i32 {
        tile_count_round(self.width)
    }

    pub fn ytiles(&self) -> i32 {
        tile_count_round(self.height)
    }

    pub fn tile_at(&self, x: i32, y: i32) -> Option<&SharedTile> {
        if x < 0 || y < 0 || x >= self.xtiles() || y >= self.ytiles() {
            return None;
        }
        self.tiles[(y * self.xtiles() + x) as usize].as_ref()
    }

    pub fn set_tile(&mut self, x: i32, y: i32, tile: SharedTile) {
        let xtiles = self.xtiles();
        self.tiles[(y * xtiles + x) as usize] = Some(tile);
    }

    pub fn clear_tile(&mut self, x: i32, y: i32) {
        let xtiles = self.xtiles();
        self.tiles[(y * xtiles + x) as usize] = None;
    }

    pub fn sublayers(&self) -> &[Sublayer] {
        &self.sublayers
    }

    fn sublayer_index(&self, id: LayerId) -> Option<usize> {
        self.sublayers.iter().position(|s| s.props.id == id)
    }

    /// Fetch or create the sublayer with the given id. New sublayers start
    /// blank at this content's size with default props.
    pub fn get_or_insert_sublayer(&mut self, id: LayerId) -> &mut Sublayer {
        let index = match self.sublayer_index(id) {
            Some(i) => i,
            None => {
                let props = Arc::new(LayerProps::new(id, String::new()));
                let content = Arc::new(LayerContent::new(self.width, self.height));
                self.sublayers.push(Sublayer { props, content });
                self.sublayers.len() - 1
            }
        };
        &mut self.sublayers[index]
    }

    pub fn insert_sublayer(&mut self, props: Arc<LayerProps>, content: Arc<LayerContent>) {
        match self.sublayer_index(props.id) {
            Some(i) => self.sublayers[i] = Sublayer { props, content },
            None => self.sublayers.push(Sublayer { props, content }),
        }
    }

    pub fn remove_sublayer(&mut self, id: LayerId) {
        if let Some(i) = self.sublayer_index(id) {
            self.sublayers.remove(i);
        }
    }

    /// Merge one sublayer down into the base tiles and drop it. Returns
    /// false if no sublayer has that id.
    pub fn merge_sublayer_down(&mut self, id: LayerId, context_id: ContextId) -> bool {
        match self.sublayer_index(id) {
            Some(i) => {
                let sub = self.sublayers.remove(i);
                self.merge_sublayer(&sub, context_id);
                true
            }
            None => false,
        }
    }

    /// Merge all indirect-stroke sublayers (positive ids) down into the
    /// base tiles and drop them. View overlays (negative ids) stay.
    pub fn merge_indirect_sublayers(&mut self, context_id: ContextId) {
        let mut i = 0;
        while i < self.sublayers.len() {
            if self.sublayers[i].props.id > 0 {
                let sub = self.sublayers.remove(i);
                self.merge_sublayer(&sub, context_id);
            } else {
                i += 1;
            }
        }
    }

    fn merge_sublayer(&mut self, sub: &Sublayer, context_id: ContextId) {
        let opacity = sub.props.opacity;
        let mode = sub.props.blend_mode;
        for ty in 0..self.ytiles() {
            for tx in 0..self.xtiles() {
                let Some(src) = sub.content.tile_at(tx, ty) else {
                    continue;
                };
                let src = Arc::clone(src);
                let xtiles = self.xtiles();
                let slot = &mut self.tiles[(ty * xtiles + tx) as usize];
                let tile = slot.get_or_insert_with(|| Arc::new(Tile::new_blank(context_id)));
                let t = Arc::make_mut(tile);
                t.merge(&src, opacity, mode);
                t.set_context_id(context_id);
            }
        }
    }

    /// Write one pixel, materialising the covering tile if needed.
    pub fn set_pixel_at(&mut self, context_id: ContextId, x: i32, y: i32, pixel: Pixel15) {
        self.with_tile_pixel(context_id, x, y, |t, px, py| t.set_pixel_at(px, py, pixel));
    }

    /// Blend one pixel of `color` at the given bit-15 coverage.
    pub fn blend_pixel_at(
        &mut self,
        context_id: ContextId,
        x: i32,
        y: i32,
        color: Pixel15,
        coverage: u16,
        mode: BlendMode,
    ) {
        self.with_tile_pixel(context_id, x, y, |t, px, py| {
            t.blend_pixel_at(px, py, color, coverage, mode)
        });
    }

    fn with_tile_pixel(
        &mut self,
        context_id: ContextId,
        x: i32,
        y: i32,
        f: impl FnOnce(&mut Tile, i32, i32),
    ) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let (tx, ty) = (x / TILE_SIZE, y / TILE_SIZE);
        let xtiles = self.xtiles();
        let slot = &mut self.tiles[(ty * xtiles + tx) as usize];
        let tile = slot.get_or_insert_with(|| Arc::new(Tile::new_blank(context_id)));
        let t = Arc::make_mut(tile);
        f(t, x % TILE_SIZE, y % TILE_SIZE);
        t.set_context_id(context_id);
    }

    /// Fill a clipped rectangle with a solid pixel.
    pub fn fill_rect(
        &mut self,
        context_id: ContextId,
        mode: BlendMode,
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
        pixel: Pixel15,
    ) {
        let left = left.max(0);
        let top = top.max(0);
        let right = right.min(self.width);
        let bottom = bottom.min(self.height);
        for y in top..bottom {
            for x in left..right {
                match mode {
                    BlendMode::Replace => self.set_pixel_at(context_id, x, y, pixel),
                    _ => self.blend_pixel_at(context_id, x, y, pixel, BIT15, mode),
                }
            }
        }
    }

    /// Copy of this content at a new size, translated by `(dx, dy)`.
    pub fn resized(&self, width: i32, height: i32, dx: i32, dy: i32) -> Self {
        let mut out = Self::new(width, height);
        for ty in 0..self.ytiles() {
            for tx in 0..self.xtiles() {
                let Some(tile) = self.tile_at(tx, ty) else {
                    continue;
                };
                let base_x = tx * TILE_SIZE + dx;
                let base_y = ty * TILE_SIZE + dy;
                for py in 0..TILE_SIZE {
                    for px in 0..TILE_SIZE {
                        let p = tile.pixel_at(px, py);
                        if p.a != 0 {
                            out.set_pixel_at(tile.context_id(), base_x + px, base_y + py, p);
                        }
                    }
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerListEntry {
    Content(Arc<LayerContent>),
    Group(Arc<LayerList>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerList {
    entries: Vec<LayerListEntry>,
}

impl LayerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn at(&self, index: usize) -> &LayerListEntry {
        &self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &LayerListEntry> {
        self.entries.iter()
    }

    pub fn push(&mut self, entry: LayerListEntry) {
        self.entries.push(entry);
    }

    pub fn insert(&mut self, index: usize, entry: LayerListEntry) {
        self.entries.insert(index, entry);
    }

    pub fn remove(&mut self, index: usize) -> LayerListEntry {
        self.entries.remove(index)
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut LayerListEntry {
        &mut self.entries[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_writes_materialise_tiles_lazily() {
        let mut lc = LayerContent::new(128, 128);
        assert!(lc.tile_at(1, 1).is_none());
        lc.set_pixel_at(7, 100, 100, Pixel15::new(0, 0, BIT15, BIT15));
        let tile = lc.tile_at(1, 1).expect("tile materialised");
        assert_eq!(tile.context_id(), 7);
        assert_eq!(tile.pixel_at(36, 36).r, BIT15);
        assert!(lc.tile_at(0, 0).is_none());
    }

    #[test]
    fn indirect_sublayer_merges_down_and_disappears() {
        let mut lc = LayerContent::new(64, 64);
        {
            let sub = lc.get_or_insert_sublayer(3);
            let props = Arc::make_mut(&mut sub.props);
            props.opacity = BIT15;
            let content = Arc::make_mut(&mut sub.content);
            content.set_pixel_at(3, 5, 5, Pixel15::new(BIT15, 0, 0, BIT15));
        }
        lc.merge_indirect_sublayers(3);
        assert!(lc.sublayers().is_empty());
        let tile = lc.tile_at(0, 0).expect("merged tile");
        assert_eq!(tile.pixel_at(5, 5).b, BIT15);
    }

    #[test]
    fn view_sublayers_survive_merge() {
        let mut lc = LayerContent::new(64, 64);
        lc.get_or_insert_sublayer(-100);
        lc.merge_indirect_sublayers(1);
        assert_eq!(lc.sublayers().len(), 1);
    }

    #[test]
    fn resized_translates_content() {
        let mut lc = LayerContent::new(64, 64);
        lc.set_pixel_at(1, 0, 0, Pixel15::new(0, BIT15, 0, BIT15));
        let grown = lc.resized(128, 128, 10, 20);
        let tile = grown.tile_at(0, 0).expect("translated tile");
        assert_eq!(tile.pixel_at(10, 20).g, BIT15);
    }
}
