//! Versioned canvas snapshots with structural sharing.
//!
//! `CanvasState` is a cheap-to-clone struct of shared pointers. Cloning is
//! the "incref"; mutation goes through `Arc::make_mut`, which copies a node
//! only when it is still shared, which is the owned-or-clone promotion the
//! transient API of the original exposes explicitly. Identity (used by the
//! diff and by `compare_and_get`) is pointer identity of the shared parts
//! plus the scalar geometry.
//!
//! Invariants:
//! * `layers` and `layer_props` always have the same tree shape.
//! * `routes` is consistent with `layer_props` after any structural edit;
//!   `rebuild_routes` must be called by whoever changes the shape.
//! * `offset_x/offset_y` accumulate origin shifts from canvas resizes, so
//!   consumers that captured coordinates before a resize can translate by
//!   the offset delta.

use crate::layer::{
    LayerContent, LayerId, LayerList, LayerListEntry, LayerProps, LayerPropsList,
};
use crate::meta::{AnnotationList, DocumentMetadata, Timeline};
use crate::pixels::Pixel15;
use crate::routes::LayerRoutes;
use crate::tile::{SharedTile, Tile};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CanvasState {
    width: i32,
    height: i32,
    offset_x: i32,
    offset_y: i32,
    background: Option<SharedTile>,
    layers: Arc<LayerList>,
    layer_props: Arc<LayerPropsList>,
    routes: Arc<LayerRoutes>,
    annotations: Arc<AnnotationList>,
    metadata: Arc<DocumentMetadata>,
    timeline: Arc<Timeline>,
}

impl Default for CanvasState {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasState {
    /// Fresh empty canvas, zero-sized until the first resize command.
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            offset_x: 0,
            offset_y: 0,
            background: None,
            layers: Arc::new(LayerList::new()),
            layer_props: Arc::new(LayerPropsList::new()),
            routes: Arc::new(LayerRoutes::default()),
            annotations: Arc::new(AnnotationList::default()),
            metadata: Arc::new(DocumentMetadata::default()),
            timeline: Arc::new(Timeline::default()),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn offset_x(&self) -> i32 {
        self.offset_x
    }

    pub fn offset_y(&self) -> i32 {
        self.offset_y
    }

    pub fn background(&self) -> Option<&SharedTile> {
        self.background.as_ref()
    }

    pub fn layers(&self) -> &Arc<LayerList> {
        &self.layers
    }

    pub fn layer_props(&self) -> &Arc<LayerPropsList> {
        &self.layer_props
    }

    pub fn routes(&self) -> &Arc<LayerRoutes> {
        &self.routes
    }

    pub fn annotations(&self) -> &Arc<AnnotationList> {
        &self.annotations
    }

    pub fn metadata(&self) -> &Arc<DocumentMetadata> {
        &self.metadata
    }

    pub fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// Structural-sharing identity: true iff both states share every node
    /// and agree on geometry. Two identical-looking states built separately
    /// are *not* identity-equal.
    pub fn same_identity(a: &CanvasState, b: &CanvasState) -> bool {
        a.width == b.width
            && a.height == b.height
            && a.offset_x == b.offset_x
            && a.offset_y == b.offset_y
            && match (&a.background, &b.background) {
                (None, None) => true,
                (Some(x), Some(y)) => Arc::ptr_eq(x, y),
                _ => false,
            }
            && Arc::ptr_eq(&a.layers, &b.layers)
            && Arc::ptr_eq(&a.layer_props, &b.layer_props)
            && Arc::ptr_eq(&a.annotations, &b.annotations)
            && Arc::ptr_eq(&a.metadata, &b.metadata)
            && Arc::ptr_eq(&a.timeline, &b.timeline)
    }

    // --- transient mutation -------------------------------------------------

    pub fn layers_mut(&mut self) -> &mut LayerList {
        Arc::make_mut(&mut self.layers)
    }

    pub fn layer_props_mut(&mut self) -> &mut LayerPropsList {
        Arc::make_mut(&mut self.layer_props)
    }

    pub fn annotations_mut(&mut self) -> &mut AnnotationList {
        Arc::make_mut(&mut self.annotations)
    }

    pub fn metadata_mut(&mut self) -> &mut DocumentMetadata {
        Arc::make_mut(&mut self.metadata)
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        Arc::make_mut(&mut self.timeline)
    }

    pub fn set_background(&mut self, tile: Option<SharedTile>) {
        self.background = tile;
    }

    /// Splice in a replacement props tree wholesale. Used by the view
    /// composer to reuse a memoised overlay so diffs stay quiet.
    pub fn set_layer_props(&mut self, lpl: Arc<LayerPropsList>) {
        self.layer_props = lpl;
    }

    pub fn rebuild_routes(&mut self) {
        self.routes = Arc::new(LayerRoutes::build(&self.layer_props));
    }

    /// Route lookup returning an owned path, so callers can keep it across
    /// subsequent mutable borrows of the state.
    pub fn search_route(&self, layer_id: LayerId) -> Option<Vec<usize>> {
        self.routes.search(layer_id).map(<[usize]>::to_vec)
    }

    /// Leaf content at a route path. `None` if the path names a group or
    /// dangles.
    pub fn content_at(&self, path: &[usize]) -> Option<&LayerContent> {
        let (&last, parents) = path.split_last()?;
        let mut list: &LayerList = &self.layers;
        for &i in parents {
            if i >= list.len() {
                return None;
            }
            match list.at(i) {
                LayerListEntry::Group(children) => list = children,
                LayerListEntry::Content(_) => return None,
            }
        }
        if last >= list.len() {
            return None;
        }
        match list.at(last) {
            LayerListEntry::Content(content) => Some(content),
            LayerListEntry::Group(_) => None,
        }
    }

    /// Mutable leaf content at a route path. `None` if the path names a
    /// group or dangles.
    pub fn content_mut_at(&mut self, path: &[usize]) -> Option<&mut LayerContent> {
        let (&last, parents) = path.split_last()?;
        let mut list = Arc::make_mut(&mut self.layers);
        for &i in parents {
            if i >= list.len() {
                return None;
            }
            match list.entry_mut(i) {
                LayerListEntry::Group(children) => list = Arc::make_mut(children),
                LayerListEntry::Content(_) => return None,
            }
        }
        if last >= list.len() {
            return None;
        }
        match list.entry_mut(last) {
            LayerListEntry::Content(content) => Some(Arc::make_mut(content)),
            LayerListEntry::Group(_) => None,
        }
    }

    /// Mutable layer props at a route path.
    pub fn props_mut_at(&mut self, path: &[usize]) -> Option<&mut LayerProps> {
        let (&last, parents) = path.split_last()?;
        let mut list = Arc::make_mut(&mut self.layer_props);
        for &i in parents {
            if i >= list.len() {
                return None;
            }
            let props = list.entry_mut(i);
            match &mut props.children {
                Some(children) => list = Arc::make_mut(children),
                None => return None,
            }
        }
        if last >= list.len() {
            return None;
        }
        Some(list.entry_mut(last))
    }

    /// Append a new top layer (list order is bottom to top).
    pub fn push_layer(&mut self, props: LayerProps, fill: Option<Pixel15>) {
        let mut content = LayerContent::new(self.width, self.height);
        if let Some(pixel) = fill
            && pixel.a != 0
        {
            content.fill_rect(
                0,
                core_message::BlendMode::Replace,
                0,
                0,
                self.width,
                self.height,
                pixel,
            );
        }
        self.layers_mut()
            .push(LayerListEntry::Content(Arc::new(content)));
        self.layer_props_mut().push(Arc::new(props));
        self.rebuild_routes();
    }

    /// Remove the layer with the given id, if any.
    pub fn remove_layer(&mut self, layer_id: LayerId) -> bool {
        let Some(path) = self.search_route(layer_id) else {
            return false;
        };
        let (&last, parents) = path.split_last().expect("route paths are nonempty");

        let mut list = Arc::make_mut(&mut self.layers);
        for &i in parents {
            match list.entry_mut(i) {
                LayerListEntry::Group(children) => list = Arc::make_mut(children),
                LayerListEntry::Content(_) => return false,
            }
        }
        list.remove(last);

        let mut props = Arc::make_mut(&mut self.layer_props);
        for &i in parents {
            let entry = props.entry_mut(i);
            match &mut entry.children {
                Some(children) => props = Arc::make_mut(children),
                None => return false,
            }
        }
        props.remove(last);

        self.rebuild_routes();
        true
    }

    /// Reposition a layer among its siblings. `index` is the target slot
    /// in the parent list (bottom to top), clamped to the sibling count.
    /// Returns false if the id is unknown.
    pub fn move_layer(&mut self, layer_id: LayerId, index: usize) -> bool {
        let Some(path) = self.search_route(layer_id) else {
            return false;
        };
        let (&last, parents) = path.split_last().expect("route paths are nonempty");

        let mut list = Arc::make_mut(&mut self.layers);
        for &i in parents {
            if i >= list.len() {
                return false;
            }
            match list.entry_mut(i) {
                LayerListEntry::Group(children) => list = Arc::make_mut(children),
                LayerListEntry::Content(_) => return false,
            }
        }
        if last >= list.len() {
            return false;
        }
        let entry = list.remove(last);
        let target = index.min(list.len());
        list.insert(target, entry);

        let mut props = Arc::make_mut(&mut self.layer_props);
        for &i in parents {
            let entry = props.entry_mut(i);
            match &mut entry.children {
                Some(children) => props = Arc::make_mut(children),
                None => return false,
            }
        }
        let moved = props.remove(last);
        props.insert(target, moved);

        self.rebuild_routes();
        true
    }

    /// Grow (or shrink, with negative amounts) the canvas on each side.
    /// Content translates by `(left, top)`; the origin offset shifts the
    /// opposite way so captured coordinates can be mapped forward.
    pub fn resize(&mut self, top: i32, right: i32, bottom: i32, left: i32) {
        let width = (self.width + left + right).max(0);
        let height = (self.height + top + bottom).max(0);
        let layers = resize_list(&self.layers, width, height, left, top);
        self.layers = Arc::new(layers);
        self.width = width;
        self.height = height;
        self.offset_x -= left;
        self.offset_y -= top;
    }

    /// Solid background fill, or `None` to clear back to transparency.
    pub fn set_background_color(&mut self, color: Option<u32>) {
        self.background =
            color.map(|c| Arc::new(Tile::new_solid(0, Pixel15::from_bgra(c))));
    }
}

fn resize_list(list: &LayerList, width: i32, height: i32, dx: i32, dy: i32) -> LayerList {
    let mut out = LayerList::new();
    for entry in list.iter() {
        out.push(match entry {
            LayerListEntry::Content(content) => {
                LayerListEntry::Content(Arc::new(content.resized(width, height, dx, dy)))
            }
            LayerListEntry::Group(children) => {
                LayerListEntry::Group(Arc::new(resize_list(children, width, height, dx, dy)))
            }
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixels::BIT15;

    fn state_with_layer(id: LayerId) -> CanvasState {
        let mut cs = CanvasState::new();
        cs.resize(0, 128, 128, 0);
        cs.push_layer(LayerProps::new(id, format!("layer {id}")), None);
        cs
    }

    #[test]
    fn clone_preserves_identity_until_mutation() {
        let cs = state_with_layer(1);
        let clone = cs.clone();
        assert!(CanvasState::same_identity(&cs, &clone));

        let mut touched = clone.clone();
        let path = touched.search_route(1).unwrap();
        touched
            .content_mut_at(&path)
            .unwrap()
            .set_pixel_at(1, 3, 3, Pixel15::new(0, 0, BIT15, BIT15));
        assert!(!CanvasState::same_identity(&cs, &touched));
        // The original is untouched: copy-on-write, not in-place.
        let orig_path = cs.search_route(1).unwrap();
        let entry_tile = match cs.layers().at(orig_path[0]) {
            LayerListEntry::Content(c) => c.tile_at(0, 0).cloned(),
            _ => panic!("expected leaf"),
        };
        assert!(entry_tile.is_none());
    }

    #[test]
    fn resize_shifts_offset_against_growth() {
        let mut cs = state_with_layer(1);
        let path = cs.search_route(1).unwrap();
        cs.content_mut_at(&path)
            .unwrap()
            .set_pixel_at(1, 0, 0, Pixel15::new(BIT15, 0, 0, BIT15));

        cs.resize(16, 0, 0, 32);
        assert_eq!(cs.width(), 160);
        assert_eq!(cs.height(), 144);
        assert_eq!(cs.offset_x(), -32);
        assert_eq!(cs.offset_y(), -16);

        let path = cs.search_route(1).unwrap();
        let content = cs.content_mut_at(&path).unwrap();
        let tile = content.tile_at(0, 0).expect("translated tile");
        assert_eq!(tile.pixel_at(32, 16).b, BIT15);
    }

    #[test]
    fn move_layer_repositions_and_rebuilds_routes() {
        let mut cs = state_with_layer(1);
        cs.push_layer(LayerProps::new(2, "two".into()), None);
        cs.push_layer(LayerProps::new(3, "three".into()), None);

        assert!(cs.move_layer(3, 0));
        let order: Vec<_> = cs.layer_props().iter().map(|p| p.id).collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(cs.search_route(3), Some(vec![0]));
        assert_eq!(cs.search_route(1), Some(vec![1]));

        // Out-of-range targets clamp to the top of the stack.
        assert!(cs.move_layer(3, 99));
        let order: Vec<_> = cs.layer_props().iter().map(|p| p.id).collect();
        assert_eq!(order, vec![1, 2, 3]);

        assert!(!cs.move_layer(42, 0));
    }

    #[test]
    fn remove_layer_updates_routes() {
        let mut cs = state_with_layer(1);
        cs.push_layer(LayerProps::new(2, "two".into()), None);
        assert!(cs.search_route(2).is_some());
        assert!(cs.remove_layer(2));
        assert!(cs.search_route(2).is_none());
        assert!(cs.search_route(1).is_some());
        assert!(!cs.remove_layer(2));
    }
}
