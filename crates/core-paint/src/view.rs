//! Local view state and the composition pipeline.
//!
//! The authoritative canvas state out of history is never shown directly:
//! previews, the inspect overlay and local layer-props overrides (view
//! modes, revealed censoring, per-layer hiding) are applied on top each
//! tick. All of that is local-only; nothing here feeds back into history.
//!
//! Memoisation contract (`prev_lpl` / `lpl`):
//! * `prev_lpl` remembers the authoritative props tree the overlay was
//!   last computed from. Setters invalidate by clearing it; a tick with
//!   `prev_lpl == None` must recompute.
//! * `lpl` remembers the computed overlay tree. While the authoritative
//!   tree and the local config are both unchanged, that memoised tree is
//!   spliced into fresh states so the diff does not report a props change
//!   on every tick.

use crate::preview::{INSPECT_SUBLAYER_ID, InstalledPreview};
use core_canvas::{
    BIT15, CanvasState, DrawContext, LayerId, LayerListEntry, LayerPropsList, Timeline,
    censor_tile,
};
use core_message::{BlendMode, ContextId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerViewMode {
    #[default]
    Normal,
    /// Only the active layer (and the groups above it) stay visible.
    Solo,
    /// Only layers in the active timeline frame stay visible.
    Frame,
    /// Active frame plus its neighbors.
    OnionSkin,
}

#[derive(Debug, Default)]
pub(crate) struct LocalView {
    pub active_layer_id: LayerId,
    pub active_frame_index: usize,
    pub layer_view_mode: LayerViewMode,
    pub reveal_censored: bool,
    /// 0 means inspect off.
    pub inspect_context_id: ContextId,
    pub hidden_layers: Vec<LayerId>,
    pub prev_lpl: Option<Arc<LayerPropsList>>,
    pub lpl: Option<Arc<LayerPropsList>>,
}

impl LocalView {
    pub fn invalidate(&mut self) {
        self.prev_lpl = None;
    }

    fn overlays_empty(&self) -> bool {
        self.layer_view_mode == LayerViewMode::Normal
            && !self.reveal_censored
            && self.hidden_layers.is_empty()
    }
}

/// Step 1: overlay the installed preview, if any.
pub(crate) fn apply_preview(
    preview: Option<&mut InstalledPreview>,
    cs: &CanvasState,
    dc: &mut DrawContext,
) -> CanvasState {
    match preview {
        Some(p) => p.render(cs.clone(), dc),
        None => cs.clone(),
    }
}

/// Step 2: overlay the inspect highlight. Every leaf layer gets a
/// semi-transparent recolor sublayer covering the tiles last touched by
/// the inspected user.
pub(crate) fn apply_inspect(context_id: ContextId, mut cs: CanvasState) -> CanvasState {
    if context_id == 0 {
        return cs;
    }
    let mut leaves = Vec::new();
    collect_leaf_paths(cs.layers(), &mut Vec::new(), &mut leaves);
    for path in leaves {
        let positions: Vec<(i32, i32)> = {
            let Some(content) = cs.content_at(&path) else {
                continue;
            };
            let mut hits = Vec::new();
            for ty in 0..content.ytiles() {
                for tx in 0..content.xtiles() {
                    if let Some(tile) = content.tile_at(tx, ty)
                        && tile.context_id() == context_id
                    {
                        hits.push((tx, ty));
                    }
                }
            }
            hits
        };
        if positions.is_empty() {
            continue;
        }
        let content = cs.content_mut_at(&path).expect("leaf path collected above");
        let sub = content.get_or_insert_sublayer(INSPECT_SUBLAYER_ID);
        {
            let props = Arc::make_mut(&mut sub.props);
            props.opacity = BIT15 - BIT15 / 4;
            props.blend_mode = BlendMode::Recolor;
        }
        let sub_content = Arc::make_mut(&mut sub.content);
        for (tx, ty) in positions {
            sub_content.set_tile(tx, ty, Arc::clone(censor_tile()));
        }
    }
    cs
}

fn collect_leaf_paths(
    list: &core_canvas::LayerList,
    path: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    for (i, entry) in list.iter().enumerate() {
        path.push(i);
        match entry {
            LayerListEntry::Content(_) => out.push(path.clone()),
            LayerListEntry::Group(children) => collect_leaf_paths(children, path, out),
        }
        path.pop();
    }
}

/// Step 3: local layer-props overrides, memoised. See the module docs for
/// the `prev_lpl` / `lpl` contract.
pub(crate) fn apply_local_layer_props(lv: &mut LocalView, mut cs: CanvasState) -> CanvasState {
    let lpl = Arc::clone(cs.layer_props());
    let unchanged = lv
        .prev_lpl
        .as_ref()
        .is_some_and(|prev| Arc::ptr_eq(prev, &lpl));
    if unchanged {
        if lv.overlays_empty() {
            return cs;
        }
        // Splice the memoised overlay so identical overlays diff as
        // identical trees.
        if let Some(memoised) = &lv.lpl {
            cs.set_layer_props(Arc::clone(memoised));
        }
        return cs;
    }

    lv.prev_lpl = Some(lpl);
    set_local_layer_props(lv, &mut cs);
    cs
}

fn set_local_layer_props(lv: &mut LocalView, cs: &mut CanvasState) {
    if lv.layer_view_mode != LayerViewMode::Normal || lv.reveal_censored {
        let timeline = Arc::clone(cs.timeline());
        let mode = lv.layer_view_mode;
        let active_layer_id = lv.active_layer_id;
        let active_frame = lv.active_frame_index;
        let reveal = lv.reveal_censored;
        set_view_props_recursive(
            cs.layer_props_mut(),
            mode,
            active_layer_id,
            reveal,
            &timeline,
            active_frame,
        );
    }

    // Persistent per-layer hiding, routed by id. Ids whose layer is gone
    // are purged so the list does not grow stale entries.
    let mut i = 0;
    while i < lv.hidden_layers.len() {
        let layer_id = lv.hidden_layers[i];
        match cs.search_route(layer_id) {
            Some(path) => {
                if let Some(props) = cs.props_mut_at(&path) {
                    props.hidden = true;
                }
                i += 1;
            }
            None => {
                lv.hidden_layers.swap_remove(i);
            }
        }
    }

    lv.lpl = Some(Arc::clone(cs.layer_props()));
}

fn set_view_props_recursive(
    lpl: &mut LayerPropsList,
    mode: LayerViewMode,
    active_layer_id: LayerId,
    reveal_censored: bool,
    timeline: &Timeline,
    active_frame: usize,
) {
    for i in 0..lpl.len() {
        let props = lpl.entry_mut(i);
        let is_group = props.children.is_some();

        let (hide, child_mode) = match mode {
            LayerViewMode::Solo => {
                if props.id == active_layer_id {
                    (false, LayerViewMode::Normal)
                } else {
                    (!is_group, mode)
                }
            }
            LayerViewMode::Frame => (!is_group && !in_frames(timeline, active_frame..=active_frame, props.id), mode),
            LayerViewMode::OnionSkin => {
                let from = active_frame.saturating_sub(1);
                let to = active_frame + 1;
                (!is_group && !in_frames(timeline, from..=to, props.id), mode)
            }
            LayerViewMode::Normal => (false, mode),
        };

        if hide {
            props.hidden_by_view_mode = true;
        }
        if reveal_censored && props.censored {
            props.censored = false;
        }
        if let Some(children) = &mut props.children {
            set_view_props_recursive(
                Arc::make_mut(children),
                child_mode,
                active_layer_id,
                reveal_censored,
                timeline,
                active_frame,
            );
        }
    }
}

fn in_frames(
    timeline: &Timeline,
    frames: std::ops::RangeInclusive<usize>,
    layer_id: LayerId,
) -> bool {
    let Ok(id) = u16::try_from(layer_id) else {
        return false;
    };
    frames.into_iter().any(|f| timeline.layer_in_frame(f, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_canvas::{LayerProps, Pixel15};

    fn canvas_two_layers() -> CanvasState {
        let mut cs = CanvasState::new();
        cs.resize(0, 128, 128, 0);
        cs.push_layer(LayerProps::new(1, "one".into()), None);
        cs.push_layer(LayerProps::new(2, "two".into()), None);
        cs
    }

    fn props_by_id(cs: &CanvasState, id: LayerId) -> Arc<LayerProps> {
        let path = cs.search_route(id).unwrap();
        let mut list = Arc::clone(cs.layer_props());
        for (depth, &i) in path.iter().enumerate() {
            if depth + 1 == path.len() {
                return Arc::clone(list.at(i));
            }
            let children = list.at(i).children.clone().unwrap();
            list = children;
        }
        unreachable!()
    }

    #[test]
    fn solo_hides_other_leaves() {
        let cs = canvas_two_layers();
        let mut lv = LocalView { active_layer_id: 2, layer_view_mode: LayerViewMode::Solo, ..Default::default() };
        let out = apply_local_layer_props(&mut lv, cs);
        assert!(props_by_id(&out, 1).hidden_by_view_mode);
        assert!(!props_by_id(&out, 2).hidden_by_view_mode);
        assert!(lv.prev_lpl.is_some());
        assert!(lv.lpl.is_some());
    }

    #[test]
    fn hidden_list_sets_flag_and_purges_dead_ids() {
        let cs = canvas_two_layers();
        let mut lv = LocalView { hidden_layers: vec![1, 77], ..Default::default() };
        let out = apply_local_layer_props(&mut lv, cs);
        assert!(props_by_id(&out, 1).hidden);
        assert_eq!(lv.hidden_layers, vec![1], "dead id purged");
    }

    #[test]
    fn unchanged_view_splices_memoised_tree() {
        let cs = canvas_two_layers();
        let mut lv = LocalView { hidden_layers: vec![1], ..Default::default() };
        let first = apply_local_layer_props(&mut lv, cs.clone());
        let memoised = Arc::clone(first.layer_props());

        // Same authoritative tree again: the memoised overlay is reused
        // verbatim, so the two view states diff as unchanged.
        let second = apply_local_layer_props(&mut lv, cs);
        assert!(Arc::ptr_eq(second.layer_props(), &memoised));
    }

    #[test]
    fn normal_view_with_no_overlays_passes_through() {
        let cs = canvas_two_layers();
        let mut lv = LocalView::default();
        let first = apply_local_layer_props(&mut lv, cs.clone());
        let _ = first;
        let again = apply_local_layer_props(&mut lv, cs.clone());
        assert!(CanvasState::same_identity(&again, &cs));
    }

    #[test]
    fn reveal_censored_clears_flags() {
        let mut cs = canvas_two_layers();
        let path = cs.search_route(1).unwrap();
        cs.props_mut_at(&path).unwrap().censored = true;
        let mut lv = LocalView { reveal_censored: true, ..Default::default() };
        let out = apply_local_layer_props(&mut lv, cs);
        assert!(!props_by_id(&out, 1).censored);
    }

    #[test]
    fn inspect_marks_touched_tiles() {
        let mut cs = canvas_two_layers();
        let path = cs.search_route(1).unwrap();
        cs.content_mut_at(&path)
            .unwrap()
            .set_pixel_at(9, 70, 10, Pixel15::new(0, 0, BIT15, BIT15));
        let out = apply_inspect(9, cs.clone());
        let content = out.content_at(&path).unwrap();
        assert_eq!(content.sublayers().len(), 1);
        let sub = &content.sublayers()[0];
        assert_eq!(sub.props.id, INSPECT_SUBLAYER_ID);
        assert_eq!(sub.props.blend_mode, BlendMode::Recolor);
        assert!(sub.content.tile_at(1, 0).is_some(), "touched tile overlaid");
        assert!(sub.content.tile_at(0, 0).is_none(), "untouched tile clean");

        // Other leaves without touched tiles get no sublayer.
        let other = cs.search_route(2).unwrap();
        assert!(out.content_at(&other).unwrap().sublayers().is_empty());

        // Inspect off is a pass-through.
        let off = apply_inspect(0, cs.clone());
        assert!(CanvasState::same_identity(&off, &cs));
    }

    #[test]
    fn frame_mode_follows_timeline() {
        let mut cs = canvas_two_layers();
        cs.timeline_mut().frames = vec![
            core_canvas::Frame { layer_ids: vec![1] },
            core_canvas::Frame { layer_ids: vec![2] },
        ];
        let mut lv = LocalView {
            layer_view_mode: LayerViewMode::Frame,
            active_frame_index: 1,
            ..Default::default()
        };
        let out = apply_local_layer_props(&mut lv, cs);
        assert!(props_by_id(&out, 1).hidden_by_view_mode);
        assert!(!props_by_id(&out, 2).hidden_by_view_mode);
    }
}
