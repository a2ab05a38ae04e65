//! Command application: one function per protocol concern, all funnelled
//! through `apply_command`. Every mutation happens on `inner.current`
//! through its copy-on-write helpers, so snapshots held elsewhere are
//! never disturbed.

use crate::{HistoryError, HistoryInner, UNDO_DEPTH_LIMIT};
use core_canvas::{
    Annotation, CanvasState, DabsFamily, DabsParams, DrawContext, LayerContent, LayerId,
    LayerListEntry, LayerProps, Pixel15, Tile, channel8_to_15, draw_dabs, tile_count_round,
};
use core_message::{BlendMode, CommandBody, ContextId};
use std::sync::Arc;

pub(crate) fn apply_command(
    inner: &mut HistoryInner,
    dc: &mut DrawContext,
    user: ContextId,
    command: &CommandBody,
) -> Result<(), HistoryError> {
    match command {
        CommandBody::UndoPoint => {
            push_save_point(inner);
            Ok(())
        }
        CommandBody::Undo => match inner.undo_stack.pop() {
            Some(state) => {
                inner.current = state;
                Ok(())
            }
            None => Err(HistoryError::NothingToUndo),
        },
        CommandBody::CanvasResize { top, right, bottom, left } => {
            inner.current.resize(*top, *right, *bottom, *left);
            Ok(())
        }
        CommandBody::LayerCreate { layer_id, fill, title } => {
            let id = LayerId::from(*layer_id);
            if inner.current.search_route(id).is_some() {
                return Err(HistoryError::DuplicateLayer(id));
            }
            inner
                .current
                .push_layer(LayerProps::new(id, title.clone()), fill.map(Pixel15::from_bgra));
            Ok(())
        }
        CommandBody::LayerAttributes { layer_id, opacity, blend_mode, censored, isolated } => {
            let props = props_mut(&mut inner.current, *layer_id)?;
            props.opacity = channel8_to_15(*opacity);
            props.blend_mode = *blend_mode;
            props.censored = *censored;
            props.isolated = *isolated;
            Ok(())
        }
        CommandBody::LayerRetitle { layer_id, title } => {
            props_mut(&mut inner.current, *layer_id)?.title = title.clone();
            Ok(())
        }
        CommandBody::LayerMove { layer_id, index } => {
            let id = LayerId::from(*layer_id);
            if inner.current.move_layer(id, usize::from(*index)) {
                Ok(())
            } else {
                Err(HistoryError::UnknownLayer(id))
            }
        }
        CommandBody::LayerDelete { layer_id } => {
            if inner.current.remove_layer(LayerId::from(*layer_id)) {
                Ok(())
            } else {
                Err(HistoryError::UnknownLayer(LayerId::from(*layer_id)))
            }
        }
        CommandBody::PutTile { layer_id, col, row, repeat, color } => {
            put_tile(inner, user, *layer_id, *col, *row, *repeat, *color)
        }
        CommandBody::CanvasBackground { color } => {
            inner.current.set_background_color(Some(*color));
            Ok(())
        }
        CommandBody::FillRect { layer_id, blend_mode, x, y, width, height, color } => {
            let content = content_mut(&mut inner.current, *layer_id)?;
            content.fill_rect(
                user,
                *blend_mode,
                *x,
                *y,
                *x + *width,
                *y + *height,
                Pixel15::from_bgra(*color),
            );
            inner.cursors.record(user, *layer_id, *x + *width, *y + *height);
            Ok(())
        }
        CommandBody::PenUp => {
            merge_user_indirect(&mut inner.current, user);
            Ok(())
        }
        CommandBody::AnnotationCreate { annotation_id, x, y, width, height } => {
            inner.current.annotations_mut().upsert(Annotation {
                id: *annotation_id,
                x: *x,
                y: *y,
                width: *width,
                height: *height,
                background: 0,
                text: String::new(),
            });
            Ok(())
        }
        CommandBody::AnnotationReshape { annotation_id, x, y, width, height } => {
            if inner.current.annotations_mut().reshape(*annotation_id, *x, *y, *width, *height) {
                Ok(())
            } else {
                Err(HistoryError::UnknownAnnotation(*annotation_id))
            }
        }
        CommandBody::AnnotationEdit { annotation_id, background, text } => {
            if inner.current.annotations_mut().edit(*annotation_id, *background, text.clone()) {
                Ok(())
            } else {
                Err(HistoryError::UnknownAnnotation(*annotation_id))
            }
        }
        CommandBody::AnnotationDelete { annotation_id } => {
            if inner.current.annotations_mut().delete(*annotation_id) {
                Ok(())
            } else {
                Err(HistoryError::UnknownAnnotation(*annotation_id))
            }
        }
        CommandBody::SetMetadata { field, value } => {
            inner.current.metadata_mut().set(*field, *value);
            Ok(())
        }
        CommandBody::SetTimeline { frames } => {
            let timeline = inner.current.timeline_mut();
            timeline.frames = frames
                .iter()
                .map(|layer_ids| core_canvas::Frame { layer_ids: layer_ids.clone() })
                .collect();
            Ok(())
        }
        CommandBody::DrawDabsClassic(d) => draw(
            inner,
            dc,
            user,
            d.layer_id,
            d.x,
            d.y,
            d.color,
            d.blend_mode,
            d.indirect,
            DabsFamily::Classic(&d.dabs),
            d.dabs.last().map(|dab| (dab.x, dab.y)),
        ),
        CommandBody::DrawDabsPixel(d) => draw(
            inner,
            dc,
            user,
            d.layer_id,
            d.x,
            d.y,
            d.color,
            d.blend_mode,
            d.indirect,
            DabsFamily::Pixel(&d.dabs),
            d.dabs.last().map(|dab| (dab.x, dab.y)),
        ),
        CommandBody::DrawDabsPixelSquare(d) => draw(
            inner,
            dc,
            user,
            d.layer_id,
            d.x,
            d.y,
            d.color,
            d.blend_mode,
            d.indirect,
            DabsFamily::PixelSquare(&d.dabs),
            d.dabs.last().map(|dab| (dab.x, dab.y)),
        ),
        CommandBody::DrawDabsMyPaint(d) => draw(
            inner,
            dc,
            user,
            d.layer_id,
            d.x,
            d.y,
            d.color,
            BlendMode::NormalAndEraser,
            false,
            DabsFamily::MyPaint { dabs: &d.dabs, lock_alpha: d.lock_alpha },
            d.dabs.last().map(|dab| (dab.x, dab.y)),
        ),
    }
}

fn push_save_point(inner: &mut HistoryInner) {
    inner.undo_stack.push(inner.current.clone());
    if inner.undo_stack.len() > UNDO_DEPTH_LIMIT {
        inner.undo_stack.remove(0);
    }
    // Mid-stroke save points are not worth persisting; the pen-up that
    // follows will produce one.
    if !inner.local_drawing_in_progress && inner.save_point_fn.is_some() {
        let state = inner.current.clone();
        let requested = std::mem::replace(&mut inner.snapshot_requested, false);
        if let Some(f) = inner.save_point_fn.as_mut() {
            f(&state, requested);
        }
    }
}

fn props_mut(cs: &mut CanvasState, layer_id: u16) -> Result<&mut LayerProps, HistoryError> {
    let id = LayerId::from(layer_id);
    let path = cs.search_route(id).ok_or(HistoryError::UnknownLayer(id))?;
    cs.props_mut_at(&path).ok_or(HistoryError::UnknownLayer(id))
}

fn content_mut(cs: &mut CanvasState, layer_id: u16) -> Result<&mut LayerContent, HistoryError> {
    let id = LayerId::from(layer_id);
    let path = cs.search_route(id).ok_or(HistoryError::UnknownLayer(id))?;
    cs.content_mut_at(&path).ok_or(HistoryError::UnknownLayer(id))
}

fn put_tile(
    inner: &mut HistoryInner,
    user: ContextId,
    layer_id: u16,
    col: u16,
    row: u16,
    repeat: u16,
    color: u32,
) -> Result<(), HistoryError> {
    let content = content_mut(&mut inner.current, layer_id)?;
    let xtiles = tile_count_round(content.width());
    let ytiles = tile_count_round(content.height());
    let total = xtiles * ytiles;
    let tile = Arc::new(Tile::new_solid(user, Pixel15::from_bgra(color)));
    let start = i32::from(row) * xtiles + i32::from(col);
    for i in 0..=i32::from(repeat) {
        let index = start + i;
        if index >= total {
            break;
        }
        content.set_tile(index % xtiles, index / xtiles, Arc::clone(&tile));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn draw(
    inner: &mut HistoryInner,
    dc: &mut DrawContext,
    user: ContextId,
    layer_id: u16,
    origin_x: i32,
    origin_y: i32,
    color: u32,
    blend_mode: BlendMode,
    indirect: bool,
    family: DabsFamily<'_>,
    last_dab: Option<(i32, i32)>,
) -> Result<(), HistoryError> {
    let content = content_mut(&mut inner.current, layer_id)?;
    if indirect {
        // Wet strokes accumulate on a per-user sublayer at full pixel
        // opacity; the stroke opacity lives on the sublayer props and is
        // applied once at merge time.
        let sub = content.get_or_insert_sublayer(LayerId::from(user));
        let props = Arc::make_mut(&mut sub.props);
        props.blend_mode = blend_mode;
        props.opacity = channel8_to_15((color >> 24) as u8);
        let target = Arc::make_mut(&mut sub.content);
        draw_dabs(
            dc,
            target,
            &DabsParams {
                context_id: user,
                origin_x,
                origin_y,
                color,
                blend_mode: BlendMode::Normal,
                family,
            },
        );
    } else {
        draw_dabs(
            dc,
            content,
            &DabsParams { context_id: user, origin_x, origin_y, color, blend_mode, family },
        );
    }
    if let Some((dx, dy)) = last_dab {
        inner.cursors.record(user, layer_id, origin_x + dx, origin_y + dy);
    }
    Ok(())
}

/// Merge the given user's pending indirect sublayers on every leaf layer.
fn merge_user_indirect(cs: &mut CanvasState, user: ContextId) {
    let mut paths = Vec::new();
    collect_leaves_with_sublayer(cs.layers(), LayerId::from(user), &mut Vec::new(), &mut paths);
    for path in paths {
        if let Some(content) = cs.content_mut_at(&path) {
            content.merge_sublayer_down(LayerId::from(user), user);
        }
    }
}

fn collect_leaves_with_sublayer(
    list: &core_canvas::LayerList,
    id: LayerId,
    path: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    for (i, entry) in list.iter().enumerate() {
        path.push(i);
        match entry {
            LayerListEntry::Content(content) => {
                if content.sublayers().iter().any(|s| s.props.id == id) {
                    out.push(path.clone());
                }
            }
            LayerListEntry::Group(children) => {
                collect_leaves_with_sublayer(children, id, path, out);
            }
        }
        path.pop();
    }
}

pub(crate) fn merge_all_indirect(cs: &mut CanvasState) {
    let mut paths = Vec::new();
    collect_leaves_with_any_indirect(cs.layers(), &mut Vec::new(), &mut paths);
    for path in paths {
        if let Some(content) = cs.content_mut_at(&path) {
            // Context id 0: cleanup is not attributable to a drawing user.
            content.merge_indirect_sublayers(0);
        }
    }
}

fn collect_leaves_with_any_indirect(
    list: &core_canvas::LayerList,
    path: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    for (i, entry) in list.iter().enumerate() {
        path.push(i);
        match entry {
            LayerListEntry::Content(content) => {
                if content.sublayers().iter().any(|s| s.props.id > 0) {
                    out.push(path.clone());
                }
            }
            LayerListEntry::Group(children) => {
                collect_leaves_with_any_indirect(children, path, out);
            }
        }
        path.pop();
    }
}
