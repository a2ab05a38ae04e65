//! Local-only preview overlays.
//!
//! A preview is an uncommitted edit rendered on top of the history state
//! every tick: a cut rectangle about to be erased, or the dabs of a stroke
//! in flight. Exactly one preview is installed at a time. Install and
//! clear both travel through the local queue (so they serialise with the
//! strokes around them) into the engine's swap slot, and the tick thread
//! picks them up from there. Replacing or clearing a preview drops the old
//! one, which is its dispose.
//!
//! Each preview captures the canvas offset at install time; renders get
//! the delta between that and the current state's offset, so a canvas
//! resize moves the overlay along with the content it belongs to.

use core_canvas::{
    BIT15, CanvasState, DrawContext, LayerContent, LayerId, LayerProps, Pixel15, channel8_to_15,
};
use core_message::{BlendMode, CommandBody, SharedMessage};
use std::sync::Arc;

/// Sublayer id used by cut and indirect dab previews.
pub const PREVIEW_SUBLAYER_ID: LayerId = -100;

/// Sublayer id used by the inspect overlay.
pub const INSPECT_SUBLAYER_ID: LayerId = -200;

/// Value swapped through the engine's preview slot. `Clear` is the
/// "remove whatever is installed" sentinel.
#[derive(Debug)]
pub(crate) enum PreviewSwap {
    Clear,
    Install(InstalledPreview),
}

pub(crate) trait PreviewRender: Send {
    /// Render the overlay onto `cs` (an owned snapshot; copy-on-write
    /// keeps the authoritative state untouched). Offsets are the delta
    /// between install-time and current canvas origin.
    fn render(
        &mut self,
        cs: CanvasState,
        dc: &mut DrawContext,
        offset_x: i32,
        offset_y: i32,
    ) -> CanvasState;
}

pub(crate) struct InstalledPreview {
    initial_offset_x: i32,
    initial_offset_y: i32,
    kind: Box<dyn PreviewRender>,
}

impl std::fmt::Debug for InstalledPreview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledPreview")
            .field("initial_offset_x", &self.initial_offset_x)
            .field("initial_offset_y", &self.initial_offset_y)
            .finish_non_exhaustive()
    }
}

impl InstalledPreview {
    pub fn new(initial_offset_x: i32, initial_offset_y: i32, kind: Box<dyn PreviewRender>) -> Self {
        Self { initial_offset_x, initial_offset_y, kind }
    }

    pub fn render(&mut self, cs: CanvasState, dc: &mut DrawContext) -> CanvasState {
        let dx = self.initial_offset_x - cs.offset_x();
        let dy = self.initial_offset_y - cs.offset_y();
        self.kind.render(cs, dc, dx, dy)
    }
}

// --- cut preview -----------------------------------------------------------

/// Shows a pending cut as an erase sublayer over the target layer. The
/// sublayer content is regenerated lazily whenever the canvas size it was
/// built for no longer matches.
pub(crate) struct CutPreview {
    layer_id: LayerId,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    mask: Option<Vec<u8>>,
    content: Option<Arc<LayerContent>>,
    props: Option<Arc<LayerProps>>,
}

impl CutPreview {
    pub fn new(layer_id: LayerId, x: i32, y: i32, width: i32, height: i32, mask: Option<Vec<u8>>) -> Self {
        Self { layer_id, x, y, width, height, mask, content: None, props: None }
    }

    fn content_for(&mut self, canvas_width: i32, canvas_height: i32, dx: i32, dy: i32) -> Arc<LayerContent> {
        let stale = match &self.content {
            Some(content) => {
                content.width() != canvas_width || content.height() != canvas_height
            }
            None => true,
        };
        if stale {
            let mut lc = LayerContent::new(canvas_width, canvas_height);
            let left = self.x + dx;
            let top = self.y + dy;
            match &self.mask {
                Some(mask) => {
                    for my in 0..self.height {
                        for mx in 0..self.width {
                            let a = mask[(my * self.width + mx) as usize];
                            if a != 0 {
                                lc.set_pixel_at(
                                    0,
                                    left + mx,
                                    top + my,
                                    Pixel15::new(0, 0, 0, channel8_to_15(a)),
                                );
                            }
                        }
                    }
                }
                None => {
                    lc.fill_rect(
                        0,
                        BlendMode::Replace,
                        left,
                        top,
                        left + self.width,
                        top + self.height,
                        Pixel15::new(0, 0, 0, BIT15),
                    );
                }
            }
            self.content = Some(Arc::new(lc));
        }
        Arc::clone(self.content.as_ref().expect("regenerated above"))
    }
}

impl PreviewRender for CutPreview {
    fn render(
        &mut self,
        mut cs: CanvasState,
        _dc: &mut DrawContext,
        offset_x: i32,
        offset_y: i32,
    ) -> CanvasState {
        let Some(path) = cs.search_route(self.layer_id) else {
            return cs;
        };
        if cs.content_at(&path).is_none() {
            // Group layer: nothing to cut from.
            return cs;
        }
        let props = Arc::clone(self.props.get_or_insert_with(|| {
            let mut p = LayerProps::new(PREVIEW_SUBLAYER_ID, String::new());
            p.blend_mode = BlendMode::Erase;
            Arc::new(p)
        }));
        let sub_content = self.content_for(cs.width(), cs.height(), offset_x, offset_y);
        let content = cs.content_mut_at(&path).expect("checked leaf above");
        content.insert_sublayer(props, sub_content);
        cs
    }
}

// --- dabs preview ----------------------------------------------------------

/// Re-renders held draw-dabs messages on top of the current state. Direct
/// strokes paint straight into (a copy of) the target layer; indirect
/// strokes go through a preview sublayer whose blend mode and opacity come
/// from the first indirect message.
pub(crate) struct DabsPreview {
    layer_id: LayerId,
    messages: Vec<SharedMessage>,
}

impl DabsPreview {
    pub fn new(layer_id: LayerId, messages: Vec<SharedMessage>) -> Self {
        Self { layer_id, messages }
    }
}

impl PreviewRender for DabsPreview {
    fn render(
        &mut self,
        mut cs: CanvasState,
        dc: &mut DrawContext,
        offset_x: i32,
        offset_y: i32,
    ) -> CanvasState {
        let Some(path) = cs.search_route(self.layer_id) else {
            return cs;
        };
        let Some(_) = cs.content_at(&path) else {
            return cs;
        };
        let content = cs.content_mut_at(&path).expect("checked leaf above");

        let mut sublayer_ready = false;
        for msg in &self.messages {
            let Some(command) = msg.as_command() else {
                continue;
            };
            let (origin_x, origin_y, color, blend_mode, indirect, family) = match command {
                CommandBody::DrawDabsClassic(d) => (
                    d.x,
                    d.y,
                    d.color,
                    d.blend_mode,
                    d.indirect,
                    core_canvas::DabsFamily::Classic(&d.dabs),
                ),
                CommandBody::DrawDabsPixel(d) => (
                    d.x,
                    d.y,
                    d.color,
                    d.blend_mode,
                    d.indirect,
                    core_canvas::DabsFamily::Pixel(&d.dabs),
                ),
                CommandBody::DrawDabsPixelSquare(d) => (
                    d.x,
                    d.y,
                    d.color,
                    d.blend_mode,
                    d.indirect,
                    core_canvas::DabsFamily::PixelSquare(&d.dabs),
                ),
                CommandBody::DrawDabsMyPaint(d) => (
                    d.x,
                    d.y,
                    d.color,
                    BlendMode::NormalAndEraser,
                    false,
                    core_canvas::DabsFamily::MyPaint { dabs: &d.dabs, lock_alpha: d.lock_alpha },
                ),
                _ => continue,
            };

            let params = core_canvas::DabsParams {
                context_id: msg.context_id(),
                origin_x: origin_x + offset_x,
                origin_y: origin_y + offset_y,
                color,
                blend_mode: if indirect { BlendMode::Normal } else { blend_mode },
                family,
            };
            if indirect {
                let sub = content.get_or_insert_sublayer(PREVIEW_SUBLAYER_ID);
                if !sublayer_ready {
                    let props = Arc::make_mut(&mut sub.props);
                    props.blend_mode = blend_mode;
                    props.opacity = channel8_to_15((color >> 24) as u8);
                    sublayer_ready = true;
                }
                core_canvas::draw_dabs(dc, Arc::make_mut(&mut sub.content), &params);
            } else {
                core_canvas::draw_dabs(dc, content, &params);
            }
        }
        cs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_message::{DrawDabsPixel, Message, PixelDab};

    fn canvas() -> CanvasState {
        let mut cs = CanvasState::new();
        cs.resize(0, 128, 128, 0);
        cs.push_layer(LayerProps::new(5, "target".into()), None);
        let path = cs.search_route(5).unwrap();
        cs.content_mut_at(&path).unwrap().fill_rect(
            1,
            BlendMode::Replace,
            0,
            0,
            128,
            128,
            Pixel15::new(0, 0, BIT15, BIT15),
        );
        cs
    }

    #[test]
    fn cut_preview_erases_rect_without_touching_history_state() {
        let cs = canvas();
        let mut dc = DrawContext::new();
        let mut preview = InstalledPreview::new(
            cs.offset_x(),
            cs.offset_y(),
            Box::new(CutPreview::new(5, 0, 0, 64, 64, None)),
        );
        let view = preview.render(cs.clone(), &mut dc);

        let path = view.search_route(5).unwrap();
        let content = view.content_at(&path).unwrap();
        assert_eq!(content.sublayers().len(), 1);
        assert_eq!(content.sublayers()[0].props.id, PREVIEW_SUBLAYER_ID);
        assert_eq!(content.sublayers()[0].props.blend_mode, BlendMode::Erase);

        // The state we rendered from still has no sublayer.
        let base = cs.content_at(&path).unwrap();
        assert!(base.sublayers().is_empty());
    }

    #[test]
    fn cut_preview_regenerates_on_canvas_resize() {
        let cs = canvas();
        let mut dc = DrawContext::new();
        let mut preview = InstalledPreview::new(
            cs.offset_x(),
            cs.offset_y(),
            Box::new(CutPreview::new(5, 10, 10, 20, 20, None)),
        );
        let _first = preview.render(cs.clone(), &mut dc);

        let mut grown = cs.clone();
        grown.resize(0, 0, 0, 64);
        let view = preview.render(grown, &mut dc);
        let path = view.search_route(5).unwrap();
        let sub = &view.content_at(&path).unwrap().sublayers()[0];
        assert_eq!(sub.content.width(), 192);
        // The offset delta translated the rect 64 pixels right.
        let tile = sub.content.tile_at(1, 0).expect("translated cut rect tile");
        assert!(tile.pixel_at(74 - 64, 15).a > 0);
    }

    #[test]
    fn missing_layer_renders_identity() {
        let cs = canvas();
        let mut dc = DrawContext::new();
        let mut preview = InstalledPreview::new(
            0,
            0,
            Box::new(CutPreview::new(99, 0, 0, 16, 16, None)),
        );
        let view = preview.render(cs.clone(), &mut dc);
        assert!(CanvasState::same_identity(&view, &cs));
    }

    #[test]
    fn indirect_dabs_build_preview_sublayer_from_first_message() {
        let cs = canvas();
        let mut dc = DrawContext::new();
        let msg = Message::command(
            3,
            CommandBody::DrawDabsPixel(DrawDabsPixel {
                layer_id: 5,
                x: 32,
                y: 32,
                color: 0x40_00_ff_00,
                blend_mode: BlendMode::Multiply,
                indirect: true,
                dabs: vec![PixelDab { x: 0, y: 0, size: 3, opacity: 255 }],
            }),
        );
        let mut preview =
            InstalledPreview::new(0, 0, Box::new(DabsPreview::new(5, vec![msg])));
        let view = preview.render(cs, &mut dc);
        let path = view.search_route(5).unwrap();
        let sub = &view.content_at(&path).unwrap().sublayers()[0];
        assert_eq!(sub.props.id, PREVIEW_SUBLAYER_ID);
        assert_eq!(sub.props.blend_mode, BlendMode::Multiply);
        assert_eq!(sub.props.opacity, channel8_to_15(0x40));
        assert!(sub.content.tile_at(0, 0).is_some());
    }
}
