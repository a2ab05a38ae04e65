//! Protocol message model for the easel paint pipeline.
//!
//! Messages are immutable once constructed and shared by reference count
//! (`SharedMessage = Arc<Message>`). Every message carries the context id of
//! the user that produced it plus a discriminated body. The numeric type id
//! space mirrors the session protocol: meta messages live below 128, command
//! messages (everything that advances canvas history) at 128 and above, and
//! the pseudo-type `Internal` at 0. Consumers decide routing on that
//! boundary, not on individual variants.
//!
//! Invariants:
//! * `Message` has no interior mutability; a `SharedMessage` can cross
//!   threads freely.
//! * `type_id()` is total and stable; `is_command()` is exactly
//!   `type_id() >= COMMAND_BASE`.
//! * Internal messages never appear on the wire; they are session-local
//!   control traffic (resets, snapshot requests, catchup progress).

mod dabs;

pub use dabs::{
    ClassicDab, DrawDabsClassic, DrawDabsMyPaint, DrawDabsPixel, MyPaintDab, PixelDab,
};

use std::sync::Arc;

/// Per-user identifier carried on every message. Also the key for laser,
/// cursor and inspect state downstream.
pub type ContextId = u8;

/// First type id of the command range.
pub const COMMAND_BASE: u8 = 128;

/// Wire type ids. Only the values observable at routing boundaries are
/// named; the exact numbering follows the session protocol.
pub mod ids {
    pub const INTERNAL: u8 = 0;
    pub const SESSION_OWNER: u8 = 34;
    pub const CHAT: u8 = 35;
    pub const TRUSTED_USERS: u8 = 36;
    pub const LASER_TRAIL: u8 = 65;
    pub const MOVE_POINTER: u8 = 66;
    pub const USER_ACL: u8 = 68;
    pub const LAYER_ACL: u8 = 69;
    pub const FEATURE_ACCESS_LEVELS: u8 = 70;
    pub const DEFAULT_LAYER: u8 = 71;
    pub const UNDO_POINT: u8 = 128;
    pub const CANVAS_RESIZE: u8 = 129;
    pub const LAYER_CREATE: u8 = 130;
    pub const LAYER_ATTRIBUTES: u8 = 131;
    pub const LAYER_RETITLE: u8 = 132;
    pub const LAYER_MOVE: u8 = 133;
    pub const LAYER_DELETE: u8 = 134;
    pub const PUT_TILE: u8 = 135;
    pub const CANVAS_BACKGROUND: u8 = 136;
    pub const FILL_RECT: u8 = 137;
    pub const PEN_UP: u8 = 140;
    pub const ANNOTATION_CREATE: u8 = 141;
    pub const ANNOTATION_RESHAPE: u8 = 142;
    pub const ANNOTATION_EDIT: u8 = 143;
    pub const ANNOTATION_DELETE: u8 = 144;
    pub const SET_METADATA: u8 = 146;
    pub const SET_TIMELINE: u8 = 147;
    pub const DRAW_DABS_CLASSIC: u8 = 148;
    pub const DRAW_DABS_PIXEL: u8 = 149;
    pub const DRAW_DABS_PIXEL_SQUARE: u8 = 150;
    pub const DRAW_DABS_MYPAINT: u8 = 151;
    pub const UNDO: u8 = 255;
}

/// Blend modes observable at the protocol boundary. The canvas crate maps
/// these onto its pixel primitives; messages only transport them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    Erase,
    #[default]
    Normal,
    Multiply,
    Screen,
    /// Paint only where the destination is transparent.
    Behind,
    /// Replace color channels, keep destination alpha.
    Recolor,
    /// Overwrite destination outright, alpha included.
    Replace,
    /// Normal where the source has alpha, eraser where it has none.
    NormalAndEraser,
}

/// Session-local control messages. These never pass the ACL filter (they
/// are trusted by construction) and are executed on the paint thread
/// itself rather than being forwarded to history as commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalMessage {
    /// Hard-reset canvas history to an empty state.
    Reset,
    /// Forget undo history but keep the current canvas state.
    SoftReset,
    /// Ask history to flag the next save point as a requested snapshot.
    Snapshot,
    /// Hydration progress in percent, surfaced once per value change.
    Catchup { progress: i32 },
    /// Let history prune resources it no longer needs.
    Cleanup,
}

/// Document metadata fields addressable by `SetMetadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Dpix,
    Dpiy,
    Framerate,
    FrameCount,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Internal(InternalMessage),
    SessionOwner { users: Vec<ContextId> },
    Chat { text: String },
    TrustedUsers { users: Vec<ContextId> },
    LaserTrail { persistence: u8, color: u32 },
    MovePointer { x: i32, y: i32 },
    UserAcl { locked: Vec<ContextId> },
    LayerAcl { layer_id: u16, locked: bool, exclusive: Vec<ContextId> },
    FeatureAccessLevels { tiers: Vec<u8> },
    DefaultLayer { layer_id: u16 },
    Command(CommandBody),
}

/// Commands advance canvas history. All of them have type ids at or above
/// `COMMAND_BASE`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandBody {
    UndoPoint,
    CanvasResize { top: i32, right: i32, bottom: i32, left: i32 },
    LayerCreate { layer_id: u16, fill: Option<u32>, title: String },
    LayerAttributes { layer_id: u16, opacity: u8, blend_mode: BlendMode, censored: bool, isolated: bool },
    LayerRetitle { layer_id: u16, title: String },
    /// Reposition a layer among its siblings; `index` is the target slot
    /// in the parent list, bottom to top.
    LayerMove { layer_id: u16, index: u16 },
    LayerDelete { layer_id: u16 },
    PutTile { layer_id: u16, col: u16, row: u16, repeat: u16, color: u32 },
    CanvasBackground { color: u32 },
    FillRect { layer_id: u16, blend_mode: BlendMode, x: i32, y: i32, width: i32, height: i32, color: u32 },
    PenUp,
    AnnotationCreate { annotation_id: u16, x: i32, y: i32, width: i32, height: i32 },
    AnnotationReshape { annotation_id: u16, x: i32, y: i32, width: i32, height: i32 },
    AnnotationEdit { annotation_id: u16, background: u32, text: String },
    AnnotationDelete { annotation_id: u16 },
    SetMetadata { field: MetadataField, value: i32 },
    SetTimeline { frames: Vec<Vec<u16>> },
    DrawDabsClassic(DrawDabsClassic),
    DrawDabsPixel(DrawDabsPixel),
    DrawDabsPixelSquare(DrawDabsPixel),
    DrawDabsMyPaint(DrawDabsMyPaint),
    Undo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    context_id: ContextId,
    body: MessageBody,
}

/// Messages are shared by reference count across producer threads, the
/// queues, the paint thread and held previews.
pub type SharedMessage = Arc<Message>;

impl Message {
    pub fn new(context_id: ContextId, body: MessageBody) -> SharedMessage {
        Arc::new(Self { context_id, body })
    }

    pub fn internal(context_id: ContextId, internal: InternalMessage) -> SharedMessage {
        Self::new(context_id, MessageBody::Internal(internal))
    }

    pub fn command(context_id: ContextId, command: CommandBody) -> SharedMessage {
        Self::new(context_id, MessageBody::Command(command))
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Numeric protocol type of this message.
    pub fn type_id(&self) -> u8 {
        match &self.body {
            MessageBody::Internal(_) => ids::INTERNAL,
            MessageBody::SessionOwner { .. } => ids::SESSION_OWNER,
            MessageBody::Chat { .. } => ids::CHAT,
            MessageBody::TrustedUsers { .. } => ids::TRUSTED_USERS,
            MessageBody::LaserTrail { .. } => ids::LASER_TRAIL,
            MessageBody::MovePointer { .. } => ids::MOVE_POINTER,
            MessageBody::UserAcl { .. } => ids::USER_ACL,
            MessageBody::LayerAcl { .. } => ids::LAYER_ACL,
            MessageBody::FeatureAccessLevels { .. } => ids::FEATURE_ACCESS_LEVELS,
            MessageBody::DefaultLayer { .. } => ids::DEFAULT_LAYER,
            MessageBody::Command(command) => match command {
                CommandBody::UndoPoint => ids::UNDO_POINT,
                CommandBody::CanvasResize { .. } => ids::CANVAS_RESIZE,
                CommandBody::LayerCreate { .. } => ids::LAYER_CREATE,
                CommandBody::LayerAttributes { .. } => ids::LAYER_ATTRIBUTES,
                CommandBody::LayerRetitle { .. } => ids::LAYER_RETITLE,
                CommandBody::LayerMove { .. } => ids::LAYER_MOVE,
                CommandBody::LayerDelete { .. } => ids::LAYER_DELETE,
                CommandBody::PutTile { .. } => ids::PUT_TILE,
                CommandBody::CanvasBackground { .. } => ids::CANVAS_BACKGROUND,
                CommandBody::FillRect { .. } => ids::FILL_RECT,
                CommandBody::PenUp => ids::PEN_UP,
                CommandBody::AnnotationCreate { .. } => ids::ANNOTATION_CREATE,
                CommandBody::AnnotationReshape { .. } => ids::ANNOTATION_RESHAPE,
                CommandBody::AnnotationEdit { .. } => ids::ANNOTATION_EDIT,
                CommandBody::AnnotationDelete { .. } => ids::ANNOTATION_DELETE,
                CommandBody::SetMetadata { .. } => ids::SET_METADATA,
                CommandBody::SetTimeline { .. } => ids::SET_TIMELINE,
                CommandBody::DrawDabsClassic(_) => ids::DRAW_DABS_CLASSIC,
                CommandBody::DrawDabsPixel(_) => ids::DRAW_DABS_PIXEL,
                CommandBody::DrawDabsPixelSquare(_) => ids::DRAW_DABS_PIXEL_SQUARE,
                CommandBody::DrawDabsMyPaint(_) => ids::DRAW_DABS_MYPAINT,
                CommandBody::Undo => ids::UNDO,
            },
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.body, MessageBody::Internal(_))
    }

    pub fn is_command(&self) -> bool {
        self.type_id() >= COMMAND_BASE
    }

    /// Command body, if this is a command message.
    pub fn as_command(&self) -> Option<&CommandBody> {
        match &self.body {
            MessageBody::Command(command) => Some(command),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_boundary_matches_type_ids() {
        let draw = Message::command(
            1,
            CommandBody::DrawDabsPixel(DrawDabsPixel {
                layer_id: 1,
                x: 0,
                y: 0,
                color: 0xff000000,
                blend_mode: BlendMode::Normal,
                indirect: false,
                dabs: vec![],
            }),
        );
        assert!(draw.is_command());
        assert!(draw.type_id() >= COMMAND_BASE);

        let laser = Message::new(
            1,
            MessageBody::LaserTrail {
                persistence: 5,
                color: 0xffff0000,
            },
        );
        assert!(!laser.is_command());
        assert!(!laser.is_internal());

        let reset = Message::internal(0, InternalMessage::Reset);
        assert!(reset.is_internal());
        assert!(!reset.is_command());
        assert_eq!(reset.type_id(), ids::INTERNAL);
    }

    #[test]
    fn shared_messages_are_refcounted() {
        let msg = Message::internal(0, InternalMessage::SoftReset);
        let clone = Arc::clone(&msg);
        assert_eq!(Arc::strong_count(&msg), 2);
        drop(clone);
        assert_eq!(Arc::strong_count(&msg), 1);
    }
}
