//! Annotations, document metadata and the frame timeline.
//!
//! These ride along on the canvas state as shared pointers; the paint
//! engine's change emission compares them by identity, so every mutation
//! must go through `Arc::make_mut` on the owning state.

use core_message::MetadataField;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: u16,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub background: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnnotationList {
    annotations: Vec<Arc<Annotation>>,
}

impl AnnotationList {
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Annotation>> {
        self.annotations.iter()
    }

    pub fn get(&self, id: u16) -> Option<&Arc<Annotation>> {
        self.annotations.iter().find(|a| a.id == id)
    }

    pub fn upsert(&mut self, annotation: Annotation) {
        match self.annotations.iter().position(|a| a.id == annotation.id) {
            Some(i) => self.annotations[i] = Arc::new(annotation),
            None => self.annotations.push(Arc::new(annotation)),
        }
    }

    pub fn reshape(&mut self, id: u16, x: i32, y: i32, width: i32, height: i32) -> bool {
        if let Some(i) = self.annotations.iter().position(|a| a.id == id) {
            let a = Arc::make_mut(&mut self.annotations[i]);
            a.x = x;
            a.y = y;
            a.width = width;
            a.height = height;
            true
        } else {
            false
        }
    }

    pub fn edit(&mut self, id: u16, background: u32, text: String) -> bool {
        if let Some(i) = self.annotations.iter().position(|a| a.id == id) {
            let a = Arc::make_mut(&mut self.annotations[i]);
            a.background = background;
            a.text = text;
            true
        } else {
            false
        }
    }

    pub fn delete(&mut self, id: u16) -> bool {
        if let Some(i) = self.annotations.iter().position(|a| a.id == id) {
            self.annotations.remove(i);
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub dpix: i32,
    pub dpiy: i32,
    pub framerate: i32,
    pub frame_count: i32,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self { dpix: 72, dpiy: 72, framerate: 24, frame_count: 0 }
    }
}

impl DocumentMetadata {
    pub fn set(&mut self, field: MetadataField, value: i32) {
        match field {
            MetadataField::Dpix => self.dpix = value,
            MetadataField::Dpiy => self.dpiy = value,
            MetadataField::Framerate => self.framerate = value,
            MetadataField::FrameCount => self.frame_count = value,
        }
    }
}

/// One animation frame: the layer ids composited for it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub layer_ids: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Timeline {
    pub frames: Vec<Frame>,
}

impl Timeline {
    pub fn frame_at(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// True if `layer_id` participates in the frame at `index`.
    pub fn layer_in_frame(&self, index: usize, layer_id: u16) -> bool {
        self.frame_at(index)
            .is_some_and(|f| f.layer_ids.contains(&layer_id))
    }
}
