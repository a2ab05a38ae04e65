//! The scripted demo session.
//!
//! Two users set up a small document and paint over it: user 1 draws a
//! sine wave with classic dabs, user 2 crosses it with pixel dabs and
//! then undoes their second stroke. Batches are submitted in order, the
//! way a session client would hand them to the engine.

use crate::config::Config;
use core_message::{
    BlendMode, ClassicDab, CommandBody, DrawDabsClassic, DrawDabsPixel, Message, MessageBody,
    PixelDab, SharedMessage,
};

fn sine_stroke(layer_id: u16, width: i32, height: i32, dabs: usize) -> SharedMessage {
    let mid = height / 2;
    let amplitude = (height / 4) as f32;
    let step = width as f32 / dabs.max(1) as f32;
    Message::command(
        1,
        CommandBody::DrawDabsClassic(DrawDabsClassic {
            layer_id,
            x: 0,
            y: mid,
            color: 0xff_20_40_c0,
            blend_mode: BlendMode::Normal,
            indirect: false,
            dabs: (0..dabs)
                .map(|i| {
                    let x = (i as f32 * step) as i32;
                    let y = (amplitude * (i as f32 * 0.2).sin()) as i32;
                    ClassicDab { x, y, size: 6 * 256, hardness: 180, opacity: 230 }
                })
                .collect(),
        }),
    )
}

fn cross_stroke(layer_id: u16, width: i32, height: i32, dabs: usize) -> SharedMessage {
    Message::command(
        2,
        CommandBody::DrawDabsPixel(DrawDabsPixel {
            layer_id,
            x: 0,
            y: 0,
            color: 0xff_d0_30_30,
            blend_mode: BlendMode::Normal,
            indirect: false,
            dabs: (0..dabs)
                .map(|i| {
                    let t = i as f32 / dabs.max(1) as f32;
                    PixelDab {
                        x: (t * width as f32) as i32,
                        y: (t * height as f32) as i32,
                        size: 4,
                        opacity: 255,
                    }
                })
                .collect(),
        }),
    )
}

/// Build the demo session as ordered submission batches.
pub fn demo_session(config: &Config) -> Vec<Vec<SharedMessage>> {
    let width = config.canvas.width;
    let height = config.canvas.height;
    let dabs = config.session.stroke_dabs;

    vec![
        // Document setup.
        vec![
            Message::command(
                0,
                CommandBody::CanvasResize { top: 0, right: width, bottom: height, left: 0 },
            ),
            Message::command(
                0,
                CommandBody::CanvasBackground { color: config.session.background },
            ),
            Message::command(
                0,
                CommandBody::LayerCreate { layer_id: 0x0101, fill: None, title: "sketch".into() },
            ),
            Message::command(
                0,
                CommandBody::LayerCreate { layer_id: 0x0201, fill: None, title: "ink".into() },
            ),
        ],
        // User 1 paints, with a laser gesture alongside.
        vec![
            Message::new(1, MessageBody::LaserTrail { persistence: 10, color: 0xff_00_ff_00 }),
            Message::command(1, CommandBody::UndoPoint),
            sine_stroke(0x0101, width, height, dabs),
            Message::command(1, CommandBody::PenUp),
        ],
        // User 2 paints twice and undoes the second stroke.
        vec![
            Message::command(2, CommandBody::UndoPoint),
            cross_stroke(0x0201, width, height, dabs),
            Message::command(2, CommandBody::PenUp),
            Message::command(2, CommandBody::UndoPoint),
            cross_stroke(0x0201, width / 2, height, dabs / 2),
            Message::command(2, CommandBody::Undo),
        ],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn session_batches_are_commands_or_known_meta() {
        let config = Config::default();
        let batches = demo_session(&config);
        assert_eq!(batches.len(), 3);
        for msg in batches.iter().flatten() {
            let meta_ok = matches!(msg.body(), MessageBody::LaserTrail { .. });
            assert!(msg.is_command() || meta_ok, "unexpected message in script");
        }
    }

    #[test]
    fn strokes_scale_with_config() {
        let mut config = Config::default();
        config.session.stroke_dabs = 10;
        let batches = demo_session(&config);
        let stroke = batches[1]
            .iter()
            .find_map(|m| match m.as_command() {
                Some(CommandBody::DrawDabsClassic(d)) => Some(d.dabs.len()),
                _ => None,
            })
            .unwrap();
        assert_eq!(stroke, 10);
    }
}
