//! Easel headless entrypoint.
//!
//! Drives the paint engine through a scripted two-user session (resize,
//! layers, strokes, a laser trail, an undo), then ticks the view to
//! steady state, renders every dirty tile and writes the composite as a
//! binary PPM. Mostly useful as a smoke test and a worked example of the
//! engine's thread contract: this thread plays both producer and tick
//! thread, the engine's own threads do the rest.

mod config;
mod script;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use core_acl::AclState;
use core_canvas::{Pixel8, TILE_SIZE};
use core_paint::{MessageSource, MetaObserver, PaintEngine, TickObserver};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "easel", version, about = "Headless easel paint engine demo")]
struct Args {
    /// Output image path (binary PPM).
    #[arg(default_value = "easel-frame.ppm")]
    pub output: PathBuf,
    /// Optional configuration file path (overrides discovery of `easel.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Log file path.
    #[arg(long = "log-file", default_value = "easel.log")]
    pub log_file: PathBuf,
}

fn configure_logging(path: &std::path::Path) -> Result<WorkerGuard> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

/// Tick/meta observer that counts what the engine reports.
#[derive(Default)]
struct SessionStats {
    tile_changes: usize,
    resizes: usize,
    props_changes: usize,
    cursor_moves: usize,
    lasers: usize,
    acl_changes: usize,
}

impl TickObserver for SessionStats {
    fn resized(&mut self, _dx: i32, _dy: i32, prev_w: i32, prev_h: i32) {
        info!(target: "runtime", prev_w, prev_h, "canvas resized");
        self.resizes += 1;
    }
    fn tile_changed(&mut self, _x: i32, _y: i32) {
        self.tile_changes += 1;
    }
    fn layer_props_changed(&mut self, _lpl: &Arc<core_canvas::LayerPropsList>) {
        self.props_changes += 1;
    }
    fn cursor_moved(&mut self, context_id: u8, _layer_id: u16, x: i32, y: i32) {
        tracing::debug!(target: "runtime", context_id, x, y, "cursor");
        self.cursor_moves += 1;
    }
}

impl MetaObserver for SessionStats {
    fn acls_changed(&mut self, change_mask: u8) {
        info!(target: "runtime", change_mask, "acl state changed");
        self.acl_changes += 1;
    }
    fn laser_trail(&mut self, context_id: u8, persistence: u8, _color: u32) {
        tracing::debug!(target: "runtime", context_id, persistence, "laser trail");
        self.lasers += 1;
    }
}

/// Tick until two consecutive ticks report nothing new.
fn tick_to_steady(pe: &PaintEngine, stats: &mut SessionStats, deadline: Duration) {
    let start = Instant::now();
    let mut quiet = 0;
    while start.elapsed() < deadline && quiet < 2 {
        let before = stats.tile_changes + stats.resizes + stats.props_changes + stats.cursor_moves;
        pe.tick(stats);
        let after = stats.tile_changes + stats.resizes + stats.props_changes + stats.cursor_moves;
        if after == before {
            quiet += 1;
        } else {
            quiet = 0;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Simple interleaved RGB framebuffer filled from render callbacks.
struct FrameBuffer {
    width: usize,
    height: usize,
    rgb: Vec<u8>,
}

impl FrameBuffer {
    fn new(width: usize, height: usize) -> Self {
        Self { width, height, rgb: vec![0; width * height * 3] }
    }

    fn blit_tile(&mut self, tile_x: i32, tile_y: i32, pixels: &[Pixel8]) {
        let base_x = tile_x as usize * TILE_SIZE as usize;
        let base_y = tile_y as usize * TILE_SIZE as usize;
        for row in 0..TILE_SIZE as usize {
            let y = base_y + row;
            if y >= self.height {
                break;
            }
            for col in 0..TILE_SIZE as usize {
                let x = base_x + col;
                if x >= self.width {
                    break;
                }
                let p = pixels[row * TILE_SIZE as usize + col];
                let i = (y * self.width + x) * 3;
                self.rgb[i] = p.r;
                self.rgb[i + 1] = p.g;
                self.rgb[i + 2] = p.b;
            }
        }
    }

    fn write_ppm(&self, path: &std::path::Path) -> Result<()> {
        use std::io::Write;
        let mut out = std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?,
        );
        write!(out, "P6\n{} {}\n255\n", self.width, self.height)?;
        out.write_all(&self.rgb)?;
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = configure_logging(&args.log_file)?;
    info!(target: "runtime", "startup");

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::discover(),
    };
    info!(
        target: "runtime",
        width = config.canvas.width,
        height = config.canvas.height,
        "session configured"
    );

    let pe = PaintEngine::new(AclState::new(), None, None);
    let mut stats = SessionStats::default();

    for batch in script::demo_session(&config) {
        let pushed = pe.handle_messages(MessageSource::Remote, &batch, &mut stats);
        tracing::debug!(target: "runtime", submitted = batch.len(), pushed, "batch submitted");
    }
    tick_to_steady(&pe, &mut stats, Duration::from_secs(10));

    let mut size = (0, 0);
    pe.prepare_render(|w, h| size = (w, h));
    if size.0 <= 0 || size.1 <= 0 {
        warn!(target: "runtime", "nothing to render");
        return Ok(());
    }

    let fb = Arc::new(Mutex::new(FrameBuffer::new(size.0 as usize, size.1 as usize)));
    let sink = Arc::clone(&fb);
    pe.render_everything(Arc::new(move |x, y, pixels: &[Pixel8], _thread| {
        sink.lock().expect("framebuffer poisoned").blit_tile(x, y, pixels);
    }));

    let fb = fb.lock().expect("framebuffer poisoned");
    fb.write_ppm(&args.output)?;
    info!(
        target: "runtime",
        output = %args.output.display(),
        tiles = stats.tile_changes,
        cursors = stats.cursor_moves,
        lasers = stats.lasers,
        acl_changes = stats.acl_changes,
        "frame written"
    );
    println!(
        "wrote {} ({}x{}), {} tile updates, {} cursor moves, {} laser trails",
        args.output.display(),
        size.0,
        size.1,
        stats.tile_changes,
        stats.cursor_moves,
        stats.lasers
    );

    pe.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framebuffer_blit_clips_at_edges() {
        let mut fb = FrameBuffer::new(70, 70);
        let pixels = vec![Pixel8 { b: 1, g: 2, r: 3, a: 255 }; (TILE_SIZE * TILE_SIZE) as usize];
        fb.blit_tile(1, 1, &pixels);
        // Pixel (64, 64) is inside, (69, 69) is inside, nothing panicked.
        let i = (64 * 70 + 64) * 3;
        assert_eq!(fb.rgb[i], 3);
        let corner = (69 * 70 + 69) * 3;
        assert_eq!(fb.rgb[corner], 3);
    }

    #[test]
    fn ppm_header_matches_dimensions() {
        let fb = FrameBuffer::new(2, 3);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ppm");
        fb.write_ppm(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P6\n2 3\n255\n"));
        assert_eq!(bytes.len(), b"P6\n2 3\n255\n".len() + 2 * 3 * 3);
    }
}
