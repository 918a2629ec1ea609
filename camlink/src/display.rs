//! Renderers the consumer can hand frames to.
//!
//! There is no window here: frames are either counted and reported
//! ([`StatsRenderer`]) or dumped as raw bytes ([`RawRenderer`]) for a
//! player such as `ffplay -f rawvideo` to pick up.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use camlink_core::{LinkError, Renderer, StreamConfig};
use tracing::info;

use crate::config::{OutputConfig, RendererKind};

/// Build the renderer selected in `output`.
pub fn build_renderer(output: &OutputConfig) -> Result<Box<dyn Renderer>, LinkError> {
    match output.renderer {
        RendererKind::Stats => Ok(Box::new(StatsRenderer::new(Duration::from_secs(
            output.report_interval_secs.max(1),
        )))),
        RendererKind::Raw if output.path.is_empty() || output.path == "-" => {
            Ok(Box::new(RawRenderer::new(io::stdout())))
        }
        RendererKind::Raw => Ok(Box::new(RawRenderer::create(Path::new(&output.path))?)),
    }
}

// ── StatsRenderer ────────────────────────────────────────────────

/// Logs the frame rate every `interval`.
#[derive(Debug)]
pub struct StatsRenderer {
    interval: Duration,
    window_start: Instant,
    window_frames: u64,
    frames: u64,
    bytes: u64,
}

impl StatsRenderer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_start: Instant::now(),
            window_frames: 0,
            frames: 0,
            bytes: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Renderer for StatsRenderer {
    fn present(&mut self, frame: &[u8], config: &StreamConfig) -> Result<(), LinkError> {
        self.frames += 1;
        self.window_frames += 1;
        self.bytes += frame.len() as u64;

        let elapsed = self.window_start.elapsed();
        if elapsed >= self.interval {
            let fps = self.window_frames as f64 / elapsed.as_secs_f64();
            info!("{config}: {fps:.1} fps, {} frames so far", self.frames);
            self.window_start = Instant::now();
            self.window_frames = 0;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), LinkError> {
        info!("{} frames, {} bytes received", self.frames, self.bytes);
        Ok(())
    }
}

// ── RawRenderer ──────────────────────────────────────────────────

/// Appends every frame, unmodified, to a byte sink.
pub struct RawRenderer<W: Write + Send> {
    out: BufWriter<W>,
    frames: u64,
}

impl RawRenderer<File> {
    /// Truncate or create `path` and write frames to it.
    pub fn create(path: &Path) -> Result<Self, LinkError> {
        let file = File::create(path)
            .map_err(|e| LinkError::Other(format!("cannot create {}: {e}", path.display())))?;
        info!("writing raw frames to {}", path.display());
        Ok(Self::new(file))
    }
}

impl<W: Write + Send> RawRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Flush and return the sink.
    pub fn into_inner(self) -> Result<W, LinkError> {
        self.out
            .into_inner()
            .map_err(|e| LinkError::Other(format!("flushing raw output: {}", e.error())))
    }
}

impl<W: Write + Send> Renderer for RawRenderer<W> {
    fn present(&mut self, frame: &[u8], _config: &StreamConfig) -> Result<(), LinkError> {
        self.out
            .write_all(frame)
            .map_err(|e| LinkError::Other(format!("writing frame: {e}")))?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), LinkError> {
        self.out
            .flush()
            .map_err(|e| LinkError::Other(format!("flushing raw output: {e}")))
    }
}
