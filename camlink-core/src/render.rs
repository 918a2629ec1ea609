//! The display seam and the playback loop that feeds it.
//!
//! Rendering itself (windows, pixel conversion, files) lives outside this
//! crate behind [`Renderer`]. [`present_frames`] pulls from any
//! [`FrameSource`] and hands each frame over exactly once.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capture::StreamConfig;
use crate::error::LinkError;
use crate::source::FrameSource;

/// Number of frame intervals the smoothed rate is computed over.
const FPS_WINDOW: usize = 60;

/// Consumer of finished frames.
pub trait Renderer: Send {
    /// Show or store one frame. `frame` is only valid for this call.
    fn present(&mut self, frame: &[u8], config: &StreamConfig) -> Result<(), LinkError>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

// ── PlaybackStats ────────────────────────────────────────────────

/// Counters for a playback run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackStats {
    /// Frames handed to the renderer.
    pub frames: u64,
    /// Bytes handed to the renderer.
    pub bytes: u64,
    /// Wall time from the first request to the end of the run.
    pub elapsed: Duration,
    /// Rate over the last few frames.
    pub smoothed_fps: f64,
}

impl PlaybackStats {
    /// Average frames per second over the whole run.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Sliding window of frame intervals.
#[derive(Debug)]
struct RateMeter {
    samples: VecDeque<Duration>,
    last: Instant,
}

impl RateMeter {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(FPS_WINDOW),
            last: Instant::now(),
        }
    }

    fn tick(&mut self) -> f64 {
        let now = Instant::now();
        self.samples.push_back(now.duration_since(self.last));
        self.last = now;
        if self.samples.len() > FPS_WINDOW {
            self.samples.pop_front();
        }
        let avg = self.samples.iter().map(Duration::as_secs_f64).sum::<f64>()
            / self.samples.len() as f64;
        if avg > 0.0 { 1.0 / avg } else { 0.0 }
    }
}

// ── Playback loop ────────────────────────────────────────────────

/// Present frames from `source` until it ends, `limit` frames were shown
/// or `cancel` fires.
///
/// The producer going away ends playback normally. Any other error is
/// returned after the renderer has been finished.
pub async fn present_frames<F, R>(
    source: &mut F,
    renderer: &mut R,
    limit: Option<u64>,
    cancel: &CancellationToken,
) -> Result<PlaybackStats, LinkError>
where
    F: FrameSource + ?Sized,
    R: Renderer + ?Sized,
{
    let started = Instant::now();
    let mut stats = PlaybackStats::default();
    let mut meter = RateMeter::new();

    let outcome = loop {
        if limit.is_some_and(|limit| stats.frames >= limit) {
            break Ok(());
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("playback cancelled");
                break Ok(());
            }
            next = source.next_frame() => next,
        };

        match next {
            Ok(_) => {}
            Err(e) if e.is_peer_closed() => {
                info!("producer closed the stream");
                break Ok(());
            }
            Err(e) => break Err(e),
        }

        let frame = source.current_frame();
        if let Err(e) = renderer.present(frame, source.config()) {
            break Err(e);
        }
        stats.frames += 1;
        stats.bytes += frame.len() as u64;
        stats.smoothed_fps = meter.tick();
    };

    stats.elapsed = started.elapsed();
    renderer.finish()?;
    outcome?;

    info!(
        "presented {} frames ({} bytes) in {:.2?}, {:.1} fps",
        stats.frames,
        stats.bytes,
        stats.elapsed,
        stats.fps()
    );
    Ok(stats)
}
