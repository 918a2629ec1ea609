//! In-memory capture device producing moving colour bars.
//!
//! Behaves like a V4L2 capture node in streaming mode: buffers must be
//! requested, mapped and queued before streaming starts, filled buffers
//! come back in queue order, and an empty queue reads as "busy". Every
//! frame carries its sequence number in its first eight bytes
//! (little-endian) so readers can tell frames apart.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::capture::device::{CaptureDevice, DequeuedBuffer};
use crate::capture::types::{PixelFormat, StreamConfig};
use crate::error::CaptureError;

/// Largest geometry the synthetic device accepts by default.
pub const DEFAULT_MAX_RESOLUTION: (u32, u32) = (1920, 1080);

// 75% colour bars: white, yellow, cyan, green, magenta, red, blue, black.
const YUV_BARS: [[u8; 3]; 8] = [
    [180, 128, 128],
    [162, 44, 142],
    [131, 156, 44],
    [112, 72, 58],
    [84, 184, 198],
    [65, 100, 212],
    [35, 212, 114],
    [16, 128, 128],
];

const RGB_BARS: [[u8; 3]; 8] = [
    [191, 191, 191],
    [191, 191, 0],
    [0, 191, 191],
    [0, 191, 0],
    [191, 0, 191],
    [191, 0, 0],
    [0, 0, 191],
    [0, 0, 0],
];

/// Test-pattern generator implementing [`CaptureDevice`].
#[derive(Debug)]
pub struct SyntheticDevice {
    name: String,
    max_resolution: (u32, u32),
    config: StreamConfig,
    buffers: Vec<Option<Vec<u8>>>,
    queue: VecDeque<usize>,
    streaming: bool,
    counter: u64,
    frame_interval: Option<Duration>,
    started_at: Option<Instant>,
    last_tick: Option<u64>,
    busy_polls: u32,
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevice {
    pub fn new() -> Self {
        Self {
            name: "synthetic".to_string(),
            max_resolution: DEFAULT_MAX_RESOLUTION,
            config: StreamConfig::default(),
            buffers: Vec::new(),
            queue: VecDeque::new(),
            streaming: false,
            counter: 0,
            frame_interval: None,
            started_at: None,
            last_tick: None,
            busy_polls: 0,
        }
    }

    /// Clamp requested geometry to `width`x`height`.
    pub fn with_max_resolution(mut self, width: u32, height: u32) -> Self {
        self.max_resolution = (width, height);
        self
    }

    /// Produce frames on a fixed clock instead of on demand.
    ///
    /// Frames that elapse while the reader is busy are skipped, and the
    /// sequence number jumps accordingly.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    /// Report "busy" for the first `polls` dequeue attempts.
    pub fn with_busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = polls;
        self
    }

    fn next_sequence(&mut self) -> Option<u64> {
        let Some(interval) = self.frame_interval else {
            let seq = self.counter;
            self.counter += 1;
            return Some(seq);
        };

        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let tick = (elapsed.as_nanos() / interval.as_nanos()) as u64;
        match self.last_tick {
            Some(last) if tick <= last => None,
            _ => {
                self.last_tick = Some(tick);
                Some(tick)
            }
        }
    }

    fn mapped(&self, index: usize) -> bool {
        matches!(self.buffers.get(index), Some(Some(_)))
    }
}

impl CaptureDevice for SyntheticDevice {
    fn set_format(&mut self, requested: StreamConfig) -> Result<StreamConfig, CaptureError> {
        if self.streaming {
            return Err(CaptureError::io("set format", "device is streaming"));
        }
        let (max_w, max_h) = self.max_resolution;
        self.config = StreamConfig {
            width: requested.width.clamp(1, max_w),
            height: requested.height.clamp(1, max_h),
            format: requested.format,
        };
        Ok(self.config)
    }

    fn request_buffers(&mut self, count: usize) -> Result<usize, CaptureError> {
        if self.streaming {
            return Err(CaptureError::io("request buffers", "device is streaming"));
        }
        self.buffers = vec![None; count];
        self.queue.clear();
        Ok(count)
    }

    fn map_buffer(&mut self, index: usize) -> Result<usize, CaptureError> {
        let len = self.config.frame_len();
        let slot = self
            .buffers
            .get_mut(index)
            .ok_or_else(|| CaptureError::io("map buffer", format!("no buffer {index}")))?;
        *slot = Some(vec![0; len]);
        Ok(len)
    }

    fn buffer(&self, index: usize) -> &[u8] {
        self.buffers
            .get(index)
            .and_then(|b| b.as_deref())
            .unwrap_or(&[])
    }

    fn queue(&mut self, index: usize) -> Result<(), CaptureError> {
        if !self.mapped(index) {
            return Err(CaptureError::io("queue buffer", format!("buffer {index} is not mapped")));
        }
        if self.queue.contains(&index) {
            return Err(CaptureError::io("queue buffer", format!("buffer {index} already queued")));
        }
        self.queue.push_back(index);
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Option<DequeuedBuffer>, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::io("dequeue buffer", "streaming is off"));
        }
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return Ok(None);
        }
        if self.queue.is_empty() {
            return Ok(None);
        }
        let Some(sequence) = self.next_sequence() else {
            return Ok(None);
        };
        let Some(index) = self.queue.pop_front() else {
            return Ok(None);
        };

        let config = self.config;
        let buf = self.buffers[index].as_deref_mut().unwrap_or_default();
        paint(buf, &config, sequence);

        Ok(Some(DequeuedBuffer {
            index,
            bytes_used: buf.len(),
            sequence,
        }))
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.queue.is_empty() {
            return Err(CaptureError::io("start streaming", "no buffers queued"));
        }
        self.streaming = true;
        self.started_at = Some(Instant::now());
        self.last_tick = None;
        debug!("{}: streaming {}", self.name, self.config);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.streaming = false;
        self.queue.clear();
        Ok(())
    }

    fn unmap_buffer(&mut self, index: usize) -> Result<(), CaptureError> {
        match self.buffers.get_mut(index) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(CaptureError::io("unmap buffer", format!("buffer {index} is not mapped"))),
        }
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        self.buffers.clear();
        self.queue.clear();
        self.streaming = false;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sequence number stamped into a synthetic frame, if it is long enough.
pub fn read_sequence_stamp(frame: &[u8]) -> Option<u64> {
    let head: [u8; 8] = frame.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(head))
}

/// Fill `buf` with vertical colour bars scrolled by `sequence`.
fn paint(buf: &mut [u8], config: &StreamConfig, sequence: u64) {
    let width = config.width as usize;
    let bpp = config.format.bytes_per_pixel();
    let row_len = width * bpp;
    if row_len == 0 {
        return;
    }

    let shift = (sequence as usize).wrapping_mul(4) % width;
    let bar = |x: usize| ((x + shift) % width) * YUV_BARS.len() / width;

    let mut row = vec![0u8; row_len];
    match config.format {
        PixelFormat::Yuyv | PixelFormat::Uyvy => {
            for x in (0..width.saturating_sub(1)).step_by(2) {
                let [y, u, v] = YUV_BARS[bar(x)];
                let px = if config.format == PixelFormat::Yuyv {
                    [y, u, y, v]
                } else {
                    [u, y, v, y]
                };
                row[x * 2..x * 2 + 4].copy_from_slice(&px);
            }
        }
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
            for x in 0..width {
                let [r, g, b] = RGB_BARS[bar(x)];
                let px = if config.format == PixelFormat::Rgb24 {
                    [r, g, b]
                } else {
                    [b, g, r]
                };
                row[x * 3..x * 3 + 3].copy_from_slice(&px);
            }
        }
        PixelFormat::Grey => {
            for (x, px) in row.iter_mut().enumerate() {
                *px = YUV_BARS[bar(x)][0];
            }
        }
    }

    for chunk in buf.chunks_mut(row_len) {
        let n = chunk.len();
        chunk.copy_from_slice(&row[..n]);
    }

    if buf.len() >= 8 {
        buf[..8].copy_from_slice(&sequence.to_le_bytes());
    }
}
