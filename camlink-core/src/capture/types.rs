//! Shared types for the capture side: pixel layouts, stream geometry and
//! slot bookkeeping.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── PixelFormat ──────────────────────────────────────────────────

/// Uncompressed pixel layouts a stream can carry, tagged by V4L2 FourCC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed YUV 4:2:2, Y0 U Y1 V. The reference format.
    #[default]
    #[serde(rename = "YUYV")]
    Yuyv,
    /// Packed YUV 4:2:2, U Y0 V Y1.
    #[serde(rename = "UYVY")]
    Uyvy,
    /// 3 bytes per pixel: Red, Green, Blue.
    #[serde(rename = "RGB3")]
    Rgb24,
    /// 3 bytes per pixel: Blue, Green, Red.
    #[serde(rename = "BGR3")]
    Bgr24,
    /// 8-bit luma only.
    #[serde(rename = "GREY")]
    Grey,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Yuyv | PixelFormat::Uyvy => 2,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Grey => 1,
        }
    }

    /// The V4L2 FourCC code.
    pub const fn fourcc(self) -> [u8; 4] {
        match self {
            PixelFormat::Yuyv => *b"YUYV",
            PixelFormat::Uyvy => *b"UYVY",
            PixelFormat::Rgb24 => *b"RGB3",
            PixelFormat::Bgr24 => *b"BGR3",
            PixelFormat::Grey => *b"GREY",
        }
    }

    /// Maps a FourCC code back to a known format.
    pub fn from_fourcc(code: [u8; 4]) -> Option<Self> {
        match &code {
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"UYVY" => Some(PixelFormat::Uyvy),
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"BGR3" => Some(PixelFormat::Bgr24),
            b"GREY" => Some(PixelFormat::Grey),
            _ => None,
        }
    }

    /// FourCC packed little-endian into an integer, as V4L2 does.
    pub const fn fourcc_code(self) -> u32 {
        u32::from_le_bytes(self.fourcc())
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.fourcc();
        write!(f, "{}", String::from_utf8_lossy(&code))
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 4] = s
            .to_ascii_uppercase()
            .as_bytes()
            .try_into()
            .map_err(|_| format!("pixel format must be a 4-character code, got {s:?}"))?;
        PixelFormat::from_fourcc(bytes).ok_or_else(|| format!("unsupported pixel format {s:?}"))
    }
}

// ── StreamConfig ─────────────────────────────────────────────────

/// Geometry and layout of a stream, negotiated once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl StreamConfig {
    pub const fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Size in bytes of one tightly packed frame, or `None` when it does
    /// not fit in `usize`.
    pub const fn checked_frame_len(&self) -> Option<usize> {
        let pixels = match (self.width as usize).checked_mul(self.height as usize) {
            Some(pixels) => pixels,
            None => return None,
        };
        pixels.checked_mul(self.format.bytes_per_pixel())
    }

    /// Size in bytes of one tightly packed frame. Saturates at
    /// `usize::MAX`; see [`StreamConfig::checked_frame_len`].
    pub const fn frame_len(&self) -> usize {
        match self.checked_frame_len() {
            Some(len) => len,
            None => usize::MAX,
        }
    }

    /// `true` when width and height match, regardless of pixel format.
    pub fn same_geometry(&self, other: &StreamConfig) -> bool {
        self.width == other.width && self.height == other.height
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(320, 180, PixelFormat::Yuyv)
    }
}

impl fmt::Display for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}

// ── Slots ────────────────────────────────────────────────────────

/// Lifecycle of one device-backed buffer.
///
/// ```text
///  Free ──► Queued ──► Filled
///             ▲          │
///             └──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Mapped but not handed to the device.
    #[default]
    Free,
    /// Submitted to the device, awaiting fill. Must not be read.
    Queued,
    /// Written by the device and exposed to the reader.
    Filled,
}

/// Handle to the slot exposed by the latest acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRef {
    /// Slot index within the ring.
    pub index: usize,
    /// Valid bytes reported by the device for this acquisition.
    pub len: usize,
    /// Device frame counter.
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_frame_len() {
        let cfg = StreamConfig::new(320, 180, PixelFormat::Yuyv);
        assert_eq!(cfg.frame_len(), 320 * 180 * 2);
    }

    #[test]
    fn fourcc_roundtrip() {
        for fmt in [
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Grey,
        ] {
            assert_eq!(PixelFormat::from_fourcc(fmt.fourcc()), Some(fmt));
        }
        assert_eq!(PixelFormat::from_fourcc(*b"MJPG"), None);
    }

    #[test]
    fn fourcc_code_matches_v4l2_packing() {
        // v4l2_fourcc('Y','U','Y','V')
        let expected = b'Y' as u32 | (b'U' as u32) << 8 | (b'Y' as u32) << 16 | (b'V' as u32) << 24;
        assert_eq!(PixelFormat::Yuyv.fourcc_code(), expected);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("yuyv".parse::<PixelFormat>().unwrap(), PixelFormat::Yuyv);
        assert!("MJPG".parse::<PixelFormat>().is_err());
        assert!("YUV".parse::<PixelFormat>().is_err());
    }

    #[test]
    fn huge_geometry_does_not_overflow() {
        let cfg = StreamConfig::new(u32::MAX, u32::MAX, PixelFormat::Rgb24);
        assert_eq!(cfg.checked_frame_len(), None);
        assert_eq!(cfg.frame_len(), usize::MAX);
        assert_eq!(StreamConfig::default().checked_frame_len(), Some(115_200));
    }

    #[test]
    fn display_format() {
        let cfg = StreamConfig::new(640, 480, PixelFormat::Grey);
        assert_eq!(cfg.to_string(), "640x480 GREY");
    }
}
