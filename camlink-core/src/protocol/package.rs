//! Typed packages and the `StreamConfig` payload.

use bytes::Bytes;

use crate::capture::{PixelFormat, StreamConfig};
use crate::error::LinkError;
use crate::protocol::codec::MAX_PAYLOAD_SIZE;
use crate::protocol::header::{PackageType, read_u64};

/// One decoded package. The payload is shared, never copied on clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub kind: PackageType,
    pub payload: Bytes,
}

impl Package {
    pub fn new(kind: PackageType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// End-of-stream marker.
    pub fn closed() -> Self {
        Self::new(PackageType::Closed, Bytes::new())
    }

    pub fn text(text: &str) -> Self {
        Self::new(PackageType::Text, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn config(config: &StreamConfig) -> Self {
        Self::new(
            PackageType::StreamConfig,
            Bytes::copy_from_slice(&config.encode()),
        )
    }

    pub fn frame(pixels: impl Into<Bytes>) -> Self {
        Self::new(PackageType::Frame, pixels)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as text, with invalid UTF-8 replaced.
    pub fn text_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

// ── StreamConfig payload ─────────────────────────────────────────

impl StreamConfig {
    /// Encoded size: width, height and FourCC as u64 each.
    pub const WIRE_SIZE: usize = 24;

    /// Serialize as `(width, height, fourcc)`, little-endian u64s.
    pub fn encode(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..8].copy_from_slice(&u64::from(self.width).to_le_bytes());
        buf[8..16].copy_from_slice(&u64::from(self.height).to_le_bytes());
        buf[16..24].copy_from_slice(&u64::from(self.format.fourcc_code()).to_le_bytes());
        buf
    }

    /// Parse a `StreamConfig` payload.
    ///
    /// Width and height are required; peers that only send those two get
    /// YUYV. Trailing bytes beyond the FourCC are ignored.
    pub fn decode(payload: &[u8]) -> Result<Self, LinkError> {
        if payload.len() < 16 {
            return Err(LinkError::ProtocolViolation(format!(
                "stream config needs at least 16 bytes, got {}",
                payload.len()
            )));
        }

        let dimension = |at: usize, name: &str| {
            let value = read_u64(payload, at);
            u32::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| {
                    LinkError::ProtocolViolation(format!(
                        "stream config {name} {value} is out of range"
                    ))
                })
        };
        let width = dimension(0, "width")?;
        let height = dimension(8, "height")?;

        let format = if payload.len() >= StreamConfig::WIRE_SIZE {
            let code = read_u64(payload, 16);
            u32::try_from(code)
                .ok()
                .and_then(|c| PixelFormat::from_fourcc(c.to_le_bytes()))
                .ok_or_else(|| {
                    LinkError::ProtocolViolation(format!("unknown pixel format code {code:#x}"))
                })?
        } else {
            PixelFormat::Yuyv
        };

        let config = StreamConfig::new(width, height, format);
        if config.checked_frame_len().is_none_or(|len| len as u64 > MAX_PAYLOAD_SIZE) {
            return Err(LinkError::ProtocolViolation(format!(
                "frames of {config} do not fit in a package"
            )));
        }
        Ok(config)
    }
}
