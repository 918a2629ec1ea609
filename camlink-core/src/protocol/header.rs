//! Fixed package header and type tags.
//!
//! ## Wire format
//!
//! ```text
//! payload_length: u64  (8)   little-endian
//! type_tag:       u64  (8)   little-endian
//! payload:        [u8] (payload_length)
//! ```

use std::fmt;

use crate::error::LinkError;

// ── Constants ────────────────────────────────────────────────────

/// Encoded size of a [`PackageHeader`].
pub const HEADER_SIZE: usize = 16;

/// Tags at or above this value decode as [`PackageType::Invalid`].
pub const PACKAGE_TYPE_BOUND: u64 = 4;

// ── PackageType ──────────────────────────────────────────────────

/// What a package carries.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageType {
    /// The peer closed the connection (or announced that it will).
    Closed = 0,
    /// Stream geometry: width, height and optionally a FourCC.
    StreamConfig = 1,
    /// Raw pixel bytes of one frame.
    Frame = 2,
    /// UTF-8 text, advisory only.
    Text = 3,
    /// Any tag the protocol does not know. Never sent on purpose.
    Invalid = u64::MAX,
}

impl PackageType {
    /// Map a raw tag; unknown tags are `Invalid`, never an error.
    pub fn from_tag(tag: u64) -> Self {
        match tag {
            0 => PackageType::Closed,
            1 => PackageType::StreamConfig,
            2 => PackageType::Frame,
            3 => PackageType::Text,
            _ => PackageType::Invalid,
        }
    }

    pub fn tag(self) -> u64 {
        self as u64
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PackageType::Closed => "Closed",
            PackageType::StreamConfig => "StreamConfig",
            PackageType::Frame => "Frame",
            PackageType::Text => "Text",
            PackageType::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

// ── PackageHeader ────────────────────────────────────────────────

/// The 16-byte prefix of every package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// Payload bytes following the header.
    pub length: u64,
    /// Raw type tag as found on the wire.
    pub tag: u64,
}

impl PackageHeader {
    pub fn new(kind: PackageType, length: u64) -> Self {
        Self {
            length,
            tag: kind.tag(),
        }
    }

    pub fn kind(&self) -> PackageType {
        PackageType::from_tag(self.tag)
    }

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..16].copy_from_slice(&self.tag.to_le_bytes());
        buf
    }

    /// Deserialize from the first [`HEADER_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> Result<Self, LinkError> {
        if data.len() < HEADER_SIZE {
            return Err(LinkError::ProtocolViolation(format!(
                "package header too short: {} < {HEADER_SIZE}",
                data.len()
            )));
        }
        Ok(Self {
            length: read_u64(data, 0),
            tag: read_u64(data, 8),
        })
    }
}

/// Little-endian u64 at `at`. Callers check the length first.
pub(crate) fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_length_then_tag() {
        let header = PackageHeader::new(PackageType::Frame, 115_200);
        let bytes = header.encode();
        assert_eq!(&bytes[0..8], &115_200u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &2u64.to_le_bytes());
        assert_eq!(PackageHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn tags_at_or_above_bound_are_invalid() {
        for tag in [PACKAGE_TYPE_BOUND, 5, 1_000, u64::MAX] {
            assert_eq!(PackageType::from_tag(tag), PackageType::Invalid);
        }
        for tag in 0..PACKAGE_TYPE_BOUND {
            assert_ne!(PackageType::from_tag(tag), PackageType::Invalid);
            assert_eq!(PackageType::from_tag(tag).tag(), tag);
        }
    }

    #[test]
    fn short_header_is_rejected() {
        assert!(PackageHeader::decode(&[0u8; 15]).is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(PackageType::StreamConfig.to_string(), "StreamConfig");
        assert_eq!(PackageType::Invalid.to_string(), "Invalid");
    }
}
