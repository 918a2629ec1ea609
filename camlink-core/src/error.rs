//! Domain-specific error types for capture and streaming.
//!
//! Device failures are [`CaptureError`]s; everything that can end a
//! streaming session is a [`LinkError`]. Transient device busy is not an
//! error at all: it is retried inside [`BufferRing::acquire_next`].
//!
//! [`BufferRing::acquire_next`]: crate::capture::BufferRing::acquire_next

use std::io;

use thiserror::Error;

use crate::capture::StreamConfig;

// ── CaptureError ─────────────────────────────────────────────────

/// Errors raised by a capture device or the buffer ring around it.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device accepted a different geometry than the one requested.
    #[error("device rejected {requested}: it offers {actual} instead")]
    DeviceConfig {
        requested: StreamConfig,
        actual: StreamConfig,
    },

    /// A control or buffer operation on the device failed.
    #[error("{op} failed: {source}")]
    DeviceIo {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A slot index outside the ring was used.
    #[error("slot {index} out of range (ring holds {count} slots)")]
    InvalidSlot { index: usize, count: usize },

    /// The requested device or capability is not available in this build.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// One or more release steps failed while tearing the device down.
    #[error("teardown failed: {}", join_errors(.0))]
    Teardown(Vec<CaptureError>),
}

impl CaptureError {
    /// Shorthand for a [`CaptureError::DeviceIo`] with a custom message.
    pub fn io(op: &'static str, message: impl Into<String>) -> Self {
        CaptureError::DeviceIo {
            op,
            source: io::Error::other(message.into()),
        }
    }
}

fn join_errors(errors: &[CaptureError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── LinkError ────────────────────────────────────────────────────

/// The canonical error type of a streaming session.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The capture side of the session failed.
    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Sending or receiving on the connection failed. The connection is dead.
    #[error("{op} failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The peer sent something the protocol does not allow here.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    PeerClosed,

    /// A package declared a payload beyond the codec limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl LinkError {
    /// `true` when the session ended because the peer went away cleanly.
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, LinkError::PeerClosed)
    }
}

// Required by `tokio_util::codec::Decoder`.
impl From<io::Error> for LinkError {
    fn from(source: io::Error) -> Self {
        LinkError::Transport {
            op: "read package",
            source,
        }
    }
}

impl From<String> for LinkError {
    fn from(s: String) -> Self {
        LinkError::Other(s)
    }
}

impl From<&str> for LinkError {
    fn from(s: &str) -> Self {
        LinkError::Other(s.to_string())
    }
}
