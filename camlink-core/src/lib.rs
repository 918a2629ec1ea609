//! # camlink-core
//!
//! Zero-copy camera capture and a small framed protocol for shipping the
//! frames to another process or machine.
//!
//! This crate contains:
//! - **Capture**: the `CaptureDevice` seam, `BufferRing` cycling mapped
//!   device buffers, a synthetic test-pattern device and (feature `v4l2`)
//!   a Video4Linux2 device
//! - **Protocol**: `PackageHeader`, `Package`, `PackageCodec` for
//!   `tokio_util` framing, `PackageStream` and typed dispatch
//! - **Source**: `FrameSource` over a local ring or a remote producer
//! - **Session**: producer (`ServerSession`, `StreamServer`) and consumer
//!   (`connect`, `handshake`) roles with a shared `SessionPhase`
//! - **Render**: the `Renderer` seam and the `present_frames` playback loop
//! - **Error**: `CaptureError` and `LinkError`, `thiserror`-based

pub mod capture;
pub mod error;
pub mod protocol;
pub mod render;
pub mod session;
pub mod source;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    BufferRing, CaptureDevice, FrameRef, PixelFormat, SlotState, StreamConfig, SyntheticDevice,
    open_v4l2,
};
pub use error::{CaptureError, LinkError};
pub use protocol::{
    HEADER_SIZE, MAX_PAYLOAD_SIZE, Package, PackageCodec, PackageHeader, PackageStream,
    PackageType, ReadMode,
};
pub use render::{PlaybackStats, Renderer, present_frames};
pub use session::{
    DEFAULT_PORT, DeviceFactory, ServerSession, SessionPhase, SessionSettings, StreamServer,
    connect, handshake,
};
pub use source::{DeviceSource, FrameSource, RemoteSource};
