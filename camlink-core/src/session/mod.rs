//! Streaming sessions: the producer that owns a capture device and the
//! consumer that asks it for frames.

pub mod client;
pub mod phase;
pub mod server;
pub mod socket;

pub use client::{connect, handshake};
pub use phase::SessionPhase;
pub use server::{
    CONFIG_REQUEST, CONFIGURED, DEFAULT_PORT, DeviceFactory, GREETING, ServerSession,
    SessionReport, SessionSettings, StreamServer,
};
pub use socket::SOCKET_BUFFER_SIZE;
