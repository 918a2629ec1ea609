//! Typed dispatch of received packages.
//!
//! Each role implements [`PackageHandler`] for the packages it cares about
//! and inherits the protocol-wide defaults for the rest.

use bytes::Bytes;
use tracing::{info, warn};

use crate::capture::StreamConfig;
use crate::error::LinkError;
use crate::protocol::header::PackageType;
use crate::protocol::package::Package;

pub trait PackageHandler {
    fn on_config(&mut self, config: StreamConfig) -> Result<(), LinkError>;

    fn on_frame(&mut self, pixels: Bytes) -> Result<(), LinkError>;

    /// Text is advisory; the default only logs it.
    fn on_text(&mut self, text: &str) -> Result<(), LinkError> {
        info!("peer says: {text}");
        Ok(())
    }

    fn on_closed(&mut self) -> Result<(), LinkError> {
        Err(LinkError::PeerClosed)
    }

    /// The payload has already been drained; only its size is left.
    fn on_invalid(&mut self, payload_len: usize) -> Result<(), LinkError> {
        warn!("package of unknown type ({payload_len} bytes)");
        Err(LinkError::ProtocolViolation(
            "received a package of unknown type".into(),
        ))
    }
}

/// Route `package` to the matching handler method.
///
/// Returns the type that was handled so callers can drive their own state
/// machine off it.
pub fn dispatch<H: PackageHandler + ?Sized>(
    handler: &mut H,
    package: Package,
) -> Result<PackageType, LinkError> {
    let kind = package.kind;
    match kind {
        PackageType::StreamConfig => handler.on_config(StreamConfig::decode(&package.payload)?)?,
        PackageType::Frame => handler.on_frame(package.payload)?,
        PackageType::Text => handler.on_text(&package.text_lossy())?,
        PackageType::Closed => handler.on_closed()?,
        PackageType::Invalid => handler.on_invalid(package.len())?,
    }
    Ok(kind)
}
