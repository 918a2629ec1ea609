//! Where frames come from.
//!
//! A consumer does not care whether frames are captured locally or received
//! over the network: both paths sit behind [`FrameSource`].

pub mod device;
pub mod remote;

pub use device::DeviceSource;
pub use remote::RemoteSource;

use crate::capture::StreamConfig;
use crate::error::LinkError;

/// A producer of consecutive frames with a fixed configuration.
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Advance to the next frame and return its length in bytes.
    ///
    /// Errors end the stream; the source is not usable afterwards.
    async fn next_frame(&mut self) -> Result<usize, LinkError>;

    /// Bytes of the frame produced by the latest successful `next_frame`.
    /// Empty before the first one.
    fn current_frame(&self) -> &[u8];

    /// Geometry every frame follows.
    fn config(&self) -> &StreamConfig;
}
