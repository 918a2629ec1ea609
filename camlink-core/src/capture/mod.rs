//! Frame capture: the device seam, its implementations and the buffer ring.

pub mod device;
pub mod ring;
pub mod synthetic;
pub mod types;
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2;

pub use device::{CaptureDevice, DequeuedBuffer};
pub use ring::{BufferRing, DEFAULT_BACKOFF, DEFAULT_SLOTS};
pub use synthetic::{SyntheticDevice, read_sequence_stamp};
pub use types::{FrameRef, PixelFormat, SlotState, StreamConfig};
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub use v4l2::V4l2Device;

use std::path::Path;

/// Open the V4L2 node at `path` as a boxed capture device.
#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub fn open_v4l2(path: impl AsRef<Path>) -> Result<Box<dyn CaptureDevice>, crate::CaptureError> {
    Ok(Box::new(V4l2Device::open(path)?))
}

/// V4L2 support was not compiled in.
#[cfg(not(all(target_os = "linux", feature = "v4l2")))]
pub fn open_v4l2(path: impl AsRef<Path>) -> Result<Box<dyn CaptureDevice>, crate::CaptureError> {
    Err(crate::CaptureError::Unsupported(format!(
        "cannot open {}: built without V4L2 support (enable the `v4l2` feature on Linux)",
        path.as_ref().display()
    )))
}
