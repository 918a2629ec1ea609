//! The capture device seam.
//!
//! A [`CaptureDevice`] is the narrow driver interface the
//! [`BufferRing`](super::BufferRing) is built on. It mirrors the V4L2
//! streaming-I/O model: request buffers, map them, queue them, dequeue
//! filled ones. Implementations never decide slot order; the ring does.

use crate::capture::types::StreamConfig;
use crate::error::CaptureError;

/// A buffer handed back by the device after it was filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Index of the slot the device wrote.
    pub index: usize,
    /// Bytes the device reports as valid for this fill.
    pub bytes_used: usize,
    /// Device frame counter.
    pub sequence: u64,
}

/// Driver-level operations needed to run a ring of mapped buffers.
///
/// All methods except [`dequeue`](Self::dequeue) may block briefly on a
/// control call; `dequeue` must return `Ok(None)` instead of waiting when
/// no filled buffer is available yet.
pub trait CaptureDevice: Send + Sync {
    /// Ask for `requested` and return the geometry the device actually set.
    fn set_format(&mut self, requested: StreamConfig) -> Result<StreamConfig, CaptureError>;

    /// Allocate `count` driver buffers and return how many were granted.
    fn request_buffers(&mut self, count: usize) -> Result<usize, CaptureError>;

    /// Map buffer `index` into process memory and return its byte length.
    fn map_buffer(&mut self, index: usize) -> Result<usize, CaptureError>;

    /// Read-only view of mapped buffer `index`.
    fn buffer(&self, index: usize) -> &[u8];

    /// Hand buffer `index` to the device for filling.
    fn queue(&mut self, index: usize) -> Result<(), CaptureError>;

    /// Take the next filled buffer, or `None` when the device is busy.
    fn dequeue(&mut self) -> Result<Option<DequeuedBuffer>, CaptureError>;

    /// Activate streaming.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Deactivate streaming. Queued buffers return to the application.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Unmap buffer `index`.
    fn unmap_buffer(&mut self, index: usize) -> Result<(), CaptureError>;

    /// Free driver buffers and release the device handle.
    fn release(&mut self) -> Result<(), CaptureError>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str;
}

impl<D: CaptureDevice + ?Sized> CaptureDevice for Box<D> {
    fn set_format(&mut self, requested: StreamConfig) -> Result<StreamConfig, CaptureError> {
        (**self).set_format(requested)
    }

    fn request_buffers(&mut self, count: usize) -> Result<usize, CaptureError> {
        (**self).request_buffers(count)
    }

    fn map_buffer(&mut self, index: usize) -> Result<usize, CaptureError> {
        (**self).map_buffer(index)
    }

    fn buffer(&self, index: usize) -> &[u8] {
        (**self).buffer(index)
    }

    fn queue(&mut self, index: usize) -> Result<(), CaptureError> {
        (**self).queue(index)
    }

    fn dequeue(&mut self) -> Result<Option<DequeuedBuffer>, CaptureError> {
        (**self).dequeue()
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        (**self).stop()
    }

    fn unmap_buffer(&mut self, index: usize) -> Result<(), CaptureError> {
        (**self).unmap_buffer(index)
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        (**self).release()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
