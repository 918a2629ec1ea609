use std::time::Duration;

use crate::capture::{BufferRing, CaptureDevice, FrameRef, StreamConfig};
use crate::error::{CaptureError, LinkError};
use crate::source::FrameSource;

/// Frames captured locally through a [`BufferRing`].
pub struct DeviceSource<D: CaptureDevice> {
    ring: BufferRing<D>,
    backoff: Duration,
    last: Option<FrameRef>,
}

impl<D: CaptureDevice> DeviceSource<D> {
    /// Open a ring of `slots` buffers on `device` at `config`.
    pub fn open(
        device: D,
        config: StreamConfig,
        slots: usize,
        backoff: Duration,
    ) -> Result<Self, CaptureError> {
        Ok(Self::from_ring(BufferRing::open(device, config, slots)?, backoff))
    }

    pub fn from_ring(ring: BufferRing<D>, backoff: Duration) -> Self {
        Self {
            ring,
            backoff,
            last: None,
        }
    }

    pub fn ring(&self) -> &BufferRing<D> {
        &self.ring
    }

    /// Handle of the latest acquired frame.
    pub fn last_frame(&self) -> Option<FrameRef> {
        self.last
    }

    /// Release the device. See [`BufferRing::close`].
    pub fn close(&mut self) -> Result<(), CaptureError> {
        self.last = None;
        self.ring.close()
    }
}

#[async_trait::async_trait]
impl<D: CaptureDevice> FrameSource for DeviceSource<D> {
    async fn next_frame(&mut self) -> Result<usize, LinkError> {
        let frame = self.ring.acquire_next(self.backoff).await?;
        self.last = Some(frame);
        Ok(frame.len)
    }

    fn current_frame(&self) -> &[u8] {
        self.ring.current().unwrap_or_default()
    }

    fn config(&self) -> &StreamConfig {
        self.ring.config()
    }
}
