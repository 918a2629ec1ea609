use std::time::Instant;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::capture::StreamConfig;
use crate::error::LinkError;
use crate::protocol::{PackageHandler, PackageStream, PackageType, ReadMode, dispatch};
use crate::session::SessionPhase;
use crate::source::FrameSource;

/// Farewell sent to the producer when the consumer leaves.
pub const FAREWELL: &str = "Client is closing down";

/// Received-frame state, separate from the stream so dispatch can borrow it.
struct Inbox {
    expected_len: usize,
    frame: Bytes,
}

impl PackageHandler for Inbox {
    fn on_config(&mut self, config: StreamConfig) -> Result<(), LinkError> {
        warn!("throwing away stream config {config} sent by the producer");
        Ok(())
    }

    fn on_frame(&mut self, pixels: Bytes) -> Result<(), LinkError> {
        if pixels.len() != self.expected_len {
            warn!(
                "frame size changed: expected {} bytes, got {}",
                self.expected_len,
                pixels.len()
            );
            self.expected_len = pixels.len();
        }
        self.frame = pixels;
        Ok(())
    }
}

/// Frames received from a producer over the package protocol.
///
/// Reads block until a package arrives. Only `Frame` packages advance the
/// exposed frame; `Text` is logged, a stray `StreamConfig` is dropped and
/// `Closed` or an unknown type ends the stream.
pub struct RemoteSource<S> {
    stream: PackageStream<S>,
    config: StreamConfig,
    inbox: Inbox,
    phase: SessionPhase,
    frames: u64,
}

impl<S: AsyncRead + AsyncWrite + Send> RemoteSource<S> {
    /// Wrap a stream whose configuration has already been sent.
    pub fn new(stream: PackageStream<S>, config: StreamConfig) -> Self {
        Self {
            stream,
            config,
            inbox: Inbox {
                expected_len: config.frame_len(),
                frame: Bytes::new(),
            },
            phase: SessionPhase::Streaming {
                config,
                since: Instant::now(),
            },
            frames: 0,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// Size the next frame is expected to have. Follows the producer when
    /// it changes frame size mid-session.
    pub fn expected_frame_len(&self) -> usize {
        self.inbox.expected_len
    }

    /// Frames received so far.
    pub fn frames_received(&self) -> u64 {
        self.frames
    }

    /// Shared handle to the current frame.
    pub fn frame_bytes(&self) -> Bytes {
        self.inbox.frame.clone()
    }

    /// Say goodbye and shut the sending side down.
    ///
    /// Errors are returned but the source is closed either way.
    pub async fn close(&mut self) -> Result<(), LinkError> {
        if self.phase.is_closed() {
            return Ok(());
        }
        self.phase.close();
        self.stream.send_text(FAREWELL).await?;
        self.stream.shutdown().await?;
        debug!("consumer closed after {} frames", self.frames);
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: AsyncRead + AsyncWrite + Send> FrameSource for RemoteSource<S> {
    async fn next_frame(&mut self) -> Result<usize, LinkError> {
        if self.phase.is_closed() {
            return Err(LinkError::PeerClosed);
        }
        loop {
            let handled = match self.stream.read_package(ReadMode::Blocking).await {
                Ok(Some(package)) => dispatch(&mut self.inbox, package),
                Ok(None) => continue,
                Err(e) => Err(e),
            };
            match handled {
                Ok(PackageType::Frame) => {
                    self.frames += 1;
                    return Ok(self.inbox.frame.len());
                }
                Ok(_) => continue,
                Err(e) => {
                    self.phase.close();
                    return Err(e);
                }
            }
        }
    }

    fn current_frame(&self) -> &[u8] {
        &self.inbox.frame
    }

    fn config(&self) -> &StreamConfig {
        &self.config
    }
}
