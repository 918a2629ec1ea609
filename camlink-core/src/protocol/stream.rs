//! Package I/O over an ordered byte stream.

use bytes::BytesMut;
use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, trace};

use crate::capture::StreamConfig;
use crate::error::LinkError;
use crate::protocol::codec::{MAX_PAYLOAD_SIZE, PackageCodec};
use crate::protocol::header::{PackageHeader, PackageType};
use crate::protocol::package::Package;

/// How [`PackageStream::read_package`] waits for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Wait until a whole package (or end of stream) is available.
    Blocking,
    /// Poll once. `None` means nothing complete is available yet.
    NonBlocking,
}

/// A connection speaking the package protocol.
///
/// Reads go through a [`FramedRead`] so a package that arrives in pieces is
/// kept in the codec buffer between non-blocking polls. Writes go straight
/// to the write half.
pub struct PackageStream<S> {
    reader: FramedRead<ReadHalf<S>, PackageCodec>,
    writer: WriteHalf<S>,
    encoder: PackageCodec,
    scratch: BytesMut,
}

impl<S: AsyncRead + AsyncWrite> PackageStream<S> {
    pub fn new(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: FramedRead::new(read, PackageCodec::new()),
            writer: write,
            encoder: PackageCodec::new(),
            scratch: BytesMut::new(),
        }
    }

    /// Read the next package.
    ///
    /// End of stream at a package boundary yields a `Closed` package rather
    /// than an error. End of stream inside a package, or any I/O failure,
    /// is a [`LinkError::Transport`].
    pub async fn read_package(&mut self, mode: ReadMode) -> Result<Option<Package>, LinkError> {
        let next = match mode {
            ReadMode::Blocking => self.reader.next().await,
            ReadMode::NonBlocking => match self.reader.next().now_or_never() {
                Some(next) => next,
                None => return Ok(None),
            },
        };

        match next {
            Some(Ok(package)) => {
                trace!("recv {} ({} bytes)", package.kind, package.len());
                Ok(Some(package))
            }
            Some(Err(e)) => Err(e),
            None => {
                debug!("end of stream");
                Ok(Some(Package::closed()))
            }
        }
    }

    /// Encode and send one package, then flush.
    pub async fn write_package(&mut self, package: &Package) -> Result<(), LinkError> {
        self.scratch.clear();
        self.encoder.encode(package.clone(), &mut self.scratch)?;
        self.writer
            .write_all(&self.scratch)
            .await
            .map_err(|source| LinkError::Transport {
                op: "send package",
                source,
            })?;
        self.flush().await?;
        trace!("sent {} ({} bytes)", package.kind, package.len());
        Ok(())
    }

    /// Send `pixels` as a `Frame` package without copying them.
    pub async fn send_frame(&mut self, pixels: &[u8]) -> Result<(), LinkError> {
        let len = pixels.len() as u64;
        if len > MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header = PackageHeader::new(PackageType::Frame, len).encode();
        self.writer
            .write_all(&header)
            .await
            .map_err(|source| LinkError::Transport {
                op: "send frame header",
                source,
            })?;
        self.writer
            .write_all(pixels)
            .await
            .map_err(|source| LinkError::Transport {
                op: "send frame",
                source,
            })?;
        self.flush().await
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), LinkError> {
        self.write_package(&Package::text(text)).await
    }

    pub async fn send_config(&mut self, config: &StreamConfig) -> Result<(), LinkError> {
        self.write_package(&Package::config(config)).await
    }

    /// Shut the write half down. The read half stays usable.
    pub async fn shutdown(&mut self) -> Result<(), LinkError> {
        self.writer
            .shutdown()
            .await
            .map_err(|source| LinkError::Transport {
                op: "shutdown",
                source,
            })
    }

    async fn flush(&mut self) -> Result<(), LinkError> {
        self.writer
            .flush()
            .await
            .map_err(|source| LinkError::Transport { op: "flush", source })
    }
}
