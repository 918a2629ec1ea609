use std::io;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::LinkError;
use crate::protocol::header::{HEADER_SIZE, PackageHeader, PackageType};
use crate::protocol::package::Package;

/// Largest payload the codec accepts in either direction.
pub const MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Length-prefixed package codec.
///
/// The header is consumed as soon as it is complete; the codec then
/// remembers it until the whole payload has arrived, so a partially
/// received package survives any number of `decode` calls.
#[derive(Debug, Default)]
pub struct PackageCodec {
    pending: Option<PackageHeader>,
}

impl PackageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while a header has been read but its payload is incomplete.
    pub fn is_mid_package(&self) -> bool {
        self.pending.is_some()
    }
}

impl Decoder for PackageCodec {
    type Item = Package;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if src.len() < HEADER_SIZE {
                    return Ok(None);
                }
                let header = PackageHeader::decode(&src[..HEADER_SIZE])?;
                if header.length > MAX_PAYLOAD_SIZE {
                    return Err(LinkError::PayloadTooLarge {
                        size: header.length,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                src.advance(HEADER_SIZE);
                self.pending = Some(header);
                header
            }
        };

        let len = header.length as usize;
        if src.len() < len {
            // Grows only when the buffer is smaller than the package.
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.pending = None;
        let payload = src.split_to(len).freeze();
        let kind = header.kind();
        if kind == PackageType::Invalid {
            debug!("drained {len} bytes of package with unknown tag {}", header.tag);
        }
        Ok(Some(Package { kind, payload }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(package) = self.decode(buf)? {
            return Ok(Some(package));
        }
        if buf.is_empty() && self.pending.is_none() {
            return Ok(None);
        }

        let expected = self.pending.map(|h| h.length).unwrap_or(HEADER_SIZE as u64);
        Err(LinkError::Transport {
            op: "read package",
            source: io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "connection closed mid-package ({} of {expected} bytes received)",
                    buf.len()
                ),
            ),
        })
    }
}

impl Encoder<Package> for PackageCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Package, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len() as u64;
        if len > MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge {
                size: len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if item.kind == PackageType::Invalid {
            return Err(LinkError::ProtocolViolation(
                "refusing to send a package of unknown type".into(),
            ));
        }

        dst.reserve(HEADER_SIZE + item.payload.len());
        dst.put_slice(&PackageHeader::new(item.kind, len).encode());
        dst.put_slice(&item.payload);
        Ok(())
    }
}
