//! Consumer role: ask a producer for a stream and receive its frames.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use crate::capture::StreamConfig;
use crate::error::LinkError;
use crate::protocol::PackageStream;
use crate::session::socket;
use crate::source::RemoteSource;

/// Connect to a producer over TCP and request `config`.
///
/// The socket's receive buffer is capped at [`socket::SOCKET_BUFFER_SIZE`].
pub async fn connect(
    addr: impl ToSocketAddrs,
    config: StreamConfig,
) -> Result<RemoteSource<TcpStream>, LinkError> {
    let stream = socket::dial(addr)
        .await
        .map_err(|source| LinkError::Transport {
            op: "connect",
            source,
        })?;
    stream
        .set_nodelay(true)
        .map_err(|source| LinkError::Transport {
            op: "set TCP_NODELAY",
            source,
        })?;
    if let Ok(peer) = stream.peer_addr() {
        info!("connected to {peer}");
    }
    handshake(stream, config).await
}

/// Request `config` over an established byte stream.
///
/// Exactly one `StreamConfig` package is sent. The producer's greeting and
/// confirmation texts are consumed later by the returned source.
pub async fn handshake<S: AsyncRead + AsyncWrite + Send>(
    stream: S,
    config: StreamConfig,
) -> Result<RemoteSource<S>, LinkError> {
    let mut stream = PackageStream::new(stream);
    stream.send_config(&config).await?;
    debug!("requested {config}");
    Ok(RemoteSource::new(stream, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PackageType, ReadMode};
    use crate::source::FrameSource;

    #[tokio::test]
    async fn handshake_sends_exactly_one_config() {
        let (a, b) = tokio::io::duplex(4096);
        let cfg = StreamConfig::default();
        let mut source = handshake(a, cfg).await.unwrap();
        assert!(source.phase().is_streaming());
        assert_eq!(source.config(), &cfg);

        let mut peer = PackageStream::new(b);
        let pkg = peer.read_package(ReadMode::Blocking).await.unwrap().unwrap();
        assert_eq!(pkg.kind, PackageType::StreamConfig);
        assert_eq!(StreamConfig::decode(&pkg.payload).unwrap(), cfg);

        source.close().await.unwrap();
        let farewell = peer.read_package(ReadMode::Blocking).await.unwrap().unwrap();
        assert_eq!(farewell.kind, PackageType::Text);
    }

    #[tokio::test]
    async fn connect_to_nothing_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(addr, StreamConfig::default()).await.err().unwrap();
        assert!(matches!(err, LinkError::Transport { op: "connect", .. }));
    }
}
