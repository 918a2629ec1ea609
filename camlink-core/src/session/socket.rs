//! TCP sockets with bounded kernel buffers.
//!
//! Frames that sit in socket buffers are stale by the time they are read.
//! Both ends cap their buffers so a slow consumer stalls the producer's
//! writes after a few frames; the producer then takes whatever the device
//! captured most recently instead of working through a backlog.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket, TcpStream, ToSocketAddrs, lookup_host};
use tracing::debug;

/// Kernel buffer requested on each end of a streaming connection.
pub const SOCKET_BUFFER_SIZE: u32 = 64 * 1024;

const LISTEN_BACKLOG: u32 = 16;

fn socket_for(addr: &SocketAddr) -> io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

fn nothing_resolved() -> io::Error {
    io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
}

/// Bind a listener whose accepted connections inherit a bounded send buffer.
pub(crate) async fn listen(addr: impl ToSocketAddrs) -> io::Result<TcpListener> {
    let mut last_error = None;
    for addr in lookup_host(addr).await? {
        let socket = socket_for(&addr)?;
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;
        socket.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
        match socket.bind(addr) {
            Ok(()) => {
                debug!("send buffer on {addr}: {} bytes", socket.send_buffer_size()?);
                return socket.listen(LISTEN_BACKLOG);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(nothing_resolved))
}

/// Connect with a bounded receive buffer, trying each resolved address.
pub(crate) async fn dial(addr: impl ToSocketAddrs) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in lookup_host(addr).await? {
        let socket = socket_for(&addr)?;
        socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(nothing_resolved))
}
