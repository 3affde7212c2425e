//! Ephemeral UDP sockets for query round-trips.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::protocol::{ProtocolError, MAX_DATAGRAM_SIZE};

/// Receive buffer requested for sockets that collect many datagrams.
pub const LARGE_RECV_BUFFER: usize = 1 << 20;

/// Bind an unconnected socket on an ephemeral port of the family matching
/// `target`, optionally enlarging the kernel receive buffer.
pub fn bind_ephemeral(target: SocketAddr, recv_buffer: Option<usize>) -> io::Result<UdpSocket> {
    let (domain, local): (Domain, SocketAddr) = match target {
        SocketAddr::V4(_) => (Domain::IPV4, (Ipv4Addr::UNSPECIFIED, 0).into()),
        SocketAddr::V6(_) => (Domain::IPV6, (Ipv6Addr::UNSPECIFIED, 0).into()),
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if let Some(size) = recv_buffer {
        // Best effort, the kernel may clamp it
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::debug!(error = %e, size, "Could not enlarge UDP receive buffer");
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;
    UdpSocket::from_std(socket.into())
}

/// Send one datagram and wait for one reply from the same peer.
///
/// The socket is dropped when this returns, whatever the outcome.
pub async fn round_trip(target: SocketAddr, request: &[u8], timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
    let socket = bind_ephemeral(target, None)?;
    socket.connect(target).await?;
    socket.send(request).await?;

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE.max(4096)];
    match tokio::time::timeout(timeout, socket.recv(&mut buf)).await {
        Ok(Ok(len)) => {
            buf.truncate(len);
            Ok(buf)
        }
        Ok(Err(e)) => Err(ProtocolError::Network(e)),
        Err(_) => Err(ProtocolError::Timeout),
    }
}
