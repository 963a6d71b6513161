// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP channel endpoints.
//!
//! One send endpoint and one receive endpoint per distinct channel (keyed by
//! canonical form). Endpoints own the only sockets in the system; every
//! socket is non-blocking and polled from its agent's tick.

pub mod dispatcher;
pub mod recv_endpoint;
pub mod send_endpoint;

pub use dispatcher::DataPacketDispatcher;
pub use recv_endpoint::ReceiveChannelEndpoint;
pub use send_endpoint::SendChannelEndpoint;

use std::net::{IpAddr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};

/// Largest datagram we ever receive (64 KiB UDP bound).
pub const RECEIVE_BUFFER_LENGTH: usize = 64 * 1024;

/// Create a bound, non-blocking UDP socket with the driver's buffer sizes.
pub(crate) fn new_datagram_socket(
    bind_addr: SocketAddr,
    sndbuf_length: usize,
    rcvbuf_length: usize,
    reuse_address: bool,
) -> Result<UdpSocket> {
    let domain = match bind_addr.ip() {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_send_buffer_size(sndbuf_length)?;
    socket.set_recv_buffer_size(rcvbuf_length)?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }

    socket.bind(&bind_addr.into()).map_err(|e| {
        Error::Generic(format!("failed to bind {}: {}", bind_addr, e))
    })?;

    Ok(socket.into())
}

/// Non-blocking send: 0 on `WouldBlock` so the caller retries next tick.
pub(crate) fn send_datagram(socket: &UdpSocket, buf: &[u8], addr: SocketAddr) -> Result<usize> {
    match socket.send_to(buf, addr) {
        Ok(sent) => Ok(sent),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_is_nonblocking() {
        let socket =
            new_datagram_socket("127.0.0.1:0".parse().unwrap(), 64 * 1024, 64 * 1024, false)
                .unwrap();

        let mut buf = [0u8; 16];
        let err = socket.recv_from(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_send_between_sockets() {
        let a = new_datagram_socket("127.0.0.1:0".parse().unwrap(), 64 * 1024, 64 * 1024, false)
            .unwrap();
        let b = new_datagram_socket("127.0.0.1:0".parse().unwrap(), 64 * 1024, 64 * 1024, false)
            .unwrap();

        let sent = send_datagram(&a, b"ping", b.local_addr().unwrap()).unwrap();
        assert_eq!(sent, 4);

        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 16];
        let (n, src) = b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(src, a.local_addr().unwrap());
    }
}
