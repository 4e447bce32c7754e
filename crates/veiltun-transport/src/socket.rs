// ============================================
// File: crates/veiltun-transport/src/socket.rs
// ============================================
//! Socket construction shared by the UDP transport and the stream listener.
//!
//! Sockets are built with `socket2` so options can be applied before bind,
//! then handed to Tokio.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Result, TransportError};

/// Options applied before binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    /// `SO_RCVBUF` in bytes; OS default when `None`.
    pub recv_buffer_size: Option<usize>,
    /// `SO_SNDBUF` in bytes; OS default when `None`.
    pub send_buffer_size: Option<usize>,
}

/// Parses a textual socket address.
///
/// # Errors
/// Returns `InvalidAddress` if `addr` is not `ip:port`.
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    addr.parse().map_err(|_| TransportError::InvalidAddress {
        addr: addr.to_string(),
    })
}

/// Creates a non-blocking, address-reusing socket bound to `addr`.
pub(crate) fn bind_socket(
    addr: SocketAddr,
    ty: Type,
    protocol: Protocol,
    options: SocketOptions,
) -> Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, ty, Some(protocol))
        .map_err(|e| TransportError::io("creating socket", e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| TransportError::io("setting SO_REUSEADDR", e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::io("setting non-blocking", e))?;

    if let Some(size) = options.recv_buffer_size {
        socket
            .set_recv_buffer_size(size)
            .map_err(|e| TransportError::io("setting SO_RCVBUF", e))?;
    }
    if let Some(size) = options.send_buffer_size {
        socket
            .set_send_buffer_size(size)
            .map_err(|e| TransportError::io("setting SO_SNDBUF", e))?;
    }

    socket.bind(&addr.into()).map_err(|e| {
        if e.kind() == io::ErrorKind::AddrInUse {
            TransportError::AddressInUse { addr }
        } else {
            TransportError::bind_failed(addr, e.to_string())
        }
    })?;

    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addr() {
        assert!(parse_addr("127.0.0.1:7000").is_ok());
        assert!(parse_addr("[::1]:7000").is_ok());
        assert!(matches!(
            parse_addr("localhost"),
            Err(TransportError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_second_bind_same_port_conflicts() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();
        // A listening TCP socket blocks another bind+listen even with SO_REUSEADDR.
        let second = bind_socket(addr, Type::STREAM, Protocol::TCP, SocketOptions::default())
            .and_then(|s| s.listen(16).map_err(|e| TransportError::io("listen", e)));
        assert!(second.is_err());
    }
}
