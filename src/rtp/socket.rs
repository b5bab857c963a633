//! UDP socket for RTP.
//!
//! Wraps the socket the SIP layer negotiates for the call's media stream.
//! Each RtpSocket instance is independent; one call's socket never touches
//! another's.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::BridgeError;

/// Bidirectional UDP socket for one call's RTP.
pub struct RtpSocket {
    /// The underlying UDP socket
    socket: UdpSocket,
    /// Local address this socket is bound to
    local_addr: SocketAddr,
}

impl RtpSocket {
    /// Bind to a local address for the call's media.
    ///
    /// Applies the tuning an audio stream needs: address reuse for quick
    /// call restarts, 1 MB socket buffers, and a 10 ms read timeout so the
    /// receive loop can poll its running flag.
    pub fn bind(local_addr: SocketAddr) -> Result<Self, BridgeError> {
        let domain = match local_addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        socket.set_reuse_address(true)?;
        socket.bind(&local_addr.into())?;
        socket.set_read_timeout(Some(Duration::from_millis(10)))?;

        // Best effort; some platforms refuse large buffers.
        let _ = socket.set_recv_buffer_size(1024 * 1024);
        let _ = socket.set_send_buffer_size(1024 * 1024);

        let socket: UdpSocket = socket.into();
        let actual_local = socket.local_addr()?;

        Ok(RtpSocket {
            socket,
            local_addr: actual_local,
        })
    }

    /// Send data to a specific address.
    pub fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    /// Receive data from any source.
    ///
    /// Returns the number of bytes received, or WouldBlock/TimedOut if no
    /// data arrived within the read timeout.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.recv_from(buf) {
            Ok((len, _addr)) => Ok(len),
            Err(e) => Err(e),
        }
    }

    /// Receive data with source address filtering.
    ///
    /// Only accepts packets from the given remote; datagrams from other
    /// sources (stray RTCP, scanners) are discarded.
    pub fn recv_from_remote(&self, buf: &mut [u8], remote: SocketAddr) -> io::Result<usize> {
        loop {
            match self.socket.recv_from(buf) {
                Ok((len, addr)) => {
                    if addr.ip() == remote.ip() {
                        return Ok(len);
                    }
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(e),
                Err(e) if e.kind() == ErrorKind::TimedOut => return Err(e),
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the local address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Clone the socket for use on another thread.
    ///
    /// The clone shares the underlying OS socket, so the receive thread and
    /// the playout sender can work the same port.
    pub fn try_clone(&self) -> Result<Self, BridgeError> {
        Ok(RtpSocket {
            socket: self.socket.try_clone()?,
            local_addr: self.local_addr,
        })
    }
}

impl std::fmt::Debug for RtpSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpSocket")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
