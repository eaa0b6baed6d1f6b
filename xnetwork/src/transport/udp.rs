//! UDP transport.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use log::debug;

use super::Transport;
use crate::error::TransportError;

/// Transport over a connected UDP socket.
///
/// Every `transmit` is one datagram.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Binds `local` and connects the socket to `remote`.
    pub fn connect(local: impl ToSocketAddrs, remote: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        debug!(
            "udp transport {} -> {}",
            socket.local_addr()?,
            socket.peer_addr()?
        );
        Ok(Self { socket })
    }

    /// Wraps an already connected socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    /// Returns the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Returns the connected peer address.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.socket.peer_addr()
    }
}

impl Transport for UdpTransport {
    fn transmit(&self, frame: &[u8]) -> Result<(), TransportError> {
        let sent = self.socket.send(frame)?;
        if sent != frame.len() {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "short datagram write",
            )));
        }
        Ok(())
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        // a zero read timeout is rejected by the OS
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket.set_read_timeout(Some(timeout))?;

        match self.socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(TransportError::Timeout)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}
