//! Transport layer abstraction.
//!
//! The manager never touches sockets itself. It consumes a `Transport`
//! that moves whole frames (or datagrams packing several frames) over
//! the underlying link, so the same engine runs over UDP, a radio
//! driver, or an in-process channel.
//!
//! # Implementations
//!
//! - `MemoryTransport`: connected in-process pair, for tests and demos
//! - `UdpTransport`: connected `std::net::UdpSocket`
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use xnetwork::transport::{MemoryTransport, Transport};
//!
//! let (a, b) = MemoryTransport::pair();
//! a.transmit(b"Hello").unwrap();
//!
//! let mut buf = [0u8; 32];
//! let n = b.receive(&mut buf, Duration::from_millis(10)).unwrap();
//! assert_eq!(&buf[..n], b"Hello");
//! ```

use std::time::Duration;

use crate::error::TransportError;

mod memory;
mod udp;

pub use memory::MemoryTransport;
pub use udp::UdpTransport;

/// Transport trait for moving serialized frames.
///
/// Both scheduler loops use the transport concurrently: the send loop
/// only calls `transmit`, the receive loop only calls `receive`.
pub trait Transport: Send + Sync {
    /// Sends one serialized frame.
    ///
    /// Must not block for longer than the underlying link needs to
    /// accept the bytes.
    fn transmit(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receives one datagram into `buf`, waiting at most `timeout`.
    ///
    /// Returns the number of bytes written, `TransportError::Timeout`
    /// when nothing arrived, or `TransportError::Closed` once the link
    /// is gone for good.
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn transmit(&self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).transmit(frame)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        (**self).receive(buf, timeout)
    }
}
