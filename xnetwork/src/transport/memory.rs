//! In-process transport built on crossbeam channels.

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::trace;

use super::Transport;
use crate::error::TransportError;

/// One end of an in-memory link.
///
/// Data transmitted on one end is received, datagram by datagram, on
/// the other. Dropping an end makes the peer's `receive` report
/// `Closed` once the queued datagrams are drained.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = channel::unbounded();
        let (b_tx, a_rx) = channel::unbounded();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }

    /// Returns the number of datagrams waiting to be received.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Takes one waiting datagram without blocking.
    pub fn try_take(&self) -> Option<Vec<u8>> {
        match self.rx.try_recv() {
            Ok(datagram) => Some(datagram),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for one datagram.
    pub fn take_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Transport for MemoryTransport {
    fn transmit(&self, frame: &[u8]) -> Result<(), TransportError> {
        trace!("memory link: transmit {} bytes", frame.len());
        self.tx
            .send(frame.to_vec())
            .map_err(|_| TransportError::Closed)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let datagram = self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => TransportError::Timeout,
            RecvTimeoutError::Disconnected => TransportError::Closed,
        })?;

        if datagram.len() > buf.len() {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "datagram larger than receive buffer",
            )));
        }
        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok(datagram.len())
    }
}
