//! Outgoing frame staging area.
//!
//! The send loop serialises the frames of one tick here before handing
//! them to the transport. The area has a fixed byte capacity; a frame
//! that does not fit is left in its IO buffer for a later tick.

use crate::core::Frame;
use crate::transport::Transport;
use crate::error::TransportError;

/// Byte-bounded staging area owned by the send loop.
#[derive(Debug)]
pub struct SendStaging {
    /// Serialised frames back to back.
    buffer: Vec<u8>,

    /// End offset of every staged frame.
    boundaries: Vec<usize>,

    /// Maximum number of staged bytes.
    capacity: usize,
}

impl SendStaging {
    /// Creates an empty staging area of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            boundaries: Vec::new(),
            capacity,
        }
    }

    /// Returns the staging capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of bytes still free.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// Returns the number of staged frames.
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.boundaries.len()
    }

    /// Returns true if nothing is staged.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Serialises `frame` if it fits. Returns false otherwise.
    pub fn try_stage(&mut self, frame: &Frame<'_>) -> bool {
        if frame.encoded_len() > self.free_space() {
            return false;
        }
        frame.encode_into(&mut self.buffer);
        self.boundaries.push(self.buffer.len());
        true
    }

    /// Iterates over the staged frames.
    pub fn frames(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let mut start = 0;
        self.boundaries.iter().map(move |&end| {
            let frame = &self.buffer[start..end];
            start = end;
            frame
        })
    }

    /// Transmits every staged frame, one transport call per frame, and
    /// empties the area.
    ///
    /// Returns the number of frames accepted by the transport and the
    /// failures encountered; a failing frame does not stop the others.
    pub fn transmit<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> (usize, Vec<TransportError>) {
        let mut sent = 0;
        let mut failures = Vec::new();
        for frame in self.frames() {
            match transport.transmit(frame) {
                Ok(()) => sent += 1,
                Err(e) => failures.push(e),
            }
        }
        self.clear();
        (sent, failures)
    }

    /// Discards every staged frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.boundaries.clear();
    }
}
