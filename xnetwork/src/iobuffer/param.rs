//! Static description of an IO buffer.

use crate::error::{Error, Result};
use crate::{
    DEFAULT_ACK_TIMEOUT_MS, DEFAULT_ELEMENT_MAX_SIZE, DEFAULT_MAX_RETRY, DEFAULT_RING_CAPACITY,
    ID_MAX,
};

/// Which way an IO buffer moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Application to network: filled by `send`, drained by the send loop.
    Input,

    /// Network to application: filled by the receive loop, drained by `read`.
    Output,
}

/// Parameters of one IO buffer.
///
/// # Example
///
/// ```rust
/// use xnetwork::IoBufferParam;
///
/// let commands = IoBufferParam::input(10)
///     .with_ack(150, 3)
///     .with_capacity(20)
///     .with_element_max_size(128);
/// assert!(commands.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoBufferParam {
    /// Stream id, unique per direction, below 128.
    pub id: u8,

    /// Data direction.
    pub direction: Direction,

    /// Whether each element waits for an acknowledgment.
    pub needs_ack: bool,

    /// Time to wait for an acknowledgment before retrying.
    pub ack_timeout_ms: u32,

    /// Retransmissions after the first send; `INFINITE_RETRY` never gives up.
    pub max_retry: u32,

    /// Number of ring cells.
    pub ring_capacity: usize,

    /// Largest element in bytes.
    pub element_max_size: usize,

    /// Minimum time between two sends on this stream; zero sends every tick.
    pub sending_wait_time_ms: u32,
}

impl IoBufferParam {
    /// Creates best-effort parameters for `id` with default sizes.
    pub fn new(id: u8, direction: Direction) -> Self {
        Self {
            id,
            direction,
            needs_ack: false,
            ack_timeout_ms: DEFAULT_ACK_TIMEOUT_MS,
            max_retry: DEFAULT_MAX_RETRY,
            ring_capacity: DEFAULT_RING_CAPACITY,
            element_max_size: DEFAULT_ELEMENT_MAX_SIZE,
            sending_wait_time_ms: 0,
        }
    }

    /// Parameters of an application-to-network stream.
    pub fn input(id: u8) -> Self {
        Self::new(id, Direction::Input)
    }

    /// Parameters of a network-to-application stream.
    pub fn output(id: u8) -> Self {
        Self::new(id, Direction::Output)
    }

    /// Makes the stream acknowledged.
    pub fn with_ack(mut self, ack_timeout_ms: u32, max_retry: u32) -> Self {
        self.needs_ack = true;
        self.ack_timeout_ms = ack_timeout_ms;
        self.max_retry = max_retry;
        self
    }

    /// Sets the number of ring cells.
    pub fn with_capacity(mut self, cells: usize) -> Self {
        self.ring_capacity = cells;
        self
    }

    /// Sets the largest element size.
    pub fn with_element_max_size(mut self, size: usize) -> Self {
        self.element_max_size = size;
        self
    }

    /// Sets the per-stream send throttle.
    pub fn with_sending_wait_time_ms(mut self, ms: u32) -> Self {
        self.sending_wait_time_ms = ms;
        self
    }

    /// Checks the parameters on their own, without looking at other streams.
    pub fn validate(&self) -> Result<()> {
        if self.id >= ID_MAX {
            return Err(Error::bad_parameter(format!(
                "stream id {} is not below {}",
                self.id, ID_MAX
            )));
        }
        if self.ring_capacity == 0 {
            return Err(Error::bad_parameter(format!(
                "stream {} has no ring cells",
                self.id
            )));
        }
        if self.element_max_size == 0 || self.element_max_size > u32::MAX as usize {
            return Err(Error::bad_parameter(format!(
                "stream {} element size {} out of range",
                self.id, self.element_max_size
            )));
        }
        if self.needs_ack && self.ack_timeout_ms == 0 {
            return Err(Error::bad_parameter(format!(
                "stream {} needs an ack timeout",
                self.id
            )));
        }
        Ok(())
    }
}
