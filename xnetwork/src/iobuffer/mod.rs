//! IO buffers: the per-stream queues of the manager.
//!
//! An input IO buffer is filled by the application and drained by the
//! send loop. An output IO buffer is filled by the receive loop and
//! drained by the application. Every output stream that needs
//! acknowledgments gets an ACK echo companion on the input side, with
//! id `id + 128`, holding the ACKs still to be sent back to the peer.
//!
//! All mutable state of a buffer lives behind one mutex; output buffers
//! also carry a condition variable woken on every push.

use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::buffer::RingBuffer;
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::reliable::AckState;
use crate::ack_id;

mod element;
mod param;
mod table;

pub use element::{
    CallbackReturn, CallbackStatus, ReceiveCallback, ReceiveStatus, SendCallback, SendData,
    receive_callback, send_callback,
};
pub use param::{Direction, IoBufferParam};

pub(crate) use element::{Element, Notification, dispatch_all};
pub(crate) use table::StreamTable;

/// What the frames produced by a buffer carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferKind {
    /// Application payload.
    Data,

    /// ACKs for the output stream `acked`.
    AckEcho {
        /// Id of the acknowledged output stream.
        acked: u8,
    },
}

/// Mutable part of an IO buffer.
#[derive(Debug)]
pub(crate) struct IoBufferState {
    pub ring: RingBuffer<Element>,
    pub ack: AckState,
    /// Sequence number given to the next element on first transmission.
    pub next_seq: u8,
    /// Ticks before this stream may send again.
    pub send_wait_countdown: u32,
    /// Last accepted sequence number, for duplicate suppression.
    pub last_received_seq: Option<u8>,
    next_token: u64,
}

impl IoBufferState {
    fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            ring: RingBuffer::new(capacity)?,
            ack: AckState::new(),
            next_seq: 0,
            send_wait_countdown: 0,
            last_received_seq: None,
            next_token: 0,
        })
    }

    fn take_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token = self.next_token.wrapping_add(1);
        token
    }

    /// Starts waiting for the acknowledgment of `seq`.
    pub fn mark_waiting_ack(&mut self, seq: u8, interval_ticks: u32) {
        self.ack.mark_waiting(seq, interval_ticks);
    }

    /// Stops waiting.
    pub fn clear_waiting_ack(&mut self) {
        self.ack.clear();
    }

    /// Advances the acknowledgment countdown; true once it elapsed.
    pub fn tick_timeout(&mut self) -> bool {
        self.ack.tick_timeout()
    }

    /// True if `seq` acknowledges the element in flight.
    pub fn matches_ack(&self, seq: u8) -> bool {
        self.ack.matches(seq)
    }

    /// Empties the ring and resets the delivery state.
    ///
    /// The sequence counter keeps running so that a late ACK for a
    /// flushed element cannot match a new one.
    pub fn reset(&mut self) -> Vec<Element> {
        self.ack.clear();
        self.send_wait_countdown = 0;
        self.last_received_seq = None;
        self.ring.drain()
    }
}

/// One stream queue.
#[derive(Debug)]
pub(crate) struct IoBuffer {
    param: IoBufferParam,
    kind: BufferKind,
    retry_interval_ticks: u32,
    send_wait_ticks: u32,
    state: Mutex<IoBufferState>,
    readable: Condvar,
}

impl IoBuffer {
    /// Creates the buffer described by `param`.
    pub fn new(param: IoBufferParam, config: &ManagerConfig) -> Result<Self> {
        param.validate()?;
        let retry_interval_ticks = config.ms_to_ticks(param.ack_timeout_ms as u64).max(1);
        let send_wait_ticks = config.ms_to_ticks(param.sending_wait_time_ms as u64);
        Ok(Self {
            state: Mutex::new(IoBufferState::new(param.ring_capacity)?),
            param,
            kind: BufferKind::Data,
            retry_interval_ticks,
            send_wait_ticks,
            readable: Condvar::new(),
        })
    }

    /// Creates the ACK echo companion of the output stream `output`.
    pub fn ack_echo(output: &IoBufferParam) -> Result<Self> {
        let param = IoBufferParam {
            id: ack_id(output.id),
            direction: Direction::Input,
            needs_ack: false,
            ack_timeout_ms: 0,
            max_retry: 0,
            ring_capacity: output.ring_capacity,
            element_max_size: 0,
            sending_wait_time_ms: 0,
        };
        Ok(Self {
            state: Mutex::new(IoBufferState::new(param.ring_capacity)?),
            param,
            kind: BufferKind::AckEcho { acked: output.id },
            retry_interval_ticks: 1,
            send_wait_ticks: 0,
            readable: Condvar::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.param.id
    }

    #[inline]
    pub fn param(&self) -> &IoBufferParam {
        &self.param
    }

    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    #[inline]
    pub fn needs_ack(&self) -> bool {
        self.param.needs_ack
    }

    #[inline]
    pub fn retry_interval_ticks(&self) -> u32 {
        self.retry_interval_ticks
    }

    #[inline]
    pub fn send_wait_ticks(&self) -> u32 {
        self.send_wait_ticks
    }

    /// Locks the mutable state.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, IoBufferState> {
        self.state.lock()
    }

    /// Queues an application element.
    ///
    /// Fails with `BadParameter` when `data` exceeds the element size and
    /// with `BufferFull` when no cell is free; the ring is untouched then.
    pub fn try_enqueue(&self, data: Bytes, callback: Option<SendCallback>) -> Result<()> {
        if data.len() > self.param.element_max_size {
            return Err(Error::bad_parameter(format!(
                "element of {} bytes exceeds {} on stream {}",
                data.len(),
                self.param.element_max_size,
                self.param.id
            )));
        }

        let mut state = self.state.lock();
        if state.ring.is_full() {
            return Err(Error::BufferFull);
        }
        let token = state.take_token();
        let elem = Element::new(self.param.id, token, data, callback);
        if let Err(elem) = state.ring.push(elem) {
            elem.disarm();
            return Err(Error::BufferFull);
        }
        Ok(())
    }

    /// Queues an ACK for `seq` on an ACK echo companion.
    pub fn push_ack(&self, seq: u8) -> Result<()> {
        let mut state = self.state.lock();
        let token = state.take_token();
        state
            .ring
            .push(Element::ack(self.param.id, token, seq))
            .map_err(|_| Error::BufferFull)
    }

    /// Queues a received payload on an output buffer and wakes readers.
    ///
    /// With `dedup`, a payload whose `seq` equals the last accepted one
    /// is a retransmission and is ignored; `Ok(false)` is returned then.
    pub fn push_received(&self, seq: u8, payload: &[u8], dedup: bool) -> Result<bool> {
        if payload.len() > self.param.element_max_size {
            return Err(Error::BufferSize {
                needed: payload.len(),
                capacity: self.param.element_max_size,
            });
        }

        let mut state = self.state.lock();
        if dedup && state.last_received_seq == Some(seq) {
            return Ok(false);
        }
        if state.ring.is_full() {
            return Err(Error::BufferFull);
        }
        if dedup {
            state.last_received_seq = Some(seq);
        }
        let token = state.take_token();
        let elem = Element::new(self.param.id, token, Bytes::copy_from_slice(payload), None);
        if state.ring.push(elem).is_err() {
            return Err(Error::BufferFull);
        }
        self.readable.notify_all();
        Ok(true)
    }

    /// Pops the oldest received element into `out`.
    ///
    /// `deadline` of `None` waits forever. `keep_waiting` is checked
    /// before every wait; once it returns false the call fails with
    /// `Stopped`.
    pub fn pop_into(
        &self,
        out: &mut [u8],
        nonblocking: bool,
        deadline: Option<Instant>,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<usize> {
        let mut state = self.state.lock();
        loop {
            if let Some(front) = state.ring.peek_front() {
                let len = front.data().len();
                if len > out.len() {
                    return Err(Error::BufferSize {
                        needed: len,
                        capacity: out.len(),
                    });
                }
                if let Some(elem) = state.ring.pop_front() {
                    out[..len].copy_from_slice(elem.data());
                    elem.disarm();
                }
                return Ok(len);
            }

            if nonblocking {
                return Err(Error::Empty);
            }
            if !keep_waiting() {
                return Err(Error::Stopped);
            }
            match deadline {
                None => self.readable.wait(&mut state),
                Some(deadline) => {
                    if self.readable.wait_until(&mut state, deadline).timed_out()
                        && state.ring.is_empty()
                    {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    /// Pops the oldest received element whole.
    pub fn pop_data(
        &self,
        nonblocking: bool,
        deadline: Option<Instant>,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<Bytes> {
        let mut state = self.state.lock();
        loop {
            if let Some(elem) = state.ring.pop_front() {
                return Ok(elem.into_data());
            }
            if nonblocking {
                return Err(Error::Empty);
            }
            if !keep_waiting() {
                return Err(Error::Stopped);
            }
            match deadline {
                None => self.readable.wait(&mut state),
                Some(deadline) => {
                    if self.readable.wait_until(&mut state, deadline).timed_out()
                        && state.ring.is_empty()
                    {
                        return Err(Error::Timeout);
                    }
                }
            }
        }
    }

    /// Wakes every reader blocked on this buffer.
    pub fn wake_readers(&self) {
        // taking the lock orders the wakeup after any reader's check
        let _state = self.state.lock();
        self.readable.notify_all();
    }
}
