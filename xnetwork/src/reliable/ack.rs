//! Acknowledgment wait and retry bookkeeping for one IO buffer.
//!
//! A stream has at most one element in flight. While it waits for the
//! acknowledgment of that element, a countdown measured in send loop
//! ticks runs; when it reaches zero the element is either retransmitted
//! or, once the retry budget is spent, dropped with a timeout.

/// Retry count meaning "never give up".
pub const INFINITE_RETRY: u32 = u32::MAX;

/// Outcome of an elapsed acknowledgment countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send the element again.
    Retransmit,

    /// Retry budget exhausted; drop the element.
    GiveUp,
}

/// Acknowledgment state of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckState {
    /// Sequence number of the element in flight, if any.
    pending_seq: Option<u8>,

    /// Ticks left before the retry decision is due.
    countdown: u32,

    /// Retransmissions already performed for the element in flight.
    retries: u32,

    /// Budget spent; the drop decision is being taken outside the lock.
    expiring: bool,

    /// Next countdown expiry retransmits regardless of the budget.
    forced: bool,
}

impl AckState {
    /// Creates an idle state.
    pub const fn new() -> Self {
        Self {
            pending_seq: None,
            countdown: 0,
            retries: 0,
            expiring: false,
            forced: false,
        }
    }

    /// Returns true while an element waits for its acknowledgment.
    #[inline]
    pub fn is_waiting(&self) -> bool {
        self.pending_seq.is_some()
    }

    /// Returns the awaited sequence number.
    #[inline]
    pub fn pending_seq(&self) -> Option<u8> {
        self.pending_seq
    }

    /// Returns the ticks left on the countdown.
    #[inline]
    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    /// Returns the retransmissions done for the element in flight.
    #[inline]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Returns true while the timeout of the element in flight is being resolved.
    #[inline]
    pub fn is_expiring(&self) -> bool {
        self.expiring
    }

    /// Starts waiting for `seq` with a fresh retry budget.
    pub fn mark_waiting(&mut self, seq: u8, interval_ticks: u32) {
        self.pending_seq = Some(seq);
        self.countdown = interval_ticks;
        self.retries = 0;
        self.expiring = false;
        self.forced = false;
    }

    /// Freezes the countdown until the timeout is resolved.
    pub fn mark_expiring(&mut self) {
        self.expiring = true;
    }

    /// Leaves the waiting state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Returns true if `seq` acknowledges the element in flight.
    #[inline]
    pub fn matches(&self, seq: u8) -> bool {
        self.pending_seq == Some(seq)
    }

    /// Advances the countdown by one tick.
    ///
    /// Returns true once the countdown is at zero, meaning the retry
    /// decision is due. It keeps returning true until the state is
    /// rearmed by [`record_retry`](Self::record_retry) or cleared.
    pub fn tick_timeout(&mut self) -> bool {
        if !self.is_waiting() || self.expiring {
            return false;
        }
        self.countdown = self.countdown.saturating_sub(1);
        self.countdown == 0
    }

    /// Decides what to do with an elapsed countdown.
    pub fn decide(&self, max_retry: u32) -> RetryDecision {
        if self.forced || max_retry == INFINITE_RETRY || self.retries < max_retry {
            RetryDecision::Retransmit
        } else {
            RetryDecision::GiveUp
        }
    }

    /// Records a retransmission and rearms the countdown.
    ///
    /// The transmission forced by [`restart`](Self::restart) does not
    /// count against the retry budget.
    pub fn record_retry(&mut self, interval_ticks: u32) {
        if self.forced {
            self.forced = false;
        } else {
            self.retries = self.retries.saturating_add(1);
        }
        self.countdown = interval_ticks;
    }

    /// Rearms the countdown with a fresh retry budget, keeping the
    /// element in flight.
    ///
    /// When the countdown elapses the element is sent again as if for
    /// the first time, followed by up to `max_retry` retransmissions.
    pub fn restart(&mut self, interval_ticks: u32) {
        self.retries = 0;
        self.countdown = interval_ticks;
        self.expiring = false;
        self.forced = true;
    }
}
