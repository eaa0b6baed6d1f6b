//! Counters shared by the scheduler loops.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the manager counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    /// Frames handed to the transport, retransmissions included.
    pub frames_sent: u64,

    /// Retransmitted data frames.
    pub retransmissions: u64,

    /// Elements confirmed by a matching ACK.
    pub acks_received: u64,

    /// ACK frames transmitted for received data.
    pub acks_sent: u64,

    /// Elements dropped after exhausting their retry budget.
    pub timeouts: u64,

    /// Frames decoded from the transport.
    pub frames_received: u64,

    /// Frames addressed to a stream that does not exist.
    pub unknown_stream: u64,

    /// Received elements dropped because the output ring was full.
    pub overflow_drops: u64,

    /// Retransmitted data frames recognised and not delivered again.
    pub duplicates: u64,

    /// ACKs not matching the awaited sequence number.
    pub stale_acks: u64,

    /// Datagrams that did not decode.
    pub invalid_frames: u64,

    /// Failed transport calls.
    pub transport_errors: u64,
}

impl ManagerStats {
    /// Returns the retransmission rate as a percentage of frames sent.
    pub fn retransmit_rate(&self) -> f32 {
        if self.frames_sent == 0 {
            0.0
        } else {
            (self.retransmissions as f32 / self.frames_sent as f32) * 100.0
        }
    }

    /// Returns the share of acknowledged elements among finished ones.
    pub fn success_rate(&self) -> f32 {
        let total = self.acks_received + self.timeouts;
        if total == 0 {
            100.0
        } else {
            (self.acks_received as f32 / total as f32) * 100.0
        }
    }
}

/// Live counters, updated without locks.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub frames_sent: AtomicU64,
    pub retransmissions: AtomicU64,
    pub acks_received: AtomicU64,
    pub acks_sent: AtomicU64,
    pub timeouts: AtomicU64,
    pub frames_received: AtomicU64,
    pub unknown_stream: AtomicU64,
    pub overflow_drops: AtomicU64,
    pub duplicates: AtomicU64,
    pub stale_acks: AtomicU64,
    pub invalid_frames: AtomicU64,
    pub transport_errors: AtomicU64,
}

impl Stats {
    #[inline]
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ManagerStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ManagerStats {
            frames_sent: get(&self.frames_sent),
            retransmissions: get(&self.retransmissions),
            acks_received: get(&self.acks_received),
            acks_sent: get(&self.acks_sent),
            timeouts: get(&self.timeouts),
            frames_received: get(&self.frames_received),
            unknown_stream: get(&self.unknown_stream),
            overflow_drops: get(&self.overflow_drops),
            duplicates: get(&self.duplicates),
            stale_acks: get(&self.stale_acks),
            invalid_frames: get(&self.invalid_frames),
            transport_errors: get(&self.transport_errors),
        }
    }
}
