//! Scheduler loops and the state they share with the manager.
//!
//! This module provides:
//! - SendScheduler: the tick-driven loop draining input IO buffers
//! - ReceiveScheduler: the loop routing incoming frames
//! - WakeNotifier: early wakeup of the send loop

mod receiver;
mod sender;
mod wake;

pub use wake::WakeNotifier;

pub(crate) use receiver::ReceiveScheduler;
pub(crate) use sender::SendScheduler;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use heapless::Deque;
use parking_lot::{Mutex, ReentrantMutex, RwLock};

use crate::config::ManagerConfig;
use crate::iobuffer::{ReceiveCallback, StreamTable};
use crate::reliable::Stats;

/// Number of PONG answers that may wait for the send loop.
pub(crate) const PONG_QUEUE_LEN: usize = 8;

/// Size of the timestamp carried by PING and PONG frames.
pub(crate) const PING_PAYLOAD_LEN: usize = 8;

const LATENCY_UNKNOWN: u64 = u64::MAX;

/// A PONG owed to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingPong {
    pub seq: u8,
    pub payload: [u8; PING_PAYLOAD_LEN],
    pub len: usize,
}

impl PendingPong {
    pub fn new(seq: u8, payload: &[u8]) -> Self {
        let len = payload.len().min(PING_PAYLOAD_LEN);
        let mut buf = [0u8; PING_PAYLOAD_LEN];
        buf[..len].copy_from_slice(&payload[..len]);
        Self {
            seq,
            payload: buf,
            len,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len]
    }
}

/// State shared by the manager handle and both loops.
pub(crate) struct Shared<T> {
    pub transport: Arc<T>,
    pub config: ManagerConfig,
    pub inputs: StreamTable,
    pub outputs: StreamTable,
    pub send_buffer_size: usize,
    pub receive_buffer_size: usize,
    pub running: AtomicBool,
    pub sending_active: AtomicBool,
    pub receiving_active: AtomicBool,
    pub wake: WakeNotifier,
    pub stats: Stats,
    pub receive_callback: RwLock<Option<ReceiveCallback>>,
    pub pongs: Mutex<Deque<PendingPong, PONG_QUEUE_LEN>>,
    /// Held while `Sent` is reported and while `flush` releases elements,
    /// so that a flushed element never sees `Sent` after its `Free`.
    pub dispatch_gate: ReentrantMutex<()>,
    epoch: Instant,
    latency_us: AtomicU64,
}

impl<T> Shared<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<T>,
        config: ManagerConfig,
        inputs: StreamTable,
        outputs: StreamTable,
        send_buffer_size: usize,
        receive_buffer_size: usize,
        receive_callback: Option<ReceiveCallback>,
    ) -> Self {
        Self {
            transport,
            config,
            inputs,
            outputs,
            send_buffer_size,
            receive_buffer_size,
            running: AtomicBool::new(true),
            sending_active: AtomicBool::new(false),
            receiving_active: AtomicBool::new(false),
            wake: WakeNotifier::new(),
            stats: Stats::default(),
            receive_callback: RwLock::new(receive_callback),
            pongs: Mutex::new(Deque::new()),
            dispatch_gate: ReentrantMutex::new(()),
            epoch: Instant::now(),
            latency_us: AtomicU64::new(LATENCY_UNKNOWN),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears the running flag and wakes every sleeper.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.wake.notify();
        for buf in self.outputs.iter() {
            buf.wake_readers();
        }
    }

    /// Microseconds since the manager was created.
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros().min(u64::MAX as u128 - 1) as u64
    }

    /// Records the round trip of a PONG carrying our timestamp.
    pub fn record_pong(&self, payload: &[u8]) -> Option<Duration> {
        let stamp: [u8; PING_PAYLOAD_LEN] = payload.try_into().ok()?;
        let sent_us = u64::from_be_bytes(stamp);
        let rtt_us = self.now_us().checked_sub(sent_us)?;
        self.latency_us.store(rtt_us, Ordering::Relaxed);
        Some(Duration::from_micros(rtt_us))
    }

    /// Last measured round trip.
    pub fn estimated_latency(&self) -> Option<Duration> {
        match self.latency_us.load(Ordering::Relaxed) {
            LATENCY_UNKNOWN => None,
            us => Some(Duration::from_micros(us)),
        }
    }
}

/// Claims a loop's "active" flag; false if another context holds it.
pub(crate) fn claim(flag: &AtomicBool) -> bool {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}
