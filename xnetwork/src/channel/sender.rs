//! Send loop.
//!
//! Every tick the loop visits the input IO buffers in id order and
//! stages at most one frame per buffer:
//!
//! - an idle buffer with a queued element sends its front element
//! - a buffer waiting for an acknowledgment advances its countdown and,
//!   when it elapses, retransmits or gives up
//! - a throttled buffer only counts down its sending wait time
//!
//! The delivery callbacks collected under the buffer locks are run, then
//! the staged frames are handed to the transport.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use bytes::Bytes;
use log::{debug, info, trace, warn};

use super::{PING_PAYLOAD_LEN, Shared, claim};
use crate::buffer::SendStaging;
use crate::core::Frame;
use crate::error::{Error, Result};
use crate::iobuffer::{
    BufferKind, CallbackReturn, CallbackStatus, Element, IoBuffer, Notification, SendCallback,
    dispatch_all,
};
use crate::reliable::{RetryDecision, Stats};
use crate::transport::Transport;

/// An element whose retry budget ran out, awaiting its callback's verdict.
struct Expired {
    stream_id: u8,
    token: u64,
    data: Bytes,
    callback: SendCallback,
}

/// A `Sent` owed to an acknowledged element staged this tick.
struct PendingSent {
    stream_id: u8,
    token: u64,
    note: Notification,
}

/// Drives the input side of the manager.
pub(crate) struct SendScheduler<T: Transport + 'static> {
    shared: Arc<Shared<T>>,
    staging: SendStaging,
    notes: Vec<Notification>,
    sent: Vec<PendingSent>,
    expired: Vec<Expired>,
    ping_interval_ticks: u32,
    ping_countdown: u32,
    ping_seq: u8,
}

impl<T: Transport + 'static> SendScheduler<T> {
    /// Takes the send side of `shared`; only one scheduler may hold it.
    pub fn claim(shared: Arc<Shared<T>>) -> Result<Self> {
        if !claim(&shared.sending_active) {
            return Err(Error::AlreadyRunning);
        }
        let ping_interval_ticks = shared
            .config
            .ping_interval
            .map(|interval| {
                shared
                    .config
                    .ms_to_ticks(interval.as_millis() as u64)
                    .max(1)
            })
            .unwrap_or(0);

        Ok(Self {
            staging: SendStaging::new(shared.send_buffer_size),
            shared,
            notes: Vec::new(),
            sent: Vec::new(),
            expired: Vec::new(),
            ping_interval_ticks,
            ping_countdown: ping_interval_ticks,
            ping_seq: 0,
        })
    }

    /// Runs until the manager stops.
    pub fn run(mut self) {
        let interval = self.shared.config.tick_interval;
        info!("send loop started, tick {:?}", interval);

        let mut next_tick = Instant::now();
        while self.shared.is_running() {
            let now = Instant::now();
            if now >= next_tick {
                self.tick();
                next_tick += interval;
                if next_tick < now {
                    // fell behind, do not replay missed ticks
                    next_tick = now + interval;
                }
            } else {
                self.send_pending_acks();
            }

            let wait = next_tick.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                self.shared.wake.wait_timeout(wait);
            }
        }

        info!("send loop stopped");
    }

    /// One scheduling round over every input buffer.
    pub fn tick(&mut self) {
        let shared = self.shared.clone();

        self.stage_pongs();
        self.stage_ping();
        for buf in shared.inputs.iter() {
            self.service(buf);
        }
        self.transmit();
        self.resolve_expired();
    }

    /// Sends queued ACKs and PONGs without advancing any countdown.
    pub fn send_pending_acks(&mut self) {
        let shared = self.shared.clone();

        self.stage_pongs();
        for buf in shared
            .inputs
            .iter()
            .filter(|buf| matches!(buf.kind(), BufferKind::AckEcho { .. }))
        {
            self.service(buf);
        }
        if !self.staging.is_empty() {
            self.transmit();
        }
    }

    fn service(&mut self, buf: &IoBuffer) {
        let mut state = buf.lock();

        if state.ack.is_waiting() {
            // the sending wait keeps running while the element is in flight
            if state.send_wait_countdown > 0 {
                state.send_wait_countdown -= 1;
            }
            if !state.tick_timeout() {
                return;
            }
            let seq = state.ack.pending_seq().unwrap_or_default();
            match state.ack.decide(buf.param().max_retry) {
                RetryDecision::Retransmit => {
                    let Some(front) = state.ring.peek_front() else {
                        state.clear_waiting_ack();
                        return;
                    };
                    if self
                        .staging
                        .try_stage(&Frame::data(buf.id(), seq, front.data()))
                    {
                        state.ack.record_retry(buf.retry_interval_ticks());
                        Stats::bump(&self.shared.stats.retransmissions);
                        debug!(
                            "stream {} retransmit seq {} (retry {})",
                            buf.id(),
                            seq,
                            state.ack.retries()
                        );
                    }
                }
                RetryDecision::GiveUp => {
                    warn!(
                        "stream {} seq {} not acknowledged after {} retries",
                        buf.id(),
                        seq,
                        state.ack.retries()
                    );
                    Stats::bump(&self.shared.stats.timeouts);

                    let pending = state.ring.peek_front().and_then(|front| {
                        front
                            .callback()
                            .map(|cb| (front.token(), front.data().clone(), cb.clone()))
                    });
                    match pending {
                        Some((token, data, callback)) => {
                            state.ack.mark_expiring();
                            self.expired.push(Expired {
                                stream_id: buf.id(),
                                token,
                                data,
                                callback,
                            });
                        }
                        None => {
                            state.clear_waiting_ack();
                            if let Some(elem) = state.ring.pop_front() {
                                elem.finish(None, &mut self.notes);
                            }
                        }
                    }
                }
            }
            return;
        }

        if state.send_wait_countdown > 0 {
            state.send_wait_countdown -= 1;
            return;
        }

        let next_seq = state.next_seq;
        let Some(front) = state.ring.peek_front() else {
            return;
        };
        let (frame, seq) = match buf.kind() {
            BufferKind::Data => (Frame::data(buf.id(), next_seq, front.data()), next_seq),
            BufferKind::AckEcho { acked } => {
                let seq = front.seq().unwrap_or_default();
                (Frame::ack(acked, seq), seq)
            }
        };
        if !self.staging.try_stage(&frame) {
            trace!("stream {} deferred, staging area full", buf.id());
            return;
        }
        trace!("stream {} staged {:?} seq {}", buf.id(), frame.frame_type, seq);

        match buf.kind() {
            BufferKind::AckEcho { .. } => {
                Stats::bump(&self.shared.stats.acks_sent);
                if let Some(elem) = state.ring.pop_front() {
                    elem.finish(None, &mut self.notes);
                }
            }
            BufferKind::Data => {
                state.next_seq = next_seq.wrapping_add(1);
                state.send_wait_countdown = buf.send_wait_ticks();
                if buf.needs_ack() {
                    state.mark_waiting_ack(seq, buf.retry_interval_ticks());
                    if let Some(pending) = state.ring.peek_front().and_then(|front| {
                        front.notify(CallbackStatus::Sent).map(|note| PendingSent {
                            stream_id: buf.id(),
                            token: front.token(),
                            note,
                        })
                    }) {
                        self.sent.push(pending);
                    }
                } else if let Some(elem) = state.ring.pop_front() {
                    elem.finish(Some(CallbackStatus::Sent), &mut self.notes);
                }
            }
        }
    }

    fn stage_pongs(&mut self) {
        let mut pongs = self.shared.pongs.lock();
        while let Some(pong) = pongs.front() {
            if !self.staging.try_stage(&Frame::pong(pong.seq, pong.payload())) {
                break;
            }
            pongs.pop_front();
        }
    }

    fn stage_ping(&mut self) {
        if self.ping_interval_ticks == 0 {
            return;
        }
        self.ping_countdown = self.ping_countdown.saturating_sub(1);
        if self.ping_countdown > 0 {
            return;
        }

        let stamp: [u8; PING_PAYLOAD_LEN] = self.shared.now_us().to_be_bytes();
        if self.staging.try_stage(&Frame::ping(self.ping_seq, &stamp)) {
            trace!("ping seq {}", self.ping_seq);
            self.ping_seq = self.ping_seq.wrapping_add(1);
            self.ping_countdown = self.ping_interval_ticks;
        }
    }

    fn transmit(&mut self) {
        // report Sent before the peer can possibly acknowledge
        dispatch_all(self.notes.drain(..));
        self.report_sent();
        if !self.staging.is_empty() {
            let (sent, failures) = self.staging.transmit(&*self.shared.transport);
            Stats::add(&self.shared.stats.frames_sent, sent as u64);
            for err in failures {
                warn!("transmit failed: {}", err);
                Stats::bump(&self.shared.stats.transport_errors);
            }
        }
    }

    /// Reports `Sent` for the acknowledged elements staged this tick.
    ///
    /// An element released in the meantime, by `flush` for instance,
    /// already got its `Cancel` and `Free` and is skipped.
    fn report_sent(&mut self) {
        if self.sent.is_empty() {
            return;
        }
        let shared = self.shared.clone();
        let _gate = shared.dispatch_gate.lock();

        for pending in self.sent.drain(..) {
            let in_flight = shared.inputs.get(pending.stream_id).is_some_and(|buf| {
                buf.lock().ring.peek_front().map(Element::token) == Some(pending.token)
            });
            if in_flight {
                pending.note.dispatch();
            } else {
                debug!(
                    "stream {} element released before it was reported sent",
                    pending.stream_id
                );
            }
        }
    }

    fn resolve_expired(&mut self) {
        if self.expired.is_empty() {
            return;
        }
        let shared = self.shared.clone();

        for expired in std::mem::take(&mut self.expired) {
            let answer = (expired.callback)(expired.stream_id, &expired.data, CallbackStatus::Timeout);

            let Some(buf) = shared.inputs.get(expired.stream_id) else {
                continue;
            };
            let mut state = buf.lock();
            let current = state.ack.is_expiring()
                && state.ring.peek_front().map(Element::token) == Some(expired.token);
            if !current {
                debug!(
                    "stream {} settled while its timeout was reported",
                    expired.stream_id
                );
                continue;
            }

            match answer {
                CallbackReturn::Retry => {
                    debug!("stream {} retry budget restarted", expired.stream_id);
                    state.ack.restart(0);
                }
                CallbackReturn::Flush => {
                    let elems = state.reset();
                    drop(state);
                    debug!(
                        "stream {} flushed on timeout, {} elements",
                        expired.stream_id,
                        elems.len()
                    );
                    for (pos, elem) in elems.into_iter().enumerate() {
                        let status = (pos > 0).then_some(CallbackStatus::Cancel);
                        elem.finish(status, &mut self.notes);
                    }
                }
                CallbackReturn::Default | CallbackReturn::DataPop => {
                    state.clear_waiting_ack();
                    let elem = state.ring.pop_front();
                    drop(state);
                    if let Some(elem) = elem {
                        elem.finish(None, &mut self.notes);
                    }
                }
            }
        }

        dispatch_all(self.notes.drain(..));
    }
}

impl<T: Transport + 'static> Drop for SendScheduler<T> {
    fn drop(&mut self) {
        dispatch_all(self.notes.drain(..));
        self.report_sent();
        self.shared.sending_active.store(false, Ordering::Release);
    }
}
