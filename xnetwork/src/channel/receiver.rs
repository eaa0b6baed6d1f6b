//! Receive loop.
//!
//! Blocks on the transport with a timeout, splits each datagram into
//! frames and routes them:
//!
//! - DATA goes to the output IO buffer of the same id; acknowledged
//!   streams first queue an ACK on their echo companion
//! - ACK releases the element waiting on the input IO buffer of the same id
//! - PING is answered with a PONG through the send loop
//! - PONG updates the latency estimate

use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, error, info, trace, warn};

use super::{PendingPong, Shared, claim};
use crate::ack_id;
use crate::core::{Frame, FrameIter, FrameType};
use crate::error::{Error, Result, TransportError};
use crate::iobuffer::{BufferKind, CallbackStatus, ReceiveStatus, dispatch_all};
use crate::reliable::Stats;
use crate::transport::Transport;

/// Drives the output side of the manager.
pub(crate) struct ReceiveScheduler<T: Transport + 'static> {
    shared: Arc<Shared<T>>,
    buffer: Vec<u8>,
}

impl<T: Transport + 'static> ReceiveScheduler<T> {
    /// Takes the receive side of `shared`; only one scheduler may hold it.
    pub fn claim(shared: Arc<Shared<T>>) -> Result<Self> {
        if !claim(&shared.receiving_active) {
            return Err(Error::AlreadyRunning);
        }
        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(shared.receive_buffer_size).is_err() {
            shared.receiving_active.store(false, Ordering::Release);
            return Err(Error::Alloc);
        }
        buffer.resize(shared.receive_buffer_size, 0);
        Ok(Self { shared, buffer })
    }

    /// Runs until the manager stops or the transport closes.
    pub fn run(mut self) {
        let timeout = self.shared.config.receive_timeout;
        info!("receive loop started, timeout {:?}", timeout);

        while self.shared.is_running() {
            match self.shared.transport.receive(&mut self.buffer, timeout) {
                Ok(len) => {
                    let datagram = std::mem::take(&mut self.buffer);
                    self.process_datagram(&datagram[..len]);
                    self.buffer = datagram;
                }
                Err(TransportError::Timeout) => {}
                Err(TransportError::Closed) => {
                    error!("transport closed, receive loop exits");
                    break;
                }
                Err(err) => {
                    warn!("receive failed: {}", err);
                    Stats::bump(&self.shared.stats.transport_errors);
                    // keep a failing link from spinning the loop
                    std::thread::sleep(self.shared.config.tick_interval);
                }
            }
        }

        info!("receive loop stopped");
    }

    /// Routes every frame of one datagram.
    pub fn process_datagram(&self, datagram: &[u8]) {
        let mut frames = FrameIter::new(datagram);
        for frame in frames.by_ref() {
            Stats::bump(&self.shared.stats.frames_received);
            self.process_frame(&frame);
        }
        if frames.failed() {
            warn!("malformed frame in {} byte datagram", datagram.len());
            Stats::bump(&self.shared.stats.invalid_frames);
        }
    }

    fn process_frame(&self, frame: &Frame<'_>) {
        trace!(
            "frame {:?} stream {} seq {} len {}",
            frame.frame_type,
            frame.stream_id,
            frame.seq,
            frame.payload.len()
        );
        match frame.frame_type {
            FrameType::Data => self.on_data(frame),
            FrameType::Ack => self.on_ack(frame),
            FrameType::Ping => self.on_ping(frame),
            FrameType::Pong => {
                if let Some(rtt) = self.shared.record_pong(frame.payload) {
                    debug!("pong seq {}, round trip {:?}", frame.seq, rtt);
                }
            }
        }
    }

    fn on_data(&self, frame: &Frame<'_>) {
        let shared = &self.shared;
        let Some(buf) = shared.outputs.get(frame.stream_id) else {
            warn!("data for unknown stream {}", frame.stream_id);
            Stats::bump(&shared.stats.unknown_stream);
            return;
        };

        if buf.needs_ack() {
            match shared.inputs.get(ack_id(frame.stream_id)) {
                Some(echo) => {
                    if echo.push_ack(frame.seq).is_err() {
                        warn!("ack queue of stream {} full", frame.stream_id);
                    }
                    shared.wake.notify();
                }
                None => error!("stream {} has no ack companion", frame.stream_id),
            }
        }

        match buf.push_received(frame.seq, frame.payload, buf.needs_ack()) {
            Ok(true) => {
                let status = if buf.needs_ack() {
                    ReceiveStatus::Acknowledged
                } else {
                    ReceiveStatus::Received
                };
                let hook = shared.receive_callback.read().clone();
                if let Some(hook) = hook {
                    hook(frame.stream_id, frame.payload, status);
                }
            }
            Ok(false) => {
                debug!("stream {} duplicate seq {}", frame.stream_id, frame.seq);
                Stats::bump(&shared.stats.duplicates);
            }
            Err(Error::BufferFull) => {
                warn!("stream {} full, element dropped", frame.stream_id);
                Stats::bump(&shared.stats.overflow_drops);
            }
            Err(err) => {
                warn!("stream {} element dropped: {}", frame.stream_id, err);
                Stats::bump(&shared.stats.overflow_drops);
            }
        }
    }

    fn on_ack(&self, frame: &Frame<'_>) {
        let shared = &self.shared;
        let Some(buf) = shared
            .inputs
            .get(frame.stream_id)
            .filter(|buf| buf.kind() == BufferKind::Data && buf.needs_ack())
        else {
            warn!("ack for unknown stream {}", frame.stream_id);
            Stats::bump(&shared.stats.unknown_stream);
            return;
        };

        let mut notes = Vec::new();
        {
            let mut state = buf.lock();
            if state.ack.is_expiring() {
                // the element already got its Timeout
                debug!(
                    "stream {} ack seq {} arrived after timeout",
                    frame.stream_id, frame.seq
                );
                Stats::bump(&shared.stats.stale_acks);
                return;
            }
            if !state.matches_ack(frame.seq) {
                debug!(
                    "stream {} stale ack seq {} (waiting {:?})",
                    frame.stream_id,
                    frame.seq,
                    state.ack.pending_seq()
                );
                Stats::bump(&shared.stats.stale_acks);
                return;
            }
            state.clear_waiting_ack();
            if let Some(elem) = state.ring.pop_front() {
                elem.finish(Some(CallbackStatus::AckReceived), &mut notes);
            }
        }
        debug!("stream {} acked seq {}", frame.stream_id, frame.seq);
        Stats::bump(&shared.stats.acks_received);
        dispatch_all(notes);
    }

    fn on_ping(&self, frame: &Frame<'_>) {
        let pushed = self
            .shared
            .pongs
            .lock()
            .push_back(PendingPong::new(frame.seq, frame.payload))
            .is_ok();
        if pushed {
            self.shared.wake.notify();
        } else {
            debug!("pong queue full, ping seq {} ignored", frame.seq);
        }
    }
}

impl<T: Transport + 'static> Drop for ReceiveScheduler<T> {
    fn drop(&mut self) {
        self.shared.receiving_active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PING_PAYLOAD_LEN;
    use crate::config::ManagerConfig;
    use crate::iobuffer::{CallbackReturn, IoBufferParam, receive_callback, send_callback};
    use crate::manager::{Manager, ReadMode};
    use crate::transport::MemoryTransport;
    use parking_lot::Mutex;

    fn setup(
        inputs: &[IoBufferParam],
        outputs: &[IoBufferParam],
    ) -> (Manager<MemoryTransport>, MemoryTransport) {
        let (local, peer) = MemoryTransport::pair();
        let manager =
            Manager::new(Arc::new(local), inputs, outputs, ManagerConfig::default()).unwrap();
        (manager, peer)
    }

    fn datagram(frames: &[Frame<'_>]) -> Vec<u8> {
        let mut buf = Vec::new();
        for frame in frames {
            frame.encode_into(&mut buf);
        }
        buf
    }

    #[test]
    fn test_data_routed_to_output() {
        let (manager, _peer) = setup(&[], &[IoBufferParam::output(20)]);
        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();

        recv.process_datagram(&datagram(&[
            Frame::data(20, 0, b"one"),
            Frame::data(20, 1, b"two"),
        ]));

        assert_eq!(manager.read_vec(20, ReadMode::NonBlocking).unwrap(), b"one");
        assert_eq!(manager.read_vec(20, ReadMode::NonBlocking).unwrap(), b"two");
        assert!(matches!(
            manager.read_vec(20, ReadMode::NonBlocking),
            Err(Error::Empty)
        ));
        assert_eq!(manager.stats().frames_received, 2);
    }

    #[test]
    fn test_acked_data_queues_ack_and_dedups() {
        let (manager, _peer) = setup(&[], &[IoBufferParam::output(20).with_ack(100, 3)]);
        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();

        let frame = datagram(&[Frame::data(20, 7, b"cmd")]);
        recv.process_datagram(&frame);
        recv.process_datagram(&frame);

        // both copies acknowledged, delivered once
        assert_eq!(manager.pending_input(ack_id(20)).unwrap(), 2);
        assert_eq!(manager.pending_output(20).unwrap(), 1);
        assert_eq!(manager.stats().duplicates, 1);
    }

    #[test]
    fn test_ack_releases_waiting_element() {
        let (manager, _peer) = setup(&[IoBufferParam::input(1).with_ack(100, 3)], &[]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback = send_callback(move |_, _, status| {
            sink.lock().push(status);
            CallbackReturn::Default
        });
        manager.send(1, b"A", Some(callback)).unwrap();
        manager.shared.inputs.get(1).unwrap().lock().mark_waiting_ack(0, 100);

        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();
        // stale ack is ignored
        recv.process_datagram(&datagram(&[Frame::ack(1, 5)]));
        assert_eq!(manager.pending_input(1).unwrap(), 1);
        assert_eq!(manager.stats().stale_acks, 1);

        recv.process_datagram(&datagram(&[Frame::ack(1, 0)]));
        assert_eq!(manager.pending_input(1).unwrap(), 0);
        assert!(!manager.is_waiting_ack(1).unwrap());
        assert_eq!(
            *events.lock(),
            vec![CallbackStatus::AckReceived, CallbackStatus::Free]
        );
    }

    #[test]
    fn test_ack_while_expiring_is_stale() {
        let (manager, _peer) = setup(&[IoBufferParam::input(1).with_ack(100, 0)], &[]);
        manager.send(1, b"A", None).unwrap();
        {
            let mut state = manager.shared.inputs.get(1).unwrap().lock();
            state.mark_waiting_ack(0, 100);
            state.ack.mark_expiring();
        }

        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();
        recv.process_datagram(&datagram(&[Frame::ack(1, 0)]));

        assert_eq!(manager.pending_input(1).unwrap(), 1);
        assert_eq!(manager.stats().stale_acks, 1);
        assert_eq!(manager.stats().acks_received, 0);
    }

    #[test]
    fn test_unknown_stream_discarded() {
        let (manager, _peer) = setup(&[IoBufferParam::input(1)], &[IoBufferParam::output(2)]);
        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();

        recv.process_datagram(&datagram(&[Frame::data(99, 0, b"?"), Frame::ack(1, 0)]));
        assert_eq!(manager.stats().unknown_stream, 2);
        assert_eq!(manager.pending_output(2).unwrap(), 0);
    }

    #[test]
    fn test_overflow_drops_and_hook() {
        let (local, _peer) = MemoryTransport::pair();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let manager = Manager::builder(Arc::new(local))
            .output(IoBufferParam::output(3).with_capacity(1))
            .on_receive(receive_callback(move |id, data, status| {
                sink.lock().push((id, data.to_vec(), status));
            }))
            .build()
            .unwrap();
        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();

        recv.process_datagram(&datagram(&[Frame::data(3, 0, b"a"), Frame::data(3, 1, b"b")]));
        assert_eq!(manager.pending_output(3).unwrap(), 1);
        assert_eq!(manager.stats().overflow_drops, 1);
        assert_eq!(
            *seen.lock(),
            vec![(3, b"a".to_vec(), ReceiveStatus::Received)]
        );
    }

    #[test]
    fn test_malformed_tail_counted() {
        let (manager, _peer) = setup(&[], &[IoBufferParam::output(4)]);
        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();

        let mut bytes = datagram(&[Frame::data(4, 0, b"ok")]);
        bytes.extend_from_slice(&[4, 0x7F, 0]);
        recv.process_datagram(&bytes);

        assert_eq!(manager.pending_output(4).unwrap(), 1);
        assert_eq!(manager.stats().invalid_frames, 1);
    }

    #[test]
    fn test_ping_queues_pong() {
        let (manager, _peer) = setup(&[], &[]);
        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();

        let stamp = [1u8; PING_PAYLOAD_LEN];
        recv.process_datagram(&datagram(&[Frame::ping(9, &stamp)]));

        let pongs = manager.shared.pongs.lock();
        assert_eq!(pongs.len(), 1);
        assert_eq!(pongs.front().map(|p| (p.seq, p.payload().to_vec())), Some((9, stamp.to_vec())));
    }

    #[test]
    fn test_pong_updates_latency() {
        let (manager, _peer) = setup(&[], &[]);
        let recv = ReceiveScheduler::claim(manager.shared.clone()).unwrap();
        assert!(manager.estimated_latency().is_none());

        let stamp = manager.shared.now_us().to_be_bytes();
        recv.process_datagram(&datagram(&[Frame::pong(0, &stamp)]));
        assert!(manager.estimated_latency().is_some());
    }
}
