//! End-to-end scenarios with running send and receive loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use xnetwork::{
    CallbackReturn, CallbackStatus, Error, Frame, FrameType, INFINITE_RETRY, IoBufferParam,
    Manager, ManagerConfig, MemoryTransport, ReadMode, Transport, TransportError, send_callback,
};

const WAIT: Duration = Duration::from_secs(5);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type Events = Arc<Mutex<Vec<CallbackStatus>>>;

fn recorder() -> (xnetwork::SendCallback, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback = send_callback(move |_, _, status| {
        sink.lock().push(status);
        CallbackReturn::Default
    });
    (callback, events)
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Reads the next frame the manager put on the wire.
fn next_frame(peer: &MemoryTransport) -> Option<(u8, FrameType, u8, Vec<u8>)> {
    let datagram = peer.take_timeout(WAIT)?;
    let (frame, _) = Frame::decode(&datagram).ok()?;
    Some((
        frame.stream_id,
        frame.frame_type,
        frame.seq,
        frame.payload.to_vec(),
    ))
}

fn encode(frame: Frame<'_>) -> Vec<u8> {
    let mut buf = Vec::new();
    frame.encode_into(&mut buf);
    buf
}

#[test]
fn acknowledged_send_reports_ack() {
    init_logger();
    let (local, peer) = MemoryTransport::pair();
    let manager = Manager::new(
        Arc::new(local),
        &[IoBufferParam::input(1).with_ack(150, 3)],
        &[],
        ManagerConfig::default(),
    )
    .unwrap();
    manager.start().unwrap();

    let (callback, events) = recorder();
    manager.send(1, b"A", Some(callback)).unwrap();

    assert_eq!(
        next_frame(&peer),
        Some((1, FrameType::Data, 0, b"A".to_vec()))
    );
    peer.transmit(&encode(Frame::ack(1, 0))).unwrap();

    assert!(wait_for(|| events.lock().len() == 3));
    assert_eq!(
        *events.lock(),
        vec![
            CallbackStatus::Sent,
            CallbackStatus::AckReceived,
            CallbackStatus::Free
        ]
    );
    assert_eq!(manager.pending_input(1).unwrap(), 0);
    assert_eq!(manager.stats().acks_received, 1);
    manager.close();
}

#[test]
fn unacknowledged_send_times_out_after_retries() {
    init_logger();
    let (local, peer) = MemoryTransport::pair();
    let manager = Manager::new(
        Arc::new(local),
        &[IoBufferParam::input(1).with_ack(20, 2)],
        &[],
        ManagerConfig::default(),
    )
    .unwrap();
    manager.start().unwrap();

    let (callback, events) = recorder();
    manager.send(1, b"A", Some(callback)).unwrap();

    assert!(wait_for(|| events.lock().contains(&CallbackStatus::Free)));
    assert_eq!(
        *events.lock(),
        vec![
            CallbackStatus::Sent,
            CallbackStatus::Timeout,
            CallbackStatus::Free
        ]
    );
    assert_eq!(manager.pending_input(1).unwrap(), 0);

    // nothing more goes out for the dropped element
    thread::sleep(Duration::from_millis(100));
    let mut transmissions = 0;
    while let Some(datagram) = peer.try_take() {
        let (frame, _) = Frame::decode(&datagram).unwrap();
        assert_eq!(frame.payload, b"A");
        transmissions += 1;
    }
    assert_eq!(transmissions, 3);
    manager.close();
}

#[test]
fn stale_ack_does_not_release() {
    init_logger();
    let (local, peer) = MemoryTransport::pair();
    let manager = Manager::new(
        Arc::new(local),
        &[IoBufferParam::input(1).with_ack(10_000, 3)],
        &[],
        ManagerConfig::default(),
    )
    .unwrap();
    manager.start().unwrap();

    manager.send(1, b"A", None).unwrap();
    assert!(next_frame(&peer).is_some());

    peer.transmit(&encode(Frame::ack(1, 42))).unwrap();
    assert!(wait_for(|| manager.stats().stale_acks == 1));
    assert!(manager.is_waiting_ack(1).unwrap());
    assert_eq!(manager.pending_input(1).unwrap(), 1);

    peer.transmit(&encode(Frame::ack(1, 0))).unwrap();
    assert!(wait_for(|| manager.pending_input(1).unwrap() == 0));
    manager.close();
}

#[test]
fn buffer_full_leaves_ring_unchanged() {
    init_logger();
    let (local, _peer) = MemoryTransport::pair();
    // not started: nothing drains the ring
    let manager = Manager::new(
        Arc::new(local),
        &[IoBufferParam::input(1).with_capacity(2)],
        &[],
        ManagerConfig::default(),
    )
    .unwrap();

    manager.send(1, b"1", None).unwrap();
    manager.send(1, b"2", None).unwrap();
    assert!(matches!(manager.send(1, b"3", None), Err(Error::BufferFull)));
    assert_eq!(manager.pending_input(1).unwrap(), 2);
}

#[test]
fn best_effort_stream_keeps_order() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let sender = Manager::new(
        Arc::new(a),
        &[IoBufferParam::input(5).with_capacity(64)],
        &[],
        ManagerConfig::default(),
    )
    .unwrap();
    let receiver = Manager::new(
        Arc::new(b),
        &[],
        &[IoBufferParam::output(5).with_capacity(64)],
        ManagerConfig::default(),
    )
    .unwrap();
    receiver.start().unwrap();
    sender.start().unwrap();

    for i in 0..50u8 {
        sender.send(5, [i].as_slice(), None).unwrap();
    }
    for i in 0..50u8 {
        let data = receiver.read_vec(5, ReadMode::Timeout(WAIT)).unwrap();
        assert_eq!(data, [i]);
    }

    sender.close();
    receiver.close();
}

/// Drops every `n`-th datagram in both directions.
struct LossyTransport {
    inner: MemoryTransport,
    every: usize,
    count: AtomicUsize,
}

impl Transport for LossyTransport {
    fn transmit(&self, frame: &[u8]) -> Result<(), TransportError> {
        if self.count.fetch_add(1, Ordering::Relaxed) % self.every == self.every - 1 {
            return Ok(());
        }
        self.inner.transmit(frame)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.inner.receive(buf, timeout)
    }
}

#[test]
fn acknowledged_stream_survives_loss() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let lossy = |inner| {
        Arc::new(LossyTransport {
            inner,
            every: 3,
            count: AtomicUsize::new(0),
        })
    };
    let param = |p: IoBufferParam| p.with_ack(10, INFINITE_RETRY).with_capacity(32);

    let sender = Manager::new(
        lossy(a),
        &[param(IoBufferParam::input(7))],
        &[],
        ManagerConfig::default(),
    )
    .unwrap();
    let receiver = Manager::new(
        lossy(b),
        &[],
        &[param(IoBufferParam::output(7))],
        ManagerConfig::default(),
    )
    .unwrap();
    receiver.start().unwrap();
    sender.start().unwrap();

    let acked = Arc::new(AtomicUsize::new(0));
    for i in 0..20u8 {
        let acked = acked.clone();
        let callback = send_callback(move |_, _, status| {
            if status == CallbackStatus::AckReceived {
                acked.fetch_add(1, Ordering::Relaxed);
            }
            CallbackReturn::Default
        });
        sender.send(7, vec![i, i], Some(callback)).unwrap();
    }

    for i in 0..20u8 {
        let data = receiver.read_vec(7, ReadMode::Timeout(WAIT)).unwrap();
        assert_eq!(data, [i, i]);
    }
    assert!(wait_for(|| acked.load(Ordering::Relaxed) == 20));

    // retransmissions were not delivered twice
    thread::sleep(Duration::from_millis(50));
    assert!(matches!(
        receiver.read_vec(7, ReadMode::NonBlocking),
        Err(Error::Empty)
    ));
    assert!(sender.stats().retransmissions > 0);

    sender.close();
    receiver.close();
}

#[test]
fn ping_measures_latency() {
    init_logger();
    let (a, b) = MemoryTransport::pair();
    let pinger = Manager::new(
        Arc::new(a),
        &[],
        &[],
        ManagerConfig::default().with_ping_interval_ms(5),
    )
    .unwrap();
    let responder = Manager::new(Arc::new(b), &[], &[], ManagerConfig::default()).unwrap();
    responder.start().unwrap();
    pinger.start().unwrap();

    assert!(wait_for(|| pinger.estimated_latency().is_some()));
    assert!(pinger.estimated_latency().unwrap() < WAIT);
    assert!(responder.estimated_latency().is_none());

    pinger.close();
    responder.close();
}

#[test]
fn read_modes() {
    init_logger();
    let (local, peer) = MemoryTransport::pair();
    let manager = Arc::new(
        Manager::new(
            Arc::new(local),
            &[],
            &[IoBufferParam::output(3)],
            ManagerConfig::default(),
        )
        .unwrap(),
    );
    manager.start().unwrap();

    assert!(matches!(
        manager.read_vec(3, ReadMode::NonBlocking),
        Err(Error::Empty)
    ));
    let start = Instant::now();
    assert!(matches!(
        manager.read_vec(3, ReadMode::Timeout(Duration::from_millis(30))),
        Err(Error::Timeout)
    ));
    assert!(start.elapsed() >= Duration::from_millis(30));

    peer.transmit(&encode(Frame::data(3, 0, b"hello"))).unwrap();
    let mut small = [0u8; 2];
    assert!(wait_for(|| manager.pending_output(3).unwrap() == 1));
    assert!(matches!(
        manager.read(3, &mut small, ReadMode::NonBlocking),
        Err(Error::BufferSize {
            needed: 5,
            capacity: 2
        })
    ));
    let mut out = [0u8; 16];
    let n = manager.read(3, &mut out, ReadMode::Blocking).unwrap();
    assert_eq!(&out[..n], b"hello");

    let reader = {
        let manager = manager.clone();
        thread::spawn(move || manager.read_vec(3, ReadMode::Blocking))
    };
    thread::sleep(Duration::from_millis(20));
    manager.stop();
    assert!(matches!(reader.join().unwrap(), Err(Error::Stopped)));
    manager.join();
}

#[test]
fn flush_while_running() {
    init_logger();
    let (local, _peer) = MemoryTransport::pair();
    let manager = Manager::new(
        Arc::new(local),
        &[IoBufferParam::input(1).with_ack(10_000, 3).with_capacity(8)],
        &[],
        ManagerConfig::default(),
    )
    .unwrap();
    manager.start().unwrap();

    let (callback, events) = recorder();
    manager.send(1, b"x", Some(callback.clone())).unwrap();
    manager.send(1, b"y", Some(callback)).unwrap();
    assert!(wait_for(|| events.lock().len() == 1));
    assert!(manager.is_waiting_ack(1).unwrap());

    manager.flush();
    assert_eq!(manager.pending_input(1).unwrap(), 0);
    assert!(!manager.is_waiting_ack(1).unwrap());
    assert_eq!(
        *events.lock(),
        vec![
            CallbackStatus::Sent,
            CallbackStatus::Cancel,
            CallbackStatus::Free,
            CallbackStatus::Cancel,
            CallbackStatus::Free
        ]
    );
    manager.close();
}
