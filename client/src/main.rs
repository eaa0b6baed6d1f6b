use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use xnetwork::{
    CallbackReturn, CallbackStatus, Error, IoBufferParam, Manager, ManagerConfig, ReadMode,
    UdpTransport, send_callback,
};

const DEFAULT_LOCAL_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:5001";

// client -> server
const RELIABLE_OUT: u8 = 10;
const BEST_EFFORT_OUT: u8 = 11;
// server -> client
const RELIABLE_IN: u8 = 20;
const BEST_EFFORT_IN: u8 = 21;

const ELEMENT_SIZE: usize = 256;
const MESSAGE_COUNT: usize = 32;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let local = args.next().unwrap_or_else(|| DEFAULT_LOCAL_ADDR.to_string());
    let server = args.next().unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string());

    info!("Connecting to server at {}...", server);
    let transport = UdpTransport::connect(&local, &server).expect("Failed to bind UDP socket");

    let manager = Manager::new(
        Arc::new(transport),
        &[
            IoBufferParam::input(RELIABLE_OUT)
                .with_ack(100, 5)
                .with_capacity(MESSAGE_COUNT)
                .with_element_max_size(ELEMENT_SIZE),
            IoBufferParam::input(BEST_EFFORT_OUT)
                .with_capacity(MESSAGE_COUNT)
                .with_element_max_size(ELEMENT_SIZE)
                .with_sending_wait_time_ms(2),
        ],
        &[
            IoBufferParam::output(RELIABLE_IN)
                .with_ack(100, 5)
                .with_capacity(MESSAGE_COUNT)
                .with_element_max_size(ELEMENT_SIZE),
            IoBufferParam::output(BEST_EFFORT_IN)
                .with_capacity(MESSAGE_COUNT)
                .with_element_max_size(ELEMENT_SIZE),
        ],
        ManagerConfig::default().with_ping_interval_ms(200),
    )
    .expect("Failed to create manager");
    manager.start().expect("Failed to start manager");

    let acked = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let callback = {
        let acked = acked.clone();
        let lost = lost.clone();
        send_callback(move |id, data, status| {
            match status {
                CallbackStatus::AckReceived => {
                    acked.fetch_add(1, Ordering::Relaxed);
                }
                CallbackStatus::Timeout => {
                    warn!("stream {}: {} bytes never acknowledged", id, data.len());
                    lost.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
            CallbackReturn::Default
        })
    };

    info!("Sending {} messages on each stream...", MESSAGE_COUNT);
    let start = Instant::now();
    for i in 0..MESSAGE_COUNT {
        let message = format!("message {}", i).into_bytes();
        manager
            .send(RELIABLE_OUT, message.as_slice(), Some(callback.clone()))
            .expect("Failed to queue reliable message");
        manager
            .send(BEST_EFFORT_OUT, message, None)
            .expect("Failed to queue best-effort message");
    }

    let mut reliable = 0;
    while reliable < MESSAGE_COUNT {
        match manager.read_vec(RELIABLE_IN, ReadMode::Timeout(Duration::from_secs(5))) {
            Ok(echo) => {
                info!("echo: {}", String::from_utf8_lossy(&echo));
                reliable += 1;
            }
            Err(Error::Timeout) => {
                warn!("Server stopped answering");
                break;
            }
            Err(err) => {
                warn!("Read failed: {}", err);
                break;
            }
        }
    }

    let mut best_effort = 0;
    while manager
        .read_vec(BEST_EFFORT_IN, ReadMode::Timeout(Duration::from_millis(200)))
        .is_ok()
    {
        best_effort += 1;
    }
    let elapsed = start.elapsed();

    info!("=== Echo Complete ===");
    info!("Reliable echoes: {}/{}", reliable, MESSAGE_COUNT);
    info!("Best-effort echoes: {}/{}", best_effort, MESSAGE_COUNT);
    info!(
        "Acknowledged: {}, lost: {}",
        acked.load(Ordering::Relaxed),
        lost.load(Ordering::Relaxed)
    );
    info!("Time: {:.2} seconds", elapsed.as_secs_f64());
    match manager.estimated_latency() {
        Some(rtt) => info!("Round trip: {:?}", rtt),
        None => info!("Round trip: unknown"),
    }
    let stats = manager.stats();
    info!(
        "Frames sent: {}, retransmit rate: {:.1}%, success rate: {:.1}%",
        stats.frames_sent,
        stats.retransmit_rate(),
        stats.success_rate()
    );

    manager.close();
}
