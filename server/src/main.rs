use log::{error, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use xnetwork::{Error, IoBufferParam, Manager, ManagerConfig, ReadMode, UdpTransport};

const DEFAULT_LOCAL_ADDR: &str = "127.0.0.1:5001";
const DEFAULT_CLIENT_ADDR: &str = "127.0.0.1:5000";

// client -> server
const RELIABLE_IN: u8 = 10;
const BEST_EFFORT_IN: u8 = 11;
// server -> client
const RELIABLE_OUT: u8 = 20;
const BEST_EFFORT_OUT: u8 = 21;

const ELEMENT_SIZE: usize = 256;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let local = args.next().unwrap_or_else(|| DEFAULT_LOCAL_ADDR.to_string());
    let client = args.next().unwrap_or_else(|| DEFAULT_CLIENT_ADDR.to_string());

    let transport = UdpTransport::connect(&local, &client).expect("Failed to bind UDP socket");
    info!("Server listening on {}, peer {}", local, client);

    let manager = Manager::new(
        Arc::new(transport),
        &[
            IoBufferParam::input(RELIABLE_OUT)
                .with_ack(100, 5)
                .with_capacity(64)
                .with_element_max_size(ELEMENT_SIZE),
            IoBufferParam::input(BEST_EFFORT_OUT)
                .with_capacity(64)
                .with_element_max_size(ELEMENT_SIZE),
        ],
        &[
            IoBufferParam::output(RELIABLE_IN)
                .with_ack(100, 5)
                .with_capacity(64)
                .with_element_max_size(ELEMENT_SIZE),
            IoBufferParam::output(BEST_EFFORT_IN)
                .with_capacity(64)
                .with_element_max_size(ELEMENT_SIZE),
        ],
        ManagerConfig::default(),
    )
    .expect("Failed to create manager");
    let manager = Arc::new(manager);
    manager.start().expect("Failed to start manager");

    {
        let manager = manager.clone();
        ctrlc::set_handler(move || manager.stop()).expect("Failed to set Ctrl-C handler");
    }
    info!("Press Ctrl-C to stop");

    let workers: Vec<_> = [(RELIABLE_IN, RELIABLE_OUT), (BEST_EFFORT_IN, BEST_EFFORT_OUT)]
        .into_iter()
        .map(|(from, to)| {
            let manager = manager.clone();
            thread::Builder::new()
                .name(format!("echo-{}", from))
                .spawn(move || echo(&manager, from, to))
                .expect("Failed to spawn echo thread")
        })
        .collect();

    for worker in workers {
        if worker.join().is_err() {
            error!("echo thread panicked");
            manager.stop();
        }
    }
    manager.join();
    info!("Server finished, stats {:?}", manager.stats());
}

/// Sends back everything read on `from` through `to`.
fn echo(manager: &Manager<UdpTransport>, from: u8, to: u8) {
    let mut buf = [0u8; ELEMENT_SIZE];
    let mut echoed = 0u64;
    loop {
        match manager.read(from, &mut buf, ReadMode::Timeout(Duration::from_secs(1))) {
            Ok(n) => {
                // the ring may be momentarily full while the client is slow
                loop {
                    match manager.send(to, &buf[..n], None) {
                        Ok(()) => break,
                        Err(Error::BufferFull) if manager.is_running() => {
                            thread::sleep(Duration::from_millis(1))
                        }
                        Err(err) => {
                            warn!("stream {}: cannot echo: {}", to, err);
                            break;
                        }
                    }
                }
                echoed += 1;
            }
            Err(Error::Timeout) => {}
            Err(Error::Stopped) => break,
            Err(err) => {
                warn!("stream {}: read failed: {}", from, err);
                break;
            }
        }
        if echoed > 0 && echoed % 100 == 0 {
            info!("stream {}: echoed {} elements", from, echoed);
        }
    }
}
