//! # XNetwork - A Stream Multiplexing Network Manager
//!
//! XNetwork multiplexes many logical data streams over a single
//! unreliable transport and provides, per stream:
//!
//! - **Bounded queues**: every stream owns a fixed-capacity FIFO
//! - **Optional reliability**: stop-and-wait acknowledgment with timed
//!   retransmission and a retry budget
//! - **Best-effort delivery**: fire-and-forget streams for telemetry
//! - **Delivery callbacks**: sent, acknowledged, timed out, cancelled, freed
//! - **Latency probes**: periodic ping/pong round-trip estimation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! │          send(id, data)            read(id, buf)         │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Manager                               │
//! │  ┌──────────────────────┐   ┌──────────────────────┐    │
//! │  │ Input IO buffers     │   │ Output IO buffers    │    │
//! │  │ (+ ACK echo, id+128) │   │                      │    │
//! │  └──────────┬───────────┘   └──────────▲───────────┘    │
//! │  ┌──────────▼───────────┐   ┌──────────┴───────────┐    │
//! │  │ Send loop (ticks)    │   │ Receive loop         │    │
//! │  └──────────┬───────────┘   └──────────▲───────────┘    │
//! ├─────────────┼──────────────────────────┼────────────────┤
//! │             ▼       Transport          │                │
//! │        transmit(frame)          receive(buf, timeout)   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xnetwork::{IoBufferParam, Manager, ManagerConfig, ReadMode, UdpTransport};
//!
//! # fn main() -> xnetwork::Result<()> {
//! let transport = UdpTransport::connect("0.0.0.0:5000", "192.168.1.1:5001")
//!     .map_err(xnetwork::TransportError::from)?;
//!
//! let manager = Manager::new(
//!     Arc::new(transport),
//!     &[IoBufferParam::input(10).with_ack(150, 3)],
//!     &[IoBufferParam::output(20)],
//!     ManagerConfig::default(),
//! )?;
//! manager.start()?;
//!
//! manager.send(10, b"Hello".as_slice(), None)?;
//! let reply = manager.read_vec(20, ReadMode::Blocking)?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod buffer;
pub mod channel;
pub mod config;
pub mod core;
pub mod error;
pub mod iobuffer;
pub mod manager;
pub mod reliable;
pub mod transport;

// Re-export commonly used types
pub use config::ManagerConfig;
pub use self::core::{Frame, FrameType};
pub use error::{Error, Result, TransportError};
pub use iobuffer::{
    CallbackReturn, CallbackStatus, Direction, IoBufferParam, ReceiveCallback, ReceiveStatus,
    SendCallback, SendData, receive_callback, send_callback,
};
pub use manager::{Manager, ManagerBuilder, ReadMode};
pub use reliable::{INFINITE_RETRY, ManagerStats};
pub use transport::{MemoryTransport, Transport, UdpTransport};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Caller-visible stream ids are below this value.
pub const ID_MAX: u8 = 128;

/// Offset between a stream id and the id of its ACK echo companion.
pub const ACK_ID_OFFSET: u8 = 128;

/// Default send loop tick interval in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1;

/// Default receive loop blocking time in milliseconds.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 100;

/// Default receive buffer size in bytes.
pub const DEFAULT_RECEIVE_BUFFER_SIZE: usize = 4096;

/// Default acknowledgment timeout in milliseconds.
pub const DEFAULT_ACK_TIMEOUT_MS: u32 = 150;

/// Default maximum retransmissions of an acknowledged element.
pub const DEFAULT_MAX_RETRY: u32 = 5;

/// Default number of cells of an IO buffer ring.
pub const DEFAULT_RING_CAPACITY: usize = 16;

/// Default largest element, in bytes.
pub const DEFAULT_ELEMENT_MAX_SIZE: usize = 1024;

/// Returns the id of the ACK echo companion of stream `id`.
#[inline]
pub(crate) const fn ack_id(id: u8) -> u8 {
    id.wrapping_add(ACK_ID_OFFSET)
}
