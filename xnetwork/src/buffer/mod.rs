//! Buffer management for the network manager.
//!
//! This module provides buffer abstractions:
//! - RingBuffer: fixed-capacity FIFO backing every IO buffer
//! - SendStaging: byte-bounded area where the send loop serialises frames

mod ring;
mod staging;

pub use ring::RingBuffer;
pub use staging::SendStaging;
