//! Manager configuration.

use std::time::Duration;

use crate::{DEFAULT_RECEIVE_BUFFER_SIZE, DEFAULT_RECEIVE_TIMEOUT_MS, DEFAULT_TICK_INTERVAL_MS};

/// Manager-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Interval between two send loop ticks.
    pub tick_interval: Duration,

    /// How long the receive loop blocks in the transport per iteration.
    pub receive_timeout: Duration,

    /// Staging capacity in bytes. `None` sizes it to hold one maximal
    /// frame of every input stream.
    pub send_buffer_size: Option<usize>,

    /// Receive buffer size in bytes, raised if an output stream needs more.
    pub receive_buffer_size: usize,

    /// Period of latency probes. `None` disables them.
    pub ping_interval: Option<Duration>,
}

impl ManagerConfig {
    /// Creates a configuration with the default intervals and sizes.
    pub fn new() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            receive_timeout: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS),
            send_buffer_size: None,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER_SIZE,
            ping_interval: None,
        }
    }

    /// Sets the send loop tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets how long one receive call may block.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Sets the staging capacity explicitly.
    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = Some(size);
        self
    }

    /// Sets the minimum receive buffer size.
    pub fn with_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size;
        self
    }

    /// Enables latency probes every `interval_ms` milliseconds; zero disables them.
    pub fn with_ping_interval_ms(mut self, interval_ms: u64) -> Self {
        self.ping_interval = (interval_ms > 0).then(|| Duration::from_millis(interval_ms));
        self
    }

    /// Converts a millisecond duration into a whole number of ticks, rounding up.
    pub(crate) fn ms_to_ticks(&self, ms: u64) -> u32 {
        let tick_us = self.tick_interval.as_micros().max(1);
        let ticks = (ms as u128 * 1000).div_ceil(tick_us);
        ticks.min(u32::MAX as u128) as u32
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
