//! Wakeup signal for the send loop.
//!
//! The send loop sleeps between ticks. The receive loop pokes it when an
//! ACK or a PONG must go out without waiting for the next tick, and
//! `stop()` pokes it so it notices the shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Sticky wakeup flag with a condvar for the sleeping side.
///
/// A notification sent while nobody sleeps is kept and consumed by the
/// next wait, so no wakeup is lost.
#[derive(Debug, Default)]
pub struct WakeNotifier {
    pending: AtomicBool,
    sleeping: Mutex<bool>,
    condvar: Condvar,
}

impl WakeNotifier {
    /// Creates a notifier with no pending wakeup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a wakeup.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        if *self.sleeping.lock() {
            self.condvar.notify_one();
        }
    }

    /// Consumes a pending wakeup without blocking.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::Acquire)
    }

    /// Sleeps until notified or until `timeout` elapses.
    ///
    /// Returns true if a wakeup was consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.take() {
            return true;
        }

        let mut sleeping = self.sleeping.lock();
        // a notify between the first check and the lock is seen here
        if self.take() {
            return true;
        }
        *sleeping = true;
        self.condvar.wait_for(&mut sleeping, timeout);
        *sleeping = false;

        self.take()
    }
}
