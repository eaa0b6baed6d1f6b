//! Error types for the network manager.

use thiserror::Error;

/// Failure reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing arrived before the receive deadline.
    #[error("transport receive timed out")]
    Timeout,

    /// The underlying channel is gone; no more frames will arrive.
    #[error("transport closed")]
    Closed,

    /// Operating system level failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the manager and its IO buffers.
#[derive(Debug, Error)]
pub enum Error {
    /// Resource exhaustion while building the manager or spawning a loop.
    #[error("allocation failed")]
    Alloc,

    /// Invalid stream id, id collision, wrong direction or malformed parameter.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// The IO buffer ring is full; the element was not queued.
    #[error("buffer full")]
    BufferFull,

    /// Nothing to read right now.
    #[error("buffer empty")]
    Empty,

    /// A bounded wait expired.
    #[error("timed out")]
    Timeout,

    /// The underlying channel failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The caller's buffer cannot hold the element.
    #[error("buffer too small: need {needed} bytes, have {capacity}")]
    BufferSize {
        /// Size of the queued element.
        needed: usize,
        /// Size of the buffer supplied by the caller.
        capacity: usize,
    },

    /// The manager was stopped while the call was waiting.
    #[error("manager stopped")]
    Stopped,

    /// A scheduler loop is already being run by another context.
    #[error("loop already running")]
    AlreadyRunning,

    /// Bytes on the wire do not form a valid frame.
    #[error("invalid frame")]
    InvalidFrame,
}

impl Error {
    pub(crate) fn bad_parameter(msg: impl Into<String>) -> Self {
        Error::BadParameter(msg.into())
    }

    /// Returns true for errors a caller is expected to retry later.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::BufferFull | Error::Empty | Error::Timeout | Error::Transport(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
