//! Error types for slotwire

use core::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::id::ConnectionRef;
use crate::state::ConnectionState;

/// Result type for slotwire operations
pub type WireResult<T> = Result<T, WireError>;

/// Errors that can occur while framing, pooling or driving connections
#[derive(Debug, Error)]
pub enum WireError {
    /// Peer sent bytes that violate the framing protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// No slot became free within the configured acquire timeout
    #[error("no free slot after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// Operation not allowed in the connection's current state
    #[error("invalid connection state: expected {expected}, found {actual}")]
    InvalidState {
        expected: ConnectionState,
        actual: ConnectionState,
    },

    /// Reference does not name a live connection (never issued, or its
    /// connection has since been disconnected)
    #[error("unknown or stale connection {0}")]
    UnknownConnection(ConnectionRef),

    /// Connection table has no free entry
    #[error("no connection slots available (capacity {capacity})")]
    NoConnectionSlots { capacity: usize },

    /// Configuration rejected by `validate`
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Socket-level failure
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// Whether the connection that produced this error must be torn down.
    ///
    /// Protocol violations and socket failures are fatal for the connection.
    /// Pool exhaustion is not: the validated frame length is kept and the
    /// slot acquisition is retried on the next receive.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WireError::Protocol(_) | WireError::Io(_))
    }
}

/// Framing protocol violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Length prefix outside `(0, max]`
    #[error("frame length {length} out of range (0, {max}]")]
    LengthOutOfRange { length: i64, max: usize },
}

/// Error returned when a plain commit finds the outgoing queue full.
///
/// Carries the rejected item back so the caller can retry, grow the queue
/// or cancel.
#[derive(Debug)]
pub struct QueueFullError<T>(pub T);

impl<T> QueueFullError<T> {
    /// Take back the rejected item
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Display for QueueFullError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "outgoing queue full")
    }
}

impl<T: fmt::Debug> std::error::Error for QueueFullError<T> {}
