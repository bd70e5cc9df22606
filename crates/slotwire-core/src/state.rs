//! Connection lifecycle state

use core::fmt;

/// State of a [`Connection`](crate::connection::Connection)
///
/// ```text
/// WaitingForStart --start--> Working --close--> Closing --receive--> Disconnecting
///        ^                                                                |
///        +----------------------------disconnect--------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket bound; the object is idle and reusable
    #[default]
    WaitingForStart = 0,

    /// Normal receive loop
    Working = 1,

    /// Shutdown requested; a pending partial frame may still complete
    Closing = 2,

    /// Terminal, awaiting `disconnect`
    Disconnecting = 3,
}

impl ConnectionState {
    /// Check if a socket is bound in this state
    #[inline]
    pub const fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Working | ConnectionState::Closing)
    }

    /// Check if the owner should tear the connection down
    #[inline]
    pub const fn needs_disconnect(&self) -> bool {
        matches!(self, ConnectionState::Disconnecting)
    }
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnectionState::WaitingForStart,
            1 => ConnectionState::Working,
            2 => ConnectionState::Closing,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::WaitingForStart, // Default for invalid values
        }
    }
}

impl From<ConnectionState> for u8 {
    fn from(state: ConnectionState) -> u8 {
        state as u8
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::WaitingForStart => "waiting-for-start",
            ConnectionState::Working => "working",
            ConnectionState::Closing => "closing",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}
