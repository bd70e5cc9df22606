//! # slotwire-core
//!
//! Core types for slotwire: length-prefixed TCP framing on top of a fixed
//! pool of reusable wire buffers.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Socket implementations, the connection table and the readiness driver
//! live in `slotwire-net`.
//!
//! ## Modules
//!
//! - `buffer` - Fixed-capacity wire buffer with an in-band header
//! - `busy` - Busy/Free lock and the value-carrying `BusyCell`
//! - `pool` - Buffer slot pool and outgoing queue
//! - `sender` - Single-use message sender handle
//! - `connection` - Per-connection framing state machine
//! - `socket` - Socket collaborator trait
//! - `id` - Connection reference type
//! - `state` - Connection state enum
//! - `error` - Error types
//! - `config` - Pool and connection configuration
//! - `env` - Environment variable utilities

pub mod buffer;
pub mod busy;
pub mod pool;
pub mod sender;
pub mod connection;
pub mod socket;
pub mod id;
pub mod state;
pub mod error;
pub mod config;
pub mod env;

// Re-exports for convenience
pub use buffer::{WireBuffer, HEADER_SIZE};
pub use busy::{BusyCell, BusyGuard, BusyLock, BusyScope, BusyState};
pub use pool::{OutgoingMessage, PoolStats, SlotLease, SlotPool};
pub use sender::MessageSender;
pub use connection::{Connection, ReceiveOutcome, ReceiveStatus};
pub use socket::{length_prefix, FrameSocket, LENGTH_PREFIX_SIZE};
pub use id::ConnectionRef;
pub use state::ConnectionState;
pub use error::{ProtocolError, QueueFullError, WireError, WireResult};
pub use config::{ConnectionConfig, PoolConfig};
pub use env::{env_get, env_get_opt};
