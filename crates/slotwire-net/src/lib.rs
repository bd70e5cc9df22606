//! # slotwire-net
//!
//! Platform networking for slotwire (Linux/Unix).
//!
//! - `stream` - `TcpFrameSocket`, the non-blocking TCP socket collaborator
//! - `listener` - Listening socket setup and accept draining
//! - `table` - Fixed connection table issuing generation-tagged references
//! - `poller` - `poll(2)` readiness driver invoking `receive` per event
//!
//! ```ignore
//! let pool = SlotPool::new(&PoolConfig::from_env())?;
//! let mut table = ConnectionTable::new(pool.clone(), 256, &ConnectionConfig::from_env())?;
//! let listener = bind_listener(addr, DEFAULT_BACKLOG)?;
//! let mut poller = Poller::default();
//! loop {
//!     let report = poller.poll_once(&mut table, Some(listener.as_fd()))?;
//!     if report.accept_ready {
//!         accept_pending(&listener, &mut table)?;
//!     }
//!     pool.drain_outgoing(|msg| {
//!         // consume msg.payload(), then
//!         table.on_read_message(msg.connection());
//!     });
//! }
//! ```

pub mod stream;
pub mod listener;
pub mod table;
pub mod poller;

pub use stream::TcpFrameSocket;
pub use listener::{accept_pending, bind_listener, DEFAULT_BACKLOG};
pub use table::ConnectionTable;
pub use poller::{PollReport, Poller};
