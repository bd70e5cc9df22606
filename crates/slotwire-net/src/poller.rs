//! Readiness driver
//!
//! One `poll(2)` pass over every Working or Closing connection that is not
//! backpressured (plus an optional listener), then `try_receive` on each
//! connection that came back readable or hung up. Closing connections are
//! also driven when quiet, so a graceful close finishes without traffic.
//!
//! Receives never wait for a pool slot: the caller usually drains the
//! outgoing queue on this same thread. Once the pool runs dry the pass stops
//! and reports `starved`; the untouched connections stay readable and are
//! picked up by the next pass after a drain.
//!
//! Teardown rules:
//! - readable with zero bytes available is end-of-stream: disconnect
//! - peer hung up and the bytes left cannot complete a frame: disconnect
//! - a fatal receive error (protocol or socket): disconnect
//! - a receive that ends in Disconnecting: disconnect
//!
//! A live peer that sent only part of a length prefix is taken out of read
//! polling (it stays registered for hangup) until more bytes arrive, so the
//! loop does not spin on bytes it cannot consume yet. Backpressured
//! connections are left out of the poll set until the dispatcher
//! acknowledges messages through `on_read_message`.

use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use slotwire_core::{ConnectionRef, ConnectionState, FrameSocket, ReceiveStatus, WireResult};
use tracing::{debug, trace, warn};

use crate::table::ConnectionTable;

/// Peer shut down its write side
#[cfg(any(target_os = "linux", target_os = "android"))]
const READ_HANGUP: PollFlags = PollFlags::from_bits_retain(libc::POLLRDHUP);
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const READ_HANGUP: PollFlags = PollFlags::empty();

/// What one pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Connections that were readable or hung up
    pub readable: usize,
    /// Frames committed to the outgoing queue
    pub delivered: usize,
    /// Connections torn down
    pub disconnected: usize,
    /// The listener has clients waiting
    pub accept_ready: bool,
    /// The pool ran out of free slots; drain the outgoing queue before the
    /// next pass
    pub starved: bool,
}

/// `poll(2)` driver for a connection table
#[derive(Debug)]
pub struct Poller {
    timeout: Duration,
    targets: Vec<ConnectionRef>,
    /// Ready connections and whether the peer hung up
    ready: Vec<(ConnectionRef, bool)>,
    closing: Vec<ConnectionRef>,
    /// Connections holding a partial length prefix, with the byte count
    /// seen when they stalled
    stalled: Vec<(ConnectionRef, usize)>,
}

impl Poller {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            targets: Vec::new(),
            ready: Vec::new(),
            closing: Vec::new(),
            stalled: Vec::new(),
        }
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one readiness pass.
    pub fn poll_once<S>(
        &mut self,
        table: &mut ConnectionTable<S>,
        listener: Option<BorrowedFd<'_>>,
    ) -> WireResult<PollReport>
    where
        S: FrameSocket + AsFd,
    {
        let mut report = PollReport::default();

        // A stall ends when the peer sends more or the connection goes away
        self.stalled.retain(|&(reference, seen)| {
            table.get(reference).is_some_and(|c| {
                c.state() == ConnectionState::Working
                    && matches!(c.socket().map(|s| s.available()), Some(Ok(n)) if n == seen)
            })
        });

        self.targets.clear();
        self.ready.clear();
        self.closing.clear();
        {
            let mut fds = Vec::with_capacity(table.len() + 1);
            for conn in table.iter() {
                if conn.is_backpressured() {
                    continue;
                }
                let reference = conn.reference();
                match conn.state() {
                    ConnectionState::Working => {}
                    ConnectionState::Closing => self.closing.push(reference),
                    _ => continue,
                }
                let Some(socket) = conn.socket() else {
                    continue;
                };
                let events = if self.stalled.iter().any(|(r, _)| *r == reference) {
                    READ_HANGUP
                } else {
                    PollFlags::POLLIN | READ_HANGUP
                };
                self.targets.push(reference);
                fds.push(PollFd::new(socket.as_fd(), events));
            }
            if let Some(fd) = listener {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
            }
            if fds.is_empty() {
                std::thread::sleep(self.timeout);
                return Ok(report);
            }

            // Closing connections are driven this pass whatever poll says
            let timeout_ms = if self.closing.is_empty() {
                u16::try_from(self.timeout.as_millis()).unwrap_or(u16::MAX)
            } else {
                0
            };
            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(report),
                Err(e) => return Err(io::Error::from(e).into()),
            }

            let hangup_mask = PollFlags::POLLHUP | PollFlags::POLLERR | READ_HANGUP;
            if listener.is_some() {
                report.accept_ready = fds
                    .last()
                    .and_then(|fd| fd.revents())
                    .is_some_and(|r| r.intersects(PollFlags::POLLIN | hangup_mask));
            }
            for (reference, fd) in self.targets.iter().zip(&fds) {
                let Some(revents) = fd.revents() else {
                    continue;
                };
                let hangup = revents.intersects(hangup_mask);
                if hangup || revents.contains(PollFlags::POLLIN) {
                    self.ready.push((*reference, hangup));
                }
            }
        }

        report.readable = self.ready.len();
        let ready = std::mem::take(&mut self.ready);
        let closing = std::mem::take(&mut self.closing);
        let quiet_closing = closing
            .iter()
            .filter(|r| !ready.iter().any(|(ready_ref, _)| ready_ref == *r))
            .map(|r| (*r, false));
        for (reference, hangup) in ready.iter().copied().chain(quiet_closing) {
            if self.drive(table, reference, hangup, &mut report) {
                debug!(connection = %reference, "pool starved, ending pass");
                report.starved = true;
                break;
            }
        }
        self.ready = ready;
        self.closing = closing;

        trace!(?report, stalled = self.stalled.len(), "poll pass");
        Ok(report)
    }

    /// One receive on a selected connection, with teardown. Returns `true`
    /// when the pool had no slot for the connection's next frame.
    fn drive<S: FrameSocket>(
        &mut self,
        table: &mut ConnectionTable<S>,
        reference: ConnectionRef,
        hangup: bool,
        report: &mut PollReport,
    ) -> bool {
        let Some(conn) = table.get(reference) else {
            return false;
        };

        // Readable with nothing to read: the peer closed its end
        let eof = match conn.socket().map(|s| s.available()) {
            Some(Ok(0)) => conn.state() == ConnectionState::Working,
            Some(Ok(_)) => false,
            Some(Err(e)) => {
                warn!(connection = %reference, error = %e, "socket query failed");
                true
            }
            None => true,
        };
        if eof {
            debug!(connection = %reference, mid_frame = conn.is_mid_frame(), "peer closed");
            table.disconnect(reference);
            report.disconnected += 1;
            return false;
        }

        let outcome = match table.try_receive(reference) {
            Ok(outcome) => outcome,
            Err(e) if e.is_fatal() => {
                warn!(connection = %reference, error = %e, "tearing down connection");
                table.disconnect(reference);
                report.disconnected += 1;
                return false;
            }
            Err(e) => {
                debug!(connection = %reference, error = %e, "receive deferred");
                return false;
            }
        };
        report.delivered += outcome.delivered;

        match outcome.status {
            ReceiveStatus::Disconnecting => {
                table.disconnect(reference);
                report.disconnected += 1;
            }
            ReceiveStatus::Starved => return true,
            ReceiveStatus::Backpressured => {}
            // Everything readable was consumed; after a hangup nothing more
            // can arrive to complete the pending prefix or payload
            ReceiveStatus::Idle | ReceiveStatus::Partial if hangup => {
                debug!(connection = %reference, "peer hung up mid-frame");
                table.disconnect(reference);
                report.disconnected += 1;
            }
            ReceiveStatus::Idle => {
                let leftover = table
                    .get(reference)
                    .filter(|c| c.state() == ConnectionState::Working)
                    .and_then(|c| c.socket())
                    .and_then(|s| s.available().ok())
                    .unwrap_or(0);
                if leftover > 0 {
                    trace!(connection = %reference, bytes = leftover, "partial length prefix");
                    self.stalled.push((reference, leftover));
                }
            }
            ReceiveStatus::Partial => {}
        }
        false
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}
