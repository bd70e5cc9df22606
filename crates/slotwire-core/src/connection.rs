//! Connection state machine
//!
//! Turns one non-blocking byte stream into length-prefixed frames. Each
//! frame is read straight into a pool slot, across as many `receive` calls
//! as the socket needs, and committed to the pool's outgoing queue tagged
//! with the connection reference once complete.
//!
//! ```text
//! WaitingForStart --start--> Working --close--> Closing --(idle)--> Disconnecting
//!        ^                                                                |
//!        +-------------------------- disconnect --------------------------+
//! ```
//!
//! `receive` never blocks on the socket: whenever the bytes it needs are not
//! there yet it returns and expects to be called again on the next
//! readiness event. The only wait it can make is for a free pool slot.
//!
//! Backpressure is a per-connection message ceiling: frames delivered but
//! not yet acknowledged through `on_read_message` count against it, and no
//! new frame is started while it is reached. The ceiling is checked on entry
//! and after each completed frame.

use core::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::ConnectionConfig;
use crate::error::{ProtocolError, QueueFullError, WireError, WireResult};
use crate::id::ConnectionRef;
use crate::pool::SlotPool;
use crate::sender::MessageSender;
use crate::socket::{FrameSocket, LENGTH_PREFIX_SIZE};
use crate::state::ConnectionState;

/// How a `receive` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Between frames and not enough bytes for a length prefix
    Idle,
    /// Mid-frame, waiting for more payload bytes
    Partial,
    /// Message ceiling reached, nothing more is read until acknowledged
    Backpressured,
    /// A length prefix was read but no pool slot was free (`try_receive`
    /// only); call again once the dispatcher has drained
    Starved,
    /// Shutdown finished draining; the owner should call `disconnect`
    Disconnecting,
}

/// Result of one `receive` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Frames committed to the outgoing queue during this call
    pub delivered: usize,
    pub status: ReceiveStatus,
}

impl ReceiveOutcome {
    #[inline]
    fn new(delivered: usize, status: ReceiveStatus) -> Self {
        Self { delivered, status }
    }
}

/// Per-connection framing state
pub struct Connection<S> {
    pool: Arc<SlotPool>,
    state: ConnectionState,
    socket: Option<S>,
    reference: ConnectionRef,
    /// Payload bytes still missing from the current frame; 0 between frames
    remaining: usize,
    /// Slot being filled; `None` between frames and while waiting for a slot
    sender: Option<MessageSender>,
    in_flight: usize,
    max_messages: usize,
}

impl<S: FrameSocket> Connection<S> {
    /// Create an idle connection drawing slots from `pool`.
    ///
    /// # Panics
    ///
    /// If `config.max_messages` is zero.
    pub fn new(pool: Arc<SlotPool>, config: &ConnectionConfig) -> Self {
        assert!(config.max_messages > 0, "message ceiling must be at least 1");
        Self {
            pool,
            state: ConnectionState::WaitingForStart,
            socket: None,
            reference: ConnectionRef::EMPTY,
            remaining: 0,
            sender: None,
            in_flight: 0,
            max_messages: config.max_messages,
        }
    }

    /// Bind a live socket and reference and enter Working.
    ///
    /// # Panics
    ///
    /// If `reference` is EMPTY.
    pub fn start(&mut self, socket: S, reference: ConnectionRef) -> WireResult<()> {
        assert!(
            reference.is_some(),
            "cannot start a connection with the EMPTY reference"
        );
        if self.state != ConnectionState::WaitingForStart {
            return Err(WireError::InvalidState {
                expected: ConnectionState::WaitingForStart,
                actual: self.state,
            });
        }

        self.socket = Some(socket);
        self.reference = reference;
        self.state = ConnectionState::Working;
        debug!(connection = %reference, "connection started");
        Ok(())
    }

    /// Read whatever the socket has ready, committing every completed frame.
    ///
    /// Protocol and socket errors are fatal for the connection (see
    /// [`WireError::is_fatal`]); the owner should `disconnect`. On
    /// `PoolExhausted` the frame length is kept and the next call retries
    /// the slot acquisition.
    pub fn receive(&mut self) -> WireResult<ReceiveOutcome> {
        self.receive_with(true)
    }

    /// Like [`receive`](Self::receive) but never waits for a pool slot: if
    /// none is free the call ends right away with status `Starved`, keeping
    /// the frame length for the next call.
    ///
    /// For drivers that free slots on the same thread they receive on.
    pub fn try_receive(&mut self) -> WireResult<ReceiveOutcome> {
        self.receive_with(false)
    }

    fn receive_with(&mut self, wait_for_slot: bool) -> WireResult<ReceiveOutcome> {
        match self.state {
            ConnectionState::WaitingForStart => {
                return Err(WireError::InvalidState {
                    expected: ConnectionState::Working,
                    actual: self.state,
                })
            }
            ConnectionState::Disconnecting => {
                return Ok(ReceiveOutcome::new(0, ReceiveStatus::Disconnecting))
            }
            ConnectionState::Working | ConnectionState::Closing => {}
        }

        if self.in_flight >= self.max_messages {
            return Ok(ReceiveOutcome::new(0, ReceiveStatus::Backpressured));
        }

        let Some(socket) = self.socket.as_mut() else {
            unreachable!("active connection without a socket");
        };
        let max_frame = self.pool.max_frame_size();
        let mut delivered = 0;

        loop {
            if self.remaining == 0 {
                if self.state == ConnectionState::Closing {
                    self.state = ConnectionState::Disconnecting;
                    debug!(connection = %self.reference, "connection drained after close");
                    return Ok(ReceiveOutcome::new(delivered, ReceiveStatus::Disconnecting));
                }
                if socket.available()? < LENGTH_PREFIX_SIZE {
                    return Ok(ReceiveOutcome::new(delivered, ReceiveStatus::Idle));
                }
                let length = socket.receive_length()?;
                self.remaining = match frame_length(length, max_frame) {
                    Ok(len) => len,
                    Err(e) => {
                        warn!(connection = %self.reference, length, max_frame, "rejecting frame");
                        return Err(e.into());
                    }
                };
            }

            // One slot per frame, taken right after the prefix
            if self.sender.is_none() {
                let sender = if wait_for_slot {
                    MessageSender::acquire(&self.pool)?
                } else {
                    match MessageSender::try_acquire(&self.pool) {
                        Some(sender) => sender,
                        None => return Ok(ReceiveOutcome::new(delivered, ReceiveStatus::Starved)),
                    }
                };
                self.sender = Some(sender);
            }
            let Some(sender) = self.sender.as_mut() else {
                unreachable!("sender installed above");
            };

            let want = socket.available()?.min(self.remaining);
            if want == 0 {
                return Ok(ReceiveOutcome::new(delivered, ReceiveStatus::Partial));
            }
            let buffer = sender.buffer_mut();
            let read = socket.receive(buffer.slice_free_space(want))?;
            buffer.reserve_space(read);
            self.remaining -= read;
            if self.remaining > 0 {
                return Ok(ReceiveOutcome::new(delivered, ReceiveStatus::Partial));
            }

            let Some(sender) = self.sender.take() else {
                unreachable!("sender installed above");
            };
            trace!(
                connection = %self.reference,
                len = sender.buffer().len(),
                slot = sender.slot_index(),
                "frame complete"
            );
            if let Err(QueueFullError(sender)) = sender.send(self.reference) {
                warn!(
                    connection = %self.reference,
                    queued = self.pool.queued_len(),
                    "outgoing queue full, growing past nominal capacity"
                );
                sender.send_and_expand(self.reference);
            }
            self.in_flight += 1;
            delivered += 1;

            if self.in_flight >= self.max_messages {
                if self.state == ConnectionState::Closing {
                    self.state = ConnectionState::Disconnecting;
                    debug!(connection = %self.reference, "connection drained after close");
                    return Ok(ReceiveOutcome::new(delivered, ReceiveStatus::Disconnecting));
                }
                return Ok(ReceiveOutcome::new(delivered, ReceiveStatus::Backpressured));
            }
        }
    }

    /// A previously delivered message has been fully consumed downstream.
    pub fn on_read_message(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Request a graceful shutdown. A frame already in progress is allowed
    /// to complete; no new frame is started afterwards.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Working {
            self.state = ConnectionState::Closing;
            debug!(
                connection = %self.reference,
                mid_frame = self.is_mid_frame(),
                "connection closing"
            );
        }
    }

    /// Release the socket and any slot being filled, and return to the
    /// freshly constructed state so the object can host a new connection.
    pub fn disconnect(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.cancel();
        }
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close() {
                warn!(connection = %self.reference, error = %e, "socket close failed");
            }
        }
        if self.reference.is_some() {
            debug!(
                connection = %self.reference,
                state = %self.state,
                in_flight = self.in_flight,
                "connection disconnected"
            );
        }

        self.state = ConnectionState::WaitingForStart;
        self.reference = ConnectionRef::EMPTY;
        self.remaining = 0;
        self.in_flight = 0;
    }
}

impl<S> Connection<S> {
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    pub fn reference(&self) -> ConnectionRef {
        self.reference
    }

    /// Messages delivered and not yet acknowledged
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[inline]
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    #[inline]
    pub fn is_backpressured(&self) -> bool {
        self.in_flight >= self.max_messages
    }

    /// A length prefix has been read and its payload is not complete yet
    #[inline]
    pub fn is_mid_frame(&self) -> bool {
        self.remaining > 0
    }

    #[inline]
    pub fn socket(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    #[inline]
    pub fn pool(&self) -> &Arc<SlotPool> {
        &self.pool
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("reference", &self.reference)
            .field("state", &self.state)
            .field("remaining", &self.remaining)
            .field("in_flight", &self.in_flight)
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

fn frame_length(length: i32, max: usize) -> Result<usize, ProtocolError> {
    if length <= 0 || length as usize > max {
        return Err(ProtocolError::LengthOutOfRange {
            length: length as i64,
            max,
        });
    }
    Ok(length as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::socket::length_prefix;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io;
    use std::rc::Rc;
    use std::time::Duration;

    /// In-memory socket; each `feed` is one availability event.
    #[derive(Default)]
    struct Script {
        ready: VecDeque<u8>,
        close_calls: usize,
    }

    #[derive(Clone, Default)]
    struct ScriptedSocket(Rc<RefCell<Script>>);

    impl ScriptedSocket {
        fn feed(&self, bytes: &[u8]) {
            self.0.borrow_mut().ready.extend(bytes.iter().copied());
        }

        fn pending(&self) -> usize {
            self.0.borrow().ready.len()
        }

        fn close_calls(&self) -> usize {
            self.0.borrow().close_calls
        }
    }

    impl FrameSocket for ScriptedSocket {
        fn available(&self) -> io::Result<usize> {
            Ok(self.0.borrow().ready.len())
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut script = self.0.borrow_mut();
            let n = buf.len().min(script.ready.len());
            for (dst, src) in buf.iter_mut().zip(script.ready.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }

        fn close(&mut self) -> io::Result<()> {
            self.0.borrow_mut().close_calls += 1;
            Ok(())
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = length_prefix(payload.len()).to_vec();
        out.extend_from_slice(payload);
        out
    }

    fn started(pool: &Arc<SlotPool>, ceiling: usize) -> (Connection<ScriptedSocket>, ScriptedSocket) {
        let mut conn = Connection::new(
            Arc::clone(pool),
            &ConnectionConfig::new().max_messages(ceiling),
        );
        let sock = ScriptedSocket::default();
        conn.start(sock.clone(), ConnectionRef::new(3, 1)).unwrap();
        (conn, sock)
    }

    fn drain(pool: &Arc<SlotPool>) -> Vec<(ConnectionRef, Vec<u8>)> {
        let mut out = vec![];
        pool.drain_outgoing(|m| out.push((m.connection(), m.payload().to_vec())));
        out
    }

    #[test]
    fn test_reassembly_across_partial_reads() {
        let payload: Vec<u8> = (0u8..10).collect();
        let pool = SlotPool::with_slots(4, 64).unwrap();
        let (mut conn, sock) = started(&pool, 8);

        sock.feed(&length_prefix(10));
        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(0, ReceiveStatus::Partial)
        );
        assert!(conn.is_mid_frame());

        sock.feed(&payload[..1]);
        assert_eq!(conn.receive().unwrap().status, ReceiveStatus::Partial);
        sock.feed(&payload[1..5]);
        assert_eq!(conn.receive().unwrap().status, ReceiveStatus::Partial);
        assert_eq!(pool.queued_len(), 0);

        sock.feed(&payload[5..]);
        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(1, ReceiveStatus::Idle)
        );
        assert!(!conn.is_mid_frame());
        assert_eq!(conn.in_flight(), 1);

        let split = drain(&pool);

        // Same frame in a single event
        let (mut whole, sock) = started(&pool, 8);
        sock.feed(&frame(&payload));
        assert_eq!(whole.receive().unwrap().delivered, 1);

        assert_eq!(split, drain(&pool));
        assert_eq!(split, vec![(ConnectionRef::new(3, 1), payload)]);
    }

    #[test]
    fn test_several_frames_in_one_event_keep_order() {
        let pool = SlotPool::with_slots(4, 64).unwrap();
        let (mut conn, sock) = started(&pool, 8);

        let mut bytes = frame(b"one");
        bytes.extend(frame(b"two"));
        bytes.extend(frame(b"three"));
        bytes.extend(&length_prefix(4)[..2]);
        sock.feed(&bytes);

        let outcome = conn.receive().unwrap();
        assert_eq!(outcome, ReceiveOutcome::new(3, ReceiveStatus::Idle));
        // Half a prefix stays on the socket
        assert_eq!(sock.pending(), 2);

        let payloads: Vec<Vec<u8>> = drain(&pool).into_iter().map(|(_, p)| p).collect();
        assert_eq!(payloads, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn test_backpressure_defers_frames() {
        let pool = SlotPool::with_slots(8, 32).unwrap();
        let (mut conn, sock) = started(&pool, 2);
        for p in [b"a", b"b", b"c"] {
            sock.feed(&frame(p));
        }

        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(2, ReceiveStatus::Backpressured)
        );
        assert!(conn.is_backpressured());
        let third_frame = frame(b"c").len();
        assert_eq!(sock.pending(), third_frame);

        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(0, ReceiveStatus::Backpressured)
        );
        assert_eq!(sock.pending(), third_frame);

        conn.on_read_message();
        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(1, ReceiveStatus::Backpressured)
        );
        assert_eq!(sock.pending(), 0);
        assert_eq!(drain(&pool).len(), 3);
    }

    #[test]
    fn test_close_lets_partial_frame_complete() {
        let pool = SlotPool::with_slots(4, 32).unwrap();
        let (mut conn, sock) = started(&pool, 8);

        sock.feed(&frame(b"abcdef")[..7]);
        assert_eq!(conn.receive().unwrap().status, ReceiveStatus::Partial);

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert_eq!(pool.queued_len(), 0);

        sock.feed(b"def");
        sock.feed(&frame(b"late"));
        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(1, ReceiveStatus::Disconnecting)
        );
        assert_eq!(conn.state(), ConnectionState::Disconnecting);
        assert_eq!(drain(&pool)[0].1, b"abcdef".to_vec());
        // Nothing after the close was started
        assert_eq!(sock.pending(), frame(b"late").len());
    }

    #[test]
    fn test_close_with_nothing_pending() {
        let pool = SlotPool::with_slots(2, 32).unwrap();
        let (mut conn, sock) = started(&pool, 8);
        conn.close();

        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(0, ReceiveStatus::Disconnecting)
        );
        assert_eq!(conn.state(), ConnectionState::Disconnecting);

        sock.feed(&frame(b"ignored"));
        assert_eq!(conn.receive().unwrap().status, ReceiveStatus::Disconnecting);
        assert_eq!(sock.pending(), frame(b"ignored").len());
        assert_eq!(pool.queued_len(), 0);
    }

    #[test]
    fn test_closing_connection_reaching_ceiling_disconnects() {
        let pool = SlotPool::with_slots(2, 32).unwrap();
        let (mut conn, sock) = started(&pool, 1);
        sock.feed(&frame(b"xyz")[..5]);
        conn.receive().unwrap();
        conn.close();

        sock.feed(b"yz");
        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(1, ReceiveStatus::Disconnecting)
        );
    }

    #[test]
    fn test_reuse_after_disconnect() {
        let pool = SlotPool::with_slots(2, 32).unwrap();
        let (mut conn, sock) = started(&pool, 4);

        sock.feed(&frame(b"done"));
        sock.feed(&frame(b"half")[..6]);
        assert_eq!(conn.receive().unwrap().delivered, 1);
        assert!(conn.is_mid_frame());
        assert_eq!(pool.free_slots(), 0);

        conn.disconnect();
        assert_eq!(sock.close_calls(), 1);
        assert_eq!(conn.state(), ConnectionState::WaitingForStart);
        assert_eq!(conn.reference(), ConnectionRef::EMPTY);
        assert_eq!(conn.in_flight(), 0);
        assert!(!conn.is_mid_frame());
        assert!(conn.socket().is_none());
        // Half-filled slot went back to the pool, delivered one is still queued
        assert_eq!(pool.free_slots(), 1);
        assert_eq!(pool.queued_len(), 1);

        let fresh = ScriptedSocket::default();
        conn.start(fresh.clone(), ConnectionRef::new(3, 2)).unwrap();
        fresh.feed(&frame(b"again"));
        assert_eq!(conn.receive().unwrap().delivered, 1);

        let out = drain(&pool);
        assert_eq!(out[1], (ConnectionRef::new(3, 2), b"again".to_vec()));
    }

    #[test]
    fn test_invalid_lengths_are_fatal() {
        let pool = SlotPool::with_slots(2, 16).unwrap();
        for bad in [0i32, -1, i32::MIN, 17] {
            let (mut conn, sock) = started(&pool, 4);
            sock.feed(&bad.to_ne_bytes());
            let err = conn.receive().unwrap_err();
            assert!(err.is_fatal());
            assert!(matches!(
                err,
                WireError::Protocol(ProtocolError::LengthOutOfRange { max: 16, .. })
            ));
            conn.disconnect();
        }
        assert_eq!(pool.free_slots(), 2);

        let (mut conn, sock) = started(&pool, 4);
        sock.feed(&frame(&[7u8; 16]));
        assert_eq!(conn.receive().unwrap().delivered, 1);
    }

    #[test]
    fn test_start_requires_waiting_for_start() {
        let pool = SlotPool::with_slots(1, 16).unwrap();
        let (mut conn, _sock) = started(&pool, 4);
        let err = conn
            .start(ScriptedSocket::default(), ConnectionRef::new(9, 9))
            .unwrap_err();
        assert!(matches!(
            err,
            WireError::InvalidState {
                expected: ConnectionState::WaitingForStart,
                actual: ConnectionState::Working
            }
        ));
        assert_eq!(conn.reference(), ConnectionRef::new(3, 1));
    }

    #[test]
    fn test_receive_before_start_is_rejected() {
        let pool = SlotPool::with_slots(1, 16).unwrap();
        let mut conn: Connection<ScriptedSocket> = Connection::new(pool, &ConnectionConfig::new());
        assert!(matches!(
            conn.receive(),
            Err(WireError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_pool_exhaustion_keeps_frame_length() {
        let config = PoolConfig::new()
            .slot_count(1)
            .max_frame(16)
            .acquire_timeout(Some(Duration::from_millis(5)));
        let pool = SlotPool::new(&config).unwrap();
        let (mut conn, sock) = started(&pool, 4);

        let held = MessageSender::acquire(&pool).unwrap();
        sock.feed(&frame(b"wait"));
        let err = conn.receive().unwrap_err();
        assert!(matches!(err, WireError::PoolExhausted { .. }));
        assert!(!err.is_fatal());
        assert!(conn.is_mid_frame());

        held.cancel();
        assert_eq!(
            conn.receive().unwrap(),
            ReceiveOutcome::new(1, ReceiveStatus::Idle)
        );
        assert_eq!(drain(&pool)[0].1, b"wait".to_vec());
    }

    #[test]
    fn test_try_receive_does_not_wait_for_slot() {
        let pool = SlotPool::with_slots(2, 16).unwrap();
        let (mut conn, sock) = started(&pool, 8);
        for p in [b"a", b"b", b"c"] {
            sock.feed(&frame(p));
        }

        // Two slots, three frames: the third is deferred, not waited for
        assert_eq!(
            conn.try_receive().unwrap(),
            ReceiveOutcome::new(2, ReceiveStatus::Starved)
        );
        assert_eq!(pool.queued_len(), 2);
        assert_eq!(conn.try_receive().unwrap().status, ReceiveStatus::Starved);
        assert!(conn.is_mid_frame());

        assert_eq!(drain(&pool).len(), 2);
        assert_eq!(
            conn.try_receive().unwrap(),
            ReceiveOutcome::new(1, ReceiveStatus::Idle)
        );
        assert_eq!(drain(&pool)[0].1, b"c".to_vec());
    }

    #[test]
    fn test_full_queue_grows_instead_of_dropping() {
        let config = PoolConfig::new().slot_count(4).max_frame(16).outgoing_capacity(1);
        let pool = SlotPool::new(&config).unwrap();
        let (mut conn, sock) = started(&pool, 4);
        sock.feed(&frame(b"a"));
        sock.feed(&frame(b"b"));

        assert_eq!(conn.receive().unwrap().delivered, 2);
        let stats = pool.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.expanded, 1);
    }

    #[test]
    fn test_on_read_message_saturates() {
        let pool = SlotPool::with_slots(1, 16).unwrap();
        let (mut conn, _sock) = started(&pool, 2);
        conn.on_read_message();
        assert_eq!(conn.in_flight(), 0);
    }
}
