//! Message sender handle
//!
//! A single-use handle over one acquired pool slot. It leaves the caller in
//! exactly one of two ways: [`send`](MessageSender::send) (or
//! [`send_and_expand`](MessageSender::send_and_expand)) queues the slot for
//! a connection, [`cancel`](MessageSender::cancel) frees it. Both consume
//! the handle, so a second send does not compile.
//!
//! Dropping a sender that was neither sent nor cancelled still returns the
//! slot to the pool, but it is counted as abandoned and logged.

use std::sync::Arc;

use tracing::warn;

use crate::buffer::WireBuffer;
use crate::error::{QueueFullError, WireResult};
use crate::id::ConnectionRef;
use crate::pool::{SlotLease, SlotPool};

/// Single-use handle over one acquired slot
#[must_use = "a sender must be sent or cancelled"]
#[derive(Debug)]
pub struct MessageSender {
    lease: Option<SlotLease>,
}

impl MessageSender {
    /// Acquire a slot, waiting if the pool is exhausted.
    pub fn acquire(pool: &Arc<SlotPool>) -> WireResult<Self> {
        Ok(Self::from_lease(pool.acquire_slot()?))
    }

    /// Acquire a slot only if one is free right now.
    pub fn try_acquire(pool: &Arc<SlotPool>) -> Option<Self> {
        pool.try_acquire_slot().map(Self::from_lease)
    }

    pub fn from_lease(lease: SlotLease) -> Self {
        Self { lease: Some(lease) }
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.lease().index()
    }

    #[inline]
    pub fn buffer(&self) -> &WireBuffer {
        self.lease().buffer()
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> &mut WireBuffer {
        self.lease_mut().buffer_mut()
    }

    /// Queue the filled slot for `connection` within the nominal outgoing
    /// capacity. On a full queue the sender comes back unchanged.
    ///
    /// # Panics
    ///
    /// If `connection` is EMPTY.
    pub fn send(mut self, connection: ConnectionRef) -> Result<(), QueueFullError<MessageSender>> {
        let lease = self.take_lease();
        let pool = Arc::clone(lease.pool());
        pool.commit(connection, lease)
            .map_err(|QueueFullError(lease)| QueueFullError(Self::from_lease(lease)))
    }

    /// Queue the filled slot for `connection`, growing the outgoing queue
    /// past its nominal capacity if needed.
    ///
    /// # Panics
    ///
    /// If `connection` is EMPTY.
    pub fn send_and_expand(mut self, connection: ConnectionRef) {
        let lease = self.take_lease();
        let pool = Arc::clone(lease.pool());
        pool.commit_with_growth(connection, lease);
    }

    /// Free the slot without sending anything.
    pub fn cancel(mut self) {
        let lease = self.take_lease();
        let pool = Arc::clone(lease.pool());
        pool.cancel(lease);
    }

    #[inline]
    fn lease(&self) -> &SlotLease {
        match &self.lease {
            Some(lease) => lease,
            None => unreachable!("sender used after being consumed"),
        }
    }

    #[inline]
    fn lease_mut(&mut self) -> &mut SlotLease {
        match &mut self.lease {
            Some(lease) => lease,
            None => unreachable!("sender used after being consumed"),
        }
    }

    #[inline]
    fn take_lease(&mut self) -> SlotLease {
        match self.lease.take() {
            Some(lease) => lease,
            None => unreachable!("sender used after being consumed"),
        }
    }
}

impl Drop for MessageSender {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            warn!(
                slot = lease.index(),
                bytes = lease.buffer().len(),
                "message sender dropped without send or cancel, slot recovered"
            );
            lease.abandon();
        }
    }
}
