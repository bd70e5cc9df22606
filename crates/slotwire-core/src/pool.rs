//! Buffer slot pool
//!
//! A fixed array of wire buffers, each guarded by its own Busy/Free lock, and
//! a lock-free outgoing queue of `(connection, slot)` pairs.
//!
//! A slot cycles through:
//!
//! ```text
//! Free -> acquired (SlotLease) -> commit -> queued -> popped (OutgoingMessage) -> Free
//!                              \-> cancel --------------------------------------> Free
//! ```
//!
//! The Busy state is taken once at acquisition and only given back when the
//! slot's buffer has been reset: on cancel, or when the dispatcher drops the
//! `OutgoingMessage`. A queued slot therefore can never be handed out again.
//! All buffers are allocated at construction and reused for the life of the
//! pool.

use core::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use tracing::{debug, trace, warn};

use crate::buffer::{WireBuffer, HEADER_SIZE};
use crate::busy::BusyCell;
use crate::config::PoolConfig;
use crate::error::{QueueFullError, WireError, WireResult};
use crate::id::ConnectionRef;

/// Queue entry: the slot stays Busy while it sits here.
struct Queued {
    connection: ConnectionRef,
    slot: u32,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total slots
    pub slots: usize,
    /// Slots currently Free
    pub free_slots: usize,
    /// Messages waiting in the outgoing queue
    pub queued: usize,
    /// Successful slot acquisitions
    pub acquired: u64,
    /// Commits through the nominal-capacity path
    pub committed: u64,
    /// Commits through the growth-permitting path
    pub expanded: u64,
    /// Slots returned without transmission
    pub cancelled: u64,
    /// Queued messages popped and released by the dispatcher
    pub delivered: u64,
    /// Senders dropped without send or cancel
    pub abandoned: u64,
    /// Acquisitions that found no free slot and had to wait
    pub exhausted_waits: u64,
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    committed: AtomicU64,
    expanded: AtomicU64,
    cancelled: AtomicU64,
    delivered: AtomicU64,
    abandoned: AtomicU64,
    exhausted_waits: AtomicU64,
}

/// Bounded pool of wire buffers plus the shared outgoing queue
pub struct SlotPool {
    slots: Box<[BusyCell<WireBuffer>]>,
    slot_size: usize,
    outgoing: SegQueue<Queued>,
    /// Entries in `outgoing`; reserved before push so plain commits never
    /// overshoot `outgoing_capacity`
    queued: AtomicUsize,
    outgoing_capacity: usize,
    /// Rotating scan start, spreads acquirers across the array
    next_scan: AtomicUsize,
    poll_interval: Duration,
    acquire_timeout: Option<Duration>,
    counters: Counters,
}

impl SlotPool {
    /// Build a pool, allocating every slot up front.
    pub fn new(config: &PoolConfig) -> WireResult<Arc<Self>> {
        config.validate()?;

        let slots: Box<[BusyCell<WireBuffer>]> = (0..config.slot_count)
            .map(|_| BusyCell::with_poll_interval(WireBuffer::new(config.slot_size), config.poll_interval))
            .collect();

        debug!(
            slots = config.slot_count,
            slot_size = config.slot_size,
            outgoing_capacity = config.outgoing_capacity,
            "slot pool created"
        );

        Ok(Arc::new(SlotPool {
            slots,
            slot_size: config.slot_size,
            outgoing: SegQueue::new(),
            queued: AtomicUsize::new(0),
            outgoing_capacity: config.outgoing_capacity,
            next_scan: AtomicUsize::new(0),
            poll_interval: config.poll_interval,
            acquire_timeout: config.acquire_timeout,
            counters: Counters::default(),
        }))
    }

    /// Shorthand for a pool of `slot_count` slots holding `max_frame` payload
    /// bytes each, other settings at their defaults.
    pub fn with_slots(slot_count: usize, max_frame: usize) -> WireResult<Arc<Self>> {
        Self::new(&PoolConfig::new().slot_count(slot_count).max_frame(max_frame))
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Total bytes per slot, header included
    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Largest frame payload a slot can hold
    #[inline]
    pub fn max_frame_size(&self) -> usize {
        self.slot_size - HEADER_SIZE
    }

    #[inline]
    pub fn outgoing_capacity(&self) -> usize {
        self.outgoing_capacity
    }

    /// Messages waiting in the outgoing queue
    #[inline]
    pub fn queued_len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Slots currently Free (a snapshot)
    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.lock().is_busy()).count()
    }

    /// Scan once for a Free slot and take it. Never blocks.
    pub fn try_acquire_slot(self: &Arc<Self>) -> Option<SlotLease> {
        let n = self.slots.len();
        let start = self.next_scan.fetch_add(1, Ordering::Relaxed) % n;

        for offset in 0..n {
            let index = (start + offset) % n;
            if self.slots[index].lock().try_acquire() {
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                return Some(self.lease(index));
            }
        }
        None
    }

    /// Wrap a slot whose Busy state the caller just took.
    fn lease(self: &Arc<Self>, index: usize) -> SlotLease {
        SlotLease {
            pool: Arc::clone(self),
            index: index as u32,
            armed: true,
        }
    }

    /// Take a Free slot, waiting for one if the pool is exhausted.
    ///
    /// Waits forever unless the pool was configured with an acquire timeout,
    /// in which case `PoolExhausted` is returned once it elapses.
    pub fn acquire_slot(self: &Arc<Self>) -> WireResult<SlotLease> {
        if let Some(lease) = self.try_acquire_slot() {
            return Ok(lease);
        }

        self.counters.exhausted_waits.fetch_add(1, Ordering::Relaxed);
        debug!(
            slots = self.slots.len(),
            queued = self.queued_len(),
            "slot pool exhausted, waiting for a free slot"
        );

        let n = self.slots.len();
        let start = Instant::now();
        loop {
            // Park on one slot's lock for a poll interval, then rescan all
            let index = self.next_scan.fetch_add(1, Ordering::Relaxed) % n;
            let lease = if self.slots[index].lock().acquire_timeout(self.poll_interval) {
                self.counters.acquired.fetch_add(1, Ordering::Relaxed);
                Some(self.lease(index))
            } else {
                self.try_acquire_slot()
            };
            if let Some(lease) = lease {
                trace!(waited = ?start.elapsed(), slot = lease.index(), "acquired slot after wait");
                return Ok(lease);
            }
            if let Some(timeout) = self.acquire_timeout {
                let waited = start.elapsed();
                if waited >= timeout {
                    warn!(?waited, slots = self.slots.len(), "gave up waiting for a free slot");
                    return Err(WireError::PoolExhausted { waited });
                }
            }
        }
    }

    /// Queue a filled slot for `connection`, respecting the nominal outgoing
    /// capacity. A full queue hands the lease back untouched.
    ///
    /// # Panics
    ///
    /// If `connection` is EMPTY or the lease belongs to another pool.
    pub fn commit(
        &self,
        connection: ConnectionRef,
        lease: SlotLease,
    ) -> Result<(), QueueFullError<SlotLease>> {
        self.check_commit(connection, &lease);

        let capacity = self.outgoing_capacity;
        let reserved = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            });
        if reserved.is_err() {
            return Err(QueueFullError(lease));
        }

        self.counters.committed.fetch_add(1, Ordering::Relaxed);
        self.outgoing.push(Queued {
            connection,
            slot: lease.disarm(),
        });
        Ok(())
    }

    /// Queue a filled slot for `connection`, exceeding the nominal capacity
    /// if needed. Use where dropping the message is worse than a transiently
    /// long queue.
    ///
    /// # Panics
    ///
    /// If `connection` is EMPTY or the lease belongs to another pool.
    pub fn commit_with_growth(&self, connection: ConnectionRef, lease: SlotLease) {
        self.check_commit(connection, &lease);

        let before = self.queued.fetch_add(1, Ordering::AcqRel);
        if before >= self.outgoing_capacity {
            debug!(
                queued = before + 1,
                capacity = self.outgoing_capacity,
                "outgoing queue grew past nominal capacity"
            );
        }

        self.counters.expanded.fetch_add(1, Ordering::Relaxed);
        self.outgoing.push(Queued {
            connection,
            slot: lease.disarm(),
        });
    }

    /// Return a slot to Free without queueing it.
    pub fn cancel(&self, lease: SlotLease) {
        assert!(
            core::ptr::eq(self, Arc::as_ptr(&lease.pool)),
            "slot lease cancelled into a foreign pool"
        );
        drop(lease);
    }

    /// Take the oldest queued message. The slot is released when the
    /// returned message is dropped.
    pub fn pop_outgoing(self: &Arc<Self>) -> Option<OutgoingMessage> {
        let entry = self.outgoing.pop()?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(OutgoingMessage {
            pool: Arc::clone(self),
            connection: entry.connection,
            index: entry.slot,
        })
    }

    /// Pop every queued message into `f`, returning how many were drained.
    pub fn drain_outgoing<F>(self: &Arc<Self>, mut f: F) -> usize
    where
        F: FnMut(OutgoingMessage),
    {
        let mut drained = 0;
        while let Some(message) = self.pop_outgoing() {
            f(message);
            drained += 1;
        }
        drained
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            slots: self.slots.len(),
            free_slots: self.free_slots(),
            queued: self.queued_len(),
            acquired: self.counters.acquired.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            expanded: self.counters.expanded.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            exhausted_waits: self.counters.exhausted_waits.load(Ordering::Relaxed),
        }
    }

    fn check_commit(&self, connection: ConnectionRef, lease: &SlotLease) {
        assert!(
            connection.is_some(),
            "cannot commit a message to the EMPTY connection"
        );
        assert!(
            core::ptr::eq(self, Arc::as_ptr(&lease.pool)),
            "slot lease committed into a foreign pool"
        );
    }

    /// Reset the slot's buffer and mark it Free.
    ///
    /// Caller must own the slot's Busy state.
    fn release_slot(&self, index: u32) {
        let slot = &self.slots[index as usize];
        debug_assert!(slot.lock().is_busy());
        // Safety: the caller owns the Busy state of this slot
        unsafe { slot.get_unchecked() }.reset();
        slot.lock().release();
    }

    /// Caller must own the slot's Busy state for the lifetime of the borrow.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn buffer_unchecked(&self, index: u32) -> &mut WireBuffer {
        self.slots[index as usize].get_unchecked()
    }
}

impl fmt::Debug for SlotPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("slots", &self.slots.len())
            .field("slot_size", &self.slot_size)
            .field("queued", &self.queued_len())
            .field("outgoing_capacity", &self.outgoing_capacity)
            .finish()
    }
}

/// Exclusive ownership of one acquired slot.
///
/// Dropping the lease without committing it resets the buffer and frees the
/// slot.
#[must_use = "dropping a lease returns the slot unused"]
pub struct SlotLease {
    pool: Arc<SlotPool>,
    index: u32,
    armed: bool,
}

impl SlotLease {
    /// Index of the slot inside its pool
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// The pool this slot belongs to
    #[inline]
    pub fn pool(&self) -> &Arc<SlotPool> {
        &self.pool
    }

    #[inline]
    pub fn buffer(&self) -> &WireBuffer {
        // Safety: the lease owns the slot's Busy state
        unsafe { self.pool.buffer_unchecked(self.index) }
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> &mut WireBuffer {
        // Safety: the lease owns the slot's Busy state
        unsafe { self.pool.buffer_unchecked(self.index) }
    }

    /// Hand the Busy state over to the outgoing queue.
    fn disarm(mut self) -> u32 {
        self.armed = false;
        self.index
    }

    /// Free a slot whose owner went away without sending or cancelling.
    /// Counted as abandoned, not cancelled.
    pub(crate) fn abandon(self) {
        let pool = Arc::clone(&self.pool);
        let index = self.disarm();
        pool.counters.abandoned.fetch_add(1, Ordering::Relaxed);
        pool.release_slot(index);
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        if self.armed {
            self.pool.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            self.pool.release_slot(self.index);
        }
    }
}

impl fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLease")
            .field("index", &self.index)
            .field("len", &self.buffer().len())
            .finish()
    }
}

/// A committed message popped from the outgoing queue.
///
/// Owns its slot until dropped; dropping resets the buffer and frees the
/// slot for reuse.
pub struct OutgoingMessage {
    pool: Arc<SlotPool>,
    connection: ConnectionRef,
    index: u32,
}

impl OutgoingMessage {
    /// Connection the message was committed for
    #[inline]
    pub fn connection(&self) -> ConnectionRef {
        self.connection
    }

    #[inline]
    pub fn slot_index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn buffer(&self) -> &WireBuffer {
        // Safety: the slot stayed Busy from commit until this message drops
        unsafe { self.pool.buffer_unchecked(self.index) }
    }

    #[inline]
    pub fn buffer_mut(&mut self) -> &mut WireBuffer {
        // Safety: the slot stayed Busy from commit until this message drops
        unsafe { self.pool.buffer_unchecked(self.index) }
    }

    /// Live payload bytes
    #[inline]
    pub fn payload(&self) -> &[u8] {
        self.buffer().payload()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }
}

impl Drop for OutgoingMessage {
    fn drop(&mut self) {
        self.pool.counters.delivered.fetch_add(1, Ordering::Relaxed);
        self.pool.release_slot(self.index);
    }
}

impl fmt::Debug for OutgoingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingMessage")
            .field("connection", &self.connection)
            .field("slot", &self.index)
            .field("len", &self.len())
            .finish()
    }
}
