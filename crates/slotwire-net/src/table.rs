//! Connection table
//!
//! Fixed array of reusable connection objects. References are issued as
//! `index#generation`; the generation is bumped every time an entry is
//! reused, so a reference held past its connection's disconnect is
//! recognised as stale instead of reaching the entry's next tenant.
//!
//! Free entries are kept on a LIFO stack for cache-friendly reuse of
//! recently released entries, falling back to never-used ones.

use std::sync::Arc;

use slotwire_core::{
    Connection, ConnectionConfig, ConnectionRef, FrameSocket, ReceiveOutcome, SlotPool,
    WireError, WireResult,
};
use tracing::debug;

struct Entry<S> {
    connection: Connection<S>,
    /// Generation of the most recent reference issued for this entry
    generation: u32,
}

/// Fixed-capacity set of connections sharing one slot pool
pub struct ConnectionTable<S> {
    entries: Box<[Entry<S>]>,
    /// LIFO stack of released entry indices
    free_stack: Vec<u32>,
    /// Next never-used entry index
    next_fresh: u32,
    active: usize,
    pool: Arc<SlotPool>,
}

impl<S: FrameSocket> ConnectionTable<S> {
    /// Pre-construct `capacity` connections drawing from `pool`.
    pub fn new(pool: Arc<SlotPool>, capacity: usize, config: &ConnectionConfig) -> WireResult<Self> {
        config.validate()?;
        if capacity == 0 || capacity >= u32::MAX as usize {
            return Err(WireError::InvalidConfig(
                "connection capacity must be between 1 and u32::MAX - 1",
            ));
        }

        let entries = (0..capacity)
            .map(|_| Entry {
                connection: Connection::new(Arc::clone(&pool), config),
                generation: 0,
            })
            .collect();

        Ok(Self {
            entries,
            free_stack: Vec::with_capacity(capacity),
            next_fresh: 0,
            active: 0,
            pool,
        })
    }

    /// Start a connection on a free entry and return its reference.
    pub fn accept(&mut self, socket: S) -> WireResult<ConnectionRef> {
        let index = match self.free_stack.pop() {
            Some(index) => index,
            None if (self.next_fresh as usize) < self.entries.len() => {
                self.next_fresh += 1;
                self.next_fresh - 1
            }
            None => {
                return Err(WireError::NoConnectionSlots {
                    capacity: self.entries.len(),
                })
            }
        };

        let entry = &mut self.entries[index as usize];
        entry.generation = entry.generation.wrapping_add(1);
        let reference = ConnectionRef::new(index, entry.generation);

        if let Err(e) = entry.connection.start(socket, reference) {
            self.free_stack.push(index);
            return Err(e);
        }
        self.active += 1;
        Ok(reference)
    }

    /// Drive one receive pass on a live connection.
    pub fn receive(&mut self, reference: ConnectionRef) -> WireResult<ReceiveOutcome> {
        self.get_mut(reference)
            .ok_or(WireError::UnknownConnection(reference))?
            .receive()
    }

    /// Like [`receive`](Self::receive) but never waits for a pool slot.
    pub fn try_receive(&mut self, reference: ConnectionRef) -> WireResult<ReceiveOutcome> {
        self.get_mut(reference)
            .ok_or(WireError::UnknownConnection(reference))?
            .try_receive()
    }

    /// Acknowledge one consumed message. Returns `false` for stale references.
    pub fn on_read_message(&mut self, reference: ConnectionRef) -> bool {
        match self.get_mut(reference) {
            Some(conn) => {
                conn.on_read_message();
                true
            }
            None => {
                debug!(connection = %reference, "read acknowledgement for stale connection");
                false
            }
        }
    }

    /// Request a graceful close. Returns `false` for stale references.
    pub fn close(&mut self, reference: ConnectionRef) -> bool {
        match self.get_mut(reference) {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Tear a connection down and return its entry to the free stack.
    /// Returns `false` for stale references.
    pub fn disconnect(&mut self, reference: ConnectionRef) -> bool {
        let Some(conn) = self.get_mut(reference) else {
            return false;
        };
        conn.disconnect();
        self.free_stack.push(reference.index());
        self.active -= 1;
        true
    }

    /// Disconnect every live connection.
    pub fn disconnect_all(&mut self) -> usize {
        let live: Vec<ConnectionRef> = self.references().collect();
        live.into_iter().filter(|r| self.disconnect(*r)).count()
    }
}

impl<S> ConnectionTable<S> {
    /// Live connection named by `reference`, or `None` if the reference is
    /// EMPTY, out of range or stale.
    pub fn get(&self, reference: ConnectionRef) -> Option<&Connection<S>> {
        let entry = self.entries.get(reference.as_usize())?;
        (reference.is_some() && entry.connection.reference() == reference).then_some(&entry.connection)
    }

    pub fn get_mut(&mut self, reference: ConnectionRef) -> Option<&mut Connection<S>> {
        let entry = self.entries.get_mut(reference.as_usize())?;
        if reference.is_some() && entry.connection.reference() == reference {
            Some(&mut entry.connection)
        } else {
            None
        }
    }

    /// Live connections
    pub fn iter(&self) -> impl Iterator<Item = &Connection<S>> {
        self.entries
            .iter()
            .map(|e| &e.connection)
            .filter(|c| c.reference().is_some())
    }

    /// References of all live connections
    pub fn references(&self) -> impl Iterator<Item = ConnectionRef> + '_ {
        self.iter().map(|c| c.reference())
    }

    /// Live connections
    #[inline]
    pub fn len(&self) -> usize {
        self.active
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn pool(&self) -> &Arc<SlotPool> {
        &self.pool
    }
}
