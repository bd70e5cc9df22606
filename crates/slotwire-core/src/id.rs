//! Connection reference type

use core::fmt;

/// Opaque identifier tagging a connection and the messages it produces.
///
/// A reference is a connection-table index plus a generation counter.
/// The generation is bumped every time the index is reused, so a reference
/// held past its connection's disconnect never matches the new occupant.
///
/// The index `u32::MAX` is reserved for the `EMPTY` sentinel ("no connection").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionRef {
    index: u32,
    generation: u32,
}

impl ConnectionRef {
    /// Sentinel value indicating no connection
    pub const EMPTY: ConnectionRef = ConnectionRef {
        index: u32::MAX,
        generation: 0,
    };

    /// Create a reference from a table index and generation
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        ConnectionRef { index, generation }
    }

    /// Table index this reference points at
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Get the index as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Generation of the table entry when this reference was issued
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Check if this is the EMPTY sentinel
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.index == u32::MAX
    }

    /// Check if this refers to a connection
    #[inline]
    pub const fn is_some(self) -> bool {
        self.index != u32::MAX
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "ConnectionRef(EMPTY)")
        } else {
            write!(f, "ConnectionRef({}#{})", self.index, self.generation)
        }
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "empty")
        } else {
            write!(f, "{}#{}", self.index, self.generation)
        }
    }
}

impl Default for ConnectionRef {
    fn default() -> Self {
        ConnectionRef::EMPTY
    }
}
