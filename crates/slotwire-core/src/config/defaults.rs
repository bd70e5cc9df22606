//! Library default values
//!
//! Overridden at runtime by `SLOTWIRE_*` environment variables when the
//! caller builds its configuration with `from_env()`.

/// Slots in the buffer pool
pub const SLOT_COUNT: usize = 1024;

/// Total bytes per slot, header included (64 KiB)
pub const SLOT_SIZE: usize = 64 * 1024;

/// Nominal outgoing queue capacity. Every queued message holds a slot, so a
/// capacity equal to the slot count never rejects a plain commit.
pub const OUTGOING_CAPACITY: usize = SLOT_COUNT;

/// Sleep between blocking slot-acquire attempts
pub const POLL_INTERVAL_MS: u64 = 1;

/// Slot-acquire timeout; 0 waits forever
pub const ACQUIRE_TIMEOUT_MS: u64 = 0;

/// Per-connection in-flight message ceiling
pub const MAX_MESSAGES: usize = 16;
