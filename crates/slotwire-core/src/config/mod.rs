//! slotwire configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder setters (programmatic)
//! 2. Environment variables (`from_env()` only)
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use slotwire_core::config::{ConnectionConfig, PoolConfig};
//!
//! let pool = PoolConfig::from_env().slot_count(256);
//! pool.validate()?;
//! let conn = ConnectionConfig::new().max_messages(4);
//! ```

pub mod defaults;

use std::time::Duration;

use crate::buffer::HEADER_SIZE;
use crate::env::env_get;
use crate::error::{WireError, WireResult};

/// Buffer slot pool configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of slots (wire buffers) allocated up front
    pub slot_count: usize,
    /// Total bytes per slot, header included
    pub slot_size: usize,
    /// Nominal outgoing queue capacity for plain commits
    pub outgoing_capacity: usize,
    /// Sleep between blocking slot-acquire attempts
    pub poll_interval: Duration,
    /// Give up acquiring a slot after this long; `None` waits forever
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SLOTWIRE_SLOT_COUNT` - Slots in the pool
    /// - `SLOTWIRE_SLOT_SIZE` - Bytes per slot, header included
    /// - `SLOTWIRE_OUTGOING_CAPACITY` - Nominal outgoing queue capacity
    /// - `SLOTWIRE_POLL_INTERVAL_MS` - Blocking-acquire poll interval
    /// - `SLOTWIRE_ACQUIRE_TIMEOUT_MS` - Acquire timeout (0 = wait forever)
    pub fn from_env() -> Self {
        let slot_count = env_get("SLOTWIRE_SLOT_COUNT", defaults::SLOT_COUNT);
        let timeout_ms = env_get("SLOTWIRE_ACQUIRE_TIMEOUT_MS", defaults::ACQUIRE_TIMEOUT_MS);
        Self {
            slot_count,
            slot_size: env_get("SLOTWIRE_SLOT_SIZE", defaults::SLOT_SIZE),
            // Follow the slot count unless explicitly overridden
            outgoing_capacity: env_get("SLOTWIRE_OUTGOING_CAPACITY", slot_count),
            poll_interval: Duration::from_millis(env_get(
                "SLOTWIRE_POLL_INTERVAL_MS",
                defaults::POLL_INTERVAL_MS,
            )),
            acquire_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
        }
    }

    /// Create config with library defaults (no env override).
    pub fn new() -> Self {
        Self {
            slot_count: defaults::SLOT_COUNT,
            slot_size: defaults::SLOT_SIZE,
            outgoing_capacity: defaults::OUTGOING_CAPACITY,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            acquire_timeout: None,
        }
    }

    /// Largest frame payload a slot can hold
    #[inline]
    pub fn max_frame_size(&self) -> usize {
        self.slot_size.saturating_sub(HEADER_SIZE)
    }

    /// Check the configuration before building a pool from it.
    pub fn validate(&self) -> WireResult<()> {
        if self.slot_count == 0 {
            return Err(WireError::InvalidConfig("slot_count must be at least 1"));
        }
        if self.slot_count > u32::MAX as usize {
            return Err(WireError::InvalidConfig("slot_count must fit in u32"));
        }
        if self.slot_size <= HEADER_SIZE {
            return Err(WireError::InvalidConfig("slot_size must exceed the 8-byte header"));
        }
        if self.max_frame_size() > i32::MAX as usize {
            return Err(WireError::InvalidConfig(
                "slot payload must fit a 4-byte length prefix",
            ));
        }
        if self.outgoing_capacity == 0 {
            return Err(WireError::InvalidConfig("outgoing_capacity must be at least 1"));
        }
        Ok(())
    }

    // Builder methods

    pub fn slot_count(mut self, n: usize) -> Self {
        self.slot_count = n;
        self
    }

    pub fn slot_size(mut self, bytes: usize) -> Self {
        self.slot_size = bytes;
        self
    }

    /// Size slots so each holds exactly `bytes` of payload
    pub fn max_frame(mut self, bytes: usize) -> Self {
        self.slot_size = bytes + HEADER_SIZE;
        self
    }

    pub fn outgoing_capacity(mut self, cap: usize) -> Self {
        self.outgoing_capacity = cap;
        self
    }

    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    pub fn acquire_timeout(mut self, d: Option<Duration>) -> Self {
        self.acquire_timeout = d;
        self
    }
}

/// Per-connection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Messages a connection may have in flight before reads are deferred
    pub max_messages: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionConfig {
    /// Environment variables (optional):
    /// - `SLOTWIRE_MAX_MESSAGES` - In-flight message ceiling
    pub fn from_env() -> Self {
        Self {
            max_messages: env_get("SLOTWIRE_MAX_MESSAGES", defaults::MAX_MESSAGES),
        }
    }

    pub fn new() -> Self {
        Self {
            max_messages: defaults::MAX_MESSAGES,
        }
    }

    pub fn validate(&self) -> WireResult<()> {
        if self.max_messages == 0 {
            return Err(WireError::InvalidConfig("max_messages must be at least 1"));
        }
        Ok(())
    }

    pub fn max_messages(mut self, n: usize) -> Self {
        self.max_messages = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.outgoing_capacity, config.slot_count);
        assert_eq!(config.max_frame_size(), defaults::SLOT_SIZE - HEADER_SIZE);
        assert!(ConnectionConfig::new().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new()
            .slot_count(8)
            .max_frame(100)
            .outgoing_capacity(4)
            .poll_interval(Duration::from_millis(3))
            .acquire_timeout(Some(Duration::from_millis(50)));
        assert_eq!(config.slot_count, 8);
        assert_eq!(config.slot_size, 100 + HEADER_SIZE);
        assert_eq!(config.max_frame_size(), 100);
        assert_eq!(config.outgoing_capacity, 4);
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(PoolConfig::new().slot_count(0).validate().is_err());
        assert!(PoolConfig::new().slot_size(HEADER_SIZE).validate().is_err());
        assert!(PoolConfig::new().outgoing_capacity(0).validate().is_err());
        assert!(matches!(
            ConnectionConfig::new().max_messages(0).validate(),
            Err(WireError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("SLOTWIRE_MAX_MESSAGES", "3");
        assert_eq!(ConnectionConfig::from_env().max_messages, 3);
        std::env::remove_var("SLOTWIRE_MAX_MESSAGES");
    }
}
