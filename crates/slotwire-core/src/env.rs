//! Environment variable utilities
//!
//! Generic `env_get<T>` for parsing environment variables with defaults,
//! used by the `from_env()` constructors in [`crate::config`].
//!
//! ```ignore
//! use slotwire_core::env::{env_get, env_get_opt};
//!
//! let slots: usize = env_get("SLOTWIRE_SLOT_COUNT", 1024);
//! let timeout: Option<u64> = env_get_opt("SLOTWIRE_ACQUIRE_TIMEOUT_MS");
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
///
/// Unset, empty, and unparsable values all fall back to `default`.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as optional value
///
/// Returns `Some(T)` if the variable is set and parses successfully.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
