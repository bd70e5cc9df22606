//! Busy/Free lock
//!
//! A two-state atomic guard used to hold a pool slot (or any value) across
//! separable operations: fill, then either commit or cancel. Unlike a mutex
//! guard, the Busy state is not tied to a stack frame; whoever observed the
//! successful `try_acquire` owns it until `release`.
//!
//! Blocking acquisition is a poll loop: retry, sleep the poll interval,
//! retry. There is no fairness among waiters.

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Default sleep between blocking-acquire attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// State of a [`BusyLock`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BusyState {
    Free = 0,
    Busy = 1,
}

impl From<u8> for BusyState {
    fn from(v: u8) -> Self {
        if v == BusyState::Busy as u8 {
            BusyState::Busy
        } else {
            BusyState::Free
        }
    }
}

/// Atomic Free/Busy guard with a bounded poll interval
pub struct BusyLock {
    state: AtomicU8,
    poll_interval_ms: AtomicU32,
}

impl BusyLock {
    /// Create a free lock with the default poll interval
    #[inline]
    pub const fn new() -> Self {
        BusyLock {
            state: AtomicU8::new(BusyState::Free as u8),
            poll_interval_ms: AtomicU32::new(1),
        }
    }

    /// Create a free lock polling every `interval` while blocked
    pub fn with_poll_interval(interval: Duration) -> Self {
        let lock = Self::new();
        lock.set_poll_interval(interval);
        lock
    }

    /// Current state (a snapshot; may change immediately)
    #[inline]
    pub fn state(&self) -> BusyState {
        BusyState::from(self.state.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.state() == BusyState::Busy
    }

    /// Free -> Busy with a single compare-and-swap. Never blocks.
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.state
            .compare_exchange(
                BusyState::Free as u8,
                BusyState::Busy as u8,
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Retry `try_acquire`, sleeping the poll interval between attempts,
    /// until it succeeds.
    pub fn acquire(&self) {
        while !self.try_acquire() {
            thread::sleep(self.poll_interval());
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    ///
    /// Returns `true` if the lock is now held by the caller.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.try_acquire() {
                return true;
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return false;
            }
            thread::sleep(self.poll_interval().min(timeout - elapsed));
        }
    }

    /// Unconditionally set Free.
    ///
    /// Idempotent: releasing a Free lock is a no-op.
    #[inline]
    pub fn release(&self) {
        self.state.store(BusyState::Free as u8, Ordering::Release);
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.poll_interval_ms.load(Ordering::Relaxed)))
    }

    /// Change the sleep used by blocking acquisition. Sub-millisecond values
    /// round up to 1ms.
    pub fn set_poll_interval(&self, interval: Duration) {
        let ms = interval.as_millis().clamp(1, u128::from(u32::MAX)) as u32;
        self.poll_interval_ms.store(ms, Ordering::Relaxed);
    }

    /// Blocking acquire; the returned scope releases on every exit path.
    #[inline]
    pub fn scope(&self) -> BusyScope<'_> {
        self.acquire();
        BusyScope { lock: self }
    }

    /// Non-blocking variant of [`scope`](Self::scope)
    #[inline]
    pub fn try_scope(&self) -> Option<BusyScope<'_>> {
        if self.try_acquire() {
            Some(BusyScope { lock: self })
        } else {
            None
        }
    }
}

impl Default for BusyLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BusyLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusyLock")
            .field("state", &self.state())
            .field("poll_interval", &self.poll_interval())
            .finish()
    }
}

/// Holds a [`BusyLock`] in the Busy state until dropped
#[must_use = "the lock is released as soon as the scope is dropped"]
pub struct BusyScope<'a> {
    lock: &'a BusyLock,
}

impl Drop for BusyScope<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// A value guarded by a [`BusyLock`]
pub struct BusyCell<T> {
    lock: BusyLock,
    value: UnsafeCell<T>,
}

// Safety: BusyCell hands out access to T only while its lock is Busy
unsafe impl<T: Send> Send for BusyCell<T> {}
unsafe impl<T: Send> Sync for BusyCell<T> {}

impl<T> BusyCell<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        BusyCell {
            lock: BusyLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Create a cell whose lock polls every `interval` while blocked
    pub fn with_poll_interval(value: T, interval: Duration) -> Self {
        BusyCell {
            lock: BusyLock::with_poll_interval(interval),
            value: UnsafeCell::new(value),
        }
    }

    /// The underlying lock
    #[inline]
    pub fn lock(&self) -> &BusyLock {
        &self.lock
    }

    /// Blocking acquire with scoped release
    #[inline]
    pub fn scope(&self) -> BusyGuard<'_, T> {
        self.lock.acquire();
        BusyGuard { cell: self }
    }

    /// Non-blocking acquire with scoped release
    #[inline]
    pub fn try_scope(&self) -> Option<BusyGuard<'_, T>> {
        if self.lock.try_acquire() {
            Some(BusyGuard { cell: self })
        } else {
            None
        }
    }

    /// Mutable access through exclusive ownership (no locking needed)
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Raw access to the guarded value.
    ///
    /// # Safety
    ///
    /// Caller must own the Busy state of this cell's lock for as long as the
    /// returned reference lives.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_unchecked(&self) -> &mut T {
        &mut *self.value.get()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for BusyCell<T> {
    fn default() -> Self {
        BusyCell::new(T::default())
    }
}

/// Scoped access to a [`BusyCell`]'s value; releases the lock when dropped
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct BusyGuard<'a, T> {
    cell: &'a BusyCell<T>,
}

impl<T> Deref for BusyGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // Safety: We hold the Busy state
        unsafe { &*self.cell.value.get() }
    }
}

impl<T> DerefMut for BusyGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: We hold the Busy state
        unsafe { &mut *self.cell.value.get() }
    }
}

impl<T> Drop for BusyGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.cell.lock.release();
    }
}
