//! [`ReentrantLock`] is an owner-aware, reentrant mutual exclusion lock.

#![deny(unsafe_code)]

use std::sync::atomic::Ordering::{self, Acquire, Relaxed, Release};
use std::time::Duration;

#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicU64;

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicU64;

use crate::condition::Condition;
use crate::config::Config;
use crate::error::{Interrupted, WaitError};
use crate::park;
use crate::synchronizer::{Protocol, Synchronizer};

/// [`ReentrantLock`] is an owner-aware, reentrant mutual exclusion lock.
///
/// The owning thread may lock again without deadlocking; the lock is freed once
/// `unlock` has been called as many times as `lock`. Because ownership is
/// tracked, the lock can hand out [`Condition`]s.
///
/// The default mode admits barging. [`ReentrantLock::new_fair`] yields a FIFO
/// lock instead, with one deliberate exception: [`ReentrantLock::try_lock`]
/// barges even in fair mode, so that polling for the lock stays cheap and
/// cannot deadlock behind a parked queue.
///
/// # Examples
///
/// ```
/// use parkq::ReentrantLock;
///
/// let lock = ReentrantLock::new();
///
/// lock.lock();
/// lock.lock();
/// assert_eq!(lock.hold_count(), 2);
///
/// assert_eq!(lock.unlock(), Ok(false));
/// assert_eq!(lock.unlock(), Ok(true));
/// assert_eq!(lock.hold_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReentrantLock {
    /// The synchronizer driving this lock; its state word is the hold count.
    sync: Synchronizer<ReentrantState>,
}

/// The state protocol of [`ReentrantLock`]: the state word holds the
/// recursion count and `owner` identifies the holding thread.
#[derive(Debug, Default)]
pub struct ReentrantState {
    /// Identity of the owning thread, `0` when free. Cleared before the state
    /// word, so a thread that reads its own identity is the holder.
    owner: AtomicU64,
    /// Whether acquisition defers to longer-waiting threads.
    fair: bool,
}

impl ReentrantState {
    /// Acquisition attempt that never defers to queued threads.
    fn try_barge<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> bool {
        let me = park::current_id();
        let state = sync.state(Relaxed);
        if state == 0 {
            if sync.compare_exchange_state(0, arg, Acquire, Relaxed).is_ok() {
                self.owner.store(me, Relaxed);
                return true;
            }
            return false;
        }
        // A thread always observes its own `owner` writes, which is all this
        // comparison relies on.
        if self.owner.load(Relaxed) == me {
            let Some(next) = state.checked_add(arg) else {
                panic!("reentrant lock hold count overflow");
            };
            sync.store_state(next, Relaxed);
            return true;
        }
        false
    }
}

impl Protocol for ReentrantState {
    #[inline]
    fn try_acquire<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> bool {
        if self.fair && sync.state(Relaxed) == 0 && sync.has_queued_predecessors() {
            return false;
        }
        self.try_barge(sync, arg)
    }

    #[inline]
    fn try_release<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> bool {
        if !self.is_held_exclusively(sync) {
            return false;
        }
        let state = sync.state(Relaxed);
        let Some(next) = state.checked_sub(arg) else {
            return false;
        };
        if next == 0 {
            self.owner.store(0, Relaxed);
        }
        sync.store_state(next, Release);
        next == 0
    }

    #[inline]
    fn is_held_exclusively<C: Config>(&self, sync: &Synchronizer<Self, C>) -> bool {
        let _ = sync;
        self.owner.load(Relaxed) == park::current_id()
    }
}

impl ReentrantLock {
    /// Creates a new [`ReentrantLock`] that admits barging.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::ReentrantLock;
    ///
    /// let lock = ReentrantLock::new();
    /// assert!(!lock.is_fair());
    /// ```
    #[cfg(not(feature = "loom"))]
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sync: Synchronizer::new(ReentrantState {
                owner: AtomicU64::new(0),
                fair: false,
            }),
        }
    }

    /// Creates a new [`ReentrantLock`] that admits barging.
    #[cfg(feature = "loom")]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            sync: Synchronizer::new(ReentrantState {
                owner: AtomicU64::new(0),
                fair: false,
            }),
        }
    }

    /// Creates a new [`ReentrantLock`] that grants the lock to the
    /// longest-waiting thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::ReentrantLock;
    ///
    /// let lock = ReentrantLock::new_fair();
    /// assert!(lock.is_fair());
    /// ```
    #[cfg(not(feature = "loom"))]
    #[inline]
    #[must_use]
    pub const fn new_fair() -> Self {
        Self {
            sync: Synchronizer::new(ReentrantState {
                owner: AtomicU64::new(0),
                fair: true,
            }),
        }
    }

    /// Creates a new [`ReentrantLock`] that grants the lock to the
    /// longest-waiting thread.
    #[cfg(feature = "loom")]
    #[inline]
    #[must_use]
    pub fn new_fair() -> Self {
        Self {
            sync: Synchronizer::new(ReentrantState {
                owner: AtomicU64::new(0),
                fair: true,
            }),
        }
    }

    /// Returns `true` if the lock grants ownership in FIFO order.
    #[inline]
    #[must_use]
    pub fn is_fair(&self) -> bool {
        self.sync.protocol().fair
    }

    /// Returns `true` if any thread holds the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self, mo: Ordering) -> bool {
        self.sync.state(mo) != 0
    }

    /// Returns `true` if the current thread holds the lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::ReentrantLock;
    ///
    /// let lock = ReentrantLock::new();
    /// assert!(!lock.is_held_by_current_thread());
    ///
    /// lock.lock();
    /// assert!(lock.is_held_by_current_thread());
    /// assert_eq!(lock.unlock(), Ok(true));
    /// ```
    #[inline]
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync.protocol().is_held_exclusively(&self.sync)
    }

    /// Returns the current thread's recursion count on the lock, or zero if the
    /// current thread does not hold it.
    #[inline]
    #[must_use]
    pub fn hold_count(&self) -> u64 {
        if self.is_held_by_current_thread() {
            self.sync.state(Acquire)
        } else {
            0
        }
    }

    /// Acquires the lock, blocking until it is available.
    ///
    /// Panics if the recursion count would overflow.
    #[inline]
    pub fn lock(&self) {
        self.sync.acquire(1);
    }

    /// Acquires the lock, aborting if the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before the lock is
    /// acquired.
    #[inline]
    pub fn lock_interruptibly(&self) -> Result<(), Interrupted> {
        self.sync.acquire_interruptibly(1)
    }

    /// Tries to acquire the lock without waiting.
    ///
    /// Barges even on a fair lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::ReentrantLock;
    ///
    /// let lock = ReentrantLock::new();
    ///
    /// assert!(lock.try_lock());
    /// assert!(lock.try_lock());
    /// assert_eq!(lock.unlock(), Ok(false));
    /// assert_eq!(lock.unlock(), Ok(true));
    /// ```
    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.sync.protocol().try_barge(&self.sync, 1)
    }

    /// Tries to acquire the lock within the given duration.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before the lock is
    /// acquired.
    #[inline]
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, Interrupted> {
        self.sync.try_acquire_for(1, timeout)
    }

    /// Releases the lock once.
    ///
    /// Returns `Ok(true)` when the lock became free and `Ok(false)` when the
    /// current thread still holds it reentrantly.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the current thread does not hold the
    /// lock.
    #[inline]
    pub fn unlock(&self) -> Result<bool, WaitError> {
        if !self.is_held_by_current_thread() {
            return Err(WaitError::NotHeld);
        }
        Ok(self.sync.release(1))
    }

    /// Returns a new [`Condition`] associated with this lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::ReentrantLock;
    ///
    /// let lock = ReentrantLock::new();
    /// let condition = lock.condition();
    ///
    /// lock.lock();
    /// assert_eq!(condition.has_waiters(), Ok(false));
    /// assert_eq!(lock.unlock(), Ok(true));
    /// ```
    #[inline]
    #[must_use]
    pub fn condition(&self) -> Condition<'_, ReentrantState> {
        self.sync.condition()
    }

    /// Returns `true` if any thread is waiting for the lock.
    #[inline]
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    /// Returns an estimate of the number of threads waiting for the lock.
    #[inline]
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }
}

impl Default for ReentrantLock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
