//! [`Lock`] is a lock allowing both shared and exclusive ownership of a resource.

#![deny(unsafe_code)]

use std::sync::atomic::Ordering::{self, Acquire, Relaxed, Release};
use std::time::Duration;

use crate::config::Config;
use crate::error::Interrupted;
use crate::synchronizer::{Protocol, Synchronizer};

/// The state word value representing exclusive ownership.
const EXCLUSIVE: u64 = u64::MAX;

/// The maximum number of concurrent shared owners.
pub const MAX_SHARED_OWNERS: u64 = u64::MAX - 1;

/// [`Lock`] is a lock allowing both shared and exclusive ownership of a resource.
///
/// The lock is not reentrant, carries no notion of an owning thread, and admits
/// barging: a thread that shows up exactly when the lock is free may overtake
/// parked waiters. [`ReentrantLock`](crate::ReentrantLock) provides owner
/// tracking, reentrancy, and condition waits instead.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::Ordering::Relaxed;
///
/// use parkq::Lock;
///
/// let lock = Lock::new();
///
/// lock.lock();
/// assert!(lock.is_locked(Relaxed));
/// assert!(lock.release_lock());
/// assert!(lock.is_free(Relaxed));
/// ```
#[derive(Debug)]
pub struct Lock {
    /// The synchronizer driving this lock.
    sync: Synchronizer<LockState>,
}

/// The state protocol of [`Lock`]: `0` is free, [`u64::MAX`] is exclusively
/// owned, and any other value counts shared owners.
#[derive(Debug, Default)]
pub struct LockState;

impl Lock {
    /// Creates a new [`Lock`].
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    /// ```
    #[cfg(not(feature = "loom"))]
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sync: Synchronizer::new(LockState),
        }
    }

    /// Creates a new [`Lock`].
    #[cfg(feature = "loom")]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            sync: Synchronizer::new(LockState),
        }
    }

    /// Returns `true` if the lock is free.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    /// assert!(lock.is_free(Relaxed));
    /// ```
    #[inline]
    #[must_use]
    pub fn is_free(&self, mo: Ordering) -> bool {
        self.sync.state(mo) == 0
    }

    /// Returns `true` if the lock is exclusively owned.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    /// assert!(lock.try_lock());
    /// assert!(lock.is_locked(Relaxed));
    /// assert!(lock.release_lock());
    /// ```
    #[inline]
    #[must_use]
    pub fn is_locked(&self, mo: Ordering) -> bool {
        self.sync.state(mo) == EXCLUSIVE
    }

    /// Returns `true` if the lock is owned by shared owners.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    /// assert!(lock.try_share());
    /// assert!(lock.is_shared(Relaxed));
    /// assert!(lock.release_share());
    /// ```
    #[inline]
    #[must_use]
    pub fn is_shared(&self, mo: Ordering) -> bool {
        let state = self.sync.state(mo);
        state != 0 && state != EXCLUSIVE
    }

    /// Returns the number of shared owners, or zero if the lock is free or
    /// exclusively owned.
    #[inline]
    #[must_use]
    pub fn shared_owners(&self, mo: Ordering) -> u64 {
        let state = self.sync.state(mo);
        if state == EXCLUSIVE {
            0
        } else {
            state
        }
    }

    /// Acquires the lock exclusively, blocking until it is available.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    ///
    /// lock.lock();
    /// assert!(!lock.try_lock());
    /// assert!(lock.release_lock());
    /// ```
    #[inline]
    pub fn lock(&self) {
        self.sync.acquire(1);
    }

    /// Acquires the lock exclusively, aborting if the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before the lock is
    /// acquired.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    ///
    /// assert!(lock.lock_interruptibly().is_ok());
    /// assert!(lock.release_lock());
    /// ```
    #[inline]
    pub fn lock_interruptibly(&self) -> Result<(), Interrupted> {
        self.sync.acquire_interruptibly(1)
    }

    /// Tries to acquire the lock exclusively without waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    ///
    /// assert!(lock.try_lock());
    /// assert!(!lock.try_lock());
    /// assert!(lock.release_lock());
    /// ```
    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.sync.protocol().try_acquire(&self.sync, 1)
    }

    /// Tries to acquire the lock exclusively within the given duration.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before the lock is
    /// acquired.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    ///
    /// assert_eq!(lock.try_lock_for(Duration::from_millis(10)), Ok(true));
    /// assert!(lock.release_lock());
    /// ```
    #[inline]
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, Interrupted> {
        self.sync.try_acquire_for(1, timeout)
    }

    /// Acquires the lock in shared mode, blocking until it is available.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    ///
    /// lock.share();
    /// lock.share();
    /// assert!(lock.release_share());
    /// assert!(lock.release_share());
    /// ```
    #[inline]
    pub fn share(&self) {
        self.sync.acquire_shared(1);
    }

    /// Acquires the lock in shared mode, aborting if the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before the lock is
    /// acquired.
    #[inline]
    pub fn share_interruptibly(&self) -> Result<(), Interrupted> {
        self.sync.acquire_shared_interruptibly(1)
    }

    /// Tries to acquire the lock in shared mode without waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    ///
    /// assert!(lock.try_share());
    /// assert!(lock.try_share());
    /// assert!(lock.release_share());
    /// assert!(lock.release_share());
    /// ```
    #[inline]
    #[must_use]
    pub fn try_share(&self) -> bool {
        self.sync.protocol().try_acquire_shared(&self.sync, 1) >= 0
    }

    /// Tries to acquire the lock in shared mode within the given duration.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before the lock is
    /// acquired.
    #[inline]
    pub fn try_share_for(&self, timeout: Duration) -> Result<bool, Interrupted> {
        self.sync.try_acquire_shared_for(1, timeout)
    }

    /// Releases exclusive ownership of the lock.
    ///
    /// Returns `false` if the lock was not exclusively owned.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    /// assert!(!lock.release_lock());
    ///
    /// lock.lock();
    /// assert!(lock.release_lock());
    /// ```
    #[inline]
    pub fn release_lock(&self) -> bool {
        self.sync.release(1)
    }

    /// Releases shared ownership of the lock.
    ///
    /// Returns `false` if the lock had no shared owners.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Lock;
    ///
    /// let lock = Lock::new();
    /// assert!(!lock.release_share());
    ///
    /// lock.share();
    /// assert!(lock.release_share());
    /// ```
    #[inline]
    pub fn release_share(&self) -> bool {
        let mut state = self.sync.state(Relaxed);
        loop {
            if state == 0 || state == EXCLUSIVE {
                return false;
            }
            match self
                .sync
                .compare_exchange_state(state, state - 1, Release, Relaxed)
            {
                Ok(_) => break,
                Err(actual) => state = actual,
            }
        }
        if state == 1 {
            // The lock became free; exclusive waiters may proceed.
            self.sync.release_shared(0);
        }
        true
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

impl Default for Lock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for LockState {
    #[inline]
    fn try_acquire<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> bool {
        sync.compare_exchange_state(0, EXCLUSIVE, Acquire, Relaxed)
            .is_ok()
    }

    #[inline]
    fn try_release<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> bool {
        sync.compare_exchange_state(EXCLUSIVE, 0, Release, Relaxed)
            .is_ok()
    }

    #[inline]
    fn try_acquire_shared<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> i64 {
        let mut state = sync.state(Relaxed);
        loop {
            if state == EXCLUSIVE || state >= MAX_SHARED_OWNERS {
                return -1;
            }
            match sync.compare_exchange_state(state, state + 1, Acquire, Relaxed) {
                Ok(_) => return 1,
                Err(actual) => state = actual,
            }
        }
    }

    #[inline]
    fn try_release_shared<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> bool {
        // `Lock::release_share` decrements before signalling; reaching this hook
        // means the count hit zero and waiters may proceed.
        let _ = sync;
        true
    }
}
