//! [`Semaphore`] is a counting semaphore distributing permits.

#![deny(unsafe_code)]

use std::sync::atomic::Ordering::{self, Acquire, Relaxed, Release};
use std::time::Duration;

use crate::config::Config;
use crate::error::Interrupted;
use crate::synchronizer::{Protocol, Synchronizer};

/// The maximum number of permits a [`Semaphore`] can hold.
pub const MAX_PERMITS: u64 = i64::MAX as u64;

/// [`Semaphore`] is a counting semaphore distributing permits.
///
/// Permits are not tied to threads: any thread may release permits it never
/// acquired, growing the semaphore. Acquisition barges; a thread arriving when
/// permits are available may overtake parked waiters.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::Ordering::Relaxed;
///
/// use parkq::Semaphore;
///
/// let semaphore = Semaphore::new(2);
///
/// semaphore.acquire();
/// semaphore.acquire();
/// assert_eq!(semaphore.available_permits(Relaxed), 0);
/// assert!(!semaphore.try_acquire());
///
/// semaphore.release();
/// semaphore.release();
/// assert_eq!(semaphore.available_permits(Relaxed), 2);
/// ```
#[derive(Debug)]
pub struct Semaphore {
    /// The synchronizer driving this semaphore; its state word counts permits.
    sync: Synchronizer<SemaphoreState>,
}

/// The state protocol of [`Semaphore`]: the state word is the number of
/// available permits.
#[derive(Debug, Default)]
pub struct SemaphoreState;

impl Semaphore {
    /// Creates a new [`Semaphore`] with the given number of permits.
    ///
    /// Panics if `permits` exceeds [`MAX_PERMITS`].
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Semaphore;
    ///
    /// let semaphore = Semaphore::new(16);
    /// ```
    #[cfg(not(feature = "loom"))]
    #[inline]
    #[must_use]
    pub const fn new(permits: u64) -> Self {
        assert!(permits <= MAX_PERMITS, "permit count overflow");
        Self {
            sync: Synchronizer::with_state(SemaphoreState, permits),
        }
    }

    /// Creates a new [`Semaphore`] with the given number of permits.
    ///
    /// Panics if `permits` exceeds [`MAX_PERMITS`].
    #[cfg(feature = "loom")]
    #[inline]
    #[must_use]
    pub fn new(permits: u64) -> Self {
        assert!(permits <= MAX_PERMITS, "permit count overflow");
        Self {
            sync: Synchronizer::with_state(SemaphoreState, permits),
        }
    }

    /// Returns the number of available permits.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// use parkq::Semaphore;
    ///
    /// let semaphore = Semaphore::new(3);
    /// assert_eq!(semaphore.available_permits(Relaxed), 3);
    /// ```
    #[inline]
    #[must_use]
    pub fn available_permits(&self, mo: Ordering) -> u64 {
        self.sync.state(mo)
    }

    /// Acquires a permit, blocking until one is available.
    #[inline]
    pub fn acquire(&self) {
        self.sync.acquire_shared(1);
    }

    /// Acquires `permits` permits, blocking until all of them are available at
    /// once.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Semaphore;
    ///
    /// let semaphore = Semaphore::new(4);
    ///
    /// semaphore.acquire_many(4);
    /// assert!(!semaphore.try_acquire());
    /// semaphore.release_many(4);
    /// ```
    #[inline]
    pub fn acquire_many(&self, permits: u64) {
        self.sync.acquire_shared(permits);
    }

    /// Acquires a permit, aborting if the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before a permit is
    /// acquired.
    #[inline]
    pub fn acquire_interruptibly(&self) -> Result<(), Interrupted> {
        self.sync.acquire_shared_interruptibly(1)
    }

    /// Acquires `permits` permits, aborting if the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before the permits
    /// are acquired.
    #[inline]
    pub fn acquire_many_interruptibly(&self, permits: u64) -> Result<(), Interrupted> {
        self.sync.acquire_shared_interruptibly(permits)
    }

    /// Tries to acquire a permit without waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Semaphore;
    ///
    /// let semaphore = Semaphore::new(1);
    ///
    /// assert!(semaphore.try_acquire());
    /// assert!(!semaphore.try_acquire());
    /// semaphore.release();
    /// ```
    #[inline]
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_many(1)
    }

    /// Tries to acquire `permits` permits without waiting.
    #[inline]
    #[must_use]
    pub fn try_acquire_many(&self, permits: u64) -> bool {
        self.sync.protocol().try_acquire_shared(&self.sync, permits) >= 0
    }

    /// Tries to acquire a permit within the given duration.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before a permit is
    /// acquired.
    #[inline]
    pub fn try_acquire_for(&self, timeout: Duration) -> Result<bool, Interrupted> {
        self.sync.try_acquire_shared_for(1, timeout)
    }

    /// Tries to acquire `permits` permits within the given duration.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread is interrupted before the permits
    /// are acquired.
    #[inline]
    pub fn try_acquire_many_for(&self, permits: u64, timeout: Duration) -> Result<bool, Interrupted> {
        self.sync.try_acquire_shared_for(permits, timeout)
    }

    /// Releases a permit.
    ///
    /// Panics if the permit count would exceed [`MAX_PERMITS`].
    #[inline]
    pub fn release(&self) {
        self.sync.release_shared(1);
    }

    /// Releases `permits` permits.
    ///
    /// Panics if the permit count would exceed [`MAX_PERMITS`].
    #[inline]
    pub fn release_many(&self, permits: u64) {
        self.sync.release_shared(permits);
    }

    /// Returns `true` if any thread is waiting for permits.
    #[inline]
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.sync.has_queued_threads()
    }

    /// Returns an estimate of the number of threads waiting for permits.
    #[inline]
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.sync.queue_length()
    }
}

impl Protocol for SemaphoreState {
    #[inline]
    fn try_acquire_shared<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> i64 {
        let mut available = sync.state(Relaxed);
        loop {
            let Some(remaining) = available.checked_sub(arg) else {
                return -1;
            };
            match sync.compare_exchange_state(available, remaining, Acquire, Relaxed) {
                Ok(_) => return i64::try_from(remaining).unwrap_or(i64::MAX),
                Err(actual) => available = actual,
            }
        }
    }

    #[inline]
    fn try_release_shared<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> bool {
        let mut available = sync.state(Relaxed);
        loop {
            let next = available.checked_add(arg).filter(|next| *next <= MAX_PERMITS);
            let Some(next) = next else {
                panic!("permit count overflow");
            };
            match sync.compare_exchange_state(available, next, Release, Relaxed) {
                Ok(_) => return true,
                Err(actual) => available = actual,
            }
        }
    }
}
