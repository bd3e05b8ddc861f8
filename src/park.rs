//! Thread parking, unparking, and interruption.
//!
//! A [`Waiter`] is a cloneable handle to a thread's parking permit. Parking consumes the
//! permit or blocks until one is made available by [`Waiter::unpark`]; a permit granted
//! before the thread parks makes the next park return immediately, so a wakeup delivered
//! between a queue check and the park itself is never lost.

#![deny(unsafe_code)]

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::Arc;
use std::time::Instant;

#[cfg(not(feature = "loom"))]
use std::thread::{current, park, park_timeout, Thread};

#[cfg(feature = "loom")]
use loom::thread::{current, park, yield_now, Thread};

/// Monotonic thread identity, assigned on first use. `0` is never issued.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[cfg(not(feature = "loom"))]
thread_local! {
    static CURRENT: Waiter = Waiter {
        thread: current(),
        interrupted: Arc::new(AtomicBool::new(false)),
        id: NEXT_ID.fetch_add(1, Relaxed),
    };
}

// Loom reuses OS threads across executions; its own thread-local storage is
// reset in between, keeping the cached handle valid.
#[cfg(feature = "loom")]
loom::thread_local! {
    static CURRENT: Waiter = Waiter {
        thread: current(),
        interrupted: Arc::new(AtomicBool::new(false)),
        id: NEXT_ID.fetch_add(1, Relaxed),
    };
}

/// A handle to a waiting thread.
///
/// Cloning a [`Waiter`] yields another handle to the same thread; the handle stays valid
/// after the thread exits, at which point waking it has no effect.
///
/// # Examples
///
/// ```
/// use parkq::Waiter;
///
/// let waiter = Waiter::current();
/// assert!(!waiter.is_interrupted());
/// ```
#[derive(Clone)]
pub struct Waiter {
    /// The underlying parking permit.
    thread: Thread,
    /// Set by [`Waiter::interrupt`], consumed by the waiting thread.
    interrupted: Arc<AtomicBool>,
    /// Crate-wide unique identity of the thread.
    id: u64,
}

impl Waiter {
    /// Returns a handle to the current thread.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Waiter;
    ///
    /// let waiter = Waiter::current();
    /// assert_ne!(waiter.id(), 0);
    /// ```
    #[inline]
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    /// Returns the unique identity of the thread behind this handle.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Makes a parking permit available to the thread.
    ///
    /// If the thread is parked it wakes up; otherwise its next park returns immediately.
    #[inline]
    pub fn unpark(&self) {
        self.thread.unpark();
    }

    /// Interrupts the thread.
    ///
    /// Sets the interrupt flag and wakes the thread if it is parked. Interruptible waits
    /// observe the flag, consume it, and return
    /// [`Interrupted`](crate::Interrupted); uninterruptible waits leave it set for the
    /// next interruptible operation to pick up.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkq::Waiter;
    ///
    /// let waiter = Waiter::current();
    /// waiter.interrupt();
    /// assert!(waiter.is_interrupted());
    /// ```
    #[inline]
    pub fn interrupt(&self) {
        self.interrupted.store(true, Release);
        self.thread.unpark();
    }

    /// Returns `true` if the thread has a pending interrupt.
    ///
    /// Does not consume the flag.
    #[inline]
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Acquire)
    }
}

impl fmt::Debug for Waiter {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}

/// Returns the identity of the current thread without cloning the handle.
#[inline]
pub(crate) fn current_id() -> u64 {
    CURRENT.with(|waiter| waiter.id)
}

/// Consumes and returns the current thread's interrupt flag.
#[inline]
pub(crate) fn take_interrupted() -> bool {
    CURRENT.with(|waiter| waiter.interrupted.swap(false, AcqRel))
}

/// Re-asserts the current thread's interrupt flag.
#[inline]
pub(crate) fn set_interrupted() {
    CURRENT.with(|waiter| waiter.interrupted.store(true, Release));
}

/// Parks the current thread until a permit becomes available.
///
/// May also return spuriously; callers re-check their wait condition in a loop.
#[inline]
pub(crate) fn park_current() {
    park();
}

/// Parks the current thread until a permit becomes available or the deadline passes.
#[inline]
pub(crate) fn park_until(deadline: Instant) {
    #[cfg(feature = "loom")]
    {
        let _ = deadline;
        yield_now();
    }
    #[cfg(not(feature = "loom"))]
    if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        park_timeout(remaining);
    }
}
