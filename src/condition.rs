//! [`Condition`] provides monitor-style waiting on top of a [`Synchronizer`].
//!
//! A condition queue is a singly linked list of nodes owned by threads that
//! released the synchronizer to wait for an event. Signalling moves nodes from
//! the condition queue to the synchronizer's wait queue, where the waiter
//! reacquires with its saved state before returning. Every operation requires
//! exclusive ownership, so the list itself needs no further synchronization.

use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::null_mut;
use std::sync::atomic::Ordering::{Acquire, Relaxed};
use std::time::{Duration, Instant};

use crate::config::{Config, DefaultConfig};
use crate::error::WaitError;
use crate::node::{Node, CONDITION};
use crate::park::{self, Waiter};
use crate::synchronizer::{Protocol, QueuedOutcome, Synchronizer};

/// How an interrupt observed during a wait is reported.
#[derive(Clone, Copy, Eq, PartialEq)]
enum InterruptMode {
    /// No interrupt observed.
    None,
    /// Re-assert the interrupt flag before returning.
    Reassert,
    /// Return [`WaitError::Interrupted`].
    Abort,
}

/// A waiting point associated with a [`Synchronizer`].
///
/// Created by [`Synchronizer::condition`] or a consumer convenience such as
/// [`ReentrantLock::condition`](crate::ReentrantLock::condition). A synchronizer
/// can hand out any number of independent conditions. Every method demands that
/// the calling thread holds the synchronizer exclusively and returns
/// [`WaitError::NotHeld`] otherwise.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
/// use std::thread;
///
/// use parkq::ReentrantLock;
///
/// let lock = ReentrantLock::new();
/// let condition = lock.condition();
/// let ready = AtomicBool::new(false);
///
/// thread::scope(|s| {
///     s.spawn(|| {
///         lock.lock();
///         while !ready.load(Relaxed) {
///             condition.wait().unwrap();
///         }
///         lock.unlock().unwrap();
///     });
///     lock.lock();
///     ready.store(true, Relaxed);
///     condition.signal().unwrap();
///     lock.unlock().unwrap();
/// });
/// ```
pub struct Condition<'s, P: Protocol, C: Config = DefaultConfig> {
    /// The associated synchronizer.
    sync: &'s Synchronizer<P, C>,
    /// First node of the condition queue.
    first_waiter: UnsafeCell<*mut Node>,
    /// Last node of the condition queue.
    last_waiter: UnsafeCell<*mut Node>,
}

// The list cells are only touched by a thread holding the synchronizer
// exclusively, which the methods verify up front.
unsafe impl<P: Protocol + Send, C: Config> Send for Condition<'_, P, C> {}
unsafe impl<P: Protocol + Send + Sync, C: Config> Sync for Condition<'_, P, C> {}

impl<'s, P: Protocol, C: Config> Condition<'s, P, C> {
    /// Creates a condition associated with the given synchronizer.
    pub(crate) fn new(sync: &'s Synchronizer<P, C>) -> Self {
        Self {
            sync,
            first_waiter: UnsafeCell::new(null_mut()),
            last_waiter: UnsafeCell::new(null_mut()),
        }
    }

    /// Releases the synchronizer and waits until signalled.
    ///
    /// Atomic with respect to signalling: a signal sent after this method is
    /// entered and before it returns is never missed. The synchronizer is
    /// reacquired with its saved state before returning, on every path.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the calling thread does not hold the
    /// synchronizer exclusively, and [`WaitError::Interrupted`] if the thread is
    /// interrupted before being signalled.
    #[inline]
    pub fn wait(&self) -> Result<(), WaitError> {
        self.do_wait(None, true).map(|_| ())
    }

    /// Releases the synchronizer and waits until signalled, ignoring interrupts.
    ///
    /// An interrupt that arrives while waiting is re-asserted before returning.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the calling thread does not hold the
    /// synchronizer exclusively.
    #[inline]
    pub fn wait_uninterruptibly(&self) -> Result<(), WaitError> {
        self.do_wait(None, false).map(|_| ())
    }

    /// Releases the synchronizer and waits until signalled or `timeout` elapses.
    ///
    /// Returns `Ok(false)` if the wait timed out before a signal arrived. The
    /// synchronizer is reacquired before returning in either case.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the calling thread does not hold the
    /// synchronizer exclusively, and [`WaitError::Interrupted`] if the thread is
    /// interrupted before being signalled.
    #[inline]
    pub fn wait_for(&self, timeout: Duration) -> Result<bool, WaitError> {
        self.do_wait(Instant::now().checked_add(timeout), true)
    }

    /// Releases the synchronizer and waits until signalled or the deadline passes.
    ///
    /// Returns `Ok(false)` if the deadline passed before a signal arrived.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the calling thread does not hold the
    /// synchronizer exclusively, and [`WaitError::Interrupted`] if the thread is
    /// interrupted before being signalled.
    #[inline]
    pub fn wait_until(&self, deadline: Instant) -> Result<bool, WaitError> {
        self.do_wait(Some(deadline), true)
    }

    /// Moves the longest-waiting thread, if any, to the synchronizer's wait
    /// queue.
    ///
    /// The signalled thread returns from its wait only after reacquiring the
    /// synchronizer, which the caller still holds.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the calling thread does not hold the
    /// synchronizer exclusively.
    #[inline]
    pub fn signal(&self) -> Result<(), WaitError> {
        if !self.sync.protocol().is_held_exclusively(self.sync) {
            return Err(WaitError::NotHeld);
        }
        // SAFETY: the synchronizer is held exclusively.
        unsafe { self.do_signal(false) };
        Ok(())
    }

    /// Moves all waiting threads to the synchronizer's wait queue.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the calling thread does not hold the
    /// synchronizer exclusively.
    #[inline]
    pub fn signal_all(&self) -> Result<(), WaitError> {
        if !self.sync.protocol().is_held_exclusively(self.sync) {
            return Err(WaitError::NotHeld);
        }
        // SAFETY: the synchronizer is held exclusively.
        unsafe { self.do_signal(true) };
        Ok(())
    }

    /// Returns `true` if any thread is waiting on this condition.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the calling thread does not hold the
    /// synchronizer exclusively.
    #[inline]
    pub fn has_waiters(&self) -> Result<bool, WaitError> {
        self.waiter_count().map(|count| count != 0)
    }

    /// Returns the number of threads waiting on this condition.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::NotHeld`] if the calling thread does not hold the
    /// synchronizer exclusively.
    #[inline]
    pub fn waiter_count(&self) -> Result<usize, WaitError> {
        if !self.sync.protocol().is_held_exclusively(self.sync) {
            return Err(WaitError::NotHeld);
        }
        let mut count = 0;
        // SAFETY: the synchronizer is held exclusively.
        unsafe {
            let mut cursor = *self.first_waiter.get();
            while !cursor.is_null() {
                if (*cursor).status.load(Acquire) == CONDITION {
                    count += 1;
                }
                cursor = (*cursor).cond_next.load(Relaxed);
            }
        }
        Ok(count)
    }

    /// The common wait path. Returns `Ok(false)` on timeout.
    fn do_wait(&self, deadline: Option<Instant>, interruptible: bool) -> Result<bool, WaitError> {
        if !self.sync.protocol().is_held_exclusively(self.sync) {
            return Err(WaitError::NotHeld);
        }
        let node = Box::into_raw(Node::new_condition(Waiter::current()));
        // SAFETY: the synchronizer is held exclusively.
        unsafe { self.append_waiter(node) };
        let Some(saved) = self.sync.fully_release() else {
            // The protocol refused to release despite the ownership check; undo.
            // SAFETY: still holding; the node was never published elsewhere.
            unsafe {
                self.unlink_waiter(node);
                drop(Box::from_raw(node));
            }
            return Err(WaitError::NotHeld);
        };

        let mut interrupt_mode = InterruptMode::None;
        let mut signalled = true;
        while !self.sync.is_on_sync_queue(node) {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    signalled = !self.sync.transfer_after_cancelled_wait(node);
                    break;
                }
                park::park_until(deadline);
            } else {
                park::park_current();
            }
            if park::take_interrupted() {
                if interruptible {
                    interrupt_mode = if self.sync.transfer_after_cancelled_wait(node) {
                        InterruptMode::Abort
                    } else {
                        // A signal won the race; report the interrupt without
                        // swallowing the signal.
                        InterruptMode::Reassert
                    };
                    break;
                }
                interrupt_mode = InterruptMode::Reassert;
            }
        }

        if let QueuedOutcome::Acquired { interrupted: true } =
            self.sync.acquire_node(node, saved, None, false)
        {
            if interrupt_mode != InterruptMode::Abort {
                interrupt_mode = InterruptMode::Reassert;
            }
        }
        // Holding again; drop our own entry (and any other abandoned ones) from
        // the list before the node can be reclaimed.
        // SAFETY: the synchronizer is held exclusively.
        unsafe { self.unlink_cancelled_waiters() };

        match interrupt_mode {
            InterruptMode::Abort => Err(WaitError::Interrupted),
            InterruptMode::Reassert => {
                park::set_interrupted();
                Ok(signalled)
            }
            InterruptMode::None => Ok(signalled),
        }
    }

    /// Appends a node to the condition queue, trimming first if the tail entry
    /// was abandoned.
    ///
    /// # Safety
    ///
    /// The synchronizer must be held exclusively by the calling thread.
    unsafe fn append_waiter(&self, node: *mut Node) {
        let mut last = *self.last_waiter.get();
        if !last.is_null() && (*last).status.load(Acquire) != CONDITION {
            self.unlink_cancelled_waiters();
            last = *self.last_waiter.get();
        }
        if last.is_null() {
            *self.first_waiter.get() = node;
        } else {
            (*last).cond_next.store(node, Relaxed);
        }
        *self.last_waiter.get() = node;
    }

    /// Pops waiters off the condition queue and transfers them to the wait
    /// queue; one transfer for a signal, all of them for a broadcast.
    ///
    /// # Safety
    ///
    /// The synchronizer must be held exclusively by the calling thread.
    unsafe fn do_signal(&self, all: bool) {
        let mut first = *self.first_waiter.get();
        while !first.is_null() {
            let next = (*first).cond_next.load(Relaxed);
            *self.first_waiter.get() = next;
            if next.is_null() {
                *self.last_waiter.get() = null_mut();
            }
            (*first).cond_next.store(null_mut(), Relaxed);
            if self.sync.transfer_for_signal(first) && !all {
                break;
            }
            first = *self.first_waiter.get();
        }
    }

    /// Unlinks every entry that is no longer in the waiting state.
    ///
    /// # Safety
    ///
    /// The synchronizer must be held exclusively by the calling thread.
    unsafe fn unlink_cancelled_waiters(&self) {
        let mut cursor = *self.first_waiter.get();
        let mut trail: *mut Node = null_mut();
        while !cursor.is_null() {
            let next = (*cursor).cond_next.load(Relaxed);
            if (*cursor).status.load(Acquire) == CONDITION {
                trail = cursor;
            } else {
                (*cursor).cond_next.store(null_mut(), Relaxed);
                if trail.is_null() {
                    *self.first_waiter.get() = next;
                } else {
                    (*trail).cond_next.store(next, Relaxed);
                }
                if next.is_null() {
                    *self.last_waiter.get() = trail;
                }
            }
            cursor = next;
        }
    }

    /// Unlinks one specific entry; used to back out of a failed wait setup.
    ///
    /// # Safety
    ///
    /// The synchronizer must be held exclusively by the calling thread.
    unsafe fn unlink_waiter(&self, node: *mut Node) {
        let mut cursor = *self.first_waiter.get();
        let mut trail: *mut Node = null_mut();
        while !cursor.is_null() {
            let next = (*cursor).cond_next.load(Relaxed);
            if cursor == node {
                if trail.is_null() {
                    *self.first_waiter.get() = next;
                } else {
                    (*trail).cond_next.store(next, Relaxed);
                }
                if next.is_null() {
                    *self.last_waiter.get() = trail;
                }
                return;
            }
            trail = cursor;
            cursor = next;
        }
    }
}

impl<P: Protocol, C: Config> fmt::Debug for Condition<'_, P, C> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition").finish_non_exhaustive()
    }
}
