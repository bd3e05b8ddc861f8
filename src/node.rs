//! Wait queue nodes.

use std::cell::UnsafeCell;
use std::ptr::null_mut;

#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicI32, AtomicPtr};

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicI32, AtomicPtr};

use crate::park::Waiter;

/// The node is in its default state: neither signalled, cancelled, nor on a condition queue.
pub(crate) const INITIAL: i32 = 0;
/// The node's successor is, or soon will be, parked; releasing must wake it.
pub(crate) const SIGNAL: i32 = -1;
/// The owner gave up waiting; terminal.
pub(crate) const CANCELLED: i32 = 1;
/// The node is on a condition queue, not the wait queue.
pub(crate) const CONDITION: i32 = -2;
/// A shared release should propagate to further shared waiters.
pub(crate) const PROPAGATE: i32 = -3;

/// Acquisition mode of a queued waiter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Mode {
    /// At most one holder at a time.
    Exclusive,
    /// Any number of concurrent holders, subject to the acquisition hook.
    Shared,
}

/// A wait queue node.
///
/// Nodes are heap-allocated by the enqueuing thread and freed exactly once: by the
/// winning acquirer when it replaces the queue head, by the cancelling owner after
/// excision, or by a condition queue when an entry is discarded before ever reaching
/// the wait queue.
///
/// Link fields (`prev`, `next`, `cond_next`) are only dereferenced while holding the
/// queue maintenance flag, with the exception of a thread reading its own node.
pub(crate) struct Node {
    /// One of [`INITIAL`], [`SIGNAL`], [`CANCELLED`], [`CONDITION`], [`PROPAGATE`].
    pub(crate) status: AtomicI32,
    /// Acquisition mode; immutable after construction.
    pub(crate) mode: Mode,
    /// Predecessor in the wait queue.
    pub(crate) prev: AtomicPtr<Node>,
    /// Successor in the wait queue. May lag `prev` during an in-flight enqueue.
    pub(crate) next: AtomicPtr<Node>,
    /// Successor in a condition queue. Only touched while holding the synchronizer.
    pub(crate) cond_next: AtomicPtr<Node>,
    /// Parking handle of the owning thread. `None` for the queue sentinel, and after
    /// cancellation or reclamation took it.
    waiter: UnsafeCell<Option<Waiter>>,
    /// Identity of the owning thread; `0` for the sentinel.
    pub(crate) waiter_id: u64,
}

// Nodes are shared across threads through raw pointers; link access is serialized by the
// queue maintenance flag and the `waiter` cell is only written by the owning thread
// before publication or by a maintenance-flag holder afterwards.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    /// Creates a wait queue node for the given thread.
    pub(crate) fn new(mode: Mode, waiter: Waiter) -> Box<Node> {
        let waiter_id = waiter.id();
        Box::new(Node {
            status: AtomicI32::new(INITIAL),
            mode,
            prev: AtomicPtr::new(null_mut()),
            next: AtomicPtr::new(null_mut()),
            cond_next: AtomicPtr::new(null_mut()),
            waiter: UnsafeCell::new(Some(waiter)),
            waiter_id,
        })
    }

    /// Creates a condition queue node for the given thread.
    pub(crate) fn new_condition(waiter: Waiter) -> Box<Node> {
        let node = Self::new(Mode::Exclusive, waiter);
        node.status.store(CONDITION, std::sync::atomic::Ordering::Relaxed);
        node
    }

    /// Creates the queue head sentinel.
    pub(crate) fn sentinel() -> Box<Node> {
        Box::new(Node {
            status: AtomicI32::new(INITIAL),
            mode: Mode::Exclusive,
            prev: AtomicPtr::new(null_mut()),
            next: AtomicPtr::new(null_mut()),
            cond_next: AtomicPtr::new(null_mut()),
            waiter: UnsafeCell::new(None),
            waiter_id: 0,
        })
    }

    /// Clones the owning thread's parking handle.
    ///
    /// # Safety
    ///
    /// The caller must hold the queue maintenance flag, or be the owning thread.
    pub(crate) unsafe fn waiter(&self) -> Option<Waiter> {
        (*self.waiter.get()).clone()
    }

    /// Takes the owning thread's parking handle, leaving `None`.
    ///
    /// # Safety
    ///
    /// The caller must hold the queue maintenance flag, or be the owning thread.
    pub(crate) unsafe fn take_waiter(&self) -> Option<Waiter> {
        (*self.waiter.get()).take()
    }
}
