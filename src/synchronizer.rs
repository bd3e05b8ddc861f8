//! [`Synchronizer`] is the blocking engine behind every primitive in this crate.
//!
//! A [`Synchronizer`] owns a 64-bit state word and a FIFO wait queue. A consumer
//! implements [`Protocol`] to give the state meaning; the engine supplies queuing,
//! parking, timeouts, interruption, cancellation, and shared-mode propagation.
//!
//! The wait queue is a doubly linked list with a sentinel head. Enqueueing is
//! lock-free: a waiter links its `prev`, swings the tail, then publishes the
//! forward link. Everything that traverses, unlinks, or frees nodes runs under a
//! single maintenance flag, and a node is freed only once it is unreachable and
//! any in-flight forward-link store to it has been certified complete.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::null_mut;
use std::sync::atomic::Ordering::{self, AcqRel, Acquire, Relaxed, Release};
// It is always a `std::sync::atomic::AtomicBool` since Loom is too slow to exhaustively
// model the maintenance flag; the node links it protects are modeled types.
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicPtr, AtomicU64};

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicPtr, AtomicU64};

use crate::condition::Condition;
use crate::config::{Config, DefaultConfig};
use crate::error::Interrupted;
use crate::node::{Mode, Node, CANCELLED, CONDITION, INITIAL, PROPAGATE, SIGNAL};
use crate::park::{self, Waiter};

/// [`Protocol`] gives meaning to a [`Synchronizer`]'s state word.
///
/// Implement the exclusive pair, the shared pair, or both. The engine never
/// interprets the state itself; hooks inspect and update it through
/// [`Synchronizer::state`] and [`Synchronizer::compare_exchange_state`], and they
/// may consult the queue, e.g. [`Synchronizer::has_queued_predecessors`] for
/// fairness. Hooks must be non-blocking; the engine may invoke them many times
/// for a single operation, from any thread.
///
/// The default implementations panic, making it a programming error to drive a
/// [`Synchronizer`] in a mode its protocol does not support.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
///
/// use parkq::{Config, Protocol, Synchronizer};
///
/// /// A minimal binary lock: state `0` is free, `1` is held.
/// struct Binary;
///
/// impl Protocol for Binary {
///     fn try_acquire<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> bool {
///         sync.compare_exchange_state(0, 1, Acquire, Relaxed).is_ok()
///     }
///
///     fn try_release<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> bool {
///         sync.store_state(0, Release);
///         true
///     }
/// }
///
/// let sync = Synchronizer::new(Binary);
/// sync.acquire(1);
/// assert_eq!(sync.state(Relaxed), 1);
/// assert!(sync.release(1));
/// ```
pub trait Protocol: Sized {
    /// Tries to acquire in exclusive mode.
    ///
    /// Returns `true` if the acquisition succeeded. Must not block.
    fn try_acquire<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> bool {
        let _ = (sync, arg);
        unimplemented!("exclusive acquisition is not supported by this protocol");
    }

    /// Tries to release in exclusive mode.
    ///
    /// Returns `true` if the synchronizer is now fully released and a queued
    /// waiter may be able to proceed.
    fn try_release<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> bool {
        let _ = (sync, arg);
        unimplemented!("exclusive release is not supported by this protocol");
    }

    /// Tries to acquire in shared mode.
    ///
    /// Returns a negative value on failure, zero on success without remaining
    /// capacity, and a positive value on success when subsequent shared
    /// acquisitions may also succeed and should be attempted.
    fn try_acquire_shared<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> i64 {
        let _ = (sync, arg);
        unimplemented!("shared acquisition is not supported by this protocol");
    }

    /// Tries to release in shared mode.
    ///
    /// Returns `true` if queued waiters may now be able to proceed.
    fn try_release_shared<C: Config>(&self, sync: &Synchronizer<Self, C>, arg: u64) -> bool {
        let _ = (sync, arg);
        unimplemented!("shared release is not supported by this protocol");
    }

    /// Returns `true` if the current thread holds the synchronizer exclusively.
    ///
    /// Only required by protocols that hand out [`Condition`]s.
    fn is_held_exclusively<C: Config>(&self, sync: &Synchronizer<Self, C>) -> bool {
        let _ = sync;
        unimplemented!("exclusive ownership tracking is not supported by this protocol");
    }
}

/// A blocking queued synchronizer.
///
/// See the [module level documentation](self) and [`Protocol`] for the overall
/// contract, and [`Lock`](crate::Lock), [`ReentrantLock`](crate::ReentrantLock),
/// and [`Semaphore`](crate::Semaphore) for complete consumers.
pub struct Synchronizer<P: Protocol, C: Config = DefaultConfig> {
    /// The protocol-defined state word.
    state: AtomicU64,
    /// Head of the wait queue; a sentinel or the node of the latest winner.
    /// Null until the first contended acquisition.
    head: AtomicPtr<Node>,
    /// Tail of the wait queue. Null only while `head` is.
    tail: AtomicPtr<Node>,
    /// Maintenance flag serializing link traversal, unlinking, and frees.
    queue_guard: AtomicBool,
    /// The consumer protocol.
    protocol: P,
    _config: PhantomData<C>,
}

// Nodes are reached through raw pointers; see `Node` for the access discipline.
unsafe impl<P: Protocol + Send, C: Config> Send for Synchronizer<P, C> {}
unsafe impl<P: Protocol + Send + Sync, C: Config> Sync for Synchronizer<P, C> {}

/// Result of a queued acquisition attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum QueuedOutcome {
    /// The waiter reached the head and acquired. `interrupted` reports an
    /// interrupt swallowed along the way, to be re-asserted by the caller.
    Acquired {
        /// An interrupt arrived while waiting uninterruptibly.
        interrupted: bool,
    },
    /// The deadline passed; the node has been cancelled and freed.
    TimedOut,
    /// An interrupt arrived; the node has been cancelled and freed.
    Interrupted,
}

/// Scoped ownership of the queue maintenance flag.
struct QueueGuard<'s, P: Protocol, C: Config> {
    sync: &'s Synchronizer<P, C>,
}

impl<P: Protocol, C: Config> Drop for QueueGuard<'_, P, C> {
    #[inline]
    fn drop(&mut self) {
        self.sync.queue_guard.store(false, Release);
    }
}

/// Cancels a pending node unless disarmed, covering early returns and panicking
/// acquisition hooks alike.
struct CancelGuard<'s, P: Protocol, C: Config> {
    sync: &'s Synchronizer<P, C>,
    node: *mut Node,
    armed: bool,
}

impl<P: Protocol, C: Config> Drop for CancelGuard<'_, P, C> {
    #[inline]
    fn drop(&mut self) {
        if self.armed {
            self.sync.cancel_acquire(self.node);
        }
    }
}

#[cfg(not(feature = "loom"))]
impl<P: Protocol> Synchronizer<P> {
    /// Creates a new [`Synchronizer`] with the state word set to zero.
    #[inline]
    #[must_use]
    pub const fn new(protocol: P) -> Self {
        Self::with_state(protocol, 0)
    }

    /// Creates a new [`Synchronizer`] with the given initial state.
    #[inline]
    #[must_use]
    pub const fn with_state(protocol: P, state: u64) -> Self {
        Self::with_config(protocol, state)
    }
}

#[cfg(feature = "loom")]
impl<P: Protocol> Synchronizer<P> {
    /// Creates a new [`Synchronizer`] with the state word set to zero.
    #[inline]
    #[must_use]
    pub fn new(protocol: P) -> Self {
        Self::with_state(protocol, 0)
    }

    /// Creates a new [`Synchronizer`] with the given initial state.
    #[inline]
    #[must_use]
    pub fn with_state(protocol: P, state: u64) -> Self {
        Self::with_config(protocol, state)
    }
}

#[cfg(not(feature = "loom"))]
impl<P: Protocol, C: Config> Synchronizer<P, C> {
    /// Creates a new [`Synchronizer`] with the given initial state and a
    /// caller-chosen [`Config`].
    ///
    /// [`Synchronizer::new`] and [`Synchronizer::with_state`] pin the
    /// configuration to [`DefaultConfig`], so the protocol type can be inferred
    /// from the argument alone.
    #[inline]
    #[must_use]
    pub const fn with_config(protocol: P, state: u64) -> Self {
        Self {
            state: AtomicU64::new(state),
            head: AtomicPtr::new(null_mut()),
            tail: AtomicPtr::new(null_mut()),
            queue_guard: AtomicBool::new(false),
            protocol,
            _config: PhantomData,
        }
    }
}

#[cfg(feature = "loom")]
impl<P: Protocol, C: Config> Synchronizer<P, C> {
    /// Creates a new [`Synchronizer`] with the given initial state and a
    /// caller-chosen [`Config`].
    ///
    /// [`Synchronizer::new`] and [`Synchronizer::with_state`] pin the
    /// configuration to [`DefaultConfig`], so the protocol type can be inferred
    /// from the argument alone.
    #[inline]
    #[must_use]
    pub fn with_config(protocol: P, state: u64) -> Self {
        Self {
            state: AtomicU64::new(state),
            head: AtomicPtr::new(null_mut()),
            tail: AtomicPtr::new(null_mut()),
            queue_guard: AtomicBool::new(false),
            protocol,
            _config: PhantomData,
        }
    }
}

impl<P: Protocol, C: Config> Synchronizer<P, C> {
    /// Returns a reference to the consumer protocol.
    #[inline]
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Returns the current value of the state word.
    #[inline]
    #[must_use]
    pub fn state(&self, mo: Ordering) -> u64 {
        self.state.load(mo)
    }

    /// Stores `state` into the state word.
    #[inline]
    pub fn store_state(&self, state: u64, mo: Ordering) {
        self.state.store(state, mo);
    }

    /// Atomically updates the state word if it equals `current`.
    ///
    /// # Errors
    ///
    /// Returns the observed state if it differs from `current`.
    #[inline]
    pub fn compare_exchange_state(
        &self,
        current: u64,
        new: u64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u64, u64> {
        self.state.compare_exchange(current, new, success, failure)
    }

    /// Acquires in exclusive mode, ignoring interrupts.
    ///
    /// Invokes [`Protocol::try_acquire`] and, on failure, parks the thread until a
    /// release hands the acquisition over. An interrupt that arrives while waiting
    /// is re-asserted before returning.
    #[inline]
    pub fn acquire(&self, arg: u64) {
        if self.protocol.try_acquire(self, arg) {
            return;
        }
        if let QueuedOutcome::Acquired { interrupted: true } =
            self.enqueue_and_acquire(arg, Mode::Exclusive, None, false)
        {
            park::set_interrupted();
        }
    }

    /// Acquires in exclusive mode, aborting if the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread had a pending interrupt on entry, or
    /// is interrupted while waiting; the pending interrupt is consumed.
    #[inline]
    pub fn acquire_interruptibly(&self, arg: u64) -> Result<(), Interrupted> {
        if park::take_interrupted() {
            return Err(Interrupted);
        }
        if self.protocol.try_acquire(self, arg) {
            return Ok(());
        }
        match self.enqueue_and_acquire(arg, Mode::Exclusive, None, true) {
            QueuedOutcome::Interrupted => Err(Interrupted),
            _ => Ok(()),
        }
    }

    /// Acquires in exclusive mode, giving up once `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout. A zero timeout degenerates to a barging
    /// attempt plus a single pass over the acquisition hook.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread had a pending interrupt on entry, or
    /// is interrupted while waiting; the pending interrupt is consumed.
    #[inline]
    pub fn try_acquire_for(&self, arg: u64, timeout: Duration) -> Result<bool, Interrupted> {
        if park::take_interrupted() {
            return Err(Interrupted);
        }
        if self.protocol.try_acquire(self, arg) {
            return Ok(true);
        }
        let deadline = Instant::now().checked_add(timeout);
        match self.enqueue_and_acquire(arg, Mode::Exclusive, deadline, true) {
            QueuedOutcome::TimedOut => Ok(false),
            QueuedOutcome::Interrupted => Err(Interrupted),
            QueuedOutcome::Acquired { .. } => Ok(true),
        }
    }

    /// Releases in exclusive mode.
    ///
    /// Returns the result of [`Protocol::try_release`]; when `true`, the first
    /// eligible queued waiter is woken.
    #[inline]
    pub fn release(&self, arg: u64) -> bool {
        if !self.protocol.try_release(self, arg) {
            return false;
        }
        self.signal_first_waiter();
        true
    }

    /// Acquires in shared mode, ignoring interrupts.
    ///
    /// A successful queued shared acquisition propagates: if capacity remains, the
    /// next shared waiter is woken in turn.
    #[inline]
    pub fn acquire_shared(&self, arg: u64) {
        if self.protocol.try_acquire_shared(self, arg) >= 0 {
            return;
        }
        if let QueuedOutcome::Acquired { interrupted: true } =
            self.enqueue_and_acquire(arg, Mode::Shared, None, false)
        {
            park::set_interrupted();
        }
    }

    /// Acquires in shared mode, aborting if the thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread had a pending interrupt on entry, or
    /// is interrupted while waiting; the pending interrupt is consumed.
    #[inline]
    pub fn acquire_shared_interruptibly(&self, arg: u64) -> Result<(), Interrupted> {
        if park::take_interrupted() {
            return Err(Interrupted);
        }
        if self.protocol.try_acquire_shared(self, arg) >= 0 {
            return Ok(());
        }
        match self.enqueue_and_acquire(arg, Mode::Shared, None, true) {
            QueuedOutcome::Interrupted => Err(Interrupted),
            _ => Ok(()),
        }
    }

    /// Acquires in shared mode, giving up once `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread had a pending interrupt on entry, or
    /// is interrupted while waiting; the pending interrupt is consumed.
    #[inline]
    pub fn try_acquire_shared_for(&self, arg: u64, timeout: Duration) -> Result<bool, Interrupted> {
        if park::take_interrupted() {
            return Err(Interrupted);
        }
        if self.protocol.try_acquire_shared(self, arg) >= 0 {
            return Ok(true);
        }
        let deadline = Instant::now().checked_add(timeout);
        match self.enqueue_and_acquire(arg, Mode::Shared, deadline, true) {
            QueuedOutcome::TimedOut => Ok(false),
            QueuedOutcome::Interrupted => Err(Interrupted),
            QueuedOutcome::Acquired { .. } => Ok(true),
        }
    }

    /// Releases in shared mode.
    ///
    /// Returns the result of [`Protocol::try_release_shared`]; when `true`, queued
    /// waiters are woken and the wakeup propagates through consecutive shared
    /// nodes.
    #[inline]
    pub fn release_shared(&self, arg: u64) -> bool {
        if !self.protocol.try_release_shared(self, arg) {
            return false;
        }
        self.do_release_shared();
        true
    }

    /// Returns a new [`Condition`] associated with this synchronizer.
    ///
    /// The protocol must implement [`Protocol::is_held_exclusively`].
    #[inline]
    pub fn condition(&self) -> Condition<'_, P, C> {
        Condition::new(self)
    }

    /// Returns `true` if any thread is waiting in the queue.
    ///
    /// The answer may be stale by the time it is returned.
    #[inline]
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        let head = self.head.load(Acquire);
        let tail = self.tail.load(Acquire);
        !head.is_null() && !tail.is_null() && head != tail
    }

    /// Returns an estimate of the number of threads waiting in the queue.
    #[inline]
    #[must_use]
    pub fn queue_length(&self) -> usize {
        if !self.has_queued_threads() {
            return 0;
        }
        let _guard = self.lock_queue();
        let head = self.head.load(Acquire);
        let mut length = 0;
        let mut cursor = self.tail.load(Acquire);
        while !cursor.is_null() && cursor != head {
            // SAFETY: queued nodes stay alive while the maintenance flag is held.
            unsafe {
                if (*cursor).status.load(Acquire) != CANCELLED {
                    length += 1;
                }
                cursor = (*cursor).prev.load(Acquire);
            }
        }
        length
    }

    /// Returns `true` if the given thread is waiting in the queue.
    #[inline]
    #[must_use]
    pub fn is_queued(&self, waiter: &Waiter) -> bool {
        if !self.has_queued_threads() {
            return false;
        }
        let _guard = self.lock_queue();
        // The head is excluded: it belongs to the current holder, not a waiter.
        let head = self.head.load(Acquire);
        let mut cursor = self.tail.load(Acquire);
        while !cursor.is_null() && cursor != head {
            // SAFETY: queued nodes stay alive while the maintenance flag is held.
            unsafe {
                if (*cursor).waiter_id == waiter.id() {
                    return true;
                }
                cursor = (*cursor).prev.load(Acquire);
            }
        }
        false
    }

    /// Returns `true` if a thread other than the caller has been waiting longer
    /// than the caller.
    ///
    /// The canonical fairness check: a protocol that consults this in its
    /// acquisition hook and backs off yields a FIFO primitive. Note that a `true`
    /// result can go stale immediately if the queued thread cancels.
    #[inline]
    #[must_use]
    pub fn has_queued_predecessors(&self) -> bool {
        let head = self.head.load(Acquire);
        let tail = self.tail.load(Acquire);
        if head.is_null() || tail.is_null() || head == tail {
            return false;
        }
        let _guard = self.lock_queue();
        let head = self.head.load(Acquire);
        if head.is_null() || head == self.tail.load(Acquire) {
            return false;
        }
        // SAFETY: the head stays alive while the maintenance flag is held.
        unsafe {
            let successor = (*head).next.load(Acquire);
            // A null forward link here means an enqueue is in flight: someone is ahead.
            successor.is_null() || (*successor).waiter_id != park::current_id()
        }
    }

    /// Spins on the acquisition hook, then enqueues and waits.
    fn enqueue_and_acquire(
        &self,
        arg: u64,
        mode: Mode,
        deadline: Option<Instant>,
        interruptible: bool,
    ) -> QueuedOutcome {
        let mut spins = 0;
        while spins < C::spin_count() {
            spins += 1;
            C::backoff(spins);
            if self.try_hook(mode, arg) >= 0 {
                return QueuedOutcome::Acquired { interrupted: false };
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return QueuedOutcome::TimedOut;
            }
        }
        let node = Box::into_raw(Node::new(mode, Waiter::current()));
        self.enqueue(node);
        self.acquire_node(node, arg, deadline, interruptible)
    }

    /// Waits until `node` reaches the front of the queue and the acquisition hook
    /// succeeds.
    ///
    /// `node` must be enqueued and owned by the calling thread. On every outcome
    /// but `Acquired`, the node is cancelled and freed before returning; the same
    /// holds if the acquisition hook panics.
    pub(crate) fn acquire_node(
        &self,
        node: *mut Node,
        arg: u64,
        deadline: Option<Instant>,
        interruptible: bool,
    ) -> QueuedOutcome {
        // SAFETY: the mode is immutable and the node is owned by this thread.
        let mode = unsafe { (*node).mode };
        let mut cancel_guard = CancelGuard {
            sync: self,
            node,
            armed: true,
        };
        let mut interrupted = false;
        loop {
            // SAFETY: a thread may always read its own node's links.
            let pred = unsafe { (*node).prev.load(Acquire) };
            if pred == self.head.load(Acquire) {
                let result = self.try_hook(mode, arg);
                if result >= 0 {
                    cancel_guard.armed = false;
                    match mode {
                        Mode::Exclusive => self.set_head(node),
                        Mode::Shared => self.set_head_and_propagate(node, result),
                    }
                    return QueuedOutcome::Acquired { interrupted };
                }
            }
            if self.prepare_park(node) {
                if let Some(deadline) = deadline {
                    let now = Instant::now();
                    if now >= deadline {
                        return QueuedOutcome::TimedOut;
                    }
                    // Spin out the tail end of the budget rather than paying for a
                    // park/unpark cycle.
                    if deadline - now > C::spin_for_timeout_threshold() {
                        park::park_until(deadline);
                    }
                } else {
                    park::park_current();
                }
                if park::take_interrupted() {
                    if interruptible {
                        return QueuedOutcome::Interrupted;
                    }
                    interrupted = true;
                }
            }
        }
    }

    /// Invokes the acquisition hook for the given mode.
    ///
    /// Exclusive success is reported as `0` so both modes share a sign check.
    #[inline]
    fn try_hook(&self, mode: Mode, arg: u64) -> i64 {
        match mode {
            Mode::Exclusive => {
                if self.protocol.try_acquire(self, arg) {
                    0
                } else {
                    -1
                }
            }
            Mode::Shared => self.protocol.try_acquire_shared(self, arg),
        }
    }

    /// Acquires the queue maintenance flag.
    fn lock_queue(&self) -> QueueGuard<'_, P, C> {
        let mut spins = 0;
        while self
            .queue_guard
            .compare_exchange_weak(false, true, Acquire, Relaxed)
            .is_err()
        {
            spins += 1;
            C::backoff(spins);
        }
        QueueGuard { sync: self }
    }

    /// Appends `node` to the wait queue.
    ///
    /// Lock-free: link `prev`, swing the tail, publish the forward link. Between
    /// the last two steps the node is reachable backwards from the tail but not
    /// forwards from its predecessor; maintenance-flag holders that need the
    /// forward link wait for it.
    pub(crate) fn enqueue(&self, node: *mut Node) {
        loop {
            let tail = self.tail.load(Acquire);
            if tail.is_null() {
                self.initialize_queue();
                continue;
            }
            // SAFETY: the node is owned by this thread until the tail swing below.
            unsafe { (*node).prev.store(tail, Relaxed) };
            if self
                .tail
                .compare_exchange(tail, node, AcqRel, Acquire)
                .is_ok()
            {
                // SAFETY: the old tail cannot be freed before this store lands;
                // frees certify that a tail predecessor has a published `next`.
                unsafe { (*tail).next.store(node, Release) };
                return;
            }
        }
    }

    /// Installs the sentinel head on first contention.
    fn initialize_queue(&self) {
        let sentinel = Box::into_raw(Node::sentinel());
        if self
            .head
            .compare_exchange(null_mut(), sentinel, AcqRel, Acquire)
            .is_ok()
        {
            self.tail.store(sentinel, Release);
        } else {
            // SAFETY: lost the installation race; the sentinel was never
            // published and is still owned by this thread.
            unsafe { drop(Box::from_raw(sentinel)) };
        }
    }

    /// Publishes `node` as the new head and reclaims the old one.
    ///
    /// Only called by the winning acquirer, whose node is the head's unique
    /// successor. The swap and every later access to `node` run under the
    /// maintenance flag: once the swap lands, the next winner may retire `node`
    /// in turn, but it can only free it under the same flag.
    fn set_head(&self, node: *mut Node) {
        let _guard = self.lock_queue();
        let retired = self.head.swap(node, AcqRel);
        // SAFETY: the maintenance flag is held, so neither `retired` nor the
        // freshly retirable `node` can be freed before this block ends.
        unsafe {
            (*node).prev.store(null_mut(), Release);
            self.free_retired_locked(retired);
        }
    }

    /// [`Self::set_head`] for shared mode: additionally wakes the next shared
    /// waiter when the hook reported remaining capacity or a release raced in.
    fn set_head_and_propagate(&self, node: *mut Node, propagate: i64) {
        let mut wake = propagate > 0;
        {
            let _guard = self.lock_queue();
            let retired = self.head.swap(node, AcqRel);
            // SAFETY: the maintenance flag is held, so neither `retired` nor the
            // freshly retirable `node` can be freed before this block ends.
            unsafe {
                (*node).prev.store(null_mut(), Release);
                if !wake {
                    wake = (*retired).status.load(Acquire) < 0
                        || (*node).status.load(Acquire) < 0;
                }
                self.free_retired_locked(retired);
                if wake {
                    let successor = (*node).next.load(Acquire);
                    if !successor.is_null() && (*successor).mode == Mode::Exclusive {
                        wake = false;
                    }
                }
            }
        }
        if wake {
            self.do_release_shared();
        }
    }

    /// Frees a retired head node, waiting out any in-flight forward-link store
    /// from the enqueue that advanced the tail past it.
    ///
    /// # Safety
    ///
    /// The caller must hold the queue maintenance flag, and `node` must be
    /// unlinked with a queued successor.
    unsafe fn free_retired_locked(&self, node: *mut Node) {
        let mut spins = 0;
        while (*node).next.load(Acquire).is_null() && self.tail.load(Acquire) != node {
            spins += 1;
            C::backoff(spins);
        }
        drop(Box::from_raw(node));
    }

    /// Wakes the first waiter after a successful exclusive release.
    fn signal_first_waiter(&self) {
        let head = self.head.load(Acquire);
        if head.is_null() || head == self.tail.load(Acquire) {
            // Nobody is parked: a waiter racing its way in re-checks the state
            // before committing to park and will see this release.
            return;
        }
        let _guard = self.lock_queue();
        let head = self.head.load(Acquire);
        if head.is_null() {
            return;
        }
        // SAFETY: the head stays alive while the maintenance flag is held.
        unsafe {
            if (*head).status.load(Acquire) != INITIAL {
                self.unpark_successor_locked(head);
            }
        }
    }

    /// Wakes waiters after a shared release, letting the wakeup ripple through
    /// consecutive shared nodes.
    fn do_release_shared(&self) {
        loop {
            let head = self.head.load(Acquire);
            if head.is_null() {
                return;
            }
            if head != self.tail.load(Acquire) {
                let _guard = self.lock_queue();
                if self.head.load(Acquire) != head {
                    continue;
                }
                // SAFETY: the current head stays alive while the maintenance flag
                // is held.
                unsafe {
                    let status = (*head).status.load(Acquire);
                    if status == SIGNAL {
                        if (*head)
                            .status
                            .compare_exchange(SIGNAL, INITIAL, AcqRel, Acquire)
                            .is_err()
                        {
                            continue;
                        }
                        self.unpark_successor_locked(head);
                    } else if status == INITIAL
                        && (*head)
                            .status
                            .compare_exchange(INITIAL, PROPAGATE, AcqRel, Acquire)
                            .is_err()
                    {
                        continue;
                    }
                }
            }
            if self.head.load(Acquire) == head {
                return;
            }
        }
    }

    /// Wakes the effective successor of `node`, scanning backwards from the tail
    /// if the forward link is missing or points at a cancelled remnant.
    ///
    /// # Safety
    ///
    /// The caller must hold the queue maintenance flag, and `node` must be on the
    /// queue.
    unsafe fn unpark_successor_locked(&self, node: *mut Node) {
        let status = (*node).status.load(Acquire);
        if status < 0 {
            let _ = (*node)
                .status
                .compare_exchange(status, INITIAL, AcqRel, Acquire);
        }
        let mut successor = (*node).next.load(Acquire);
        if successor.is_null() || (*successor).status.load(Acquire) == CANCELLED {
            successor = null_mut();
            let mut cursor = self.tail.load(Acquire);
            while !cursor.is_null() && cursor != node {
                if (*cursor).status.load(Acquire) != CANCELLED {
                    successor = cursor;
                }
                cursor = (*cursor).prev.load(Acquire);
            }
        }
        if !successor.is_null() {
            if let Some(waiter) = (*successor).waiter() {
                waiter.unpark();
            }
        }
    }

    /// Ensures the predecessor will signal `node`, or heals the queue and reports
    /// that the caller should retry acquiring instead of parking.
    ///
    /// Returns `true` only once the predecessor carries `SIGNAL`, so a release
    /// sliding in between the last hook attempt and the park is never lost.
    fn prepare_park(&self, node: *mut Node) -> bool {
        let _guard = self.lock_queue();
        // SAFETY: the maintenance flag is held; `prev` links of queued nodes are
        // kept live by the excision and reclamation rules.
        unsafe {
            let pred = (*node).prev.load(Acquire);
            if pred.is_null() {
                return false;
            }
            let status = (*pred).status.load(Acquire);
            if status == SIGNAL {
                return true;
            }
            if status == CANCELLED {
                // Cancellation excises eagerly, so remnants are rare; heal the
                // links if one shows up.
                let mut ancestor = (*pred).prev.load(Acquire);
                while (*ancestor).status.load(Acquire) == CANCELLED {
                    ancestor = (*ancestor).prev.load(Acquire);
                }
                (*node).prev.store(ancestor, Release);
                (*ancestor).next.store(node, Release);
            } else {
                let _ = (*pred)
                    .status
                    .compare_exchange(status, SIGNAL, AcqRel, Acquire);
            }
            false
        }
    }

    /// Excises and frees a node whose owner gave up waiting.
    ///
    /// Called exactly once per abandoned node, by the owning thread.
    fn cancel_acquire(&self, node: *mut Node) {
        let _guard = self.lock_queue();
        // SAFETY: the maintenance flag is held; the node is owned by this thread
        // and its neighbors are kept alive by the excision and reclamation rules.
        unsafe {
            (*node).take_waiter();
            (*node).status.store(CANCELLED, Release);
            let pred = (*node).prev.load(Acquire);
            let mut spins = 0;
            loop {
                let successor = (*node).next.load(Acquire);
                if !successor.is_null() {
                    (*pred).next.store(successor, Release);
                    (*successor).prev.store(pred, Release);
                    if pred == self.head.load(Acquire) {
                        // The successor may be eligible right now.
                        if let Some(waiter) = (*successor).waiter() {
                            waiter.unpark();
                        }
                    } else {
                        // Hand the signalling duty to the predecessor; if it cannot
                        // take it, wake the successor so it re-registers itself.
                        let status = (*pred).status.load(Acquire);
                        let handed_over = status == SIGNAL
                            || ((status == INITIAL || status == PROPAGATE)
                                && (*pred)
                                    .status
                                    .compare_exchange(status, SIGNAL, AcqRel, Acquire)
                                    .is_ok());
                        if !handed_over {
                            if let Some(waiter) = (*successor).waiter() {
                                waiter.unpark();
                            }
                        }
                    }
                    break;
                }
                if self.tail.load(Acquire) == node {
                    if self
                        .tail
                        .compare_exchange(node, pred, AcqRel, Acquire)
                        .is_ok()
                    {
                        (*pred).next.store(null_mut(), Release);
                        break;
                    }
                } else {
                    // A successor's forward-link store is in flight.
                    spins += 1;
                    C::backoff(spins);
                }
            }
            drop(Box::from_raw(node));
        }
    }

    /// Returns `true` if `node` has made it from a condition queue onto the wait
    /// queue.
    pub(crate) fn is_on_sync_queue(&self, node: *mut Node) -> bool {
        // SAFETY: the node is owned by the calling thread; the backward scan runs
        // under the maintenance flag.
        unsafe {
            if (*node).status.load(Acquire) == CONDITION || (*node).prev.load(Acquire).is_null()
            {
                return false;
            }
            if !(*node).next.load(Acquire).is_null() {
                return true;
            }
            // `prev` is written before the tail swing, so the node may not be
            // published yet; confirm by scanning from the tail.
            let _guard = self.lock_queue();
            let mut cursor = self.tail.load(Acquire);
            while !cursor.is_null() {
                if cursor == node {
                    return true;
                }
                cursor = (*cursor).prev.load(Acquire);
            }
            false
        }
    }

    /// Moves a signalled condition waiter onto the wait queue.
    ///
    /// Returns `false` if the waiter cancelled first. When the new predecessor
    /// cannot take on the signalling duty, the waiter is unparked directly and
    /// re-registers itself.
    pub(crate) fn transfer_for_signal(&self, node: *mut Node) -> bool {
        // SAFETY: condition nodes are kept alive until their owner trims them
        // after reacquisition; link access runs under the maintenance flag.
        unsafe {
            if (*node)
                .status
                .compare_exchange(CONDITION, INITIAL, AcqRel, Acquire)
                .is_err()
            {
                return false;
            }
            self.enqueue(node);
            let _guard = self.lock_queue();
            let pred = (*node).prev.load(Acquire);
            let mut wake = true;
            if !pred.is_null() {
                let status = (*pred).status.load(Acquire);
                wake = status == CANCELLED
                    || (*pred)
                        .status
                        .compare_exchange(status, SIGNAL, AcqRel, Acquire)
                        .is_err();
            }
            if wake {
                if let Some(waiter) = (*node).waiter() {
                    waiter.unpark();
                }
            }
            true
        }
    }

    /// Moves a condition waiter that timed out or was interrupted onto the wait
    /// queue.
    ///
    /// Returns `true` if the cancellation beat any signal. On `false`, a signal
    /// got there first and this call only waits for the signaller's enqueue to
    /// complete.
    pub(crate) fn transfer_after_cancelled_wait(&self, node: *mut Node) -> bool {
        // SAFETY: the node is owned by the calling thread until enqueued.
        unsafe {
            if (*node)
                .status
                .compare_exchange(CONDITION, INITIAL, AcqRel, Acquire)
                .is_ok()
            {
                self.enqueue(node);
                return true;
            }
        }
        let mut spins = 0;
        while !self.is_on_sync_queue(node) {
            spins += 1;
            C::backoff(spins);
        }
        false
    }

    /// Releases the full saved state on behalf of a condition wait.
    ///
    /// Returns `None` if the protocol refuses, i.e. the caller did not actually
    /// hold the synchronizer.
    pub(crate) fn fully_release(&self) -> Option<u64> {
        let saved = self.state(Acquire);
        if self.release(saved) {
            Some(saved)
        } else {
            None
        }
    }
}

impl<P: Protocol + fmt::Debug, C: Config> fmt::Debug for Synchronizer<P, C> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("state", &self.state(Relaxed))
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl<P: Protocol + Default, C: Config> Default for Synchronizer<P, C> {
    #[inline]
    fn default() -> Self {
        Self::with_config(P::default(), 0)
    }
}

impl<P: Protocol, C: Config> Drop for Synchronizer<P, C> {
    #[inline]
    fn drop(&mut self) {
        // Waiters borrow the synchronizer, so by now only the head node remains.
        let head = self.head.load(Relaxed);
        if !head.is_null() {
            unsafe { drop(Box::from_raw(head)) };
        }
    }
}
