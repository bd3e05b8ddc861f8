use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use crate::{
    Config, Interrupted, Lock, Mutex, Protocol, ReentrantLock, RwLock, Semaphore, Synchronizer,
    WaitError, Waiter,
};

/// A minimal exclusive protocol used to exercise the engine directly.
#[derive(Debug, Default)]
struct TestMutex;

impl Protocol for TestMutex {
    fn try_acquire<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> bool {
        sync.compare_exchange_state(0, 1, Acquire, Relaxed).is_ok()
    }

    fn try_release<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> bool {
        sync.compare_exchange_state(1, 0, Release, Relaxed).is_ok()
    }
}

/// A one-shot gate: blocks every arrival until opened, then blocks nobody.
#[derive(Debug, Default)]
struct TestGate;

impl Protocol for TestGate {
    fn try_acquire_shared<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> i64 {
        if sync.state(Acquire) == 1 {
            1
        } else {
            -1
        }
    }

    fn try_release_shared<C: Config>(&self, sync: &Synchronizer<Self, C>, _arg: u64) -> bool {
        sync.store_state(1, Release);
        true
    }
}

#[test]
fn synchronizer_uncontended() {
    let sync = Synchronizer::new(TestMutex);
    sync.acquire(0);
    assert_eq!(sync.state(Relaxed), 1);
    assert!(!sync.protocol().try_acquire(&sync, 0));
    assert!(sync.release(0));
    assert!(!sync.release(0));
    assert!(!sync.has_queued_threads());
    assert_eq!(sync.queue_length(), 0);
}

#[test]
fn synchronizer_contended_handoff() {
    let sync = Arc::new(Synchronizer::new(TestMutex));
    let check = Arc::new(AtomicBool::new(false));

    sync.acquire(0);

    let sync_clone = sync.clone();
    let check_clone = check.clone();
    let thread = thread::spawn(move || {
        sync_clone.acquire(0);
        assert!(check_clone.load(Relaxed));
        assert!(sync_clone.release(0));
    });

    thread::sleep(Duration::from_millis(10));
    check.store(true, Relaxed);
    assert!(sync.release(0));
    assert!(thread.join().is_ok());
    assert!(!sync.has_queued_threads());
}

#[test]
fn synchronizer_introspection() {
    let sync = Arc::new(Synchronizer::new(TestMutex));
    let (waiter_sender, waiter_receiver) = mpsc::channel();

    sync.acquire(0);
    assert!(!sync.has_queued_predecessors());

    let sync_clone = sync.clone();
    let thread = thread::spawn(move || {
        waiter_sender.send(Waiter::current()).unwrap();
        sync_clone.acquire(0);
        assert!(sync_clone.release(0));
    });

    let waiter = waiter_receiver.recv().unwrap();
    while !sync.is_queued(&waiter) {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(sync.has_queued_threads());
    assert_eq!(sync.queue_length(), 1);
    assert!(sync.has_queued_predecessors());

    assert!(sync.release(0));
    assert!(thread.join().is_ok());
    assert!(!sync.is_queued(&waiter));
    assert_eq!(sync.queue_length(), 0);
}

#[test]
fn gate_wakes_every_waiter() {
    let gate = Arc::new(Synchronizer::new(TestGate));
    let passed = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..3 {
        let gate = gate.clone();
        let passed = passed.clone();
        threads.push(thread::spawn(move || {
            gate.acquire_shared(0);
            passed.fetch_add(1, Relaxed);
        }));
    }

    thread::sleep(Duration::from_millis(10));
    assert_eq!(passed.load(Relaxed), 0);
    assert!(gate.release_shared(0));

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(passed.load(Relaxed), 3);
    assert!(!gate.has_queued_threads());
}

#[test]
fn lock_timeout_expires_and_cleans_up() {
    let lock = Arc::new(Lock::default());
    lock.lock();

    let lock_clone = lock.clone();
    let thread = thread::spawn(move || {
        let start = Instant::now();
        assert_eq!(lock_clone.try_lock_for(Duration::from_millis(20)), Ok(false));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(lock_clone.try_share_for(Duration::from_millis(20)), Ok(false));
    });

    assert!(thread.join().is_ok());
    // The expired waiters must have excised themselves.
    assert!(!lock.has_queued_threads());
    assert!(lock.release_lock());
    lock.lock();
    assert!(lock.release_lock());
}

#[test]
fn cancelled_waiter_never_starves_successor() {
    let lock = Arc::new(Lock::default());
    lock.lock();

    let lock_clone = lock.clone();
    let expired = thread::spawn(move || {
        assert_eq!(lock_clone.try_lock_for(Duration::from_millis(50)), Ok(false));
    });
    while lock.queue_length() < 1 {
        thread::sleep(Duration::from_millis(1));
    }

    let lock_clone = lock.clone();
    let survivor = thread::spawn(move || {
        lock_clone.lock();
        assert!(lock_clone.release_lock());
    });
    while lock.queue_length() < 2 && !expired.is_finished() {
        thread::sleep(Duration::from_millis(1));
    }

    // The first waiter expires and excises itself while the lock is still
    // held; the one queued behind it must stay next in line.
    expired.join().unwrap();
    while lock.queue_length() != 1 {
        thread::sleep(Duration::from_millis(1));
    }

    assert!(lock.release_lock());
    survivor.join().unwrap();
    assert!(!lock.has_queued_threads());
}

#[test]
fn lock_zero_timeout() {
    let lock = Lock::default();
    lock.lock();
    assert_eq!(lock.try_lock_for(Duration::ZERO), Ok(false));
    assert!(lock.release_lock());
    assert_eq!(lock.try_lock_for(Duration::ZERO), Ok(true));
    assert!(lock.release_lock());
}

#[test]
fn interrupt_aborts_waiting_acquisition() {
    let lock = Arc::new(Lock::default());
    let (waiter_sender, waiter_receiver) = mpsc::channel();

    lock.lock();

    let lock_clone = lock.clone();
    let thread = thread::spawn(move || {
        waiter_sender.send(Waiter::current()).unwrap();
        assert_eq!(lock_clone.lock_interruptibly(), Err(Interrupted));
        // The interrupt was consumed along with the error.
        assert!(!Waiter::current().is_interrupted());
    });

    let waiter = waiter_receiver.recv().unwrap();
    thread::sleep(Duration::from_millis(10));
    waiter.interrupt();
    assert!(thread.join().is_ok());

    assert!(!lock.has_queued_threads());
    assert!(lock.release_lock());
}

#[test]
fn interrupt_survives_uninterruptible_acquisition() {
    let lock = Arc::new(Lock::default());
    let (waiter_sender, waiter_receiver) = mpsc::channel();

    lock.lock();

    let lock_clone = lock.clone();
    let thread = thread::spawn(move || {
        waiter_sender.send(Waiter::current()).unwrap();
        lock_clone.lock();
        // The interrupt observed mid-wait is re-asserted, not dropped.
        assert!(Waiter::current().is_interrupted());
        assert!(lock_clone.release_lock());
    });

    let waiter = waiter_receiver.recv().unwrap();
    thread::sleep(Duration::from_millis(10));
    waiter.interrupt();
    thread::sleep(Duration::from_millis(10));
    assert!(lock.release_lock());
    assert!(thread.join().is_ok());
}

#[test]
fn pending_interrupt_fails_fast() {
    let lock = Lock::default();
    Waiter::current().interrupt();
    assert_eq!(lock.lock_interruptibly(), Err(Interrupted));
    assert!(!Waiter::current().is_interrupted());
    assert!(lock.lock_interruptibly().is_ok());
    assert!(lock.release_lock());
}

#[test]
fn reentrant_lock_recursion() {
    let lock = ReentrantLock::new();
    assert_eq!(lock.hold_count(), 0);

    lock.lock();
    lock.lock();
    assert!(lock.try_lock());
    assert_eq!(lock.hold_count(), 3);
    assert!(lock.is_held_by_current_thread());

    assert_eq!(lock.unlock(), Ok(false));
    assert_eq!(lock.unlock(), Ok(false));
    assert_eq!(lock.unlock(), Ok(true));
    assert_eq!(lock.hold_count(), 0);
    assert_eq!(lock.unlock(), Err(WaitError::NotHeld));
}

#[test]
fn reentrant_lock_rejects_foreign_unlock() {
    let lock = Arc::new(ReentrantLock::new());
    lock.lock();

    let lock_clone = lock.clone();
    let thread = thread::spawn(move || {
        assert!(!lock_clone.is_held_by_current_thread());
        assert_eq!(lock_clone.unlock(), Err(WaitError::NotHeld));
        assert!(!lock_clone.try_lock());
    });

    assert!(thread.join().is_ok());
    assert_eq!(lock.unlock(), Ok(true));
}

#[test]
fn fair_lock_hands_over() {
    let lock = ReentrantLock::new_fair();
    let handed_over = AtomicBool::new(false);

    lock.lock();
    thread::scope(|s| {
        s.spawn(|| {
            lock.lock();
            handed_over.store(true, Relaxed);
            assert_eq!(lock.unlock(), Ok(true));
        });
        while !lock.has_queued_threads() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!handed_over.load(Relaxed));
        // `try_lock` barges even on a fair lock.
        assert!(lock.try_lock());
        assert_eq!(lock.unlock(), Ok(false));
        assert_eq!(lock.unlock(), Ok(true));
    });
    assert!(handed_over.load(Relaxed));
    assert!(!lock.has_queued_threads());
}

#[test]
fn condition_requires_ownership() {
    let lock = ReentrantLock::new();
    let condition = lock.condition();

    assert_eq!(condition.wait(), Err(WaitError::NotHeld));
    assert_eq!(condition.signal(), Err(WaitError::NotHeld));
    assert_eq!(condition.signal_all(), Err(WaitError::NotHeld));
    assert_eq!(condition.has_waiters(), Err(WaitError::NotHeld));

    lock.lock();
    assert_eq!(condition.has_waiters(), Ok(false));
    assert_eq!(condition.signal(), Ok(()));
    assert_eq!(lock.unlock(), Ok(true));
}

#[test]
fn condition_signal_wakes_waiter() {
    let lock = ReentrantLock::new();
    let condition = lock.condition();
    let ready = AtomicBool::new(false);
    let woken = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            lock.lock();
            while !ready.load(Relaxed) {
                condition.wait().unwrap();
            }
            woken.store(true, Relaxed);
            assert_eq!(lock.unlock(), Ok(true));
        });

        thread::sleep(Duration::from_millis(10));
        lock.lock();
        ready.store(true, Relaxed);
        condition.signal().unwrap();
        // Still held: the waiter cannot have returned yet.
        assert!(!woken.load(Relaxed));
        assert_eq!(lock.unlock(), Ok(true));
    });
    assert!(woken.load(Relaxed));
}

#[test]
fn condition_wait_restores_hold_count() {
    let lock = ReentrantLock::new();
    let condition = lock.condition();
    let ready = AtomicBool::new(false);

    thread::scope(|s| {
        s.spawn(|| {
            lock.lock();
            lock.lock();
            assert_eq!(lock.hold_count(), 2);
            while !ready.load(Relaxed) {
                condition.wait().unwrap();
            }
            assert_eq!(lock.hold_count(), 2);
            assert_eq!(lock.unlock(), Ok(false));
            assert_eq!(lock.unlock(), Ok(true));
        });

        loop {
            lock.lock();
            let waiting = condition.has_waiters().unwrap();
            if waiting {
                ready.store(true, Relaxed);
                condition.signal().unwrap();
                assert_eq!(lock.unlock(), Ok(true));
                break;
            }
            assert_eq!(lock.unlock(), Ok(true));
            thread::sleep(Duration::from_millis(1));
        }
    });
}

#[test]
fn condition_signal_all() {
    let num_waiters = 4;
    let lock = ReentrantLock::new();
    let condition = lock.condition();
    let ready = AtomicBool::new(false);
    let woken = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..num_waiters {
            s.spawn(|| {
                lock.lock();
                while !ready.load(Relaxed) {
                    condition.wait().unwrap();
                }
                woken.fetch_add(1, Relaxed);
                assert_eq!(lock.unlock(), Ok(true));
            });
        }

        loop {
            lock.lock();
            let waiting = condition.waiter_count().unwrap();
            if waiting == num_waiters {
                ready.store(true, Relaxed);
                condition.signal_all().unwrap();
                assert_eq!(lock.unlock(), Ok(true));
                break;
            }
            assert_eq!(lock.unlock(), Ok(true));
            thread::sleep(Duration::from_millis(1));
        }
    });
    assert_eq!(woken.load(Relaxed), num_waiters);
}

#[test]
fn condition_wait_for_times_out() {
    let lock = ReentrantLock::new();
    let condition = lock.condition();

    lock.lock();
    let start = Instant::now();
    assert_eq!(condition.wait_for(Duration::from_millis(20)), Ok(false));
    assert!(start.elapsed() >= Duration::from_millis(20));
    // Reacquired on the way out.
    assert_eq!(lock.hold_count(), 1);
    assert_eq!(condition.wait_until(Instant::now()), Ok(false));
    assert_eq!(lock.unlock(), Ok(true));
}

#[test]
fn condition_wait_interrupted() {
    let lock = ReentrantLock::new();
    let condition = lock.condition();
    let (waiter_sender, waiter_receiver) = mpsc::channel();

    thread::scope(|s| {
        s.spawn(|| {
            waiter_sender.send(Waiter::current()).unwrap();
            lock.lock();
            assert_eq!(condition.wait(), Err(WaitError::Interrupted));
            // Reacquired despite the abort.
            assert_eq!(lock.hold_count(), 1);
            assert_eq!(lock.unlock(), Ok(true));
        });

        let waiter = waiter_receiver.recv().unwrap();
        loop {
            lock.lock();
            let waiting = condition.has_waiters().unwrap();
            assert_eq!(lock.unlock(), Ok(true));
            if waiting {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        waiter.interrupt();
    });
}

#[test]
fn semaphore_permits() {
    let semaphore = Semaphore::new(2);
    assert_eq!(semaphore.available_permits(Relaxed), 2);

    assert!(semaphore.try_acquire_many(2));
    assert!(!semaphore.try_acquire());
    assert_eq!(semaphore.try_acquire_for(Duration::from_millis(10)), Ok(false));

    semaphore.release_many(2);
    assert_eq!(semaphore.available_permits(Relaxed), 2);
    assert!(semaphore.acquire_interruptibly().is_ok());
    semaphore.release();
}

#[test]
fn semaphore_blocked_acquire_many() {
    let semaphore = Arc::new(Semaphore::new(1));
    let check = Arc::new(AtomicBool::new(false));

    let semaphore_clone = semaphore.clone();
    let check_clone = check.clone();
    let thread = thread::spawn(move || {
        semaphore_clone.acquire_many(3);
        assert!(check_clone.load(Relaxed));
        semaphore_clone.release_many(3);
    });

    thread::sleep(Duration::from_millis(10));
    check.store(true, Relaxed);
    semaphore.release_many(2);
    assert!(thread.join().is_ok());
    assert_eq!(semaphore.available_permits(Relaxed), 3);
}

#[test]
fn lock_shared_and_exclusive() {
    let lock = Lock::default();

    lock.share();
    assert!(lock.try_share());
    assert_eq!(lock.shared_owners(Relaxed), 2);
    assert!(!lock.try_lock());
    assert!(lock.release_share());
    assert!(lock.release_share());
    assert!(!lock.release_share());

    lock.lock();
    assert!(!lock.try_share());
    assert!(lock.release_lock());
}

#[test]
fn lock_api_mutex() {
    let mutex: Mutex<usize> = Mutex::new(0);
    *mutex.lock() += 1;
    {
        let mut guard = mutex.try_lock().unwrap();
        *guard += 1;
        assert!(mutex.try_lock().is_none());
    }
    assert_eq!(*mutex.lock(), 2);
}

#[test]
fn lock_api_rwlock() {
    let rwlock: RwLock<usize> = RwLock::new(0);
    *rwlock.write() = 42;
    {
        let first = rwlock.read();
        let second = rwlock.read();
        assert_eq!(*first + *second, 84);
        assert!(rwlock.try_write().is_none());
    }
    assert_eq!(*rwlock.write(), 42);
}
