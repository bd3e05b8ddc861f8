use std::sync::atomic::Ordering::Relaxed;
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{Interrupted, Lock, ReentrantLock, Semaphore, Waiter};

#[test]
fn lock_mutual_exclusion() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 1024 };

    let lock = Arc::new(Lock::default());
    let check = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let lock = lock.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                lock.lock();
                assert_eq!(check.fetch_add(1, Relaxed), 0);
                check.fetch_sub(1, Relaxed);
                assert!(lock.release_lock());
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert!(!lock.has_queued_threads());
}

#[test]
fn lock_readers_and_writers() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 256 };

    let lock = Arc::new(Lock::default());
    let check = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for i in 0..num_threads {
        let lock = lock.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            for j in 0..num_iters {
                if (i + j) % 7 == 0 {
                    lock.lock();
                    assert_eq!(check.fetch_add(usize::MAX, Relaxed), 0);
                    check.fetch_sub(usize::MAX, Relaxed);
                    assert!(lock.release_lock());
                } else {
                    lock.share();
                    assert!(check.fetch_add(1, Relaxed) < num_threads);
                    check.fetch_sub(1, Relaxed);
                    assert!(lock.release_share());
                }
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert!(!lock.has_queued_threads());
}

#[test]
fn fair_lock_mutual_exclusion() {
    let num_threads = if cfg!(miri) { 4 } else { 8 };
    let num_iters = if cfg!(miri) { 16 } else { 512 };

    let lock = Arc::new(ReentrantLock::new_fair());
    let check = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let lock = lock.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                lock.lock();
                lock.lock();
                assert_eq!(check.fetch_add(1, Relaxed), 0);
                check.fetch_sub(1, Relaxed);
                assert_eq!(lock.unlock(), Ok(false));
                assert_eq!(lock.unlock(), Ok(true));
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert!(!lock.has_queued_threads());
}

#[test]
fn semaphore_bounds_concurrency() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 16 } else { 256 };
    let num_permits = 3;

    let semaphore = Arc::new(Semaphore::new(num_permits as u64));
    let check = Arc::new(AtomicUsize::new(0));

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let semaphore = semaphore.clone();
        let check = check.clone();
        threads.push(thread::spawn(move || {
            for _ in 0..num_iters {
                semaphore.acquire();
                assert!(check.fetch_add(1, Relaxed) < num_permits);
                check.fetch_sub(1, Relaxed);
                semaphore.release();
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    assert_eq!(check.load(Relaxed), 0);
    assert_eq!(semaphore.available_permits(Relaxed), num_permits as u64);
}

#[test]
fn semaphore_burst_release_wakes_chain() {
    let num_threads = if cfg!(miri) { 4 } else { 16 };
    let num_iters = if cfg!(miri) { 4 } else { 128 };

    for _ in 0..num_iters {
        let semaphore = Arc::new(Semaphore::new(0));

        let mut threads = Vec::new();
        for _ in 0..num_threads {
            let semaphore = semaphore.clone();
            threads.push(thread::spawn(move || semaphore.acquire()));
        }

        // One burst wakes the first waiter; each winner retires the previous
        // head and passes the wakeup down the line.
        semaphore.release_many(num_threads as u64);

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(semaphore.available_permits(Relaxed), 0);
        assert!(!semaphore.has_queued_threads());
    }
}

#[test]
fn condition_producer_consumer() {
    let capacity = 4;
    let num_producers = if cfg!(miri) { 2 } else { 4 };
    let num_items = if cfg!(miri) { 16 } else { 512 };

    let lock = ReentrantLock::new();
    let not_full = lock.condition();
    let not_empty = lock.condition();
    // Stands in for a bounded buffer; only touched while holding the lock.
    let queued = AtomicUsize::new(0);
    let consumed = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..num_producers {
            s.spawn(|| {
                for _ in 0..num_items {
                    lock.lock();
                    while queued.load(Relaxed) == capacity {
                        not_full.wait().unwrap();
                    }
                    assert!(queued.fetch_add(1, Relaxed) < capacity);
                    not_empty.signal().unwrap();
                    assert_eq!(lock.unlock(), Ok(true));
                }
            });
        }
        s.spawn(|| {
            for _ in 0..num_producers * num_items {
                lock.lock();
                while queued.load(Relaxed) == 0 {
                    not_empty.wait().unwrap();
                }
                queued.fetch_sub(1, Relaxed);
                consumed.fetch_add(1, Relaxed);
                not_full.signal().unwrap();
                assert_eq!(lock.unlock(), Ok(true));
            }
        });
    });

    assert_eq!(queued.load(Relaxed), 0);
    assert_eq!(consumed.load(Relaxed), num_producers * num_items);
    lock.lock();
    assert_eq!(not_full.has_waiters(), Ok(false));
    assert_eq!(not_empty.has_waiters(), Ok(false));
    assert_eq!(lock.unlock(), Ok(true));
}

#[cfg_attr(miri, ignore = "timing sensitive")]
#[test]
fn timeout_storm_stays_live() {
    let num_threads = 8;
    let num_iters = 64;

    let lock = Arc::new(Lock::default());
    lock.lock();

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let lock = lock.clone();
        threads.push(thread::spawn(move || {
            for i in 0..num_iters {
                let timeout = Duration::from_micros(i % 200);
                assert_eq!(lock.try_lock_for(timeout), Ok(false));
            }
        }));
    }

    for thread in threads {
        thread.join().unwrap();
    }
    // Every expired waiter excised itself; the queue must be empty and usable.
    assert!(!lock.has_queued_threads());
    assert!(lock.release_lock());
    lock.lock();
    assert!(lock.release_lock());
}

#[cfg_attr(miri, ignore = "timing sensitive")]
#[test]
fn interrupt_storm_stays_live() {
    let num_threads = 8;

    let lock = Arc::new(Lock::default());
    let stop = Arc::new(AtomicBool::new(false));
    let (waiter_sender, waiter_receiver) = std::sync::mpsc::channel::<Waiter>();

    lock.lock();

    let mut threads = Vec::new();
    for _ in 0..num_threads {
        let lock = lock.clone();
        let stop = stop.clone();
        let waiter_sender = waiter_sender.clone();
        threads.push(thread::spawn(move || {
            let mut interrupts = 0;
            while !stop.load(Relaxed) {
                waiter_sender.send(Waiter::current()).ok();
                if lock.lock_interruptibly() == Err(Interrupted) {
                    interrupts += 1;
                } else {
                    assert!(lock.release_lock());
                }
            }
            interrupts
        }));
    }
    drop(waiter_sender);

    for _ in 0..num_threads * 16 {
        if let Ok(waiter) = waiter_receiver.recv_timeout(Duration::from_millis(100)) {
            thread::sleep(Duration::from_micros(100));
            waiter.interrupt();
        }
    }
    stop.store(true, Relaxed);
    assert!(lock.release_lock());

    for thread in threads {
        thread.join().unwrap();
    }
    while waiter_receiver.try_recv().is_ok() {}
    assert!(!lock.has_queued_threads());
    lock.lock();
    assert!(lock.release_lock());
}
