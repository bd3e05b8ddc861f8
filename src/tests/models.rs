use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use loom::sync::atomic::AtomicBool;
use loom::thread::spawn;

use crate::{Lock, ReentrantLock, Semaphore};

#[test]
fn model_lock_exclusive() {
    loom::model(|| {
        let lock = Arc::new(Lock::default());
        let check = Arc::new(AtomicBool::new(false));

        lock.lock();

        let lock_clone = lock.clone();
        let check_clone = check.clone();
        let thread = spawn(move || {
            lock_clone.lock();
            assert!(check_clone.load(Relaxed));
            assert!(lock_clone.release_lock());
        });

        check.store(true, Relaxed);
        assert!(lock.release_lock());
        assert!(thread.join().is_ok());
    });
}

#[test]
fn model_lock_shared() {
    loom::model(|| {
        let lock = Arc::new(Lock::default());
        let check = Arc::new(AtomicBool::new(false));

        lock.lock();

        let lock_clone = lock.clone();
        let check_clone = check.clone();
        let thread = spawn(move || {
            lock_clone.share();
            assert!(check_clone.load(Relaxed));
            assert!(lock_clone.release_share());
        });

        check.store(true, Relaxed);
        assert!(lock.release_lock());
        assert!(thread.join().is_ok());
    });
}

#[test]
fn model_lock_exclusive_after_shared() {
    loom::model(|| {
        let lock = Arc::new(Lock::default());
        let check = Arc::new(AtomicBool::new(false));

        lock.share();

        let lock_clone = lock.clone();
        let check_clone = check.clone();
        let thread = spawn(move || {
            lock_clone.lock();
            assert!(check_clone.load(Relaxed));
            assert!(lock_clone.release_lock());
        });

        check.store(true, Relaxed);
        assert!(lock.release_share());
        assert!(thread.join().is_ok());
    });
}

#[test]
fn model_reentrant_lock() {
    loom::model(|| {
        let lock = Arc::new(ReentrantLock::new());
        let check = Arc::new(AtomicBool::new(false));

        lock.lock();
        lock.lock();

        let lock_clone = lock.clone();
        let check_clone = check.clone();
        let thread = spawn(move || {
            lock_clone.lock();
            assert!(check_clone.load(Relaxed));
            assert_eq!(lock_clone.unlock(), Ok(true));
        });

        check.store(true, Relaxed);
        assert_eq!(lock.unlock(), Ok(false));
        assert_eq!(lock.unlock(), Ok(true));
        assert!(thread.join().is_ok());
    });
}

#[test]
fn model_semaphore_release_acquire() {
    loom::model(|| {
        let semaphore = Arc::new(Semaphore::new(0));
        let check = Arc::new(AtomicBool::new(false));

        let semaphore_clone = semaphore.clone();
        let check_clone = check.clone();
        let thread = spawn(move || {
            semaphore_clone.acquire();
            assert!(check_clone.load(Relaxed));
        });

        check.store(true, Relaxed);
        semaphore.release();
        assert!(thread.join().is_ok());
    });
}
