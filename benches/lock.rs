use criterion::{criterion_group, criterion_main, Criterion};
use parkq::{Lock, ReentrantLock};

fn exclusive_unlock(c: &mut Criterion) {
    c.bench_function("lock-exclusive-unlock", |b| {
        b.iter(|| {
            let lock = Lock::new();
            lock.lock();
            assert!(lock.release_lock());
        });
    });
}

fn shared_shared_unlock_unlock(c: &mut Criterion) {
    c.bench_function("lock-shared-shared-unlock-unlock", |b| {
        b.iter(|| {
            let lock = Lock::new();
            lock.share();
            lock.share();
            assert!(lock.release_share());
            assert!(lock.release_share());
        });
    });
}

fn reentrant_lock_lock_unlock_unlock(c: &mut Criterion) {
    c.bench_function("reentrant-lock-lock-unlock-unlock", |b| {
        b.iter(|| {
            let lock = ReentrantLock::new();
            lock.lock();
            lock.lock();
            assert_eq!(lock.unlock(), Ok(false));
            assert_eq!(lock.unlock(), Ok(true));
        });
    });
}

criterion_group!(
    lock,
    exclusive_unlock,
    shared_shared_unlock_unlock,
    reentrant_lock_lock_unlock_unlock,
);
criterion_main!(lock);
