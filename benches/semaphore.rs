use criterion::{criterion_group, criterion_main, Criterion};
use parkq::Semaphore;

fn acquire_release(c: &mut Criterion) {
    c.bench_function("semaphore-acquire-release", |b| {
        b.iter(|| {
            let semaphore = Semaphore::new(2);
            semaphore.acquire();
            semaphore.release();
        });
    });
}

fn acquire_acquire_release_release(c: &mut Criterion) {
    c.bench_function("semaphore-acquire-acquire-release-release", |b| {
        b.iter(|| {
            let semaphore = Semaphore::new(2);
            semaphore.acquire();
            semaphore.acquire();
            semaphore.release();
            semaphore.release();
        });
    });
}

fn acquire_many_release_many(c: &mut Criterion) {
    c.bench_function("semaphore-acquire-many-release-many", |b| {
        b.iter(|| {
            let semaphore = Semaphore::new(16);
            semaphore.acquire_many(11);
            semaphore.release_many(11);
        });
    });
}

criterion_group!(
    semaphore,
    acquire_release,
    acquire_acquire_release_release,
    acquire_many_release_many,
);
criterion_main!(semaphore);
