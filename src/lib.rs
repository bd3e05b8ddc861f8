#![deny(missing_docs, clippy::all, clippy::pedantic)]
#![doc = include_str!("../README.md")]

pub mod condition;
pub use condition::Condition;

pub mod config;
pub use config::{Config, DefaultConfig};

pub mod error;
pub use error::{Interrupted, WaitError};

pub mod lock;
pub use lock::Lock;

#[cfg(not(feature = "loom"))]
pub mod lock_api;
#[cfg(not(feature = "loom"))]
pub use lock_api::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

mod node;

pub mod park;
pub use park::Waiter;

pub mod reentrant;
pub use reentrant::ReentrantLock;

pub mod semaphore;
pub use semaphore::Semaphore;

pub mod synchronizer;
pub use synchronizer::{Protocol, Synchronizer};

#[cfg(test)]
mod tests;
