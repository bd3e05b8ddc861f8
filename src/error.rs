//! Errors reported by blocking acquisition and condition waits.

#![deny(unsafe_code)]

use std::error::Error;
use std::fmt;

/// The waiting thread was interrupted before the operation completed.
///
/// Returned by the interruptible acquisition methods of [`Synchronizer`](crate::Synchronizer).
/// The pending interrupt is consumed when this error is returned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the waiting thread was interrupted")
    }
}

impl Error for Interrupted {}

/// Errors that can occur while waiting on a [`Condition`](crate::Condition).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitError {
    /// The calling thread does not hold the synchronizer exclusively.
    NotHeld,
    /// The waiting thread was interrupted before it was signalled.
    Interrupted,
}

impl fmt::Display for WaitError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotHeld => f.write_str("the synchronizer is not held by the current thread"),
            Self::Interrupted => f.write_str("the waiting thread was interrupted"),
        }
    }
}

impl Error for WaitError {}

impl From<Interrupted> for WaitError {
    #[inline]
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}
