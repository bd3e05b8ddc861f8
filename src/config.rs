//! [`Config`] defines common tuning options for the synchronizer engine.

#![deny(unsafe_code)]

use std::fmt;
use std::time::Duration;

#[cfg(not(feature = "loom"))]
use std::thread::yield_now;

#[cfg(feature = "loom")]
use loom::thread::yield_now;

/// [`Config`] defines common tuning options for the synchronizer engine.
pub trait Config: fmt::Debug + Default {
    /// Defines the number of times to retry the acquisition hook before entering the wait queue.
    #[inline]
    #[must_use]
    fn spin_count() -> usize {
        64
    }

    /// Defines the backoff function to use when spinning.
    #[inline]
    fn backoff(spin_count: usize) {
        #[cfg(feature = "loom")]
        {
            let _ = spin_count;
            yield_now();
        }
        #[cfg(not(feature = "loom"))]
        if spin_count % 16 == 0 {
            yield_now();
        } else {
            std::hint::spin_loop();
        }
    }

    /// Defines the remaining budget below which a timed wait spins instead of parking.
    #[inline]
    #[must_use]
    fn spin_for_timeout_threshold() -> Duration {
        Duration::from_micros(1)
    }
}

/// Default configuration for the synchronizer engine.
#[derive(Debug, Default)]
pub struct DefaultConfig;

impl Config for DefaultConfig {}
