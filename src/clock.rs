//! Clock abstraction for supporting both wall-clock and simulated time.
//!
//! The scheduler only ever asks a [`Clock`] what time it is and to sleep for a
//! bounded duration. The simulated clock lets a whole holiday play out in
//! seconds for dry runs and tests.

use chrono::{Duration as ChronoDuration, Local};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tracing::trace;

use crate::schedule::Timestamp;

/// Trait for abstracting time operations
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> Timestamp;

    /// Sleep for the specified duration (or simulate it)
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall-clock time in the host's local timezone
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Local::now().fixed_offset()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

/// Simulated clock for dry runs and time-accelerated execution.
///
/// Sleeping advances logical time by exactly the requested duration. A
/// `speed` of 60.0 spends one real second per simulated minute; a speed of
/// zero fast-forwards without any real sleep.
#[derive(Debug)]
pub struct SimulatedClock {
    current: Mutex<Timestamp>,
    speed: f64,
}

impl SimulatedClock {
    /// Create a fast-forwarding clock starting at `start`
    pub fn new(start: Timestamp) -> Self {
        Self::with_speed(start, 0.0)
    }

    /// Create a clock starting at `start` that runs `speed` times faster than real time
    pub fn with_speed(start: Timestamp, speed: f64) -> Self {
        Self {
            current: Mutex::new(start),
            speed: if speed.is_finite() && speed > 0.0 { speed } else { 0.0 },
        }
    }

    /// Jump to an arbitrary instant, possibly backwards
    pub fn set(&self, now: Timestamp) {
        *self.current.lock() = now;
    }

    /// Move logical time forward (or backward, for negative deltas)
    pub fn advance(&self, delta: ChronoDuration) {
        let mut current = self.current.lock();
        if let Some(next) = current.checked_add_signed(delta) {
            *current = next;
        }
    }

    fn real_duration(&self, simulated: Duration) -> Duration {
        if self.speed == 0.0 {
            Duration::ZERO
        } else {
            simulated.div_f64(self.speed)
        }
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        let delta = ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX);
        let real = self.real_duration(duration);
        async move {
            if !real.is_zero() {
                tokio::time::sleep(real).await;
            }
            // Logical time only moves once the sleep completes
            self.advance(delta);
            trace!("Simulated sleep of {:?}", duration);
        }
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        (**self).sleep(duration)
    }
}
