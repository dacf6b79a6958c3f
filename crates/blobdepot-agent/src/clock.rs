//! Monotonic clock injection.
//!
//! The agent never reads an ambient clock; callers hand it a [`Clock`].
//! Production uses [`SystemClock`], tests use [`ManualClock`] and drive
//! time explicitly.

use std::cell::Cell;
use std::time::{Duration, Instant};

use blobdepot_types::Monotonic;

/// Source of monotonic time for the agent.
pub trait Clock {
    fn monotonic(&self) -> Monotonic;
}

/// Process-local monotonic clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Monotonic {
        Monotonic::from_nanos(self.origin.elapsed().as_nanos() as u64)
    }
}

/// Manually driven clock for deterministic tests.
///
/// Optionally advances itself by a fixed amount on every read, which
/// lets a test make wall-clock budgets (like the drain yield) trip after
/// a chosen number of operations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_nanos: Cell<u64>,
    advance_per_read: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts advancing the clock by `step` on every read.
    pub fn with_advance_per_read(step: Duration) -> Self {
        let clock = Self::new();
        clock.advance_per_read.set(step.as_nanos() as u64);
        clock
    }

    pub fn advance(&self, by: Duration) {
        self.now_nanos
            .set(self.now_nanos.get() + by.as_nanos() as u64);
    }

    pub fn set(&self, now: Monotonic) {
        self.now_nanos.set(now.as_nanos());
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Monotonic {
        let now = self.now_nanos.get();
        self.now_nanos.set(now + self.advance_per_read.get());
        Monotonic::from_nanos(now)
    }
}
