//! Local monotonic time sources
//!
//! Every timestamp the network clock handles on the local side comes from a
//! `LocalClock`. Values are nanoseconds from an arbitrary origin and never
//! regress.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A monotonic nanosecond counter.
pub trait LocalClock: Send + Sync + fmt::Debug {
    fn now(&self) -> u64;
}

/// `Instant`-backed clock, counting from its construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalClock for MonotonicClock {
    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to.
///
/// Used for deterministic tests and offline simulation of sync behavior.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move forward by `nanos`.
    pub fn advance(&self, nanos: u64) {
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                Some(t.saturating_add(nanos))
            });
    }

    /// Jump to `nanos`. Earlier values are ignored.
    pub fn set(&self, nanos: u64) {
        self.now.fetch_max(nanos, Ordering::AcqRel);
    }
}

impl LocalClock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
