// SPDX-License-Identifier: MIT

//! Time source injection.
//!
//! Session deadlines, pool TTLs, and journal timestamps all read time
//! through a [`Clock`] instead of calling `Instant::now()` directly, so
//! tests can drive timeout behavior by winding a fake forward rather
//! than sleeping.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Where the orchestrator gets time: a monotonic instant for deadline
/// arithmetic and wall-clock milliseconds for persisted records.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn epoch_ms(&self) -> u64;
}

/// The OS clock. Used everywhere outside tests.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to. Clones share one state cell, so
/// a test can hold its copy while the code under test holds another.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone)]
pub struct FakeClock {
    state: std::sync::Arc<parking_lot::Mutex<(Instant, u64)>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeClock {
    pub fn new() -> Self {
        Self {
            state: std::sync::Arc::new(parking_lot::Mutex::new((Instant::now(), 1_000_000))),
        }
    }

    /// Wind both the instant and the epoch forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.0 += by;
        state.1 += by.as_millis() as u64;
    }

    /// Pin the wall clock to an exact millisecond value.
    pub fn set_epoch_ms(&self, ms: u64) {
        self.state.lock().1 = ms;
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.state.lock().0
    }

    fn epoch_ms(&self) -> u64 {
        self.state.lock().1
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
