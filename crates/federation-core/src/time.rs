//! A small clock abstraction so the timer-driven state machines (Join,
//! VoterStore, GlobalTime) can be driven by a fake clock in tests instead of
//! sleeping real wall-clock time, the same shape `spark-core::platform::time`
//! uses to keep protocol logic off `std::time::Instant::now()` directly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic source of time. `instant_now` backs retry timers and
/// deadlines; `tick` backs the voter-store bootstrap race's `leader_instance`
/// generator (spec §4.7 step 3: "generate a `leader_instance` (current tick
/// count)").
pub trait Clock: Send + Sync + fmt::Debug {
    fn instant_now(&self) -> Instant;

    /// A strictly monotonically increasing counter, distinct from wall-clock
    /// time. Two calls on the same clock never return the same value.
    fn tick(&self) -> u64;
}

/// The production clock: `Instant::now()` plus a process-local atomic tick
/// counter seeded from the same instant so ticks are comparable across a
/// single process's restarts-within-a-run.
#[derive(Debug, Clone)]
pub struct SystemClock {
    counter: Arc<AtomicU64>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn instant_now(&self) -> Instant {
        Instant::now()
    }

    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

/// A controllable clock for deterministic tests: `instant_now` is anchored
/// at construction time and advances only when `advance` is called, and
/// `tick` is a plain incrementing counter the test can inspect.
#[derive(Debug, Clone)]
pub struct FakeClock {
    base: Instant,
    offset_nanos: Arc<AtomicU64>,
    counter: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset_nanos: Arc::new(AtomicU64::new(0)),
            counter: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_nanos
            .fetch_add(by.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn instant_now(&self) -> Instant {
        self.base + Duration::from_nanos(self.offset_nanos.load(Ordering::Relaxed))
    }

    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}
