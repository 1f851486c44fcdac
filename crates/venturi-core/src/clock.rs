// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Clocks
// ─────────────────────────────────────────────────────────────────────
//! Time sources for latency measurement.
//!
//! `MonotonicClock` is the production clock. `StepClock` advances a fixed
//! tick on every read, which makes every measured latency a pure function
//! of the call sequence; identical inputs then produce identical
//! `PerformanceRecord`s.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Microsecond time source.
pub trait Clock: Send + Sync {
    fn now_us(&self) -> u64;
}

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

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Deterministic clock: each `now_us()` returns the previous value plus `tick_us`.
pub struct StepClock {
    tick_us: u64,
    now: AtomicU64,
}

impl StepClock {
    pub fn new(tick_us: u64) -> Self {
        Self {
            tick_us,
            now: AtomicU64::new(0),
        }
    }

    /// Jump forward without a read, e.g. to simulate a stalled stage.
    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    pub fn peek(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Clock for StepClock {
    fn now_us(&self) -> u64 {
        self.now.fetch_add(self.tick_us, Ordering::SeqCst) + self.tick_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_clock_advances_per_read() {
        let clock = StepClock::new(10);
        assert_eq!(clock.now_us(), 10);
        assert_eq!(clock.now_us(), 20);
        clock.advance(5);
        assert_eq!(clock.now_us(), 35);
        assert_eq!(clock.peek(), 35);
    }

    #[test]
    fn test_monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let a = clock.now_us();
        let b = clock.now_us();
        assert!(b >= a);
    }
}
