// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Monotonic millisecond clock relative to process start.
//!
//! The epoch is pinned by `init()` (call it first thing in `main`) or
//! lazily on the first read. Backed by `Instant`, so wall-clock changes
//! never move it backward.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Pin the process epoch. Later calls are no-ops.
pub fn init() {
    EPOCH.get_or_init(Instant::now);
}

/// Elapsed time since the process epoch.
pub fn elapsed() -> Duration {
    EPOCH.get_or_init(Instant::now).elapsed()
}

/// Elapsed milliseconds since the process epoch, with sub-millisecond
/// precision.
pub fn now_millis() -> f64 {
    elapsed().as_secs_f64() * 1000.0
}

/// Source of "now" in milliseconds. Must be non-decreasing.
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> f64;
}

/// The process clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_millis(&self) -> f64 {
        now_millis()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward. Negative or NaN amounts are ignored.
    pub fn advance(&self, millis: f64) {
        if millis.is_nan() || millis <= 0.0 {
            return;
        }
        let _ = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + millis).to_bits())
            });
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        init();
        let a = now_millis();
        std::thread::sleep(Duration::from_millis(2));
        let b = SystemClock.now_millis();
        assert!(b >= a + 1.0, "{} then {}", a, b);
    }

    #[test]
    fn manual_clock_advances_shared() {
        let clock = ManualClock::new();
        let view = clock.clone();
        assert_eq!(view.now_millis(), 0.0);
        clock.advance(20.0);
        clock.advance(0.5);
        assert_eq!(view.now_millis(), 20.5);
    }

    #[test]
    fn manual_clock_never_goes_back() {
        let clock = ManualClock::new();
        clock.advance(10.0);
        clock.advance(-5.0);
        clock.advance(f64::NAN);
        assert_eq!(clock.now_millis(), 10.0);
    }
}
