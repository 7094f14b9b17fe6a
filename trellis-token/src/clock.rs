//! Wall-clock abstraction for token timestamps.
//!
//! Token issue and expiry times are Unix seconds shared across processes,
//! so they come from the wall clock rather than a monotonic one. Codecs
//! take an injected [`WallClock`] so tests can pin or step time.

use std::sync::atomic::{AtomicI64, Ordering};

/// Source of the current Unix time in seconds.
pub trait WallClock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl WallClock for FixedClock {
    fn now_unix(&self) -> i64 {
        self.0
    }
}

/// Settable clock, for tests that move time between encode and decode.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }

    /// Move the clock by `secs`, which may be negative.
    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_moves() {
        let clock = ManualClock::new(1000);
        clock.advance(2);
        assert_eq!(clock.now_unix(), 1002);
        clock.advance(-3);
        assert_eq!(clock.now_unix(), 999);
        clock.set(5);
        assert_eq!(clock.now_unix(), 5);
    }

    #[test]
    fn test_system_clock_is_after_2024() {
        assert!(SystemClock.now_unix() > 1_704_067_200);
    }
}
