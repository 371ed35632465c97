//! Tick sources.
//!
//! All timeouts, retry spins and liveness checks are measured on a [Clock]: a monotonic
//! counter incremented at a fixed rate. No wraparound handling is done within a single
//! timeout window beyond wrapping arithmetic on the difference.
use embedded_hal::blocking::delay::DelayMs;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default tick rate of the board system tick.
pub const TICKS_PER_SECOND: u32 = 10;

pub trait Clock {
    /// Current tick count.
    fn ticks(&self) -> u32;

    /// Ticks per second.
    fn tick_rate(&self) -> u32;

    /// Blocks the caller for `ms` milliseconds.
    fn delay_ms(&self, ms: u32);

    /// Number of ticks in `seconds`.
    fn seconds(&self, seconds: u32) -> u32 {
        seconds.saturating_mul(self.tick_rate())
    }

    /// Ticks elapsed since `since`.
    fn elapsed(&self, since: u32) -> u32 {
        self.ticks().wrapping_sub(since)
    }
}

/// Wall clock ticking at a fixed rate since its creation.
#[derive(Clone, Debug)]
pub struct SysTickClock {
    start: Instant,
    rate: u32,
}

impl SysTickClock {
    pub fn new(rate: u32) -> Self {
        Self {
            start: Instant::now(),
            rate: rate.max(1),
        }
    }
}

impl Default for SysTickClock {
    fn default() -> Self {
        Self::new(TICKS_PER_SECOND)
    }
}

impl Clock for SysTickClock {
    fn ticks(&self) -> u32 {
        (self.start.elapsed().as_millis() as u64 * self.rate as u64 / 1000) as u32
    }

    fn tick_rate(&self) -> u32 {
        self.rate
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

impl DelayMs<u32> for SysTickClock {
    fn delay_ms(&mut self, ms: u32) {
        Clock::delay_ms(self, ms)
    }
}

/// Virtual clock, only moving when someone waits on it.
///
/// Clones share the same time base, so a test can keep a handle while the code under test
/// spins on its own copy.
#[derive(Clone, Debug)]
pub struct ManualClock {
    elapsed_ms: Arc<AtomicU64>,
    rate: u32,
}

impl ManualClock {
    pub fn new(rate: u32) -> Self {
        Self {
            elapsed_ms: Arc::new(AtomicU64::new(0)),
            rate: rate.max(1),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms.load(Ordering::SeqCst)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(TICKS_PER_SECOND)
    }
}

impl Clock for ManualClock {
    fn ticks(&self) -> u32 {
        (self.elapsed_ms() * self.rate as u64 / 1000) as u32
    }

    fn tick_rate(&self) -> u32 {
        self.rate
    }

    fn delay_ms(&self, ms: u32) {
        self.advance_ms(ms as u64);
    }
}

impl DelayMs<u32> for ManualClock {
    fn delay_ms(&mut self, ms: u32) {
        self.advance_ms(ms as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_counts_sub_tick_delays() {
        let clock = ManualClock::default();
        for _ in 0..99 {
            Clock::delay_ms(&clock, 1);
        }
        assert_eq!(clock.ticks(), 0);
        Clock::delay_ms(&clock, 1);
        assert_eq!(clock.ticks(), 1);
    }

    #[test]
    fn clones_share_time() {
        let clock = ManualClock::default();
        let handle = clock.clone();
        Clock::delay_ms(&clock, 5_000);
        assert_eq!(handle.ticks(), clock.seconds(5));
        assert_eq!(handle.elapsed(0), 50);
    }
}
