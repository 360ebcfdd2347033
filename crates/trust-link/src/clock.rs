//! Clocks for connect timers and history timestamps.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Clock interface for the connection hub.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic time since the clock was created.
    fn now(&self) -> Duration;

    /// Wall-clock time in milliseconds since the Unix epoch.
    fn unix_millis(&self) -> u64;
}

/// Monotonic clock based on `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct ManualClockState {
    now: Duration,
    epoch_ms: u64,
}

/// Deterministic clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::with_epoch(0)
    }

    /// Manual clock whose wall time starts at `epoch_ms`.
    #[must_use]
    pub fn with_epoch(epoch_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClockState {
                now: Duration::ZERO,
                epoch_ms,
            })),
        }
    }

    /// Advance time by the given delta.
    pub fn advance(&self, delta: Duration) -> Duration {
        let mut state = self.inner.lock();
        state.now = state.now.saturating_add(delta);
        state.now
    }

    /// Set the current time explicitly.
    pub fn set_time(&self, time: Duration) {
        self.inner.lock().now = time;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }

    fn unix_millis(&self) -> u64 {
        let state = self.inner.lock();
        let elapsed = u64::try_from(state.now.as_millis()).unwrap_or(u64::MAX);
        state.epoch_ms.saturating_add(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_timelines() {
        let clock = ManualClock::with_epoch(1_000);
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(250));
        assert_eq!(clock.unix_millis(), 1_250);
        clock.set_time(Duration::from_secs(3));
        assert_eq!(clock.unix_millis(), 4_000);
    }

    #[test]
    fn std_clock_is_monotonic() {
        let clock = StdClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
        assert!(clock.unix_millis() > 0);
    }
}
