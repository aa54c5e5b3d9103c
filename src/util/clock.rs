//! Injectable time source.
//!
//! Every component that reasons about wall-clock windows (rate limits, key
//! ages, breaker timeouts, sticky-session expiry) receives a [`SharedClock`]
//! in its constructor instead of reading system time directly, so tests can
//! substitute a [`ManualClock`] and step time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond-resolution time source.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// Seconds since the Unix epoch, fractional.
    fn now_secs_f64(&self) -> f64 {
        self.now_ms() as f64 / 1000.0
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Default clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic clock for tests; starts at an arbitrary fixed instant and
/// only moves when advanced explicitly.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta: u64) {
        self.now_ms.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now: u64) {
        self.now_ms.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// System clock wrapped for injection.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set_ms(10_000);
        assert_eq!(clock.now_ms(), 10_000);
    }

    #[test]
    fn test_system_clock_is_recent() {
        let clock = SystemClock;
        // Well past 2020-01-01 in milliseconds.
        assert!(clock.now_ms() > 1_577_836_800_000);
        assert!(clock.now_secs_f64() > 1_577_836_800.0);
    }
}
