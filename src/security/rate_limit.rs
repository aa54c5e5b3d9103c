// Sliding-window rate limiting per user.

use crate::util::SharedClock;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Window width.
const WINDOW_MS: u64 = 60_000;

/// Sliding 60-second request window per user id.
pub struct RateLimiter {
    enabled: bool,
    max_requests_per_minute: usize,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_requests_per_minute: usize, clock: SharedClock) -> Self {
        Self {
            enabled,
            max_requests_per_minute,
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Admit or reject one request for `user_id`, recording it when admitted.
    pub fn check(&self, user_id: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let now = self.clock.now_ms();
        let cutoff = now.saturating_sub(WINDOW_MS);
        let mut windows = self.windows.lock();
        let window = windows.entry(user_id.to_string()).or_default();

        while window.front().map(|&t| t < cutoff).unwrap_or(false) {
            window.pop_front();
        }

        if window.len() >= self.max_requests_per_minute {
            return false;
        }

        window.push_back(now);
        true
    }

    /// Drop expired timestamps and empty windows (maintenance loop).
    pub fn cleanup(&self) {
        let cutoff = self.clock.now_ms().saturating_sub(WINDOW_MS);
        let mut windows = self.windows.lock();
        for window in windows.values_mut() {
            while window.front().map(|&t| t < cutoff).unwrap_or(false) {
                window.pop_front();
            }
        }
        windows.retain(|_, window| !window.is_empty());
    }

    pub fn tracked_users(&self) -> usize {
        self.windows.lock().len()
    }
}
