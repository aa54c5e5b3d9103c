//! Per-endpoint circuit breakers.
//!
//! Three-state guard in front of every endpoint. A breaker opens after
//! `failure_threshold` consecutive failures, stays open for `open_timeout`,
//! then admits exactly one half-open probe whose outcome decides the next
//! transition.

use crate::util::SharedClock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    failure_count: u32,
    last_failure_ms: u64,
    next_attempt_ms: u64,
    probe_in_flight: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_ms: 0,
            next_attempt_ms: 0,
            probe_in_flight: false,
        }
    }
}

/// Breaker table for all registered endpoints.
pub struct BreakerBoard {
    entries: DashMap<String, BreakerEntry>,
    enabled: bool,
    failure_threshold: u32,
    open_timeout_ms: u64,
    clock: SharedClock,
}

impl BreakerBoard {
    pub fn new(enabled: bool, failure_threshold: u32, open_timeout_ms: u64, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            enabled,
            failure_threshold,
            open_timeout_ms,
            clock,
        }
    }

    pub fn register(&self, endpoint_id: &str) {
        self.entries
            .entry(endpoint_id.to_string())
            .or_insert_with(BreakerEntry::new);
    }

    pub fn remove(&self, endpoint_id: &str) {
        self.entries.remove(endpoint_id);
    }

    pub fn state(&self, endpoint_id: &str) -> BreakerState {
        self.entries
            .get(endpoint_id)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Whether the endpoint may receive normal traffic (breaker CLOSED).
    pub fn is_closed(&self, endpoint_id: &str) -> bool {
        if !self.enabled {
            return true;
        }
        self.state(endpoint_id) == BreakerState::Closed
    }

    /// Try to admit the single half-open probe for an endpoint whose open
    /// timeout has elapsed. Transitions OPEN → HALF_OPEN on first admission.
    pub fn try_admit_probe(&self, endpoint_id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let now = self.clock.now_ms();
        let mut entry = match self.entries.get_mut(endpoint_id) {
            Some(entry) => entry,
            None => return false,
        };

        match entry.state {
            BreakerState::Open if now >= entry.next_attempt_ms => {
                entry.state = BreakerState::HalfOpen;
                entry.probe_in_flight = true;
                tracing::info!(endpoint = %endpoint_id, "circuit breaker half-open, admitting probe");
                true
            }
            BreakerState::HalfOpen if !entry.probe_in_flight => {
                entry.probe_in_flight = true;
                true
            }
            _ => false,
        }
    }

    /// Record a request outcome for the endpoint.
    pub fn on_result(&self, endpoint_id: &str, success: bool) {
        if !self.enabled {
            return;
        }
        let now = self.clock.now_ms();
        let mut entry = self
            .entries
            .entry(endpoint_id.to_string())
            .or_insert_with(BreakerEntry::new);

        if success {
            match entry.state {
                BreakerState::HalfOpen => {
                    entry.state = BreakerState::Closed;
                    entry.failure_count = 0;
                    entry.probe_in_flight = false;
                    tracing::info!(endpoint = %endpoint_id, "circuit breaker closed");
                }
                BreakerState::Closed => {
                    entry.failure_count = 0;
                }
                BreakerState::Open => {}
            }
        } else {
            entry.failure_count += 1;
            entry.last_failure_ms = now;

            let trip = match entry.state {
                BreakerState::HalfOpen => true,
                BreakerState::Closed => entry.failure_count >= self.failure_threshold,
                BreakerState::Open => false,
            };
            if trip {
                entry.state = BreakerState::Open;
                entry.next_attempt_ms = now + self.open_timeout_ms;
                entry.probe_in_flight = false;
                tracing::warn!(
                    endpoint = %endpoint_id,
                    failures = entry.failure_count,
                    "circuit breaker opened"
                );
            }
        }
    }

    /// All breaker states keyed by endpoint id.
    pub fn states(&self) -> HashMap<String, BreakerState> {
        self.entries
            .iter()
            .map(|e| (e.key().clone(), e.value().state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;
    use std::sync::Arc;

    fn board(clock: Arc<ManualClock>) -> BreakerBoard {
        BreakerBoard::new(true, 5, 100, clock)
    }

    #[test]
    fn test_convergence_closed_open_halfopen_closed() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(clock.clone());
        board.register("e1");

        // failure_threshold consecutive failures trip the breaker.
        for _ in 0..5 {
            board.on_result("e1", false);
        }
        assert_eq!(board.state("e1"), BreakerState::Open);
        assert!(!board.is_closed("e1"));
        assert!(!board.try_admit_probe("e1"));

        // After the open timeout the next attempt is the half-open probe.
        clock.advance_ms(100);
        assert!(board.try_admit_probe("e1"));
        assert_eq!(board.state("e1"), BreakerState::HalfOpen);
        // Only one probe is admitted.
        assert!(!board.try_admit_probe("e1"));

        // A single success in half-open closes the breaker.
        board.on_result("e1", true);
        assert_eq!(board.state("e1"), BreakerState::Closed);
        assert!(board.is_closed("e1"));
    }

    #[test]
    fn test_halfopen_failure_reopens() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(clock.clone());
        board.register("e1");
        for _ in 0..5 {
            board.on_result("e1", false);
        }
        clock.advance_ms(100);
        assert!(board.try_admit_probe("e1"));
        board.on_result("e1", false);
        assert_eq!(board.state("e1"), BreakerState::Open);

        // The reopened window starts from the probe failure.
        assert!(!board.try_admit_probe("e1"));
        clock.advance_ms(100);
        assert!(board.try_admit_probe("e1"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let clock = Arc::new(ManualClock::new(0));
        let board = board(clock);
        board.register("e1");
        for _ in 0..4 {
            board.on_result("e1", false);
        }
        board.on_result("e1", true);
        // Counter reset: four more failures do not trip.
        for _ in 0..4 {
            board.on_result("e1", false);
        }
        assert_eq!(board.state("e1"), BreakerState::Closed);
        board.on_result("e1", false);
        assert_eq!(board.state("e1"), BreakerState::Open);
    }

    #[test]
    fn test_disabled_board_is_transparent() {
        let clock = Arc::new(ManualClock::new(0));
        let board = BreakerBoard::new(false, 1, 100, clock);
        board.register("e1");
        board.on_result("e1", false);
        assert!(board.is_closed("e1"));
    }
}
