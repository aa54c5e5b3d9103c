//! Sticky-session bindings.
//!
//! Node-local state: a caller-supplied `session_id` pinned to an endpoint for
//! a time window. Bindings are lost on restart; the next route re-binds.

use crate::util::SharedClock;
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct SessionBinding {
    endpoint_id: String,
    last_seen_ms: u64,
}

/// Session table with inactivity expiry.
pub struct StickySessionTable {
    bindings: DashMap<String, SessionBinding>,
    timeout_ms: u64,
    clock: SharedClock,
}

impl StickySessionTable {
    pub fn new(timeout_ms: u64, clock: SharedClock) -> Self {
        Self {
            bindings: DashMap::new(),
            timeout_ms,
            clock,
        }
    }

    /// Look up a live binding, refreshing its timestamp.
    pub fn lookup(&self, session_id: &str) -> Option<String> {
        let now = self.clock.now_ms();
        let mut entry = self.bindings.get_mut(session_id)?;
        if now.saturating_sub(entry.last_seen_ms) > self.timeout_ms {
            drop(entry);
            self.bindings.remove(session_id);
            return None;
        }
        entry.last_seen_ms = now;
        Some(entry.endpoint_id.clone())
    }

    /// Bind (or re-bind) a session to an endpoint.
    pub fn bind(&self, session_id: &str, endpoint_id: &str) {
        self.bindings.insert(
            session_id.to_string(),
            SessionBinding {
                endpoint_id: endpoint_id.to_string(),
                last_seen_ms: self.clock.now_ms(),
            },
        );
    }

    /// Drop every binding pointing at the endpoint (endpoint removal).
    pub fn unbind_endpoint(&self, endpoint_id: &str) {
        self.bindings.retain(|_, binding| binding.endpoint_id != endpoint_id);
    }

    /// Purge expired bindings; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.bindings.len();
        self.bindings
            .retain(|_, binding| now.saturating_sub(binding.last_seen_ms) <= self.timeout_ms);
        before - self.bindings.len()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
