//! Endpoint selection strategies.
//!
//! Each strategy is a pure selector over the available-endpoint snapshot; the
//! stateful ones (round-robin counters, smooth weights) keep their own
//! bookkeeping internally so the router can treat them uniformly.

use crate::message::{MessageEnvelope, MessagePriority};
use crate::router::endpoint::RouteEndpoint;
use crate::router::rules::{RoutingContext, RoutingRule};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Strategy identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    HashBased,
    PriorityBased,
    ContentBased,
}

impl RoutingStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingStrategy::RoundRobin => "round_robin",
            RoutingStrategy::WeightedRoundRobin => "weighted_round_robin",
            RoutingStrategy::LeastConnections => "least_connections",
            RoutingStrategy::HashBased => "hash_based",
            RoutingStrategy::PriorityBased => "priority_based",
            RoutingStrategy::ContentBased => "content_based",
        }
    }
}

/// Key the hash strategy digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashKey {
    Topic,
    MessageId,
    Attribute(String),
}

/// A pure selector over the available-endpoint set. Returns the chosen
/// endpoint id.
pub trait EndpointSelector: Send + Sync {
    fn select(
        &self,
        available: &[RouteEndpoint],
        envelope: &MessageEnvelope,
        context: &RoutingContext,
    ) -> Option<String>;
}

// ============================================================================
// Round robin
// ============================================================================

/// Cyclic counter over endpoint ids sorted for stability.
pub struct RoundRobinSelector {
    counter: Mutex<usize>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            counter: Mutex::new(0),
        }
    }
}

impl EndpointSelector for RoundRobinSelector {
    fn select(
        &self,
        available: &[RouteEndpoint],
        _envelope: &MessageEnvelope,
        _context: &RoutingContext,
    ) -> Option<String> {
        if available.is_empty() {
            return None;
        }
        let mut ids: Vec<&str> = available.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();

        let mut counter = self.counter.lock();
        let chosen = ids[*counter % ids.len()].to_string();
        *counter = counter.wrapping_add(1);
        Some(chosen)
    }
}

// ============================================================================
// Smooth weighted round robin
// ============================================================================

/// Classic smooth weighted algorithm: each endpoint accrues
/// `weight × health_score` per tick, the max-accrued is chosen and debited by
/// the total effective weight.
pub struct WeightedRoundRobinSelector {
    current: Mutex<HashMap<String, f64>>,
}

impl WeightedRoundRobinSelector {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(HashMap::new()),
        }
    }
}

impl EndpointSelector for WeightedRoundRobinSelector {
    fn select(
        &self,
        available: &[RouteEndpoint],
        _envelope: &MessageEnvelope,
        _context: &RoutingContext,
    ) -> Option<String> {
        if available.is_empty() {
            return None;
        }

        let mut current = self.current.lock();
        let mut total = 0.0;
        for endpoint in available {
            let effective = endpoint.weight as f64 * endpoint.health_score;
            *current.entry(endpoint.id.clone()).or_insert(0.0) += effective;
            total += effective;
        }

        let chosen = available
            .iter()
            .max_by(|a, b| {
                let wa = current.get(&a.id).copied().unwrap_or(0.0);
                let wb = current.get(&b.id).copied().unwrap_or(0.0);
                wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
            })?
            .id
            .clone();

        if let Some(weight) = current.get_mut(&chosen) {
            *weight -= total;
        }
        Some(chosen)
    }
}

// ============================================================================
// Least connections
// ============================================================================

pub struct LeastConnectionsSelector;

impl EndpointSelector for LeastConnectionsSelector {
    fn select(
        &self,
        available: &[RouteEndpoint],
        _envelope: &MessageEnvelope,
        _context: &RoutingContext,
    ) -> Option<String> {
        available
            .iter()
            .min_by_key(|e| e.current_connections)
            .map(|e| e.id.clone())
    }
}

// ============================================================================
// Hash based
// ============================================================================

/// 128-bit SHA-256 prefix of the configured key, modulo the candidate count
/// over an id-sorted list so placement is stable across snapshots.
pub struct HashSelector {
    key: HashKey,
}

impl HashSelector {
    pub fn new(key: HashKey) -> Self {
        Self { key }
    }

    fn digest128(input: &[u8]) -> u128 {
        let digest = Sha256::digest(input);
        let mut prefix = [0u8; 16];
        prefix.copy_from_slice(&digest[..16]);
        u128::from_be_bytes(prefix)
    }
}

impl EndpointSelector for HashSelector {
    fn select(
        &self,
        available: &[RouteEndpoint],
        envelope: &MessageEnvelope,
        _context: &RoutingContext,
    ) -> Option<String> {
        if available.is_empty() {
            return None;
        }

        let key = match &self.key {
            HashKey::Topic => envelope.topic.clone(),
            HashKey::MessageId => envelope.id.clone(),
            HashKey::Attribute(name) => envelope.attributes.get(name).cloned().unwrap_or_default(),
        };

        let mut ids: Vec<&str> = available.iter().map(|e| e.id.as_str()).collect();
        ids.sort_unstable();
        let index = (Self::digest128(key.as_bytes()) % ids.len() as u128) as usize;
        Some(ids[index].to_string())
    }
}

// ============================================================================
// Priority based
// ============================================================================

/// CRITICAL → healthiest endpoint; HIGH → lowest load factor; everything
/// else → uniform random.
pub struct PrioritySelector;

impl EndpointSelector for PrioritySelector {
    fn select(
        &self,
        available: &[RouteEndpoint],
        envelope: &MessageEnvelope,
        _context: &RoutingContext,
    ) -> Option<String> {
        if available.is_empty() {
            return None;
        }

        match envelope.priority {
            MessagePriority::Critical => available
                .iter()
                .max_by(|a, b| {
                    a.health_score
                        .partial_cmp(&b.health_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|e| e.id.clone()),
            MessagePriority::High => available
                .iter()
                .min_by(|a, b| {
                    a.load_factor()
                        .partial_cmp(&b.load_factor())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|e| e.id.clone()),
            _ => {
                let index = rand::rng().random_range(0..available.len());
                Some(available[index].id.clone())
            }
        }
    }
}

// ============================================================================
// Content based
// ============================================================================

/// Evaluates rules sorted by priority descending; the first matching rule
/// restricts candidates to its `RouteTo` subset (uniform random among them).
/// No matching rule falls back to uniform random over all available.
pub struct ContentSelector {
    rules: Arc<RwLock<Vec<RoutingRule>>>,
    now_ms: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl ContentSelector {
    pub fn new(rules: Arc<RwLock<Vec<RoutingRule>>>, now_ms: Arc<dyn Fn() -> u64 + Send + Sync>) -> Self {
        Self { rules, now_ms }
    }
}

impl EndpointSelector for ContentSelector {
    fn select(
        &self,
        available: &[RouteEndpoint],
        envelope: &MessageEnvelope,
        context: &RoutingContext,
    ) -> Option<String> {
        if available.is_empty() {
            return None;
        }

        let now_ms = (self.now_ms)();
        let rules = self.rules.read();
        for rule in rules.iter() {
            if !rule.matches(envelope, context, now_ms) {
                continue;
            }
            let targets = rule.target_endpoint_ids();
            let candidates: Vec<&RouteEndpoint> = available
                .iter()
                .filter(|e| targets.iter().any(|id| *id == e.id))
                .collect();
            if !candidates.is_empty() {
                let index = rand::rng().random_range(0..candidates.len());
                return Some(candidates[index].id.clone());
            }
        }

        let index = rand::rng().random_range(0..available.len());
        Some(available[index].id.clone())
    }
}
