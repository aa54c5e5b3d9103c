//! # Smart Router
//!
//! Selects exactly one downstream endpoint per message, accounting for
//! health, load, stickiness and circuit state. Strategies are pluggable pure
//! selectors; per-endpoint circuit breakers and a failover ladder guard the
//! selection; a pluggable probe feeds health scores on a fixed cadence.

pub mod breaker;
pub mod endpoint;
pub mod rules;
pub mod sessions;
pub mod strategies;

pub use breaker::{BreakerBoard, BreakerState};
pub use endpoint::{EndpointStatus, RouteEndpoint};
pub use rules::{CmpOp, RoutingContext, RoutingRule, RuleAction, RuleCondition};
pub use sessions::StickySessionTable;
pub use strategies::{EndpointSelector, HashKey, RoutingStrategy};

use crate::error::{BusError, Result};
use crate::message::MessageEnvelope;
use crate::util::{system_clock, SharedClock};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Session sweeper cadence.
const SESSION_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Probe latency below which a healthy response earns a score bump.
const PROBE_FAST_MS: f64 = 100.0;

/// Probe latency above which a healthy response is penalized.
const PROBE_SLOW_MS: f64 = 1_000.0;

/// EMA smoothing for response time and error rate.
const RESPONSE_EMA_ALPHA: f64 = 0.1;

// ============================================================================
// Configuration
// ============================================================================

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub default_strategy: RoutingStrategy,

    /// Key digested by the hash strategy
    pub hash_key: HashKey,

    pub health_check_enabled: bool,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,

    pub failover_enabled: bool,

    pub circuit_breaker_enabled: bool,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_ms: u64,

    pub sticky_sessions: bool,
    pub session_timeout_ms: u64,

    /// Hard cap on registered endpoints
    pub max_endpoints: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_strategy: RoutingStrategy::RoundRobin,
            hash_key: HashKey::Topic,
            health_check_enabled: true,
            health_check_interval_ms: 30_000,
            health_check_timeout_ms: 5_000,
            failover_enabled: true,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_ms: 60_000,
            sticky_sessions: false,
            session_timeout_ms: 300_000,
            max_endpoints: 100,
        }
    }
}

// ============================================================================
// Health probe contract
// ============================================================================

/// Result of probing one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub latency_ms: f64,
}

/// Pluggable endpoint health probe, called on a fixed cadence.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &RouteEndpoint) -> ProbeOutcome;
}

// ============================================================================
// Router
// ============================================================================

/// Smart message router.
pub struct SmartRouter {
    config: RouterConfig,
    endpoints: DashMap<String, RouteEndpoint>,
    breakers: BreakerBoard,
    sessions: StickySessionTable,
    rules: Arc<RwLock<Vec<RoutingRule>>>,
    selectors: HashMap<RoutingStrategy, Box<dyn EndpointSelector>>,
    counters: DashMap<String, u64>,
    clock: SharedClock,
    running: RwLock<bool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SmartRouter {
    pub fn new(config: RouterConfig) -> Arc<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: RouterConfig, clock: SharedClock) -> Arc<Self> {
        let rules: Arc<RwLock<Vec<RoutingRule>>> = Arc::new(RwLock::new(Vec::new()));

        let mut selectors: HashMap<RoutingStrategy, Box<dyn EndpointSelector>> = HashMap::new();
        selectors.insert(
            RoutingStrategy::RoundRobin,
            Box::new(strategies::RoundRobinSelector::new()),
        );
        selectors.insert(
            RoutingStrategy::WeightedRoundRobin,
            Box::new(strategies::WeightedRoundRobinSelector::new()),
        );
        selectors.insert(
            RoutingStrategy::LeastConnections,
            Box::new(strategies::LeastConnectionsSelector),
        );
        selectors.insert(
            RoutingStrategy::HashBased,
            Box::new(strategies::HashSelector::new(config.hash_key.clone())),
        );
        selectors.insert(
            RoutingStrategy::PriorityBased,
            Box::new(strategies::PrioritySelector),
        );
        let rule_clock = clock.clone();
        selectors.insert(
            RoutingStrategy::ContentBased,
            Box::new(strategies::ContentSelector::new(
                rules.clone(),
                Arc::new(move || rule_clock.now_ms()),
            )),
        );

        Arc::new(Self {
            breakers: BreakerBoard::new(
                config.circuit_breaker_enabled,
                config.circuit_breaker_threshold,
                config.circuit_breaker_timeout_ms,
                clock.clone(),
            ),
            sessions: StickySessionTable::new(config.session_timeout_ms, clock.clone()),
            endpoints: DashMap::new(),
            rules,
            selectors,
            counters: DashMap::new(),
            clock,
            running: RwLock::new(false),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Endpoint and rule management
    // ------------------------------------------------------------------

    pub fn add_endpoint(&self, endpoint: RouteEndpoint) -> Result<()> {
        if self.endpoints.len() >= self.config.max_endpoints
            && !self.endpoints.contains_key(&endpoint.id)
        {
            return Err(BusError::LimitExceeded(format!(
                "router endpoint capacity {} reached",
                self.config.max_endpoints
            )));
        }
        tracing::info!(
            endpoint = %endpoint.name,
            address = %endpoint.address,
            port = endpoint.port,
            "endpoint registered"
        );
        self.breakers.register(&endpoint.id);
        self.endpoints.insert(endpoint.id.clone(), endpoint);
        Ok(())
    }

    pub fn remove_endpoint(&self, endpoint_id: &str) {
        if let Some((_, endpoint)) = self.endpoints.remove(endpoint_id) {
            self.breakers.remove(endpoint_id);
            self.sessions.unbind_endpoint(endpoint_id);
            tracing::info!(endpoint = %endpoint.name, "endpoint removed");
        }
    }

    pub fn get_endpoint(&self, endpoint_id: &str) -> Option<RouteEndpoint> {
        self.endpoints.get(endpoint_id).map(|e| e.clone())
    }

    pub fn update_endpoint_status(&self, endpoint_id: &str, status: EndpointStatus) {
        if let Some(mut endpoint) = self.endpoints.get_mut(endpoint_id) {
            endpoint.status = status;
            tracing::info!(endpoint = %endpoint.name, status = ?status, "endpoint status updated");
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Add a rule; rules evaluate highest priority first.
    pub fn add_rule(&self, rule: RoutingRule) {
        let mut rules = self.rules.write();
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn remove_rule(&self, rule_id: &str) {
        self.rules.write().retain(|r| r.id != rule_id);
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Select exactly one endpoint for the envelope.
    pub fn route(
        &self,
        envelope: &MessageEnvelope,
        strategy: Option<RoutingStrategy>,
        context: &RoutingContext,
    ) -> Result<RouteEndpoint> {
        if self.endpoints.is_empty() {
            return Err(BusError::NoRoute(envelope.topic.clone()));
        }

        // Sticky reuse: an existing binding wins while its endpoint stays
        // available and its breaker is closed.
        if self.config.sticky_sessions {
            if let Some(session_id) = context.session_id.as_deref() {
                if let Some(bound) = self.sessions.lookup(session_id) {
                    if let Some(endpoint) = self.endpoints.get(&bound) {
                        if endpoint.is_available() && self.breakers.is_closed(&bound) {
                            return Ok(endpoint.clone());
                        }
                    }
                }
            }
        }

        let strategy = strategy.unwrap_or(self.config.default_strategy);
        let available: Vec<RouteEndpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.is_available() && self.breakers.is_closed(e.key()))
            .map(|e| e.clone())
            .collect();

        let chosen_id = if available.is_empty() {
            None
        } else {
            let selector = self
                .selectors
                .get(&strategy)
                .ok_or_else(|| BusError::Internal(format!("no selector for {strategy:?}")))?;
            selector.select(&available, envelope, context)
        };

        let endpoint = match chosen_id.and_then(|id| self.endpoints.get(&id).map(|e| e.clone())) {
            Some(endpoint) => endpoint,
            None => {
                if self.config.failover_enabled {
                    self.failover(envelope)?
                } else {
                    return Err(BusError::NoRoute(envelope.topic.clone()));
                }
            }
        };

        self.bump(format!("strategy_{}", strategy.as_str()));
        self.bump(format!("endpoint_{}", endpoint.id));

        if self.config.sticky_sessions {
            if let Some(session_id) = context.session_id.as_deref() {
                self.sessions.bind(session_id, &endpoint.id);
            }
        }

        Ok(endpoint)
    }

    /// Failover ladder when normal selection finds nothing: degraded
    /// endpoints with a usable health score, then a half-open probe against
    /// an endpoint whose open timeout elapsed.
    fn failover(&self, envelope: &MessageEnvelope) -> Result<RouteEndpoint> {
        let degraded: Option<RouteEndpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.status == EndpointStatus::Degraded && e.health_score > 0.3)
            .max_by(|a, b| {
                a.health_score
                    .partial_cmp(&b.health_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|e| e.clone());
        if let Some(endpoint) = degraded {
            self.bump("failover_degraded".to_string());
            return Ok(endpoint);
        }

        let ids: Vec<String> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if self.breakers.try_admit_probe(&id) {
                if let Some(endpoint) = self.endpoints.get(&id) {
                    self.bump("failover_probe".to_string());
                    return Ok(endpoint.clone());
                }
            }
        }

        Err(BusError::NoRoute(envelope.topic.clone()))
    }

    // ------------------------------------------------------------------
    // Connection accounting
    // ------------------------------------------------------------------

    /// Reserve a connection slot on the endpoint.
    pub fn acquire(&self, endpoint_id: &str) -> Result<()> {
        let mut endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| BusError::NoRoute(endpoint_id.to_string()))?;
        endpoint.current_connections += 1;
        Ok(())
    }

    /// Release a connection slot, feeding the response-time EMA, error-rate
    /// EMA, breaker and success/failure counters.
    pub fn release(&self, endpoint_id: &str, success: bool, response_time_ms: f64) {
        if let Some(mut endpoint) = self.endpoints.get_mut(endpoint_id) {
            endpoint.current_connections = endpoint.current_connections.saturating_sub(1);

            if response_time_ms > 0.0 {
                endpoint.response_time_ms = if endpoint.response_time_ms == 0.0 {
                    response_time_ms
                } else {
                    RESPONSE_EMA_ALPHA * response_time_ms
                        + (1.0 - RESPONSE_EMA_ALPHA) * endpoint.response_time_ms
                };
            }
            let error_sample = if success { 0.0 } else { 1.0 };
            endpoint.error_rate = RESPONSE_EMA_ALPHA * error_sample
                + (1.0 - RESPONSE_EMA_ALPHA) * endpoint.error_rate;
        }

        self.breakers.on_result(endpoint_id, success);
        self.bump(format!(
            "{}_{endpoint_id}",
            if success { "success" } else { "failure" }
        ));
    }

    fn bump(&self, key: String) {
        *self.counters.entry(key).or_insert(0) += 1;
    }

    // ------------------------------------------------------------------
    // Health probing
    // ------------------------------------------------------------------

    /// Probe every endpoint once, adjusting health scores by bounded
    /// increments clipped to [0, 1].
    pub async fn run_health_checks(&self, probe: &Arc<dyn HealthProbe>) {
        let snapshot: Vec<RouteEndpoint> = self.endpoints.iter().map(|e| e.clone()).collect();
        let timeout = Duration::from_millis(self.config.health_check_timeout_ms);

        for endpoint in snapshot {
            let outcome = match tokio::time::timeout(timeout, probe.probe(&endpoint)).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeOutcome {
                    ok: false,
                    latency_ms: timeout.as_millis() as f64,
                },
            };
            self.apply_probe_outcome(&endpoint.id, outcome);
        }
    }

    fn apply_probe_outcome(&self, endpoint_id: &str, outcome: ProbeOutcome) {
        if let Some(mut endpoint) = self.endpoints.get_mut(endpoint_id) {
            let delta = if !outcome.ok {
                -0.3
            } else if outcome.latency_ms < PROBE_FAST_MS {
                0.1
            } else if outcome.latency_ms > PROBE_SLOW_MS {
                -0.2
            } else {
                0.0
            };
            endpoint.health_score = (endpoint.health_score + delta).clamp(0.0, 1.0);
            endpoint.last_health_check_ms = self.clock.now_ms();

            if endpoint.health_score < 0.3 {
                endpoint.status = EndpointStatus::Degraded;
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the probe cadence and session sweeper.
    pub fn start(self: &Arc<Self>, probe: Option<Arc<dyn HealthProbe>>) -> Result<()> {
        {
            let mut running = self.running.write();
            if *running {
                return Err(BusError::AlreadyRunning);
            }
            *running = true;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if self.config.health_check_enabled {
            if let Some(probe) = probe {
                let router = self.clone();
                let mut rx = shutdown_rx.clone();
                let interval = Duration::from_millis(self.config.health_check_interval_ms.max(10));
                tasks.push(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            _ = rx.changed() => break,
                            _ = tokio::time::sleep(interval) => {}
                        }
                        if *rx.borrow() {
                            break;
                        }
                        router.run_health_checks(&probe).await;
                    }
                }));
            }
        }

        {
            let router = self.clone();
            let mut rx = shutdown_rx;
            tasks.push(tokio::spawn(async move {
                let interval = Duration::from_millis(SESSION_SWEEP_INTERVAL_MS);
                loop {
                    tokio::select! {
                        _ = rx.changed() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if *rx.borrow() {
                        break;
                    }
                    let swept = router.sessions.sweep();
                    if swept > 0 {
                        tracing::debug!(swept, "expired sticky sessions purged");
                    }
                }
            }));
        }

        *self.shutdown.lock() = Some(shutdown_tx);
        *self.tasks.lock() = tasks;
        tracing::info!("smart router started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        {
            let mut running = self.running.write();
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("smart router stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------

    pub fn stats(&self) -> RouterStatsSnapshot {
        let endpoint_health = self
            .endpoints
            .iter()
            .map(|e| {
                (
                    e.key().clone(),
                    EndpointHealthSnapshot {
                        health_score: e.health_score,
                        current_connections: e.current_connections,
                        load_factor: e.load_factor(),
                        status: e.status,
                    },
                )
            })
            .collect();

        RouterStatsSnapshot {
            total_endpoints: self.endpoints.len(),
            active_endpoints: self
                .endpoints
                .iter()
                .filter(|e| e.status == EndpointStatus::Active)
                .count(),
            counters: self
                .counters
                .iter()
                .map(|c| (c.key().clone(), *c.value()))
                .collect(),
            breaker_states: self.breakers.states(),
            session_count: self.sessions.len(),
            endpoint_health,
        }
    }
}

/// Per-endpoint health view in the stats snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointHealthSnapshot {
    pub health_score: f64,
    pub current_connections: u32,
    pub load_factor: f64,
    pub status: EndpointStatus,
}

/// Router statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatsSnapshot {
    pub total_endpoints: usize,
    pub active_endpoints: usize,
    pub counters: HashMap<String, u64>,
    pub breaker_states: HashMap<String, BreakerState>,
    pub session_count: usize,
    pub endpoint_health: HashMap<String, EndpointHealthSnapshot>,
}
