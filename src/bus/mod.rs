//! # Bus Coordinator
//!
//! Lifecycle, publish/consume orchestration, topic management and health
//! aggregation over the processor, router, storage and security components.
//!
//! Publish control flow: authorize → size check → build envelope →
//! compress-then-encrypt → submit to the processor → durable append →
//! counters, metrics and audit. Consume is symmetric: authorize → fetch →
//! decrypt-then-decompress → metrics and audit.

pub mod health;
pub mod topics;
pub mod transaction;

pub use health::{ComponentHealth, ComponentStatus, HealthChecker, HealthReport};
pub use topics::{TopicInfo, TopicManager};
pub use transaction::TransactionScope;

use crate::error::{BusError, Result};
use crate::message::{
    MessageCodec, MessageEnvelope, MessagePriority, ATTR_ENCRYPTED, ATTR_SOURCE_NODE,
};
use crate::metrics::{BusMetrics, MetricsSummary};
use crate::processor::{MessageHandler, MessageProcessor, ProcessorConfig};
use crate::router::{
    HealthProbe, RouteEndpoint, RouterConfig, RoutingContext, SmartRouter,
};
use crate::security::{
    AuditEventType, AuditResult, EncryptedPayload, SecurityConfig, SecurityManager, User,
};
use crate::storage::{
    DistributedStorageManager, LogSubstrate, MetadataStore, StorageConfig,
};
use crate::util::{system_clock, SharedClock};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Reserved attribute carrying the transaction correlation id.
pub const ATTR_TRANSACTION_ID: &str = "transaction_id";

// ============================================================================
// Configuration
// ============================================================================

/// Bus lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl BusState {
    pub fn as_str(self) -> &'static str {
        match self {
            BusState::Stopped => "stopped",
            BusState::Starting => "starting",
            BusState::Running => "running",
            BusState::Stopping => "stopping",
            BusState::Error => "error",
        }
    }
}

/// Top-level bus configuration, embedding the per-component configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub service_name: String,
    pub service_version: String,
    /// Generated when absent
    pub node_id: Option<String>,

    pub enable_persistence: bool,
    pub enable_encryption: bool,
    pub enable_health_check: bool,

    pub health_check_interval_ms: u64,
    pub stats_report_interval_ms: u64,

    /// Ceiling applied to consumer-supplied batch sizes
    pub max_consume_batch: usize,

    pub processor: ProcessorConfig,
    pub router: RouterConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service_name: "pulsebus".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            node_id: None,
            enable_persistence: true,
            enable_encryption: true,
            enable_health_check: true,
            health_check_interval_ms: 30_000,
            stats_report_interval_ms: 60_000,
            max_consume_batch: 100,
            processor: ProcessorConfig::default(),
            router: RouterConfig::default(),
            storage: StorageConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Per-publish options.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: MessagePriority,
    pub attributes: HashMap<String, String>,
    pub ip_address: Option<String>,
    pub transaction_id: Option<String>,
}

/// Service identity and configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_name: String,
    pub service_version: String,
    pub node_id: String,
    pub state: BusState,
    pub uptime_ms: u64,
    pub enable_persistence: bool,
    pub enable_encryption: bool,
    pub worker_threads: usize,
    pub topics: Vec<TopicInfo>,
}

// ============================================================================
// Endpoint transport
// ============================================================================

/// Sends a dispatched envelope to a routed endpoint. The actual network
/// transport lives outside the core.
#[async_trait]
pub trait EndpointTransport: Send + Sync {
    async fn send(&self, endpoint: &RouteEndpoint, envelope: &MessageEnvelope) -> Result<()>;
}

/// Worker-side handler: runs topic handler chains, then routes the envelope
/// to a downstream endpoint when a transport is wired and endpoints exist.
struct DispatchHandler {
    topics: Arc<TopicManager>,
    router: Arc<SmartRouter>,
    transport: RwLock<Option<Arc<dyn EndpointTransport>>>,
}

#[async_trait]
impl MessageHandler for DispatchHandler {
    async fn handle(&self, envelope: &MessageEnvelope) -> bool {
        for handler in self.topics.handlers(&envelope.topic) {
            if !handler.handle(envelope).await {
                return false;
            }
        }

        let transport = self.transport.read().clone();
        if let Some(transport) = transport {
            if self.router.endpoint_count() > 0 {
                let context = RoutingContext::default();
                let endpoint = match self.router.route(envelope, None, &context) {
                    Ok(endpoint) => endpoint,
                    Err(e) => {
                        tracing::warn!(topic = %envelope.topic, error = %e, "dispatch routing failed");
                        return false;
                    }
                };
                if self.router.acquire(&endpoint.id).is_err() {
                    return false;
                }
                let start = Instant::now();
                let ok = transport.send(&endpoint, envelope).await.is_ok();
                self.router.release(
                    &endpoint.id,
                    ok,
                    start.elapsed().as_secs_f64() * 1_000.0,
                );
                return ok;
            }
        }
        true
    }
}

// ============================================================================
// Message bus
// ============================================================================

/// The message bus coordinator.
pub struct MessageBus {
    config: BusConfig,
    node_id: String,
    state: Arc<RwLock<BusState>>,
    start_time_ms: Arc<RwLock<u64>>,

    processor: Arc<MessageProcessor>,
    router: Arc<SmartRouter>,
    storage: Arc<DistributedStorageManager>,
    metrics: Arc<BusMetrics>,
    security: Arc<SecurityManager>,
    topics: Arc<TopicManager>,
    checker: HealthChecker,
    dispatch: Arc<DispatchHandler>,
    codec: MessageCodec,

    probe: Mutex<Option<Arc<dyn HealthProbe>>>,
    clock: SharedClock,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageBus {
    pub fn new(
        config: BusConfig,
        substrate: Arc<dyn LogSubstrate>,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> Result<Arc<Self>> {
        Self::with_clock(config, substrate, metadata_store, system_clock())
    }

    pub fn with_clock(
        config: BusConfig,
        substrate: Arc<dyn LogSubstrate>,
        metadata_store: Arc<dyn MetadataStore>,
        clock: SharedClock,
    ) -> Result<Arc<Self>> {
        let node_id = config
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let processor = Arc::new(MessageProcessor::new(config.processor.clone()));
        let router = SmartRouter::with_clock(config.router.clone(), clock.clone());
        let storage = DistributedStorageManager::with_clock(
            config.storage.clone(),
            substrate,
            metadata_store,
            clock.clone(),
        );
        let security = SecurityManager::with_clock(config.security.clone(), clock.clone())?;
        let metrics = Arc::new(BusMetrics::new());
        let topics = Arc::new(TopicManager::new(clock.clone()));

        let dispatch = Arc::new(DispatchHandler {
            topics: topics.clone(),
            router: router.clone(),
            transport: RwLock::new(None),
        });
        processor.add_handler(dispatch.clone());

        // Terminal processor failures surface as failure audits.
        {
            let audit_security = security.clone();
            let audit_metrics = metrics.clone();
            processor.set_dead_letter_hook(Arc::new(move |envelope, reason| {
                audit_metrics.record_publish(&envelope.topic, 0, false);
                audit_security.audit().log_event(
                    AuditEventType::MessagePublish,
                    None,
                    &format!("topic:{}", envelope.topic),
                    "publish",
                    AuditResult::Failure,
                    None,
                    json!({
                        "message_id": envelope.id,
                        "retry_count": envelope.retry_count,
                        "reason": reason,
                    })
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
                );
            }));
        }

        let state = Arc::new(RwLock::new(BusState::Stopped));
        let start_time_ms = Arc::new(RwLock::new(0u64));
        let checker = HealthChecker::new(
            config.service_name.clone(),
            config.service_version.clone(),
            node_id.clone(),
            state.clone(),
            processor.clone(),
            router.clone(),
            storage.clone(),
            security.clone(),
            metrics.clone(),
            clock.clone(),
            start_time_ms.clone(),
        );

        let codec = MessageCodec::new(
            config.processor.compression_kind,
            config.processor.compression_threshold,
        );

        Ok(Arc::new(Self {
            config,
            node_id,
            state,
            start_time_ms,
            processor,
            router,
            storage,
            metrics,
            security,
            topics,
            checker,
            dispatch,
            codec,
            probe: Mutex::new(None),
            clock,
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Install the endpoint health probe; takes effect at `start`.
    pub fn set_health_probe(&self, probe: Arc<dyn HealthProbe>) {
        *self.probe.lock() = Some(probe);
    }

    /// Install the downstream endpoint transport used by the dispatch path.
    pub fn set_transport(&self, transport: Arc<dyn EndpointTransport>) {
        *self.dispatch.transport.write() = Some(transport);
    }

    pub fn router(&self) -> &Arc<SmartRouter> {
        &self.router
    }

    pub fn storage(&self) -> &Arc<DistributedStorageManager> {
        &self.storage
    }

    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    pub fn processor(&self) -> &Arc<MessageProcessor> {
        &self.processor
    }

    pub fn state(&self) -> BusState {
        *self.state.read()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start components in order: processor, router, storage, metrics,
    /// security. Any failure leaves the bus in ERROR.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                BusState::Stopped => {}
                BusState::Running | BusState::Starting => return Err(BusError::AlreadyRunning),
                _ => return Err(BusError::NotRunning(state.as_str().to_string())),
            }
            *state = BusState::Starting;
        }

        let started = async {
            self.processor.start()?;
            self.router.start(self.probe.lock().clone())?;
            self.storage.start().await?;
            // Metrics collector needs no startup.
            self.security.start()?;
            Ok::<(), BusError>(())
        }
        .await;

        if let Err(e) = started {
            *self.state.write() = BusState::Error;
            tracing::error!(error = %e, "bus start failed");
            return Err(e);
        }

        self.spawn_background_loops();
        *self.start_time_ms.write() = self.clock.now_ms();
        *self.state.write() = BusState::Running;
        tracing::info!(node_id = %self.node_id, "message bus running");
        Ok(())
    }

    /// Stop components in reverse order, draining background loops first.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                BusState::Running | BusState::Error => {}
                _ => return Ok(()),
            }
            *state = BusState::Stopping;
        }

        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        self.security.stop().await?;
        self.storage.stop().await?;
        self.router.stop().await?;
        self.processor.stop().await?;

        *self.state.write() = BusState::Stopped;
        tracing::info!("message bus stopped");
        Ok(())
    }

    fn spawn_background_loops(self: &Arc<Self>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if self.config.enable_health_check {
            let bus = self.clone();
            let mut rx = shutdown_rx.clone();
            let interval = Duration::from_millis(self.config.health_check_interval_ms.max(100));
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = rx.changed() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if *rx.borrow() {
                        break;
                    }
                    let report = bus.checker.check();
                    if report.status != ComponentStatus::Healthy {
                        tracing::warn!(status = ?report.status, "bus health degraded");
                    }
                }
            }));
        }

        {
            let bus = self.clone();
            let mut rx = shutdown_rx;
            let interval = Duration::from_millis(self.config.stats_report_interval_ms.max(100));
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = rx.changed() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    if *rx.borrow() {
                        break;
                    }
                    let summary = bus.metrics.summary();
                    tracing::info!(
                        published = summary.messages_published,
                        consumed = summary.messages_consumed,
                        publish_failures = summary.publish_failures,
                        "bus stats"
                    );
                }
            }));
        }

        *self.shutdown.lock() = Some(shutdown_tx);
        *self.tasks.lock() = tasks;
    }

    fn ensure_running(&self) -> Result<()> {
        let state = *self.state.read();
        if state != BusState::Running {
            return Err(BusError::NotRunning(state.as_str().to_string()));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        user: Option<&User>,
    ) -> Result<String> {
        self.publish_with_options(topic, payload, PublishOptions::default(), user)
            .await
    }

    /// Publish one envelope. Returns its message id once the processor has
    /// accepted it and, when persistence is enabled, the log append met the
    /// configured acks.
    pub async fn publish_with_options(
        &self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
        user: Option<&User>,
    ) -> Result<String> {
        self.ensure_running()?;
        let start = Instant::now();
        let payload_len = payload.len();

        match self.publish_inner(topic, payload, &options, user).await {
            Ok(message_id) => {
                self.metrics.record_publish(topic, payload_len, true);
                self.metrics
                    .record_publish_latency_us(start.elapsed().as_secs_f64() * 1_000_000.0);

                let mut details = serde_json::Map::new();
                details.insert("message_id".to_string(), json!(message_id));
                details.insert("priority".to_string(), json!(options.priority.as_str()));
                details.insert("size_bytes".to_string(), json!(payload_len));
                if let Some(txn) = &options.transaction_id {
                    details.insert(ATTR_TRANSACTION_ID.to_string(), json!(txn));
                }
                self.security.audit().log_event(
                    AuditEventType::MessagePublish,
                    user.map(|u| u.id.as_str()),
                    &format!("topic:{topic}"),
                    "publish",
                    AuditResult::Success,
                    options.ip_address.as_deref(),
                    details,
                );
                Ok(message_id)
            }
            Err(e) => {
                self.metrics.record_publish(topic, payload_len, false);
                let mut details = serde_json::Map::new();
                details.insert("error".to_string(), json!(e.to_string()));
                if let Some(txn) = &options.transaction_id {
                    details.insert(ATTR_TRANSACTION_ID.to_string(), json!(txn));
                }
                self.security.audit().log_event(
                    AuditEventType::MessagePublish,
                    user.map(|u| u.id.as_str()),
                    &format!("topic:{topic}"),
                    "publish",
                    AuditResult::Failure,
                    options.ip_address.as_deref(),
                    details,
                );
                Err(e)
            }
        }
    }

    async fn publish_inner(
        &self,
        topic: &str,
        payload: Bytes,
        options: &PublishOptions,
        user: Option<&User>,
    ) -> Result<String> {
        if topic.is_empty() {
            return Err(BusError::InvalidTopic("empty topic name".to_string()));
        }

        if let Some(user) = user {
            self.security.authorize(
                user,
                &format!("topic:{topic}"),
                "write",
                options.ip_address.as_deref(),
            )?;
            self.security.validate_message_size(payload.len())?;
        }

        let mut envelope = MessageEnvelope::new(topic, payload, self.clock.now_ms())
            .with_priority(options.priority);
        envelope.attributes.extend(options.attributes.clone());
        envelope
            .attributes
            .insert(ATTR_SOURCE_NODE.to_string(), self.node_id.clone());
        if let Some(txn) = &options.transaction_id {
            envelope
                .attributes
                .insert(ATTR_TRANSACTION_ID.to_string(), txn.clone());
        }

        // Compress-then-encrypt: the compression flags describe the
        // cleartext inside the ciphertext and survive to consume.
        if self.config.enable_encryption && self.security.encryption_enabled() {
            if let Some(user) = user {
                self.codec.compress_envelope(&mut envelope)?;
                let sealed = self.security.encrypt_payload(&envelope.payload, user)?;
                envelope.payload = Bytes::from(serde_json::to_vec(&sealed)?);
                envelope
                    .attributes
                    .insert(ATTR_ENCRYPTED.to_string(), "true".to_string());
            }
        }

        self.processor.submit(envelope.clone())?;

        if self.config.enable_persistence {
            self.storage.store_message(topic, &envelope).await?;
        }

        self.topics.increment_message_count(topic);
        Ok(envelope.id)
    }

    // ------------------------------------------------------------------
    // Consume
    // ------------------------------------------------------------------

    /// Consume the current batch of stored envelopes for a subscriber.
    /// Returns an empty batch rather than a partial-error batch.
    pub async fn consume(
        &self,
        topic: &str,
        subscriber_id: &str,
        user: Option<&User>,
        max_batch: usize,
    ) -> Result<Vec<MessageEnvelope>> {
        self.ensure_running()?;
        let start = Instant::now();

        match self.consume_inner(topic, subscriber_id, user, max_batch).await {
            Ok(batch) => {
                self.metrics.record_consume(topic, batch.len(), true);
                self.metrics
                    .record_consume_latency_us(start.elapsed().as_secs_f64() * 1_000_000.0);
                self.security.audit().log_event(
                    AuditEventType::MessageConsume,
                    user.map(|u| u.id.as_str()),
                    &format!("topic:{topic}"),
                    "consume",
                    AuditResult::Success,
                    None,
                    json!({"subscriber_id": subscriber_id, "message_count": batch.len()})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                );
                Ok(batch)
            }
            Err(e) => {
                self.metrics.record_consume(topic, 0, false);
                self.security.audit().log_event(
                    AuditEventType::MessageConsume,
                    user.map(|u| u.id.as_str()),
                    &format!("topic:{topic}"),
                    "consume",
                    AuditResult::Failure,
                    None,
                    json!({"subscriber_id": subscriber_id, "error": e.to_string()})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                );
                Err(e)
            }
        }
    }

    async fn consume_inner(
        &self,
        topic: &str,
        subscriber_id: &str,
        user: Option<&User>,
        max_batch: usize,
    ) -> Result<Vec<MessageEnvelope>> {
        if let Some(user) = user {
            self.security
                .authorize(user, &format!("topic:{topic}"), "read", None)?;
        }

        // Unknown topic on subscribe triggers implicit create.
        if !self.topics.contains(topic) {
            self.topics.create_topic(topic, HashMap::new());
        }
        self.topics.subscribe(topic, subscriber_id, None);

        let capped = max_batch.min(self.config.max_consume_batch);
        if capped == 0 {
            return Ok(Vec::new());
        }

        let mut batch = self
            .storage
            .fetch_messages(topic, subscriber_id, capped)
            .await?;

        for envelope in &mut batch {
            if envelope.is_encrypted() {
                if let Some(user) = user {
                    let sealed: EncryptedPayload = serde_json::from_slice(&envelope.payload)
                        .map_err(|e| BusError::DecodeError(format!("encrypted body: {e}")))?;
                    let plaintext = self.security.decrypt_payload(&sealed, user)?;
                    envelope.payload = Bytes::from(plaintext);
                    envelope.attributes.remove(ATTR_ENCRYPTED);
                    // Decrypt-then-decompress.
                    self.codec.decompress_envelope(envelope)?;
                }
            } else if envelope.compressed {
                self.codec.decompress_envelope(envelope)?;
            }
        }

        Ok(batch)
    }

    // ------------------------------------------------------------------
    // Topic management
    // ------------------------------------------------------------------

    pub async fn create_topic(
        &self,
        topic: &str,
        config: Option<HashMap<String, String>>,
        user: Option<&User>,
    ) -> Result<()> {
        self.ensure_running()?;
        if let Some(user) = user {
            self.security
                .authorize(user, &format!("topic:{topic}"), "write", None)?;
        }

        self.topics
            .create_topic(topic, config.clone().unwrap_or_default());
        if self.config.enable_persistence {
            self.storage.create_topic(topic, None, None, config).await?;
        }
        Ok(())
    }

    pub async fn delete_topic(&self, topic: &str, user: Option<&User>) -> Result<()> {
        self.ensure_running()?;
        if let Some(user) = user {
            self.security
                .authorize(user, &format!("topic:{topic}"), "manage", None)?;
        }

        if self.config.enable_persistence {
            self.storage.delete_topic(topic).await?;
        }
        self.topics.delete_topic(topic);
        self.security.revoke_topic_permissions(topic);
        Ok(())
    }

    pub fn subscribe(
        &self,
        topic: &str,
        subscriber_id: &str,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<()> {
        self.ensure_running()?;
        if !self.topics.contains(topic) {
            self.topics.create_topic(topic, HashMap::new());
        }
        self.topics.subscribe(topic, subscriber_id, handler);
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str, subscriber_id: &str) -> Result<()> {
        self.ensure_running()?;
        self.topics.unsubscribe(topic, subscriber_id);
        Ok(())
    }

    pub fn topic_info(&self, topic: &str) -> Option<TopicInfo> {
        self.topics.topic_info(topic)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Run a closure under a transaction scope. On error exit a rollback
    /// audit event is emitted; appended log records are not undone.
    pub async fn message_transaction<T, F, Fut>(&self, user: Option<&User>, f: F) -> Result<T>
    where
        F: FnOnce(TransactionScope) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let scope = TransactionScope::new();
        let transaction_id = scope.transaction_id.clone();
        tracing::debug!(transaction_id = %transaction_id, "message transaction begun");

        match f(scope).await {
            Ok(value) => {
                tracing::debug!(transaction_id = %transaction_id, "message transaction committed");
                Ok(value)
            }
            Err(e) => {
                self.security.audit().log_event(
                    AuditEventType::MessagePublish,
                    user.map(|u| u.id.as_str()),
                    &format!("transaction:{transaction_id}"),
                    "rollback",
                    AuditResult::Failure,
                    None,
                    json!({"error": e.to_string(), "transaction_id": transaction_id})
                        .as_object()
                        .cloned()
                        .unwrap_or_default(),
                );
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn health(&self) -> HealthReport {
        self.checker.check()
    }

    pub fn info(&self) -> ServiceInfo {
        let started = *self.start_time_ms.read();
        ServiceInfo {
            service_name: self.config.service_name.clone(),
            service_version: self.config.service_version.clone(),
            node_id: self.node_id.clone(),
            state: self.state(),
            uptime_ms: if started > 0 {
                self.clock.now_ms().saturating_sub(started)
            } else {
                0
            },
            enable_persistence: self.config.enable_persistence,
            enable_encryption: self.config.enable_encryption,
            worker_threads: self.config.processor.worker_threads,
            topics: self.topics.list_topics(),
        }
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    pub fn security_stats(&self) -> crate::security::SecurityStatsSnapshot {
        self.security.stats()
    }
}
