//! The distributed storage manager proper.

use crate::error::{BusError, Result};
use crate::message::MessageEnvelope;
use crate::storage::consistency::ConsistencyManager;
use crate::storage::partitions::{PartitionManager, PartitionStats};
use crate::storage::replication::ReplicationManager;
use crate::storage::substrate::{
    AppendReceipt, LogRecord, LogSubstrate, MetadataStore, NewTopicSpec,
};
use crate::storage::{BrokerMetadata, StorageConfig, StorageStatus, TopicMetadata};
use crate::util::{system_clock, SharedClock};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

fn stats_key(topic: &str) -> String {
    format!("topic_stats:{topic}")
}

/// Distributed message storage manager.
pub struct DistributedStorageManager {
    config: StorageConfig,
    substrate: Arc<dyn LogSubstrate>,
    metadata_store: Arc<dyn MetadataStore>,
    partition_manager: PartitionManager,
    replication_manager: ReplicationManager,
    consistency: ConsistencyManager,

    topics: DashMap<String, TopicMetadata>,
    brokers: DashMap<u32, BrokerMetadata>,
    /// (topic, subscriber) -> partition read offsets
    consumer_offsets: DashMap<(String, String), HashMap<u32, u64>>,
    /// Previous message counts for throughput derivation
    last_counts: DashMap<String, u64>,

    clock: SharedClock,
    running: RwLock<bool>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DistributedStorageManager {
    pub fn new(
        config: StorageConfig,
        substrate: Arc<dyn LogSubstrate>,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> Arc<Self> {
        Self::with_clock(config, substrate, metadata_store, system_clock())
    }

    pub fn with_clock(
        config: StorageConfig,
        substrate: Arc<dyn LogSubstrate>,
        metadata_store: Arc<dyn MetadataStore>,
        clock: SharedClock,
    ) -> Arc<Self> {
        Arc::new(Self {
            partition_manager: PartitionManager::new(
                config.auto_partition_scaling,
                config.partition_scale_threshold,
                config.max_partitions_per_topic,
            ),
            replication_manager: ReplicationManager::new(config.min_in_sync_replicas),
            consistency: ConsistencyManager::new(
                config.acks,
                config.replication_strategy,
                config.min_in_sync_replicas,
            ),
            substrate,
            metadata_store,
            topics: DashMap::new(),
            brokers: DashMap::new(),
            consumer_offsets: DashMap::new(),
            last_counts: DashMap::new(),
            clock,
            running: RwLock::new(false),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut running = self.running.write();
            if *running {
                return Err(BusError::AlreadyRunning);
            }
            *running = true;
        }

        self.load_metadata().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push(spawn_loop(
            self.clone(),
            shutdown_rx.clone(),
            self.config.health_check_interval_ms,
            LoopKind::Health,
        ));
        tasks.push(spawn_loop(
            self.clone(),
            shutdown_rx.clone(),
            self.config.metrics_collection_interval_ms,
            LoopKind::Metrics,
        ));
        tasks.push(spawn_loop(
            self.clone(),
            shutdown_rx,
            self.config.rebalance_check_interval_ms,
            LoopKind::Rebalance,
        ));

        *self.shutdown.lock() = Some(shutdown_tx);
        *self.tasks.lock() = tasks;
        tracing::info!(
            brokers = self.brokers.len(),
            topics = self.topics.len(),
            "distributed storage manager started"
        );
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
        tracing::info!("distributed storage manager stopped");
        Ok(())
    }

    async fn load_metadata(&self) -> Result<()> {
        let now = self.clock.now_ms();
        let descriptions = self.substrate.describe_cluster().await?;
        for description in descriptions {
            self.brokers
                .entry(description.id)
                .and_modify(|b| {
                    b.last_seen_ms = now;
                    b.status = StorageStatus::Healthy;
                })
                .or_insert_with(|| {
                    BrokerMetadata::new(
                        description.id,
                        description.host.clone(),
                        description.port,
                        description.rack.clone(),
                        now,
                    )
                });
        }

        for name in self.substrate.list_topics().await? {
            if let Err(e) = self.refresh_topic_metadata(&name).await {
                tracing::error!(topic = %name, error = %e, "failed to load topic metadata");
            }
        }
        Ok(())
    }

    /// Re-describe a topic from the substrate and merge into the cache,
    /// preserving counters and creation time.
    pub async fn refresh_topic_metadata(&self, name: &str) -> Result<()> {
        let description = self.substrate.describe_topic(name).await?;
        let config = self.substrate.describe_config(name).await?;
        let stats = self.metadata_store.get_map(&stats_key(name)).await?;
        let now = self.clock.now_ms();

        let replication_factor = description
            .partitions
            .first()
            .map(|p| p.replicas.len() as u32)
            .unwrap_or(0);

        let mut metadata = self
            .topics
            .get(name)
            .map(|m| m.clone())
            .unwrap_or_else(|| TopicMetadata::new(name, 0, replication_factor, now));

        metadata.partitions = description.partitions.len() as u32;
        metadata.replication_factor = replication_factor;
        metadata.config = config;
        metadata.updated_at_ms = now;
        metadata.partition_leaders.clear();
        metadata.partition_replicas.clear();
        metadata.partition_isr.clear();
        for p in &description.partitions {
            metadata.partition_leaders.insert(p.partition, p.leader);
            metadata.partition_replicas.insert(p.partition, p.replicas.clone());
            metadata.partition_isr.insert(p.partition, p.isr.clone());
        }

        if let Some(count) = stats.get("message_count").and_then(|v| v.parse().ok()) {
            metadata.message_count = count;
        }
        if let Some(size) = stats.get("total_size_bytes").and_then(|v| v.parse().ok()) {
            metadata.total_size_bytes = size;
        }
        if let Some(avg) = stats.get("avg_message_size").and_then(|v| v.parse().ok()) {
            metadata.avg_message_size = avg;
        }
        if let Some(rate) = stats.get("throughput_per_sec").and_then(|v| v.parse().ok()) {
            metadata.throughput_per_sec = rate;
        }

        self.topics.insert(name.to_string(), metadata);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Topic lifecycle
    // ------------------------------------------------------------------

    /// Create a topic with merged default config. Idempotent: an existing
    /// topic is success.
    pub async fn create_topic(
        &self,
        name: &str,
        partitions: Option<u32>,
        replication_factor: Option<u32>,
        config: Option<HashMap<String, String>>,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(BusError::InvalidTopic("empty topic name".to_string()));
        }

        let partitions = partitions.unwrap_or(self.config.default_partitions);
        let replication_factor =
            replication_factor.unwrap_or(self.config.default_replication_factor);

        if self.brokers.is_empty() {
            self.load_metadata().await?;
        }
        // Placement feasibility check up front: enough healthy brokers for
        // the replication factor, racks diversified where possible.
        let brokers: Vec<BrokerMetadata> = self.brokers.iter().map(|b| b.clone()).collect();
        self.replication_manager.place_replicas(
            partitions,
            replication_factor,
            &brokers,
            self.clock.now_ms(),
        )?;

        let mut merged = HashMap::new();
        merged.insert(
            "retention.ms".to_string(),
            self.config.default_retention_ms.to_string(),
        );
        merged.insert(
            "cleanup.policy".to_string(),
            self.config.default_cleanup_policy.clone(),
        );
        merged.insert(
            "min.insync.replicas".to_string(),
            self.config.min_in_sync_replicas.to_string(),
        );
        merged.insert(
            "unclean.leader.election.enable".to_string(),
            self.config.unclean_leader_election.to_string(),
        );
        if let Some(overrides) = config {
            merged.extend(overrides);
        }

        let created = self
            .substrate
            .create_topic(NewTopicSpec {
                name: name.to_string(),
                partitions,
                replication_factor,
                config: merged,
            })
            .await?;

        if created {
            tracing::info!(topic = %name, partitions, replication_factor, "topic created");
        } else {
            tracing::debug!(topic = %name, "topic already exists");
        }

        self.refresh_topic_metadata(name).await
    }

    /// Delete a topic and purge its cached and stored statistics.
    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        self.substrate.delete_topic(name).await?;
        self.topics.remove(name);
        self.partition_manager.forget_topic(name);
        self.last_counts.remove(name);
        self.consumer_offsets.retain(|(topic, _), _| topic != name);
        self.metadata_store.delete(&stats_key(name)).await?;
        tracing::info!(topic = %name, "topic deleted");
        Ok(())
    }

    /// Grow a topic's partition count. Scale-up only.
    pub async fn scale_topic_partitions(&self, name: &str, new_count: u32) -> Result<()> {
        let current = self
            .topics
            .get(name)
            .map(|m| m.partitions)
            .ok_or_else(|| BusError::Metadata(format!("unknown topic {name}")))?;

        if new_count <= current {
            return Err(BusError::Metadata(format!(
                "new partition count {new_count} not greater than current {current}"
            )));
        }

        self.substrate.create_partitions(name, new_count).await?;
        self.refresh_topic_metadata(name).await?;
        tracing::info!(topic = %name, from = current, to = new_count, "topic partitions scaled");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Durably append an envelope, enforcing the configured consistency.
    pub async fn store_message(&self, topic: &str, envelope: &MessageEnvelope) -> Result<AppendReceipt> {
        if !self.topics.contains_key(topic) {
            self.create_topic(topic, None, None, None).await?;
        }

        let (partitions, replication_factor) = {
            let metadata = self
                .topics
                .get(topic)
                .ok_or_else(|| BusError::Metadata(format!("unknown topic {topic}")))?;
            (metadata.partitions, metadata.replication_factor)
        };

        let partition = self.consistency.select_partition(
            &envelope.id,
            envelope.explicit_partition(),
            partitions,
        );

        let record = LogRecord {
            key: Some(envelope.id.clone()),
            value: Bytes::from(serde_json::to_vec(envelope)?),
            headers: envelope.attributes.clone(),
            timestamp_ms: envelope.timestamp_ms,
        };

        let receipt = self
            .substrate
            .append(topic, Some(partition), record, self.config.acks)
            .await?;

        self.consistency.verify(&receipt, replication_factor)?;
        self.update_topic_stats(topic, envelope.payload_len()).await;
        Ok(receipt)
    }

    /// Read the next batch for a subscriber, advancing its offsets.
    pub async fn fetch_messages(
        &self,
        topic: &str,
        subscriber_id: &str,
        max_batch: usize,
    ) -> Result<Vec<MessageEnvelope>> {
        let partitions = match self.topics.get(topic) {
            Some(metadata) => metadata.partitions,
            None => return Ok(Vec::new()),
        };

        let key = (topic.to_string(), subscriber_id.to_string());
        let mut offsets = self
            .consumer_offsets
            .get(&key)
            .map(|m| m.clone())
            .unwrap_or_default();

        let mut batch = Vec::new();
        for partition in 0..partitions {
            if batch.len() >= max_batch {
                break;
            }
            let offset = offsets.get(&partition).copied().unwrap_or(0);
            let records = self
                .substrate
                .read(topic, partition, offset, max_batch - batch.len())
                .await?;
            let read = records.len() as u64;
            for record in records {
                match serde_json::from_slice::<MessageEnvelope>(&record.value) {
                    Ok(envelope) => batch.push(envelope),
                    Err(e) => {
                        tracing::error!(topic = %topic, partition, error = %e, "undecodable stored record skipped");
                    }
                }
            }
            offsets.insert(partition, offset + read);
        }

        self.consumer_offsets.insert(key, offsets);
        Ok(batch)
    }

    async fn update_topic_stats(&self, topic: &str, payload_len: usize) {
        let snapshot = {
            let mut metadata = match self.topics.get_mut(topic) {
                Some(metadata) => metadata,
                None => return,
            };
            metadata.message_count += 1;
            metadata.total_size_bytes += payload_len as u64;
            metadata.avg_message_size =
                metadata.total_size_bytes as f64 / metadata.message_count as f64;
            metadata.updated_at_ms = self.clock.now_ms();
            (
                metadata.message_count,
                metadata.total_size_bytes,
                metadata.avg_message_size,
            )
        };

        let mut entries = HashMap::new();
        entries.insert("message_count".to_string(), snapshot.0.to_string());
        entries.insert("total_size_bytes".to_string(), snapshot.1.to_string());
        entries.insert("avg_message_size".to_string(), snapshot.2.to_string());
        entries.insert(
            "last_updated".to_string(),
            self.clock.now_secs_f64().to_string(),
        );
        if let Err(e) = self.metadata_store.put_map(&stats_key(topic), entries).await {
            tracing::error!(topic = %topic, error = %e, "failed to persist topic stats");
        }
    }

    // ------------------------------------------------------------------
    // Background work units (also exposed for tests)
    // ------------------------------------------------------------------

    /// One health pass: refresh broker liveness, then evaluate per-topic
    /// status from ISR coverage and leader health.
    pub async fn run_health_check(&self) {
        let now = self.clock.now_ms();

        match self.substrate.describe_cluster().await {
            Ok(descriptions) => {
                let live: Vec<u32> = descriptions.iter().map(|b| b.id).collect();
                for description in descriptions {
                    self.brokers
                        .entry(description.id)
                        .and_modify(|b| {
                            b.last_seen_ms = now;
                            if b.status == StorageStatus::Unavailable {
                                b.status = StorageStatus::Healthy;
                            }
                        })
                        .or_insert_with(|| {
                            BrokerMetadata::new(
                                description.id,
                                description.host.clone(),
                                description.port,
                                description.rack.clone(),
                                now,
                            )
                        });
                }
                for mut broker in self.brokers.iter_mut() {
                    if !live.contains(&broker.id)
                        && now.saturating_sub(broker.last_seen_ms) > super::BROKER_STALE_MS
                    {
                        broker.status = StorageStatus::Unavailable;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "cluster describe failed during health check");
            }
        }

        let names: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        for name in names {
            self.evaluate_topic_health(&name, now);
        }
    }

    fn evaluate_topic_health(&self, name: &str, now_ms: u64) {
        let mut metadata = match self.topics.get_mut(name) {
            Some(metadata) => metadata,
            None => return,
        };

        let mut unhealthy = 0u32;
        for (partition, isr) in &metadata.partition_isr {
            let thin_isr = (isr.len() as u32) < self.config.min_in_sync_replicas;
            let sick_leader = metadata
                .partition_leaders
                .get(partition)
                .and_then(|leader| self.brokers.get(leader))
                .map(|b| !b.is_healthy(now_ms))
                .unwrap_or(true);
            if thin_isr || sick_leader {
                unhealthy += 1;
            }
        }

        metadata.status = if unhealthy == 0 {
            StorageStatus::Healthy
        } else if (unhealthy as f64) < metadata.partitions as f64 * 0.3 {
            StorageStatus::Degraded
        } else {
            StorageStatus::Unavailable
        };
    }

    /// One metrics pass: derive throughput from message-count deltas and
    /// spread topic totals over partitions as usage telemetry.
    pub async fn collect_metrics(&self, interval_secs: f64) {
        let names: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        for name in names {
            let (partitions, count, size) = match self.topics.get(&name) {
                Some(m) => (m.partitions, m.message_count, m.total_size_bytes),
                None => continue,
            };

            let last = self.last_counts.get(&name).map(|c| *c).unwrap_or(0);
            let throughput = if interval_secs > 0.0 {
                (count.saturating_sub(last)) as f64 / interval_secs
            } else {
                0.0
            };
            self.last_counts.insert(name.clone(), count);

            if let Some(mut metadata) = self.topics.get_mut(&name) {
                metadata.throughput_per_sec = throughput;
            }

            let per = partitions.max(1) as u64;
            for partition in 0..partitions {
                self.partition_manager.record_usage(
                    &name,
                    partition,
                    PartitionStats {
                        message_count: count / per,
                        size_bytes: size / per,
                        throughput_per_sec: throughput / per as f64,
                    },
                );
            }
        }
    }

    /// One rebalance pass: apply due partition scale-ups and surface
    /// replica-rebalance decisions. Returns the topics that were scaled.
    pub async fn run_rebalance_check(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let brokers: Vec<BrokerMetadata> = self.brokers.iter().map(|b| b.clone()).collect();
        let names: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        let mut scaled = Vec::new();

        for name in names {
            let metadata = match self.topics.get(&name) {
                Some(m) => m.clone(),
                None => continue,
            };

            if self.partition_manager.should_scale(&name) {
                let optimal = self
                    .partition_manager
                    .optimal_partitions(&name, metadata.partitions);
                if optimal > metadata.partitions {
                    tracing::info!(
                        topic = %name,
                        from = metadata.partitions,
                        to = optimal,
                        "partition scale-up due"
                    );
                    match self.scale_topic_partitions(&name, optimal).await {
                        Ok(()) => scaled.push(name.clone()),
                        Err(e) => {
                            tracing::error!(topic = %name, error = %e, "partition scale-up failed")
                        }
                    }
                }
            }

            if self
                .replication_manager
                .needs_rebalance(&metadata, &brokers, now)
            {
                // Decision surface only; execution is substrate-specific.
                tracing::warn!(topic = %name, "replica rebalance required");
            }
        }

        scaled
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Inject usage telemetry for a partition (also fed by the metrics loop).
    pub fn record_partition_usage(&self, topic: &str, partition: u32, stats: PartitionStats) {
        self.partition_manager.record_usage(topic, partition, stats);
    }

    pub fn update_broker_telemetry(&self, broker_id: u32, cpu_pct: f64, mem_pct: f64, disk_pct: f64) {
        if let Some(mut broker) = self.brokers.get_mut(&broker_id) {
            broker.cpu_pct = cpu_pct;
            broker.mem_pct = mem_pct;
            broker.disk_pct = disk_pct;
            broker.last_seen_ms = self.clock.now_ms();
        }
    }

    pub fn get_topic_metadata(&self, name: &str) -> Option<TopicMetadata> {
        self.topics.get(name).map(|m| m.clone())
    }

    pub fn get_broker_metadata(&self, broker_id: u32) -> Option<BrokerMetadata> {
        self.brokers.get(&broker_id).map(|b| b.clone())
    }

    /// Composite storage status for the health aggregator.
    pub fn status(&self) -> StorageStatus {
        let now = self.clock.now_ms();
        if !self.brokers.is_empty() && !self.brokers.iter().any(|b| b.is_healthy(now)) {
            return StorageStatus::Unavailable;
        }
        let mut degraded = false;
        for topic in self.topics.iter() {
            match topic.status {
                StorageStatus::Unavailable => return StorageStatus::Unavailable,
                StorageStatus::Degraded => degraded = true,
                _ => {}
            }
        }
        if degraded {
            StorageStatus::Degraded
        } else {
            StorageStatus::Healthy
        }
    }

    pub fn stats(&self) -> StorageStatsSnapshot {
        let now = self.clock.now_ms();
        let healthy_brokers = self.brokers.iter().filter(|b| b.is_healthy(now)).count();
        let healthy_topics = self
            .topics
            .iter()
            .filter(|t| t.status == StorageStatus::Healthy)
            .count();
        let total_messages: u64 = self.topics.iter().map(|t| t.message_count).sum();
        let total_size: u64 = self.topics.iter().map(|t| t.total_size_bytes).sum();

        StorageStatsSnapshot {
            total_brokers: self.brokers.len(),
            healthy_brokers,
            total_topics: self.topics.len(),
            healthy_topics,
            total_messages,
            total_size_bytes: total_size,
            avg_message_size: total_size as f64 / total_messages.max(1) as f64,
            topics: self
                .topics
                .iter()
                .map(|t| (t.key().clone(), t.value().clone()))
                .collect(),
            brokers: self
                .brokers
                .iter()
                .map(|b| (b.id, b.value().clone()))
                .collect(),
        }
    }
}

/// Aggregate storage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatsSnapshot {
    pub total_brokers: usize,
    pub healthy_brokers: usize,
    pub total_topics: usize,
    pub healthy_topics: usize,
    pub total_messages: u64,
    pub total_size_bytes: u64,
    pub avg_message_size: f64,
    pub topics: HashMap<String, TopicMetadata>,
    pub brokers: HashMap<u32, BrokerMetadata>,
}

// ============================================================================
// Background loop plumbing
// ============================================================================

enum LoopKind {
    Health,
    Metrics,
    Rebalance,
}

fn spawn_loop(
    manager: Arc<DistributedStorageManager>,
    mut shutdown: watch::Receiver<bool>,
    interval_ms: u64,
    kind: LoopKind,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_millis(interval_ms.max(10));
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            match kind {
                LoopKind::Health => manager.run_health_check().await,
                LoopKind::Metrics => manager.collect_metrics(interval.as_secs_f64()).await,
                LoopKind::Rebalance => {
                    manager.run_rebalance_check().await;
                }
            }
        }
    })
}
