//! # Distributed Storage Manager
//!
//! Owns topic lifecycle over a replicated-log substrate: create/delete,
//! per-partition replica placement, usage-driven partition scaling, write
//! consistency enforcement, and cluster health tracking. The substrate and
//! the metadata store are external collaborators behind traits; an in-memory
//! implementation ships for tests and embedded deployments.

pub mod consistency;
pub mod manager;
pub mod memory;
pub mod partitions;
pub mod replication;
pub mod substrate;

pub use consistency::ConsistencyManager;
pub use manager::{DistributedStorageManager, StorageStatsSnapshot};
pub use memory::{InMemoryLogSubstrate, InMemoryMetadataStore};
pub use partitions::{PartitionManager, PartitionStats};
pub use replication::ReplicationManager;
pub use substrate::{
    AckLevel, AppendReceipt, BrokerDescription, LogRecord, LogSubstrate, MetadataStore,
    NewTopicSpec, PartitionDescription, TopicDescription,
};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Broker heartbeat staleness bound for health evaluation.
pub const BROKER_STALE_MS: u64 = 60_000;

// ============================================================================
// Configuration
// ============================================================================

/// Replica verification strategy applied after an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationStrategy {
    Sync,
    Async,
    Quorum,
}

/// Storage manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub default_partitions: u32,
    pub default_replication_factor: u32,
    pub default_retention_ms: u64,
    pub default_cleanup_policy: String,

    /// Required acknowledgements for appends
    pub acks: AckLevel,

    pub health_check_interval_ms: u64,
    pub metrics_collection_interval_ms: u64,
    pub rebalance_check_interval_ms: u64,

    pub auto_partition_scaling: bool,
    /// Per-partition usage ratio above which a partition counts as hot
    pub partition_scale_threshold: f64,
    pub max_partitions_per_topic: u32,

    pub replication_strategy: ReplicationStrategy,
    pub min_in_sync_replicas: u32,
    pub unclean_leader_election: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_partitions: 3,
            default_replication_factor: 2,
            default_retention_ms: 604_800_000, // 7 days
            default_cleanup_policy: "delete".to_string(),
            acks: AckLevel::All,
            health_check_interval_ms: 30_000,
            metrics_collection_interval_ms: 60_000,
            rebalance_check_interval_ms: 300_000,
            auto_partition_scaling: true,
            partition_scale_threshold: 0.8,
            max_partitions_per_topic: 100,
            replication_strategy: ReplicationStrategy::Quorum,
            min_in_sync_replicas: 1,
            unclean_leader_election: false,
        }
    }
}

// ============================================================================
// Metadata records
// ============================================================================

/// Storage-side health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStatus {
    Healthy,
    Degraded,
    Unavailable,
    Maintenance,
}

/// Cached record of one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
    pub config: HashMap<String, String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub status: StorageStatus,

    /// partition -> leader broker id
    pub partition_leaders: HashMap<u32, u32>,
    /// partition -> replica broker ids
    pub partition_replicas: HashMap<u32, Vec<u32>>,
    /// partition -> in-sync replica ids
    pub partition_isr: HashMap<u32, Vec<u32>>,

    pub message_count: u64,
    pub total_size_bytes: u64,
    pub avg_message_size: f64,
    pub throughput_per_sec: f64,
}

impl TopicMetadata {
    pub fn new(name: impl Into<String>, partitions: u32, replication_factor: u32, now_ms: u64) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            config: HashMap::new(),
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            status: StorageStatus::Healthy,
            partition_leaders: HashMap::new(),
            partition_replicas: HashMap::new(),
            partition_isr: HashMap::new(),
            message_count: 0,
            total_size_bytes: 0,
            avg_message_size: 0.0,
            throughput_per_sec: 0.0,
        }
    }
}

/// Cached record of one storage broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMetadata {
    pub id: u32,
    pub host: String,
    pub port: u16,
    pub rack: Option<String>,
    pub status: StorageStatus,
    pub last_seen_ms: u64,

    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,

    pub leader_partitions: HashSet<(String, u32)>,
    pub replica_partitions: HashSet<(String, u32)>,
}

impl BrokerMetadata {
    pub fn new(id: u32, host: impl Into<String>, port: u16, rack: Option<String>, now_ms: u64) -> Self {
        Self {
            id,
            host: host.into(),
            port,
            rack,
            status: StorageStatus::Healthy,
            last_seen_ms: now_ms,
            cpu_pct: 0.0,
            mem_pct: 0.0,
            disk_pct: 0.0,
            leader_partitions: HashSet::new(),
            replica_partitions: HashSet::new(),
        }
    }

    /// `(cpu + mem + disk) / 3`
    pub fn load_score(&self) -> f64 {
        (self.cpu_pct + self.mem_pct + self.disk_pct) / 3.0
    }

    /// Healthy iff status is HEALTHY, the heartbeat is fresh, and resource
    /// usage is under the hard ceilings.
    pub fn is_healthy(&self, now_ms: u64) -> bool {
        self.status == StorageStatus::Healthy
            && now_ms.saturating_sub(self.last_seen_ms) < BROKER_STALE_MS
            && self.cpu_pct < 90.0
            && self.mem_pct < 90.0
            && self.disk_pct < 85.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_health_gates() {
        let mut broker = BrokerMetadata::new(1, "node-a", 9092, None, 1_000);
        assert!(broker.is_healthy(1_000));

        broker.cpu_pct = 95.0;
        assert!(!broker.is_healthy(1_000));
        broker.cpu_pct = 10.0;

        broker.disk_pct = 85.0;
        assert!(!broker.is_healthy(1_000));
        broker.disk_pct = 50.0;

        // Stale heartbeat.
        assert!(!broker.is_healthy(1_000 + BROKER_STALE_MS));

        broker.status = StorageStatus::Maintenance;
        assert!(!broker.is_healthy(1_000));
    }

    #[test]
    fn test_load_score_average() {
        let mut broker = BrokerMetadata::new(1, "node-a", 9092, None, 0);
        broker.cpu_pct = 30.0;
        broker.mem_pct = 60.0;
        broker.disk_pct = 90.0;
        assert!((broker.load_score() - 60.0).abs() < f64::EPSILON);
    }
}
