//! Replicated-log substrate and metadata-store interfaces.
//!
//! The core never talks to a broker cluster directly; everything durable goes
//! through these traits. Production deployments wire a real log cluster and a
//! key-value store; tests and embedded mode use the in-memory twins.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Required acknowledgement level for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckLevel {
    /// Fire-and-forget (`acks=0`)
    None,
    /// Leader acknowledgement only (`acks=1`)
    Leader,
    /// Leader waits for the full ISR (`acks=all`)
    All,
}

/// Topic creation request.
#[derive(Debug, Clone)]
pub struct NewTopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
    pub config: HashMap<String, String>,
}

/// One broker as reported by the substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerDescription {
    pub id: u32,
    pub host: String,
    pub port: u16,
    pub rack: Option<String>,
}

/// One partition's placement as reported by the substrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDescription {
    pub partition: u32,
    pub leader: u32,
    pub replicas: Vec<u32>,
    pub isr: Vec<u32>,
}

/// A topic's full placement description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDescription {
    pub name: String,
    pub partitions: Vec<PartitionDescription>,
}

/// One record in a partition log.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub key: Option<String>,
    pub value: Bytes,
    pub headers: HashMap<String, String>,
    pub timestamp_ms: u64,
}

/// Acknowledged append position plus the replica view at append time.
#[derive(Debug, Clone, Copy)]
pub struct AppendReceipt {
    pub partition: u32,
    pub offset: u64,
    pub isr_count: u32,
    pub replica_count: u32,
}

/// Replicated-log cluster client.
#[async_trait]
pub trait LogSubstrate: Send + Sync {
    /// Create a topic. Returns `false` when the topic already existed (the
    /// manager treats that as idempotent success).
    async fn create_topic(&self, spec: NewTopicSpec) -> Result<bool>;

    async fn delete_topic(&self, name: &str) -> Result<()>;

    /// Grow a topic to `total_count` partitions. Scale-up only.
    async fn create_partitions(&self, name: &str, total_count: u32) -> Result<()>;

    async fn describe_cluster(&self) -> Result<Vec<BrokerDescription>>;

    async fn list_topics(&self) -> Result<Vec<String>>;

    async fn describe_topic(&self, name: &str) -> Result<TopicDescription>;

    async fn describe_config(&self, name: &str) -> Result<HashMap<String, String>>;

    /// Append a record, honoring an explicit partition when given.
    async fn append(
        &self,
        topic: &str,
        partition: Option<u32>,
        record: LogRecord,
        acks: AckLevel,
    ) -> Result<AppendReceipt>;

    /// Read up to `max` records from `offset` in one partition.
    async fn read(&self, topic: &str, partition: u32, offset: u64, max: usize)
        -> Result<Vec<LogRecord>>;
}

/// Key-value metadata store for topic statistics (Redis in the original
/// deployment).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_map(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn put_map(&self, key: &str, entries: HashMap<String, String>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}
