//! In-memory substrate and metadata store.
//!
//! Faithful enough for tests and embedded deployments: partition placement
//! is assigned round-robin over the configured brokers, offsets are
//! contiguous per partition, and the ISR view can be shrunk per topic to
//! exercise consistency failures.

use crate::error::{BusError, Result};
use crate::storage::substrate::{
    AckLevel, AppendReceipt, BrokerDescription, LogRecord, LogSubstrate, MetadataStore,
    NewTopicSpec, PartitionDescription, TopicDescription,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

struct MemPartition {
    leader: u32,
    replicas: Vec<u32>,
    isr: Vec<u32>,
    records: Vec<LogRecord>,
}

struct MemTopic {
    partitions: Vec<MemPartition>,
    replication_factor: u32,
    config: HashMap<String, String>,
}

/// In-process replicated-log substrate.
pub struct InMemoryLogSubstrate {
    brokers: Vec<BrokerDescription>,
    topics: DashMap<String, Mutex<MemTopic>>,
}

impl InMemoryLogSubstrate {
    /// Cluster of `broker_count` rackless brokers.
    pub fn new(broker_count: u32) -> Self {
        let brokers = (0..broker_count)
            .map(|id| BrokerDescription {
                id,
                host: format!("node-{id}"),
                port: 9092,
                rack: None,
            })
            .collect();
        Self {
            brokers,
            topics: DashMap::new(),
        }
    }

    /// Cluster with explicit rack labels per broker id.
    pub fn with_racks(racks: Vec<(u32, Option<String>)>) -> Self {
        let brokers = racks
            .into_iter()
            .map(|(id, rack)| BrokerDescription {
                id,
                host: format!("node-{id}"),
                port: 9092,
                rack,
            })
            .collect();
        Self {
            brokers,
            topics: DashMap::new(),
        }
    }

    fn assign_partition(&self, index: u32, replication_factor: u32) -> MemPartition {
        let n = self.brokers.len().max(1) as u32;
        let leader = self.brokers[(index % n) as usize].id;
        let mut replicas = vec![leader];
        for offset in 1..replication_factor.min(n) {
            replicas.push(self.brokers[((index + offset) % n) as usize].id);
        }
        MemPartition {
            leader,
            isr: replicas.clone(),
            replicas,
            records: Vec::new(),
        }
    }

    /// Shrink a partition's ISR view (test hook for consistency failures).
    pub fn set_isr(&self, topic: &str, partition: u32, isr: Vec<u32>) {
        if let Some(entry) = self.topics.get(topic) {
            let mut topic = entry.lock();
            if let Some(p) = topic.partitions.get_mut(partition as usize) {
                p.isr = isr;
            }
        }
    }

    pub fn topic_exists(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }
}

#[async_trait]
impl LogSubstrate for InMemoryLogSubstrate {
    async fn create_topic(&self, spec: NewTopicSpec) -> Result<bool> {
        if self.topics.contains_key(&spec.name) {
            return Ok(false);
        }
        let partitions = (0..spec.partitions)
            .map(|i| self.assign_partition(i, spec.replication_factor))
            .collect();
        self.topics.insert(
            spec.name.clone(),
            Mutex::new(MemTopic {
                partitions,
                replication_factor: spec.replication_factor,
                config: spec.config,
            }),
        );
        Ok(true)
    }

    async fn delete_topic(&self, name: &str) -> Result<()> {
        self.topics.remove(name);
        Ok(())
    }

    async fn create_partitions(&self, name: &str, total_count: u32) -> Result<()> {
        let entry = self
            .topics
            .get(name)
            .ok_or_else(|| BusError::Metadata(format!("unknown topic {name}")))?;
        let mut topic = entry.lock();
        let current = topic.partitions.len() as u32;
        if total_count <= current {
            return Err(BusError::Metadata(format!(
                "partition count {total_count} not greater than current {current}"
            )));
        }
        let rf = topic.replication_factor;
        for i in current..total_count {
            let partition = self.assign_partition(i, rf);
            topic.partitions.push(partition);
        }
        Ok(())
    }

    async fn describe_cluster(&self) -> Result<Vec<BrokerDescription>> {
        Ok(self.brokers.clone())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        Ok(self.topics.iter().map(|e| e.key().clone()).collect())
    }

    async fn describe_topic(&self, name: &str) -> Result<TopicDescription> {
        let entry = self
            .topics
            .get(name)
            .ok_or_else(|| BusError::Metadata(format!("unknown topic {name}")))?;
        let topic = entry.lock();
        Ok(TopicDescription {
            name: name.to_string(),
            partitions: topic
                .partitions
                .iter()
                .enumerate()
                .map(|(i, p)| PartitionDescription {
                    partition: i as u32,
                    leader: p.leader,
                    replicas: p.replicas.clone(),
                    isr: p.isr.clone(),
                })
                .collect(),
        })
    }

    async fn describe_config(&self, name: &str) -> Result<HashMap<String, String>> {
        let entry = self
            .topics
            .get(name)
            .ok_or_else(|| BusError::Metadata(format!("unknown topic {name}")))?;
        let topic = entry.lock();
        Ok(topic.config.clone())
    }

    async fn append(
        &self,
        topic_name: &str,
        partition: Option<u32>,
        record: LogRecord,
        _acks: AckLevel,
    ) -> Result<AppendReceipt> {
        let entry = self
            .topics
            .get(topic_name)
            .ok_or_else(|| BusError::Storage(format!("unknown topic {topic_name}")))?;
        let mut topic = entry.lock();
        let count = topic.partitions.len() as u32;
        let index = partition.unwrap_or(0) % count.max(1);
        let p = topic
            .partitions
            .get_mut(index as usize)
            .ok_or_else(|| BusError::Storage(format!("unknown partition {index}")))?;
        p.records.push(record);
        Ok(AppendReceipt {
            partition: index,
            offset: (p.records.len() - 1) as u64,
            isr_count: p.isr.len() as u32,
            replica_count: p.replicas.len() as u32,
        })
    }

    async fn read(
        &self,
        topic_name: &str,
        partition: u32,
        offset: u64,
        max: usize,
    ) -> Result<Vec<LogRecord>> {
        let entry = self
            .topics
            .get(topic_name)
            .ok_or_else(|| BusError::Storage(format!("unknown topic {topic_name}")))?;
        let topic = entry.lock();
        let p = topic
            .partitions
            .get(partition as usize)
            .ok_or_else(|| BusError::Storage(format!("unknown partition {partition}")))?;
        let start = (offset as usize).min(p.records.len());
        let end = (start + max).min(p.records.len());
        Ok(p.records[start..end].to_vec())
    }
}

/// In-process metadata store.
pub struct InMemoryMetadataStore {
    maps: DashMap<String, HashMap<String, String>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self {
            maps: DashMap::new(),
        }
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_map(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.maps.get(key).map(|m| m.clone()).unwrap_or_default())
    }

    async fn put_map(&self, key: &str, entries: HashMap<String, String>) -> Result<()> {
        let mut map = self.maps.entry(key.to_string()).or_default();
        map.extend(entries);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.maps.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn record(value: &[u8]) -> LogRecord {
        LogRecord {
            key: None,
            value: Bytes::copy_from_slice(value),
            headers: HashMap::new(),
            timestamp_ms: 0,
        }
    }

    fn spec(name: &str, partitions: u32, rf: u32) -> NewTopicSpec {
        NewTopicSpec {
            name: name.to_string(),
            partitions,
            replication_factor: rf,
            config: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_topic_is_idempotent() {
        let substrate = InMemoryLogSubstrate::new(3);
        assert!(substrate.create_topic(spec("alerts", 3, 2)).await.unwrap());
        assert!(!substrate.create_topic(spec("alerts", 3, 2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_placement_spreads_leaders() {
        let substrate = InMemoryLogSubstrate::new(3);
        substrate.create_topic(spec("alerts", 3, 2)).await.unwrap();
        let description = substrate.describe_topic("alerts").await.unwrap();
        let leaders: Vec<u32> = description.partitions.iter().map(|p| p.leader).collect();
        assert_eq!(leaders, vec![0, 1, 2]);
        for p in &description.partitions {
            assert_eq!(p.replicas.len(), 2);
            assert_eq!(p.isr, p.replicas);
            assert!(p.replicas.contains(&p.leader));
        }
    }

    #[tokio::test]
    async fn test_append_read_round_trip() {
        let substrate = InMemoryLogSubstrate::new(1);
        substrate.create_topic(spec("alerts", 1, 1)).await.unwrap();

        for value in [b"a" as &[u8], b"b", b"c"] {
            substrate
                .append("alerts", Some(0), record(value), AckLevel::All)
                .await
                .unwrap();
        }

        let records = substrate.read("alerts", 0, 1, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value.as_ref(), b"b");
    }

    #[tokio::test]
    async fn test_scale_up_only() {
        let substrate = InMemoryLogSubstrate::new(2);
        substrate.create_topic(spec("alerts", 2, 1)).await.unwrap();
        substrate.create_partitions("alerts", 4).await.unwrap();
        let description = substrate.describe_topic("alerts").await.unwrap();
        assert_eq!(description.partitions.len(), 4);

        let err = substrate.create_partitions("alerts", 3).await.unwrap_err();
        assert!(matches!(err, BusError::Metadata(_)));
    }

    #[tokio::test]
    async fn test_metadata_store_round_trip() {
        let store = InMemoryMetadataStore::new();
        let mut entries = HashMap::new();
        entries.insert("message_count".to_string(), "42".to_string());
        store.put_map("topic_stats:alerts", entries).await.unwrap();

        let map = store.get_map("topic_stats:alerts").await.unwrap();
        assert_eq!(map["message_count"], "42");

        store.delete("topic_stats:alerts").await.unwrap();
        assert!(store.get_map("topic_stats:alerts").await.unwrap().is_empty());
    }
}
