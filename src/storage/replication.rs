//! Replica placement and rebalance decisions.

use crate::error::{BusError, Result};
use crate::storage::{BrokerMetadata, TopicMetadata};
use std::collections::HashMap;

/// Broker partition-count spread beyond which placement counts as skewed,
/// as a fraction of the healthy broker count.
const SPREAD_FACTOR: f64 = 0.3;

/// Computes replica placement and rebalance decisions. Rebalance execution
/// is substrate-specific; only the decision surface lives here.
pub struct ReplicationManager {
    min_in_sync_replicas: u32,
}

impl ReplicationManager {
    pub fn new(min_in_sync_replicas: u32) -> Self {
        Self {
            min_in_sync_replicas,
        }
    }

    /// Place `replication_factor` replicas for each partition over the
    /// healthy brokers, preferring rack diversity for the followers.
    ///
    /// Leaders rotate over the healthy brokers sorted by ascending load;
    /// followers prefer brokers on a different rack than the leader, lowest
    /// load first, falling back to same-rack brokers when rack-diverse
    /// candidates run out.
    pub fn place_replicas(
        &self,
        partitions: u32,
        replication_factor: u32,
        brokers: &[BrokerMetadata],
        now_ms: u64,
    ) -> Result<HashMap<u32, Vec<u32>>> {
        let mut healthy: Vec<&BrokerMetadata> =
            brokers.iter().filter(|b| b.is_healthy(now_ms)).collect();

        if (healthy.len() as u32) < replication_factor {
            return Err(BusError::InsufficientBrokers {
                healthy: healthy.len(),
                required: replication_factor as usize,
            });
        }

        healthy.sort_by(|a, b| {
            a.load_score()
                .partial_cmp(&b.load_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut assignment = HashMap::new();
        for partition in 0..partitions {
            let leader = healthy[(partition as usize) % healthy.len()];
            let mut replicas = vec![leader.id];

            let mut candidates: Vec<&&BrokerMetadata> = healthy
                .iter()
                .filter(|b| b.id != leader.id && b.rack != leader.rack)
                .collect();
            let same_rack: Vec<&&BrokerMetadata> = healthy
                .iter()
                .filter(|b| b.id != leader.id && b.rack == leader.rack)
                .collect();
            candidates.extend(same_rack);

            for follower in candidates
                .into_iter()
                .take(replication_factor.saturating_sub(1) as usize)
            {
                replicas.push(follower.id);
            }

            assignment.insert(partition, replicas);
        }

        Ok(assignment)
    }

    /// A topic needs rebalancing when the healthy broker pool is too small
    /// for its replication factor, any partition's ISR is under the minimum,
    /// or the broker partition counts are badly skewed.
    pub fn needs_rebalance(
        &self,
        topic: &TopicMetadata,
        brokers: &[BrokerMetadata],
        now_ms: u64,
    ) -> bool {
        let healthy_count = brokers.iter().filter(|b| b.is_healthy(now_ms)).count();

        if (healthy_count as u32) < topic.replication_factor {
            return true;
        }

        if topic
            .partition_isr
            .values()
            .any(|isr| (isr.len() as u32) < self.min_in_sync_replicas)
        {
            return true;
        }

        let mut counts: HashMap<u32, usize> = HashMap::new();
        for replicas in topic.partition_replicas.values() {
            for broker_id in replicas {
                *counts.entry(*broker_id).or_default() += 1;
            }
        }
        if let (Some(max), Some(min)) = (counts.values().max(), counts.values().min()) {
            if (max - min) as f64 > healthy_count as f64 * SPREAD_FACTOR {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageStatus;

    fn broker(id: u32, rack: Option<&str>, load: f64) -> BrokerMetadata {
        let mut b = BrokerMetadata::new(id, format!("node-{id}"), 9092, rack.map(String::from), 0);
        b.cpu_pct = load;
        b.mem_pct = load;
        b.disk_pct = load;
        b
    }

    #[test]
    fn test_placement_prefers_rack_diversity() {
        let brokers = vec![
            broker(0, Some("rack-a"), 10.0),
            broker(1, Some("rack-a"), 20.0),
            broker(2, Some("rack-b"), 30.0),
        ];
        let manager = ReplicationManager::new(1);
        let assignment = manager.place_replicas(1, 2, &brokers, 0).unwrap();

        // Lowest-load broker 0 leads partition 0; its follower comes from
        // the other rack despite higher load.
        assert_eq!(assignment[&0], vec![0, 2]);
    }

    #[test]
    fn test_placement_falls_back_to_same_rack() {
        let brokers = vec![broker(0, Some("rack-a"), 10.0), broker(1, Some("rack-a"), 20.0)];
        let manager = ReplicationManager::new(1);
        let assignment = manager.place_replicas(1, 2, &brokers, 0).unwrap();
        assert_eq!(assignment[&0], vec![0, 1]);
    }

    #[test]
    fn test_leaders_rotate_by_load_order() {
        let brokers = vec![broker(0, None, 30.0), broker(1, None, 10.0), broker(2, None, 20.0)];
        let manager = ReplicationManager::new(1);
        let assignment = manager.place_replicas(3, 1, &brokers, 0).unwrap();
        // Sorted by load: 1, 2, 0.
        assert_eq!(assignment[&0], vec![1]);
        assert_eq!(assignment[&1], vec![2]);
        assert_eq!(assignment[&2], vec![0]);
    }

    #[test]
    fn test_insufficient_brokers_rejected() {
        let mut sick = broker(0, None, 10.0);
        sick.status = StorageStatus::Unavailable;
        let brokers = vec![sick, broker(1, None, 10.0)];
        let manager = ReplicationManager::new(1);
        let err = manager.place_replicas(1, 2, &brokers, 0).unwrap_err();
        assert!(matches!(err, BusError::InsufficientBrokers { healthy: 1, required: 2 }));
    }

    #[test]
    fn test_rebalance_on_thin_isr() {
        let brokers = vec![broker(0, None, 10.0), broker(1, None, 10.0)];
        let manager = ReplicationManager::new(2);

        let mut topic = TopicMetadata::new("t", 1, 2, 0);
        topic.partition_isr.insert(0, vec![0]);
        topic.partition_replicas.insert(0, vec![0, 1]);
        assert!(manager.needs_rebalance(&topic, &brokers, 0));

        topic.partition_isr.insert(0, vec![0, 1]);
        assert!(!manager.needs_rebalance(&topic, &brokers, 0));
    }

    #[test]
    fn test_rebalance_on_broker_loss() {
        let brokers = vec![broker(0, None, 10.0)];
        let manager = ReplicationManager::new(1);
        let topic = TopicMetadata::new("t", 1, 2, 0);
        assert!(manager.needs_rebalance(&topic, &brokers, 0));
    }

    #[test]
    fn test_rebalance_on_skewed_spread() {
        let brokers: Vec<_> = (0..4).map(|id| broker(id, None, 10.0)).collect();
        let manager = ReplicationManager::new(1);

        let mut topic = TopicMetadata::new("t", 4, 1, 0);
        for p in 0..4 {
            topic.partition_isr.insert(p, vec![0]);
            // Three partitions on broker 0, one on broker 1:
            // spread 3 - 1 = 2 > 4 * 0.3.
            topic.partition_replicas.insert(p, vec![if p == 3 { 1 } else { 0 }]);
        }
        assert!(manager.needs_rebalance(&topic, &brokers, 0));
    }
}
