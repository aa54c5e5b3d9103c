//! Partition usage tracking and auto-scaling policy.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Normalization ceilings for the usage ratio.
const FULL_MESSAGE_COUNT: f64 = 1_000_000.0;
const FULL_SIZE_BYTES: f64 = 1024.0 * 1024.0 * 1024.0;
const FULL_THROUGHPUT_PER_SEC: f64 = 10_000.0;

/// Usage weights: message count / size / throughput.
const WEIGHT_MESSAGES: f64 = 0.3;
const WEIGHT_SIZE: f64 = 0.4;
const WEIGHT_THROUGHPUT: f64 = 0.3;

/// Scale-up targets 70% of the threshold after growth.
const TARGET_USAGE_FACTOR: f64 = 0.7;

/// Raw usage telemetry for one partition.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PartitionStats {
    pub message_count: u64,
    pub size_bytes: u64,
    pub throughput_per_sec: f64,
}

/// Tracks per-partition usage ratios and decides scale-ups.
pub struct PartitionManager {
    auto_scaling: bool,
    scale_threshold: f64,
    max_partitions_per_topic: u32,
    usage: DashMap<(String, u32), f64>,
}

impl PartitionManager {
    pub fn new(auto_scaling: bool, scale_threshold: f64, max_partitions_per_topic: u32) -> Self {
        Self {
            auto_scaling,
            scale_threshold,
            max_partitions_per_topic,
            usage: DashMap::new(),
        }
    }

    /// Combine normalized message count, size and throughput into a usage
    /// ratio in [0, 1] and record it.
    pub fn record_usage(&self, topic: &str, partition: u32, stats: PartitionStats) -> f64 {
        let message_ratio = (stats.message_count as f64 / FULL_MESSAGE_COUNT).min(1.0);
        let size_ratio = (stats.size_bytes as f64 / FULL_SIZE_BYTES).min(1.0);
        let throughput_ratio = (stats.throughput_per_sec / FULL_THROUGHPUT_PER_SEC).min(1.0);

        let usage = message_ratio * WEIGHT_MESSAGES
            + size_ratio * WEIGHT_SIZE
            + throughput_ratio * WEIGHT_THROUGHPUT;

        self.usage.insert((topic.to_string(), partition), usage);
        usage
    }

    pub fn usage_of(&self, topic: &str, partition: u32) -> f64 {
        self.usage
            .get(&(topic.to_string(), partition))
            .map(|u| *u)
            .unwrap_or(0.0)
    }

    /// Drop usage records for a deleted topic.
    pub fn forget_topic(&self, topic: &str) {
        self.usage.retain(|(t, _), _| t != topic);
    }

    /// Scale up when auto-scaling is on and more than half of the topic's
    /// tracked partitions exceed the threshold.
    pub fn should_scale(&self, topic: &str) -> bool {
        if !self.auto_scaling {
            return false;
        }

        let mut tracked = 0usize;
        let mut hot = 0usize;
        for entry in self.usage.iter() {
            if entry.key().0 == topic {
                tracked += 1;
                if *entry.value() > self.scale_threshold {
                    hot += 1;
                }
            }
        }

        tracked > 0 && hot * 2 > tracked
    }

    /// Target partition count: enough to bring the average usage down to 70%
    /// of the threshold, capped at double the current count and the per-topic
    /// maximum; strictly greater than current when growth applies.
    pub fn optimal_partitions(&self, topic: &str, current: u32) -> u32 {
        if current >= self.max_partitions_per_topic {
            return current;
        }

        let total_usage: f64 = (0..current).map(|p| self.usage_of(topic, p)).sum();
        if total_usage == 0.0 {
            return current;
        }

        let avg_usage = total_usage / current as f64;
        if avg_usage <= self.scale_threshold {
            return current;
        }

        let target_usage = self.scale_threshold * TARGET_USAGE_FACTOR;
        let suggested = (total_usage / target_usage) as u32;
        let bounded = suggested
            .min(current * 2)
            .min(self.max_partitions_per_topic);

        bounded.max(current + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hot_stats() -> PartitionStats {
        PartitionStats {
            message_count: 1_000_000,
            size_bytes: 1024 * 1024 * 1024,
            throughput_per_sec: 10_000.0,
        }
    }

    #[test]
    fn test_usage_ratio_weights() {
        let manager = PartitionManager::new(true, 0.8, 100);
        // All inputs at their ceilings combine to exactly 1.0.
        assert!((manager.record_usage("t", 0, hot_stats()) - 1.0).abs() < 1e-9);

        // Size alone contributes its 0.4 weight.
        let usage = manager.record_usage(
            "t",
            1,
            PartitionStats {
                message_count: 0,
                size_bytes: 1024 * 1024 * 1024,
                throughput_per_sec: 0.0,
            },
        );
        assert!((usage - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_should_scale_majority_rule() {
        let manager = PartitionManager::new(true, 0.8, 100);
        manager.record_usage("t", 0, hot_stats());
        manager.record_usage("t", 1, PartitionStats::default());
        manager.record_usage("t", 2, PartitionStats::default());
        // 1 of 3 hot: no scale.
        assert!(!manager.should_scale("t"));

        manager.record_usage("t", 1, hot_stats());
        // 2 of 3 hot: scale.
        assert!(manager.should_scale("t"));
    }

    #[test]
    fn test_auto_scaling_disabled() {
        let manager = PartitionManager::new(false, 0.8, 100);
        for p in 0..3 {
            manager.record_usage("t", p, hot_stats());
        }
        assert!(!manager.should_scale("t"));
    }

    #[test]
    fn test_optimal_partitions_bounds() {
        let manager = PartitionManager::new(true, 0.8, 100);
        for p in 0..3 {
            manager.record_usage(
                "t",
                p,
                PartitionStats {
                    message_count: 900_000,
                    size_bytes: 966_367_641, // 0.9 GiB
                    throughput_per_sec: 9_000.0,
                },
            );
        }
        // Each partition reports ~0.9; total 2.7; target 0.56 → suggested 4,
        // within the doubling bound.
        let optimal = manager.optimal_partitions("t", 3);
        assert!(optimal >= 4 && optimal <= 6, "got {optimal}");
    }

    #[test]
    fn test_optimal_partitions_respects_maximum() {
        let manager = PartitionManager::new(true, 0.8, 4);
        for p in 0..4 {
            manager.record_usage("t", p, hot_stats());
        }
        assert_eq!(manager.optimal_partitions("t", 4), 4);
    }

    #[test]
    fn test_cool_topic_does_not_grow() {
        let manager = PartitionManager::new(true, 0.8, 100);
        for p in 0..3 {
            manager.record_usage("t", p, PartitionStats::default());
        }
        assert_eq!(manager.optimal_partitions("t", 3), 3);
    }
}
