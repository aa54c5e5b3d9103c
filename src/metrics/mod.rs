//! # Bus Metrics
//!
//! Lightweight in-process counters for the coordinator: publish/consume
//! totals, byte counters, failure counts, latency EMAs and a per-topic
//! breakdown, snapshotted for `metrics_summary()`.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

const LATENCY_EMA_ALPHA: f64 = 0.1;

#[derive(Default)]
struct TopicCounters {
    published: AtomicU64,
    consumed: AtomicU64,
    failures: AtomicU64,
    bytes: AtomicU64,
}

/// Bus-level metrics collector.
pub struct BusMetrics {
    published: AtomicU64,
    consumed: AtomicU64,
    publish_failures: AtomicU64,
    consume_failures: AtomicU64,
    bytes_published: AtomicU64,
    publish_latency_us: AtomicU64,
    consume_latency_us: AtomicU64,
    topics: DashMap<String, TopicCounters>,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            consume_failures: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
            publish_latency_us: AtomicU64::new(0f64.to_bits()),
            consume_latency_us: AtomicU64::new(0f64.to_bits()),
            topics: DashMap::new(),
        }
    }

    pub fn record_publish(&self, topic: &str, bytes: usize, success: bool) {
        let counters = self.topics.entry(topic.to_string()).or_default();
        if success {
            self.published.fetch_add(1, Ordering::Relaxed);
            self.bytes_published.fetch_add(bytes as u64, Ordering::Relaxed);
            counters.published.fetch_add(1, Ordering::Relaxed);
            counters.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        } else {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_consume(&self, topic: &str, messages: usize, success: bool) {
        let counters = self.topics.entry(topic.to_string()).or_default();
        if success {
            self.consumed.fetch_add(messages as u64, Ordering::Relaxed);
            counters.consumed.fetch_add(messages as u64, Ordering::Relaxed);
        } else {
            self.consume_failures.fetch_add(1, Ordering::Relaxed);
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_publish_latency_us(&self, elapsed_us: f64) {
        ema(&self.publish_latency_us, elapsed_us);
    }

    pub fn record_consume_latency_us(&self, elapsed_us: f64) {
        ema(&self.consume_latency_us, elapsed_us);
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            messages_published: self.published.load(Ordering::Relaxed),
            messages_consumed: self.consumed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            consume_failures: self.consume_failures.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            avg_publish_latency_us: f64::from_bits(self.publish_latency_us.load(Ordering::Relaxed)),
            avg_consume_latency_us: f64::from_bits(self.consume_latency_us.load(Ordering::Relaxed)),
            topics: self
                .topics
                .iter()
                .map(|entry| {
                    (
                        entry.key().clone(),
                        TopicMetricsSnapshot {
                            published: entry.published.load(Ordering::Relaxed),
                            consumed: entry.consumed.load(Ordering::Relaxed),
                            failures: entry.failures.load(Ordering::Relaxed),
                            bytes: entry.bytes.load(Ordering::Relaxed),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl Default for BusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn ema(cell: &AtomicU64, sample: f64) {
    let current = f64::from_bits(cell.load(Ordering::Relaxed));
    let next = if current == 0.0 {
        sample
    } else {
        LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * current
    };
    cell.store(next.to_bits(), Ordering::Relaxed);
}

/// Per-topic counter snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetricsSnapshot {
    pub published: u64,
    pub consumed: u64,
    pub failures: u64,
    pub bytes: u64,
}

/// Bus metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub messages_published: u64,
    pub messages_consumed: u64,
    pub publish_failures: u64,
    pub consume_failures: u64,
    pub bytes_published: u64,
    pub avg_publish_latency_us: f64,
    pub avg_consume_latency_us: f64,
    pub topics: HashMap<String, TopicMetricsSnapshot>,
}
