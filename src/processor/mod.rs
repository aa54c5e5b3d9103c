//! # Priority-Aware Message Processor
//!
//! Absorbs publish traffic into four bounded per-priority queues, fans out to
//! cooperative worker tasks, batches opportunistically, and orchestrates
//! retries with exponential backoff. Backpressure is producer-visible: the
//! queues never block on offer, a full queue surfaces `QueueFull` to the
//! caller.

pub mod batch;
pub mod engine;
pub mod queues;

pub use batch::{BatchAccumulator, BatchFlushOutcome};
pub use engine::{DeadLetterHook, MessageProcessor};
pub use queues::PriorityQueues;

use crate::message::{CompressionKind, MessageEnvelope};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

// ============================================================================
// Configuration
// ============================================================================

/// Message processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Batch flush size
    pub batch_size: usize,

    /// Batch flush timeout in milliseconds
    pub batch_timeout_ms: u64,

    /// Hard cap on a single batch
    pub max_batch_size: usize,

    /// Enable submit-time compression
    pub compression_enabled: bool,

    /// Compression kind applied at submit
    pub compression_kind: CompressionKind,

    /// Minimum payload size before compression is attempted
    pub compression_threshold: usize,

    /// Number of worker tasks
    pub worker_threads: usize,

    /// Total queue capacity across the four priority levels
    pub max_queue_size: usize,

    /// Buffer pool capacity
    pub memory_pool_size: usize,

    /// Maximum retry attempts per message
    pub max_retries: u32,

    /// Base retry delay in milliseconds
    pub retry_delay_ms: u64,

    /// Double the delay on each retry attempt
    pub exponential_backoff: bool,

    /// Enable the periodic stats report loop
    pub metrics_enabled: bool,

    /// Stats report interval in milliseconds
    pub stats_interval_ms: u64,

    /// Grace period for draining in-flight envelopes on stop
    pub shutdown_grace_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_timeout_ms: 1_000,
            max_batch_size: 1_000,
            compression_enabled: true,
            compression_kind: CompressionKind::Gzip,
            compression_threshold: 1_024,
            worker_threads: 4,
            max_queue_size: 10_000,
            memory_pool_size: 1_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            exponential_backoff: true,
            metrics_enabled: true,
            stats_interval_ms: 30_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

// ============================================================================
// Lifecycle state
// ============================================================================

/// Processor lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl ProcessorState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessorState::Stopped => "stopped",
            ProcessorState::Starting => "starting",
            ProcessorState::Running => "running",
            ProcessorState::Stopping => "stopping",
            ProcessorState::Error => "error",
        }
    }
}

// ============================================================================
// Handler contract
// ============================================================================

/// In-process message handler invoked by the worker loop.
///
/// Returning `false` marks the envelope failed and drives the retry path.
/// `handle_batch` may return a per-message success vector to drive selective
/// retry; the default delegates to `handle` per message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: &MessageEnvelope) -> bool;

    async fn handle_batch(&self, envelopes: &[MessageEnvelope]) -> Vec<bool> {
        let mut results = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            results.push(self.handle(envelope).await);
        }
        results
    }
}

// ============================================================================
// Stats
// ============================================================================

const PROCESSING_TIME_EMA_ALPHA: f64 = 0.1;

/// Live processing counters.
pub struct ProcessingStats {
    total_processed: AtomicU64,
    total_failed: AtomicU64,
    total_retries: AtomicU64,
    in_flight: AtomicUsize,
    /// EMA of per-message processing time, microseconds (bit-cast f64)
    avg_processing_time_us: AtomicU64,
    avg_batch_size: AtomicU64,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self {
            total_processed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            avg_processing_time_us: AtomicU64::new(0f64.to_bits()),
            avg_batch_size: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn record_processed(&self, count: u64) {
        self.total_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failed(&self, count: u64) {
        self.total_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enter_flight(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn exit_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_processing_time_us(&self, elapsed_us: f64) {
        ema_update(&self.avg_processing_time_us, elapsed_us);
    }

    pub fn record_batch_size(&self, size: f64) {
        ema_update(&self.avg_batch_size, size);
    }

    pub fn snapshot(&self, queue_depth: usize) -> ProcessingStatsSnapshot {
        ProcessingStatsSnapshot {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            avg_processing_time_us: f64::from_bits(self.avg_processing_time_us.load(Ordering::Relaxed)),
            avg_batch_size: f64::from_bits(self.avg_batch_size.load(Ordering::Relaxed)),
            queue_depth,
        }
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}

fn ema_update(cell: &AtomicU64, sample: f64) {
    // Single-writer per metric in practice; a racy lost update only skews the
    // EMA by one sample.
    let current = f64::from_bits(cell.load(Ordering::Relaxed));
    let next = if current == 0.0 {
        sample
    } else {
        PROCESSING_TIME_EMA_ALPHA * sample + (1.0 - PROCESSING_TIME_EMA_ALPHA) * current
    };
    cell.store(next.to_bits(), Ordering::Relaxed);
}

/// Processing counters snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatsSnapshot {
    pub total_processed: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    pub in_flight: usize,
    pub avg_processing_time_us: f64,
    pub avg_batch_size: f64,
    pub queue_depth: usize,
}

/// Per-priority queue depths keyed by level name.
pub type QueueDepths = HashMap<String, usize>;
