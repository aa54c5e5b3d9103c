//! Worker engine: submit path, priority dispatch, retry orchestration and
//! the batching sidecar loop.

use crate::error::{BusError, Result};
use crate::message::{BufferPool, BufferPoolStats, MessageCodec, MessageEnvelope};
use crate::processor::batch::{BatchAccumulator, BatchFlushOutcome};
use crate::processor::queues::PriorityQueues;
use crate::processor::{
    MessageHandler, ProcessingStats, ProcessingStatsSnapshot, ProcessorConfig, ProcessorState,
    QueueDepths,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Idle park interval for workers when all lanes are empty.
const IDLE_BACKOFF_MS: u64 = 10;

/// Flush-check cadence for the batch sidecar.
const BATCH_TICK_MS: u64 = 100;

/// Failure rate above which the batch flusher throttles for one tick.
const BATCH_THROTTLE_FAILURE_RATE: f64 = 0.5;

/// Called with every terminally failed envelope and the failure reason.
pub type DeadLetterHook = Arc<dyn Fn(&MessageEnvelope, &str) + Send + Sync>;

struct ProcessorInner {
    config: ProcessorConfig,
    codec: MessageCodec,
    pool: BufferPool,
    queues: PriorityQueues,
    batch: BatchAccumulator,
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
    stats: ProcessingStats,
    dead_letter: RwLock<Option<DeadLetterHook>>,
}

impl ProcessorInner {
    fn dead_letter(&self, envelope: &MessageEnvelope, reason: &str) {
        tracing::warn!(
            message_id = %envelope.id,
            topic = %envelope.topic,
            retry_count = envelope.retry_count,
            reason = %reason,
            "envelope dead-lettered"
        );
        let hook = self.dead_letter.read().clone();
        if let Some(hook) = hook {
            hook(envelope, reason);
        }
    }
}

/// Priority-aware message processor.
pub struct MessageProcessor {
    inner: Arc<ProcessorInner>,
    state: RwLock<ProcessorState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let codec = MessageCodec::new(config.compression_kind, config.compression_threshold);
        let inner = ProcessorInner {
            pool: BufferPool::new(config.memory_pool_size),
            queues: PriorityQueues::new(config.max_queue_size),
            batch: BatchAccumulator::new(),
            handlers: RwLock::new(Vec::new()),
            stats: ProcessingStats::new(),
            dead_letter: RwLock::new(None),
            codec,
            config,
        };
        Self {
            inner: Arc::new(inner),
            state: RwLock::new(ProcessorState::Stopped),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler; handlers run in registration order per envelope.
    pub fn add_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.inner.handlers.write().push(handler);
    }

    /// Install the terminal-failure hook.
    pub fn set_dead_letter_hook(&self, hook: DeadLetterHook) {
        *self.inner.dead_letter.write() = Some(hook);
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.read()
    }

    /// Spawn workers and sidecar loops. STOPPED → STARTING → RUNNING.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ProcessorState::Stopped {
                return Err(BusError::AlreadyRunning);
            }
            *state = ProcessorState::Starting;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        for i in 0..self.inner.config.worker_threads.max(1) {
            let inner = self.inner.clone();
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(worker_loop(format!("worker-{i}"), inner, rx)));
        }

        tasks.push(tokio::spawn(batch_loop(
            self.inner.clone(),
            shutdown_rx.clone(),
        )));

        if self.inner.config.metrics_enabled {
            tasks.push(tokio::spawn(stats_loop(self.inner.clone(), shutdown_rx)));
        }

        *self.shutdown.lock() = Some(shutdown_tx);
        *self.tasks.lock() = tasks;
        *self.state.write() = ProcessorState::Running;
        tracing::info!(
            workers = self.inner.config.worker_threads,
            "message processor started"
        );
        Ok(())
    }

    /// Cancel workers and drain in-flight envelopes within the grace period.
    /// RUNNING → STOPPING → STOPPED.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ProcessorState::Running {
                return Ok(());
            }
            *state = ProcessorState::Stopping;
        }

        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(true);
        }

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let grace = Duration::from_millis(self.inner.config.shutdown_grace_ms);
        for task in tasks {
            if tokio::time::timeout(grace, task).await.is_err() {
                tracing::warn!("processor task did not drain within grace period, dropping");
            }
        }

        *self.state.write() = ProcessorState::Stopped;
        tracing::info!("message processor stopped");
        Ok(())
    }

    /// Submit an envelope for processing.
    ///
    /// Applies submit-time compression (unless the payload is an encrypted
    /// body, whose compression state describes the cleartext), then offers to
    /// the priority lane. A full lane surfaces `QueueFull` to the caller.
    pub fn submit(&self, mut envelope: MessageEnvelope) -> Result<()> {
        let state = *self.state.read();
        if state != ProcessorState::Running {
            return Err(BusError::NotRunning(state.as_str().to_string()));
        }

        if self.inner.config.compression_enabled && !envelope.is_encrypted() {
            self.inner.codec.compress_envelope(&mut envelope)?;
        }

        self.inner.queues.offer(envelope)
    }

    /// Submit an envelope to the batching sidecar instead of the per-message
    /// path. Flushes on size or timeout.
    pub fn submit_batch(&self, mut envelope: MessageEnvelope) -> Result<()> {
        let state = *self.state.read();
        if state != ProcessorState::Running {
            return Err(BusError::NotRunning(state.as_str().to_string()));
        }

        if self.inner.config.compression_enabled && !envelope.is_encrypted() {
            self.inner.codec.compress_envelope(&mut envelope)?;
        }

        self.inner.batch_accumulator().add(envelope);
        Ok(())
    }

    pub fn stats(&self) -> ProcessingStatsSnapshot {
        self.inner.stats.snapshot(self.inner.queues.depth())
    }

    pub fn queue_depths(&self) -> QueueDepths {
        self.inner.queues.depths()
    }

    pub fn dropped_counts(&self) -> HashMap<String, u64> {
        self.inner.queues.dropped()
    }

    pub fn pool_stats(&self) -> BufferPoolStats {
        self.inner.pool.stats()
    }
}

impl ProcessorInner {
    fn batch_accumulator(&self) -> &BatchAccumulator {
        &self.batch
    }
}

// ============================================================================
// Worker loop
// ============================================================================

async fn worker_loop(
    name: String,
    inner: Arc<ProcessorInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker = %name, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match inner.queues.poll() {
            Some(envelope) => {
                process_one(&inner, envelope).await;
            }
            None => {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(Duration::from_millis(IDLE_BACKOFF_MS)) => {}
                }
            }
        }
    }

    tracing::debug!(worker = %name, "worker stopped");
}

async fn process_one(inner: &Arc<ProcessorInner>, mut envelope: MessageEnvelope) {
    inner.stats.enter_flight();
    let start = Instant::now();

    // Decompress on pickup. Encrypted bodies are left alone: their
    // compression flag describes the cleartext inside the ciphertext.
    if !envelope.is_encrypted() {
        if let Err(e) = inner.codec.decompress_envelope(&mut envelope) {
            inner.stats.exit_flight();
            inner.stats.record_failed(1);
            inner.dead_letter(&envelope, &format!("decode error: {e}"));
            return;
        }
    }

    let handlers: Vec<_> = inner.handlers.read().clone();
    let mut success = true;
    for handler in &handlers {
        if !handler.handle(&envelope).await {
            success = false;
            break;
        }
    }

    let elapsed_us = start.elapsed().as_secs_f64() * 1_000_000.0;
    inner.stats.record_processing_time_us(elapsed_us);
    inner.stats.exit_flight();

    if success {
        inner.stats.record_processed(1);
    } else {
        retry_or_dead_letter(inner, envelope);
    }
}

fn retry_or_dead_letter(inner: &Arc<ProcessorInner>, mut envelope: MessageEnvelope) {
    if envelope.retry_count >= inner.config.max_retries {
        inner.stats.record_failed(1);
        inner.dead_letter(&envelope, "max retries exceeded");
        return;
    }

    envelope.retry_count += 1;
    let base = inner.config.retry_delay_ms;
    let delay_ms = if inner.config.exponential_backoff {
        base.saturating_mul(1u64 << (envelope.retry_count - 1).min(16))
    } else {
        base
    };
    inner.stats.record_retry();

    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if inner.queues.offer(envelope.clone()).is_err() {
            inner.stats.record_failed(1);
            inner.dead_letter(&envelope, "retry re-enqueue failed: queue full");
        }
    });
}

// ============================================================================
// Batch sidecar loop
// ============================================================================

async fn batch_loop(inner: Arc<ProcessorInner>, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("batch flusher started");
    let mut throttled = false;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(Duration::from_millis(BATCH_TICK_MS)) => {}
        }
        if *shutdown.borrow() {
            break;
        }

        if throttled {
            // One extra tick of backoff after a bad flush.
            throttled = false;
            continue;
        }

        if inner
            .batch_accumulator()
            .should_flush(inner.config.batch_size, inner.config.batch_timeout_ms)
        {
            let batch = inner.batch_accumulator().take(inner.config.max_batch_size);
            let outcome = flush_batch(&inner, batch).await;
            throttled = outcome.failure_rate() > BATCH_THROTTLE_FAILURE_RATE;
        }
    }

    // Final drain so accepted envelopes are not silently lost on stop.
    let remaining = inner.batch_accumulator().drain();
    if !remaining.is_empty() {
        flush_batch(&inner, remaining).await;
    }
    tracing::debug!("batch flusher stopped");
}

async fn flush_batch(inner: &Arc<ProcessorInner>, batch: Vec<MessageEnvelope>) -> BatchFlushOutcome {
    if batch.is_empty() {
        return BatchFlushOutcome::default();
    }

    let start = Instant::now();
    let handlers: Vec<_> = inner.handlers.read().clone();
    let mut per_message = vec![true; batch.len()];

    for handler in &handlers {
        let results = handler.handle_batch(&batch).await;
        for (i, ok) in per_message.iter_mut().enumerate() {
            // A short result vector counts as failure for the tail.
            *ok = *ok && results.get(i).copied().unwrap_or(false);
        }
    }

    let elapsed_us = start.elapsed().as_secs_f64() * 1_000_000.0;
    inner.stats.record_processing_time_us(elapsed_us / batch.len() as f64);
    inner.stats.record_batch_size(batch.len() as f64);

    let mut outcome = BatchFlushOutcome {
        flushed: batch.len(),
        failed: 0,
    };
    for (envelope, ok) in batch.into_iter().zip(per_message) {
        if ok {
            inner.stats.record_processed(1);
        } else {
            outcome.failed += 1;
            retry_or_dead_letter(inner, envelope);
        }
    }
    outcome
}

// ============================================================================
// Stats report loop
// ============================================================================

async fn stats_loop(inner: Arc<ProcessorInner>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_millis(inner.config.stats_interval_ms.max(1_000));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if *shutdown.borrow() {
            break;
        }

        let snapshot = inner.stats.snapshot(inner.queues.depth());
        let pool = inner.pool.stats();
        tracing::info!(
            processed = snapshot.total_processed,
            failed = snapshot.total_failed,
            retries = snapshot.total_retries,
            queue_depth = snapshot.queue_depth,
            avg_processing_us = snapshot.avg_processing_time_us,
            pool_hits = pool.pool_hits,
            pool_misses = pool.pool_misses,
            "processor stats"
        );
    }
}
