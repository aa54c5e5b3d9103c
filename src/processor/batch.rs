//! Batch accumulator for the opportunistic batching sidecar.
//!
//! Pure buffer management: the engine's flush loop owns handler invocation
//! and retry. A flush is due when the buffer reaches `batch_size` or
//! `batch_timeout` has elapsed since the last flush.

use crate::message::MessageEnvelope;
use parking_lot::Mutex;
use std::time::Instant;

/// Accumulates envelopes for batched handler dispatch.
pub struct BatchAccumulator {
    buffer: Mutex<Vec<MessageEnvelope>>,
    last_flush: Mutex<Instant>,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
        }
    }

    /// Append an envelope to the pending batch.
    pub fn add(&self, envelope: MessageEnvelope) {
        self.buffer.lock().push(envelope);
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Whether a flush is due under the size/timeout policy.
    pub fn should_flush(&self, batch_size: usize, batch_timeout_ms: u64) -> bool {
        let len = self.buffer.lock().len();
        if len == 0 {
            return false;
        }
        if len >= batch_size {
            return true;
        }
        self.last_flush.lock().elapsed().as_millis() as u64 >= batch_timeout_ms
    }

    /// Take up to `max` envelopes and mark the flush instant.
    pub fn take(&self, max: usize) -> Vec<MessageEnvelope> {
        let mut buffer = self.buffer.lock();
        let n = buffer.len().min(max);
        let batch: Vec<_> = buffer.drain(..n).collect();
        if !batch.is_empty() {
            *self.last_flush.lock() = Instant::now();
        }
        batch
    }

    /// Drain everything, regardless of policy (shutdown path).
    pub fn drain(&self) -> Vec<MessageEnvelope> {
        let mut buffer = self.buffer.lock();
        std::mem::take(&mut *buffer)
    }
}

impl Default for BatchAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one batch flush.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchFlushOutcome {
    pub flushed: usize,
    pub failed: usize,
}

impl BatchFlushOutcome {
    pub fn failure_rate(&self) -> f64 {
        if self.flushed == 0 {
            0.0
        } else {
            self.failed as f64 / self.flushed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::new("t", Bytes::from_static(b"x"), 0)
    }

    #[test]
    fn test_flush_on_size() {
        let batch = BatchAccumulator::new();
        for _ in 0..3 {
            batch.add(envelope());
        }
        assert!(!batch.should_flush(4, 60_000));
        batch.add(envelope());
        assert!(batch.should_flush(4, 60_000));

        let taken = batch.take(10);
        assert_eq!(taken.len(), 4);
        assert_eq!(batch.pending(), 0);
    }

    #[test]
    fn test_flush_on_timeout() {
        let batch = BatchAccumulator::new();
        batch.add(envelope());
        assert!(!batch.should_flush(100, 60_000));
        // Zero timeout means any pending message is due.
        assert!(batch.should_flush(100, 0));
    }

    #[test]
    fn test_empty_buffer_never_flushes() {
        let batch = BatchAccumulator::new();
        assert!(!batch.should_flush(1, 0));
        assert!(batch.take(10).is_empty());
    }

    #[test]
    fn test_take_respects_cap() {
        let batch = BatchAccumulator::new();
        for _ in 0..10 {
            batch.add(envelope());
        }
        assert_eq!(batch.take(6).len(), 6);
        assert_eq!(batch.pending(), 4);
        assert_eq!(batch.drain().len(), 4);
    }

    #[test]
    fn test_failure_rate() {
        let outcome = BatchFlushOutcome { flushed: 8, failed: 6 };
        assert!(outcome.failure_rate() > 0.7);
        assert_eq!(BatchFlushOutcome::default().failure_rate(), 0.0);
    }
}
