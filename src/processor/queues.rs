//! Per-priority bounded FIFO queues.
//!
//! Four MPMC channels, one per priority level, each with capacity
//! `max_queue_size / 4`. Offers never block: a full queue is surfaced to the
//! producer as `QueueFull`. Polls cascade in strict priority order
//! CRITICAL → HIGH → NORMAL → LOW without blocking.

use crate::error::{BusError, Result};
use crate::message::{MessageEnvelope, MessagePriority};
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct PriorityLane {
    sender: Sender<MessageEnvelope>,
    receiver: Receiver<MessageEnvelope>,
    dropped: AtomicU64,
}

/// The four priority lanes.
pub struct PriorityQueues {
    lanes: [PriorityLane; 4],
}

impl PriorityQueues {
    /// Build lanes splitting `max_queue_size` evenly across priorities.
    pub fn new(max_queue_size: usize) -> Self {
        let per_lane = (max_queue_size / 4).max(1);
        let lane = || {
            let (sender, receiver) = bounded(per_lane);
            PriorityLane {
                sender,
                receiver,
                dropped: AtomicU64::new(0),
            }
        };
        Self {
            lanes: [lane(), lane(), lane(), lane()],
        }
    }

    fn lane(&self, priority: MessagePriority) -> &PriorityLane {
        &self.lanes[priority.index()]
    }

    /// Non-blocking offer. A full lane increments the drop counter and
    /// returns `QueueFull`.
    pub fn offer(&self, envelope: MessageEnvelope) -> Result<()> {
        let priority = envelope.priority;
        let lane = self.lane(priority);
        match lane.sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                lane.dropped.fetch_add(1, Ordering::Relaxed);
                Err(BusError::QueueFull(priority.as_str().to_string()))
            }
        }
    }

    /// Non-blocking poll cascade in strict priority order.
    pub fn poll(&self) -> Option<MessageEnvelope> {
        for priority in MessagePriority::DISPATCH_ORDER {
            if let Ok(envelope) = self.lane(priority).receiver.try_recv() {
                return Some(envelope);
            }
        }
        None
    }

    /// Aggregate depth across all lanes.
    pub fn depth(&self) -> usize {
        self.lanes.iter().map(|lane| lane.receiver.len()).sum()
    }

    /// Depth per priority level, keyed by level name.
    pub fn depths(&self) -> HashMap<String, usize> {
        MessagePriority::DISPATCH_ORDER
            .iter()
            .map(|&p| (p.as_str().to_string(), self.lane(p).receiver.len()))
            .collect()
    }

    /// Dropped-offer counters per priority level.
    pub fn dropped(&self) -> HashMap<String, u64> {
        MessagePriority::DISPATCH_ORDER
            .iter()
            .map(|&p| {
                (
                    p.as_str().to_string(),
                    self.lane(p).dropped.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}
