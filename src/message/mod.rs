//! # Message Envelope & Codec
//!
//! The transport unit of the bus: a [`MessageEnvelope`] carrying an opaque
//! payload plus routing hints, the compression codec applied to oversized
//! payloads, and a reusable buffer pool for codec scratch space.

pub mod codec;
pub mod pool;

pub use codec::{compress, decompress, MessageCodec};
pub use pool::{BufferPool, BufferPoolStats};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Reserved attribute key marking an encrypted payload body.
pub const ATTR_ENCRYPTED: &str = "encrypted";

/// Reserved attribute key recording the publishing node.
pub const ATTR_SOURCE_NODE: &str = "source_node";

/// Reserved attribute key carrying a caller trace id.
pub const ATTR_TRACE_ID: &str = "trace_id";

/// Reserved attribute key pinning a record to an explicit partition.
pub const ATTR_PARTITION: &str = "partition";

/// Message priority levels. Wire-stable: the numeric values must match
/// across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessagePriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl MessagePriority {
    /// All levels in strict dispatch order, highest first.
    pub const DISPATCH_ORDER: [MessagePriority; 4] = [
        MessagePriority::Critical,
        MessagePriority::High,
        MessagePriority::Normal,
        MessagePriority::Low,
    ];

    /// Queue index for this level (0 = LOW .. 3 = CRITICAL).
    pub fn index(self) -> usize {
        self as usize - 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessagePriority::Low => "LOW",
            MessagePriority::Normal => "NORMAL",
            MessagePriority::High => "HIGH",
            MessagePriority::Critical => "CRITICAL",
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(MessagePriority::Low),
            2 => Some(MessagePriority::Normal),
            3 => Some(MessagePriority::High),
            4 => Some(MessagePriority::Critical),
            _ => None,
        }
    }
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

impl std::fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression kinds. Wire-stable string tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    None,
    Gzip,
    Snappy,
    Lz4,
}

impl CompressionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
            CompressionKind::Snappy => "snappy",
            CompressionKind::Lz4 => "lz4",
        }
    }

    /// Parse a wire token. Unknown tokens resolve to `None` so the caller can
    /// apply the documented GZIP fallback.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "none" => Some(CompressionKind::None),
            "gzip" => Some(CompressionKind::Gzip),
            "snappy" => Some(CompressionKind::Snappy),
            "lz4" => Some(CompressionKind::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of transport across the bus.
///
/// The `id` is immutable after construction; the core mutates only the retry
/// counter and compression state during a message's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: String,
    pub topic: String,
    #[serde(with = "payload_bytes")]
    pub payload: Bytes,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub priority: MessagePriority,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default = "default_compression")]
    pub compression: CompressionKind,
}

fn default_compression() -> CompressionKind {
    CompressionKind::None
}

impl MessageEnvelope {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, timestamp_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload: payload.into(),
            attributes: HashMap::new(),
            priority: MessagePriority::Normal,
            timestamp_ms,
            retry_count: 0,
            compressed: false,
            compression: CompressionKind::None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Whether the payload body is an encrypted envelope.
    pub fn is_encrypted(&self) -> bool {
        self.attributes
            .get(ATTR_ENCRYPTED)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    /// Explicit partition pin, when the publisher set one.
    pub fn explicit_partition(&self) -> Option<u32> {
        self.attributes
            .get(ATTR_PARTITION)
            .and_then(|v| v.parse().ok())
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

mod payload_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(payload)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let raw: Vec<u8> = Vec::deserialize(deserializer)?;
        Ok(Bytes::from(raw))
    }
}
