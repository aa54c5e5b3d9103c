// # Audit Log
//
// Append-only ring buffer of security-relevant events with sensitive-field
// masking and a streaming output hook. Writes are O(1); the ring is bounded
// and drops the oldest entries at capacity.

use crate::util::SharedClock;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Default ring capacity.
pub const DEFAULT_AUDIT_CAPACITY: usize = 10_000;

/// Substrings identifying sensitive detail keys.
const SENSITIVE_KEY_FRAGMENTS: [&str; 5] = ["password", "token", "key", "secret", "credential"];

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    MessagePublish,
    MessageConsume,
    Authentication,
    Authorization,
    Encryption,
    Decryption,
    AccessDenied,
    SecurityViolation,
}

/// Event outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
    Denied,
    Error,
}

/// One audit event. The serialized form is the wire format: `timestamp` is
/// seconds since the epoch as a float.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub resource: String,
    pub action: String,
    pub result: AuditResult,
    pub timestamp: f64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub details: serde_json::Map<String, Value>,
    pub sensitive_data_masked: bool,
}

/// Streaming sink invoked for every appended event.
pub type AuditSink = Arc<dyn Fn(&AuditEvent) + Send + Sync>;

/// Bounded append-only audit log.
pub struct AuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    masking_enabled: bool,
    sink: RwLock<Option<AuditSink>>,
    clock: SharedClock,
}

impl AuditLog {
    pub fn new(capacity: usize, masking_enabled: bool, clock: SharedClock) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1_024))),
            capacity: capacity.max(1),
            masking_enabled,
            sink: RwLock::new(None),
            clock,
        }
    }

    /// Install the streaming output hook.
    pub fn set_sink(&self, sink: AuditSink) {
        *self.sink.write() = Some(sink);
    }

    /// Append an event, masking sensitive detail values first.
    #[allow(clippy::too_many_arguments)]
    pub fn log_event(
        &self,
        event_type: AuditEventType,
        user_id: Option<&str>,
        resource: &str,
        action: &str,
        result: AuditResult,
        ip_address: Option<&str>,
        details: serde_json::Map<String, Value>,
    ) -> AuditEvent {
        let details = if self.masking_enabled {
            mask_sensitive_map(details)
        } else {
            details
        };

        let event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            event_type,
            user_id: user_id.map(String::from),
            resource: resource.to_string(),
            action: action.to_string(),
            result,
            timestamp: self.clock.now_secs_f64(),
            ip_address: ip_address.map(String::from),
            user_agent: None,
            details,
            sensitive_data_masked: self.masking_enabled,
        };

        tracing::info!(
            event_type = ?event.event_type,
            resource = %event.resource,
            action = %event.action,
            result = ?event.result,
            "audit event"
        );

        {
            let mut events = self.events.lock();
            if events.len() >= self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }

        if let Some(sink) = self.sink.read().clone() {
            sink(&event);
        }

        event
    }

    /// Filtered retrieval, newest first.
    pub fn query(&self, filter: &AuditQuery) -> Vec<AuditEvent> {
        let events = self.events.lock();
        let mut selected: Vec<AuditEvent> = events
            .iter()
            .filter(|e| {
                filter.event_type.map(|t| e.event_type == t).unwrap_or(true)
                    && filter
                        .user_id
                        .as_deref()
                        .map(|u| e.user_id.as_deref() == Some(u))
                        .unwrap_or(true)
                    && filter.start_secs.map(|s| e.timestamp >= s).unwrap_or(true)
                    && filter.end_secs.map(|s| e.timestamp <= s).unwrap_or(true)
            })
            .cloned()
            .collect();

        selected.sort_by(|a, b| b.timestamp.partial_cmp(&a.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        selected.truncate(filter.limit);
        selected
    }

    /// Denied and violation events, newest first.
    pub fn security_violations(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.lock();
        let mut selected: Vec<AuditEvent> = events
            .iter()
            .filter(|e| {
                matches!(
                    e.event_type,
                    AuditEventType::AccessDenied | AuditEventType::SecurityViolation
                ) || e.result == AuditResult::Denied
            })
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.timestamp.partial_cmp(&a.timestamp).unwrap_or(std::cmp::Ordering::Equal));
        selected.truncate(limit);
        selected
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// Audit retrieval filter.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub event_type: Option<AuditEventType>,
    pub user_id: Option<String>,
    pub start_secs: Option<f64>,
    pub end_secs: Option<f64>,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            event_type: None,
            user_id: None,
            start_secs: None,
            end_secs: None,
            limit: 100,
        }
    }
}

// ============================================================================
// Masking
// ============================================================================

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

/// Mask a string value: first two + asterisks + last two, or `***` when the
/// value is too short to keep any context.
fn mask_value(value: &str) -> String {
    if value.len() > 4 {
        let head: String = value.chars().take(2).collect();
        let tail: String = value
            .chars()
            .rev()
            .take(2)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let masked_len = value.chars().count().saturating_sub(4);
        format!("{head}{}{tail}", "*".repeat(masked_len))
    } else {
        "***".to_string()
    }
}

/// Recursively mask sensitive keys in a detail map.
pub fn mask_sensitive_map(map: serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let masked = if is_sensitive_key(&key) {
                match &value {
                    Value::String(s) => Value::String(mask_value(s)),
                    _ => Value::String("***".to_string()),
                }
            } else {
                match value {
                    Value::Object(inner) => Value::Object(mask_sensitive_map(inner)),
                    other => other,
                }
            };
            (key, masked)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;
    use serde_json::json;

    fn log() -> AuditLog {
        AuditLog::new(16, true, Arc::new(ManualClock::new(1_700_000_000_000)))
    }

    fn details(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_masking_prefix_suffix() {
        let masked = mask_sensitive_map(details(json!({"password": "s3cret!!"})));
        assert_eq!(masked["password"], json!("s3****!!"));

        let masked = mask_sensitive_map(details(json!({"api_key": "ab"})));
        assert_eq!(masked["api_key"], json!("***"));

        // Non-sensitive keys pass through; nested maps mask recursively.
        let masked = mask_sensitive_map(details(json!({
            "topic": "vitals",
            "inner": {"auth_token": "abcdefgh"}
        })));
        assert_eq!(masked["topic"], json!("vitals"));
        assert_eq!(masked["inner"]["auth_token"], json!("ab****gh"));
    }

    #[test]
    fn test_wire_format_keys() {
        let log = log();
        let event = log.log_event(
            AuditEventType::MessagePublish,
            Some("u1"),
            "topic:vitals",
            "publish",
            AuditResult::Success,
            Some("10.0.0.9"),
            details(json!({"password": "hunter22"})),
        );

        let wire = serde_json::to_value(&event).unwrap();
        let object = wire.as_object().unwrap();
        for key in [
            "id",
            "event_type",
            "user_id",
            "resource",
            "action",
            "result",
            "timestamp",
            "ip_address",
            "user_agent",
            "details",
            "sensitive_data_masked",
        ] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object.len(), 11);
        assert_eq!(wire["event_type"], json!("message_publish"));
        assert_eq!(wire["result"], json!("success"));
        assert_eq!(wire["sensitive_data_masked"], json!(true));
        assert_eq!(wire["details"]["password"], json!("hu****22"));
        assert!(wire["timestamp"].is_f64());
    }

    #[test]
    fn test_ring_is_bounded() {
        let log = AuditLog::new(3, false, Arc::new(ManualClock::new(0)));
        for i in 0..5 {
            log.log_event(
                AuditEventType::Authentication,
                None,
                &format!("auth:{i}"),
                "authenticate",
                AuditResult::Success,
                None,
                serde_json::Map::new(),
            );
        }
        assert_eq!(log.len(), 3);
        // The oldest two were dropped.
        let remaining = log.query(&AuditQuery::default());
        assert!(remaining.iter().all(|e| e.resource != "auth:0" && e.resource != "auth:1"));
    }

    #[test]
    fn test_query_filters() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let log = AuditLog::new(16, false, clock.clone());
        log.log_event(
            AuditEventType::Authentication,
            Some("u1"),
            "auth:api_key",
            "authenticate",
            AuditResult::Success,
            None,
            serde_json::Map::new(),
        );
        clock.advance_ms(10_000);
        log.log_event(
            AuditEventType::Authorization,
            Some("u2"),
            "topic:vitals",
            "write",
            AuditResult::Denied,
            None,
            serde_json::Map::new(),
        );

        let auth_only = log.query(&AuditQuery {
            event_type: Some(AuditEventType::Authentication),
            ..Default::default()
        });
        assert_eq!(auth_only.len(), 1);
        assert_eq!(auth_only[0].user_id.as_deref(), Some("u1"));

        let late = log.query(&AuditQuery {
            start_secs: Some(1_005.0),
            ..Default::default()
        });
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].result, AuditResult::Denied);

        assert_eq!(log.security_violations(10).len(), 1);
    }

    #[test]
    fn test_sink_receives_events() {
        let log = log();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        log.set_sink(Arc::new(move |event| {
            sink_seen.lock().push(event.id.clone());
        }));

        log.log_event(
            AuditEventType::Encryption,
            Some("u1"),
            "message",
            "encrypt",
            AuditResult::Success,
            None,
            serde_json::Map::new(),
        );
        assert_eq!(seen.lock().len(), 1);
    }
}
