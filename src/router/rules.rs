//! Declarative routing rules for content-based selection.
//!
//! A rule is a conjunction of typed conditions over the envelope and routing
//! context plus a set of actions; the only action kind the core understands
//! is `RouteTo`, restricting candidates to a named endpoint subset.

use crate::message::{MessageEnvelope, MessagePriority};
use regex::Regex;
use std::collections::HashMap;

/// Comparison operator for ordered condition values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gte,
    Lte,
}

impl CmpOp {
    fn holds<T: PartialOrd>(self, left: T, right: T) -> bool {
        match self {
            CmpOp::Eq => left == right,
            CmpOp::Gte => left >= right,
            CmpOp::Lte => left <= right,
        }
    }
}

/// A predicate over an envelope and its routing context.
#[derive(Debug, Clone)]
pub enum RuleCondition {
    /// Topic matches the regex
    Topic { pattern: Regex },
    /// Attribute equals the value
    AttributeEquals { name: String, value: String },
    /// Attribute contains the value as a substring
    AttributeContains { name: String, value: String },
    /// Attribute matches the regex
    AttributeMatches { name: String, pattern: Regex },
    /// Attribute is one of the listed values
    AttributeIn { name: String, values: Vec<String> },
    /// Priority comparison
    Priority { op: CmpOp, value: MessagePriority },
    /// Payload size comparison, bytes
    PayloadSize { op: CmpOp, value: usize },
    /// Wall-clock window, epoch milliseconds inclusive
    TimeWindow { start_ms: u64, end_ms: u64 },
    /// Context value equals
    ContextEquals { key: String, value: String },
    /// Context value contains
    ContextContains { key: String, value: String },
}

impl RuleCondition {
    fn evaluate(&self, envelope: &MessageEnvelope, context: &RoutingContext, now_ms: u64) -> bool {
        match self {
            RuleCondition::Topic { pattern } => pattern.is_match(&envelope.topic),
            RuleCondition::AttributeEquals { name, value } => {
                envelope.attributes.get(name).map(|v| v == value).unwrap_or(false)
            }
            RuleCondition::AttributeContains { name, value } => envelope
                .attributes
                .get(name)
                .map(|v| v.contains(value.as_str()))
                .unwrap_or(false),
            RuleCondition::AttributeMatches { name, pattern } => envelope
                .attributes
                .get(name)
                .map(|v| pattern.is_match(v))
                .unwrap_or(false),
            RuleCondition::AttributeIn { name, values } => envelope
                .attributes
                .get(name)
                .map(|v| values.iter().any(|candidate| candidate == v))
                .unwrap_or(false),
            RuleCondition::Priority { op, value } => {
                op.holds(envelope.priority as u8, *value as u8)
            }
            RuleCondition::PayloadSize { op, value } => op.holds(envelope.payload_len(), *value),
            RuleCondition::TimeWindow { start_ms, end_ms } => {
                *start_ms <= now_ms && now_ms <= *end_ms
            }
            RuleCondition::ContextEquals { key, value } => {
                context.values.get(key).map(|v| v == value).unwrap_or(false)
            }
            RuleCondition::ContextContains { key, value } => context
                .values
                .get(key)
                .map(|v| v.contains(value.as_str()))
                .unwrap_or(false),
        }
    }
}

/// Rule action.
#[derive(Debug, Clone)]
pub enum RuleAction {
    /// Restrict candidates to this endpoint subset
    RouteTo { endpoint_ids: Vec<String> },
}

/// Declarative routing policy entry. Higher `priority` evaluates first.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub conditions: Vec<RuleCondition>,
    pub actions: Vec<RuleAction>,
}

impl RoutingRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority: 0,
            enabled: true,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn route_to(mut self, endpoint_ids: Vec<String>) -> Self {
        self.actions.push(RuleAction::RouteTo { endpoint_ids });
        self
    }

    /// All conditions must hold for the rule to match.
    pub fn matches(&self, envelope: &MessageEnvelope, context: &RoutingContext, now_ms: u64) -> bool {
        if !self.enabled {
            return false;
        }
        self.conditions
            .iter()
            .all(|c| c.evaluate(envelope, context, now_ms))
    }

    /// Endpoint ids named by the rule's `RouteTo` actions.
    pub fn target_endpoint_ids(&self) -> Vec<&str> {
        self.actions
            .iter()
            .flat_map(|action| match action {
                RuleAction::RouteTo { endpoint_ids } => endpoint_ids.iter().map(String::as_str),
            })
            .collect()
    }
}

/// Caller-supplied routing context.
#[derive(Debug, Clone, Default)]
pub struct RoutingContext {
    /// Sticky-session key, when sessions are enabled
    pub session_id: Option<String>,
    pub values: HashMap<String, String>,
}

impl RoutingContext {
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::new("vitals.heart", Bytes::from_static(b"0123456789"), 0)
            .with_priority(MessagePriority::High)
            .with_attribute("region", "east")
    }

    #[test]
    fn test_topic_and_attribute_conditions() {
        let rule = RoutingRule::new("r1", "vitals east")
            .with_condition(RuleCondition::Topic {
                pattern: Regex::new(r"^vitals\.").unwrap(),
            })
            .with_condition(RuleCondition::AttributeEquals {
                name: "region".into(),
                value: "east".into(),
            })
            .route_to(vec!["e1".into()]);

        let ctx = RoutingContext::default();
        assert!(rule.matches(&envelope(), &ctx, 0));
        assert_eq!(rule.target_endpoint_ids(), vec!["e1"]);

        let other = MessageEnvelope::new("billing", Bytes::new(), 0);
        assert!(!rule.matches(&other, &ctx, 0));
    }

    #[test]
    fn test_priority_and_size_comparisons() {
        let rule = RoutingRule::new("r2", "big urgent")
            .with_condition(RuleCondition::Priority {
                op: CmpOp::Gte,
                value: MessagePriority::High,
            })
            .with_condition(RuleCondition::PayloadSize {
                op: CmpOp::Lte,
                value: 64,
            });

        let ctx = RoutingContext::default();
        assert!(rule.matches(&envelope(), &ctx, 0));

        let low = envelope().with_priority(MessagePriority::Low);
        assert!(!rule.matches(&low, &ctx, 0));
    }

    #[test]
    fn test_time_window_and_context() {
        let rule = RoutingRule::new("r3", "maintenance window")
            .with_condition(RuleCondition::TimeWindow {
                start_ms: 100,
                end_ms: 200,
            })
            .with_condition(RuleCondition::ContextEquals {
                key: "tenant".into(),
                value: "clinic-a".into(),
            });

        let ctx = RoutingContext::default().with_value("tenant", "clinic-a");
        assert!(rule.matches(&envelope(), &ctx, 150));
        assert!(!rule.matches(&envelope(), &ctx, 250));
        assert!(!rule.matches(&envelope(), &RoutingContext::default(), 150));
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let mut rule = RoutingRule::new("r4", "off");
        rule.enabled = false;
        assert!(!rule.matches(&envelope(), &RoutingContext::default(), 0));
    }
}
