//! In-memory topic index: configuration, subscribers, handlers and counters.
//!
//! Subscribers are addressable identities; handlers are in-process callbacks
//! run by the worker loop. The two are disjoint concerns.

use crate::processor::MessageHandler;
use crate::util::SharedClock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct TopicEntry {
    config: HashMap<String, String>,
    created_at_ms: u64,
    subscribers: HashSet<String>,
    message_count: u64,
}

/// Serializable topic view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    pub config: HashMap<String, String>,
    pub created_at_ms: u64,
    pub subscriber_count: usize,
    pub message_count: u64,
}

/// Topic registry for the coordinator.
pub struct TopicManager {
    topics: DashMap<String, TopicEntry>,
    handlers: DashMap<String, Vec<Arc<dyn MessageHandler>>>,
    clock: SharedClock,
}

impl TopicManager {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            topics: DashMap::new(),
            handlers: DashMap::new(),
            clock,
        }
    }

    /// Register a topic locally. Returns `false` when it already exists.
    pub fn create_topic(&self, name: &str, config: HashMap<String, String>) -> bool {
        if self.topics.contains_key(name) {
            return false;
        }
        self.topics.insert(
            name.to_string(),
            TopicEntry {
                config,
                created_at_ms: self.clock.now_ms(),
                subscribers: HashSet::new(),
                message_count: 0,
            },
        );
        tracing::info!(topic = %name, "topic registered");
        true
    }

    pub fn delete_topic(&self, name: &str) -> bool {
        let existed = self.topics.remove(name).is_some();
        self.handlers.remove(name);
        if existed {
            tracing::info!(topic = %name, "topic dropped");
        }
        existed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.topics.contains_key(name)
    }

    /// Attach a subscriber (and optional handler). Returns `false` when the
    /// topic does not exist.
    pub fn subscribe(
        &self,
        name: &str,
        subscriber_id: &str,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> bool {
        let mut entry = match self.topics.get_mut(name) {
            Some(entry) => entry,
            None => return false,
        };
        entry.subscribers.insert(subscriber_id.to_string());
        drop(entry);

        if let Some(handler) = handler {
            self.handlers.entry(name.to_string()).or_default().push(handler);
        }
        tracing::info!(topic = %name, subscriber = %subscriber_id, "subscribed");
        true
    }

    pub fn unsubscribe(&self, name: &str, subscriber_id: &str) -> bool {
        match self.topics.get_mut(name) {
            Some(mut entry) => {
                entry.subscribers.remove(subscriber_id);
                tracing::info!(topic = %name, subscriber = %subscriber_id, "unsubscribed");
                true
            }
            None => false,
        }
    }

    pub fn subscribers(&self, name: &str) -> HashSet<String> {
        self.topics
            .get(name)
            .map(|entry| entry.subscribers.clone())
            .unwrap_or_default()
    }

    pub fn handlers(&self, name: &str) -> Vec<Arc<dyn MessageHandler>> {
        self.handlers
            .get(name)
            .map(|handlers| handlers.clone())
            .unwrap_or_default()
    }

    pub fn increment_message_count(&self, name: &str) {
        if let Some(mut entry) = self.topics.get_mut(name) {
            entry.message_count += 1;
        }
    }

    pub fn topic_info(&self, name: &str) -> Option<TopicInfo> {
        self.topics.get(name).map(|entry| TopicInfo {
            name: name.to_string(),
            config: entry.config.clone(),
            created_at_ms: entry.created_at_ms,
            subscriber_count: entry.subscribers.len(),
            message_count: entry.message_count,
        })
    }

    pub fn list_topics(&self) -> Vec<TopicInfo> {
        self.topics
            .iter()
            .map(|entry| TopicInfo {
                name: entry.key().clone(),
                config: entry.config.clone(),
                created_at_ms: entry.created_at_ms,
                subscriber_count: entry.subscribers.len(),
                message_count: entry.message_count,
            })
            .collect()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageEnvelope;
    use crate::util::ManualClock;
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(&self, _envelope: &MessageEnvelope) -> bool {
            true
        }
    }

    fn manager() -> TopicManager {
        TopicManager::new(Arc::new(ManualClock::new(5_000)))
    }

    #[test]
    fn test_create_is_single_shot() {
        let manager = manager();
        assert!(manager.create_topic("vitals", HashMap::new()));
        assert!(!manager.create_topic("vitals", HashMap::new()));
        assert_eq!(manager.topic_count(), 1);
    }

    #[test]
    fn test_subscribers_and_handlers_are_disjoint() {
        let manager = manager();
        manager.create_topic("vitals", HashMap::new());

        assert!(manager.subscribe("vitals", "sub-1", None));
        assert!(manager.subscribe("vitals", "sub-2", Some(Arc::new(NoopHandler))));

        assert_eq!(manager.subscribers("vitals").len(), 2);
        assert_eq!(manager.handlers("vitals").len(), 1);

        manager.unsubscribe("vitals", "sub-1");
        assert_eq!(manager.subscribers("vitals").len(), 1);
        // Handler list is untouched by unsubscribe.
        assert_eq!(manager.handlers("vitals").len(), 1);
    }

    #[test]
    fn test_subscribe_unknown_topic_fails() {
        let manager = manager();
        assert!(!manager.subscribe("nope", "sub-1", None));
    }

    #[test]
    fn test_info_and_counters() {
        let manager = manager();
        manager.create_topic("vitals", HashMap::from([("retention.ms".to_string(), "1000".to_string())]));
        manager.subscribe("vitals", "sub-1", None);
        manager.increment_message_count("vitals");
        manager.increment_message_count("vitals");

        let info = manager.topic_info("vitals").unwrap();
        assert_eq!(info.subscriber_count, 1);
        assert_eq!(info.message_count, 2);
        assert_eq!(info.created_at_ms, 5_000);
        assert_eq!(info.config["retention.ms"], "1000");

        manager.delete_topic("vitals");
        assert!(manager.topic_info("vitals").is_none());
    }
}
