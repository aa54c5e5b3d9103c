// End-to-end tests driving the public bus API against the in-memory
// substrate.

use bytes::Bytes;
use pulsebus::bus::{BusConfig, BusState, EndpointTransport, MessageBus, PublishOptions};
use pulsebus::error::{BusError, Result};
use pulsebus::message::{MessageEnvelope, MessagePriority};
use pulsebus::processor::{MessageHandler, ProcessorConfig};
use pulsebus::router::RouteEndpoint;
use pulsebus::security::{
    AuditEventType, AuditQuery, AuditResult, EncryptionAlgorithm, SecurityConfig, User,
};
use pulsebus::storage::{InMemoryLogSubstrate, InMemoryMetadataStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> BusConfig {
    BusConfig {
        security: SecurityConfig {
            encryption_algorithm: EncryptionAlgorithm::Symmetric,
            ..Default::default()
        },
        processor: ProcessorConfig {
            worker_threads: 2,
            retry_delay_ms: 10,
            max_retries: 2,
            stats_interval_ms: 60_000,
            ..Default::default()
        },
        health_check_interval_ms: 60_000,
        stats_report_interval_ms: 60_000,
        ..Default::default()
    }
}

async fn running_bus(config: BusConfig) -> Arc<MessageBus> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let substrate = Arc::new(InMemoryLogSubstrate::new(3));
    let store = Arc::new(InMemoryMetadataStore::new());
    let bus = MessageBus::new(config, substrate, store).unwrap();
    bus.start().await.unwrap();
    bus
}

/// A user holding only topic-level grants, the way per-topic producers and
/// consumers are provisioned.
fn topic_user(bus: &MessageBus, topic: &str, actions: &[&str]) -> User {
    let user = User {
        id: "clinical-1".to_string(),
        username: "clinical".to_string(),
        email: None,
        roles: HashSet::new(),
        permissions: HashSet::new(),
        api_keys: HashSet::new(),
        created_at_ms: 0,
        last_login_ms: None,
        is_active: true,
    };
    bus.security().grant_topic_permission(
        topic,
        &user.id,
        actions.iter().map(|a| a.to_string()).collect(),
    );
    user
}

#[tokio::test]
async fn test_happy_publish_consume_with_audit_trail() {
    let bus = running_bus(test_config()).await;
    let user = topic_user(&bus, "alerts", &["read", "write"]);

    bus.create_topic("alerts", None, Some(&user)).await.unwrap();

    let message_id = bus
        .publish("alerts", Bytes::from_static(b"{\"k\":1}"), Some(&user))
        .await
        .unwrap();
    assert!(!message_id.is_empty());

    let batch = bus.consume("alerts", "sub1", Some(&user), 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload.as_ref(), b"{\"k\":1}");
    assert_eq!(batch[0].id, message_id);

    let publishes = bus.security().audit_events(&AuditQuery {
        event_type: Some(AuditEventType::MessagePublish),
        ..Default::default()
    });
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].result, AuditResult::Success);
    assert!(publishes[0].sensitive_data_masked);

    let consumes = bus.security().audit_events(&AuditQuery {
        event_type: Some(AuditEventType::MessageConsume),
        ..Default::default()
    });
    assert_eq!(consumes.len(), 1);
    assert_eq!(consumes[0].result, AuditResult::Success);

    assert!(bus.security().security_violations(10).is_empty());
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_encrypted_publish_round_trips_on_consume() {
    let bus = running_bus(test_config()).await;
    let user = topic_user(&bus, "vitals", &["read", "write"]);

    bus.publish("vitals", Bytes::from_static(b"bp 120/80"), Some(&user))
        .await
        .unwrap();

    let batch = bus.consume("vitals", "sub1", Some(&user), 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload.as_ref(), b"bp 120/80");
    assert!(!batch[0].attributes.contains_key("encrypted"));

    // The stored record really was encrypted at rest.
    let decrypt_events = bus.security().audit_events(&AuditQuery {
        event_type: Some(AuditEventType::Decryption),
        ..Default::default()
    });
    assert_eq!(decrypt_events.len(), 1);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_unauthorized_and_oversized_publishes_rejected() {
    let mut config = test_config();
    config.security.max_message_size = 64;
    let bus = running_bus(config).await;

    let reader = topic_user(&bus, "alerts", &["read"]);
    let err = bus
        .publish("alerts", Bytes::from_static(b"x"), Some(&reader))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Forbidden(_)));

    let writer = topic_user(&bus, "alerts", &["read", "write"]);
    let err = bus
        .publish("alerts", Bytes::from(vec![0u8; 65]), Some(&writer))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::PayloadTooLarge { .. }));

    // Both rejections produced failure audits.
    let failures = bus.security().audit_events(&AuditQuery {
        event_type: Some(AuditEventType::MessagePublish),
        ..Default::default()
    });
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|e| e.result == AuditResult::Failure));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_gates_operations() {
    let substrate = Arc::new(InMemoryLogSubstrate::new(3));
    let store = Arc::new(InMemoryMetadataStore::new());
    let bus = MessageBus::new(test_config(), substrate, store).unwrap();

    let err = bus.publish("alerts", Bytes::new(), None).await.unwrap_err();
    assert!(matches!(err, BusError::NotRunning(_)));

    bus.start().await.unwrap();
    assert_eq!(bus.state(), BusState::Running);
    assert!(matches!(bus.start().await.unwrap_err(), BusError::AlreadyRunning));

    bus.stop().await.unwrap();
    assert_eq!(bus.state(), BusState::Stopped);
    let err = bus.publish("alerts", Bytes::new(), None).await.unwrap_err();
    assert!(matches!(err, BusError::NotRunning(_)));
}

#[tokio::test]
async fn test_subscribe_implicitly_creates_topic() {
    let bus = running_bus(test_config()).await;

    bus.subscribe("lab-results", "sub1", None).unwrap();
    let info = bus.topic_info("lab-results").unwrap();
    assert_eq!(info.subscriber_count, 1);

    bus.unsubscribe("lab-results", "sub1").unwrap();
    assert_eq!(bus.topic_info("lab-results").unwrap().subscriber_count, 0);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_consume_batch_is_clipped() {
    let mut config = test_config();
    config.max_consume_batch = 3;
    let bus = running_bus(config).await;

    for i in 0..10u8 {
        bus.publish("alerts", Bytes::from(vec![i]), None).await.unwrap();
    }

    let batch = bus.consume("alerts", "sub1", None, 100).await.unwrap();
    assert_eq!(batch.len(), 3);
    bus.stop().await.unwrap();
}

struct FailingHandler;

#[async_trait::async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, _envelope: &MessageEnvelope) -> bool {
        false
    }
}

#[tokio::test]
async fn test_exhausted_retries_emit_terminal_failure_audit() {
    let bus = running_bus(test_config()).await;
    bus.subscribe("alerts", "sub1", Some(Arc::new(FailingHandler)))
        .unwrap();

    bus.publish("alerts", Bytes::from_static(b"x"), None).await.unwrap();

    // retry_delay 10ms with exponential backoff and max_retries 2: the
    // terminal failure lands within ~30ms plus scheduler jitter.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let stats = bus.processor().stats();
    assert_eq!(stats.total_retries, 2);
    assert_eq!(stats.total_failed, 1);

    let failures: Vec<_> = bus
        .security()
        .audit_events(&AuditQuery {
            event_type: Some(AuditEventType::MessagePublish),
            ..Default::default()
        })
        .into_iter()
        .filter(|e| e.result == AuditResult::Failure)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].details["reason"], "max retries exceeded");
    bus.stop().await.unwrap();
}

struct CountingTransport {
    sent: AtomicUsize,
}

#[async_trait::async_trait]
impl EndpointTransport for CountingTransport {
    async fn send(&self, _endpoint: &RouteEndpoint, _envelope: &MessageEnvelope) -> Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_dispatch_routes_through_registered_endpoints() {
    let bus = running_bus(test_config()).await;
    let transport = Arc::new(CountingTransport {
        sent: AtomicUsize::new(0),
    });
    bus.set_transport(transport.clone());
    bus.router()
        .add_endpoint(RouteEndpoint::new("e0", "sink-0", "10.0.0.1", 9000))
        .unwrap();

    for _ in 0..4 {
        bus.publish("alerts", Bytes::from_static(b"x"), None).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(transport.sent.load(Ordering::SeqCst), 4);
    let router_stats = bus.router().stats();
    assert_eq!(router_stats.counters.get("endpoint_e0"), Some(&4));
    assert_eq!(router_stats.counters.get("success_e0"), Some(&4));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_transaction_rollback_emits_audit() {
    let bus = running_bus(test_config()).await;
    let bus_ref = bus.clone();

    let result: pulsebus::Result<()> = bus
        .message_transaction(None, |scope| {
            let bus = bus_ref.clone();
            async move {
                let options = PublishOptions {
                    transaction_id: Some(scope.transaction_id.clone()),
                    ..Default::default()
                };
                bus.publish_with_options("alerts", Bytes::from_static(b"x"), options, None)
                    .await?;
                Err(BusError::Internal("downstream refused".to_string()))
            }
        })
        .await;
    assert!(result.is_err());

    let rollbacks: Vec<_> = bus
        .security()
        .audit_events(&AuditQuery::default())
        .into_iter()
        .filter(|e| e.action == "rollback")
        .collect();
    assert_eq!(rollbacks.len(), 1);
    assert!(rollbacks[0].resource.starts_with("transaction:"));

    // The publish inside the scope carries the same transaction id.
    let publishes = bus.security().audit_events(&AuditQuery {
        event_type: Some(AuditEventType::MessagePublish),
        ..Default::default()
    });
    let txn_resource = rollbacks[0].resource.trim_start_matches("transaction:");
    assert!(publishes
        .iter()
        .any(|e| e.details.get("transaction_id").map(|v| v == txn_resource).unwrap_or(false)));
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_health_and_info_surfaces() {
    let bus = running_bus(test_config()).await;

    let report = bus.health();
    assert_eq!(report.state, BusState::Running);
    assert!(report.components.contains_key("processor"));
    assert!(report.components.contains_key("router"));
    assert!(report.components.contains_key("storage"));
    assert!(report.components.contains_key("security"));

    bus.publish("alerts", Bytes::from_static(b"x"), None).await.unwrap();
    let info = bus.info();
    assert_eq!(info.state, BusState::Running);
    assert!(!info.node_id.is_empty());

    let summary = bus.metrics_summary();
    assert_eq!(summary.messages_published, 1);
    assert_eq!(summary.topics["alerts"].published, 1);
    bus.stop().await.unwrap();
}

#[tokio::test]
async fn test_priority_carries_through_publish_options() {
    let bus = running_bus(test_config()).await;

    let options = PublishOptions {
        priority: MessagePriority::Critical,
        ..Default::default()
    };
    bus.publish_with_options("alerts", Bytes::from_static(b"x"), options, None)
        .await
        .unwrap();

    let batch = bus.consume("alerts", "sub1", None, 10).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].priority, MessagePriority::Critical);
    bus.stop().await.unwrap();
}
