//! Composite health aggregation.
//!
//! The checker holds narrow handles to the components, never the bus itself,
//! so it observes state without owning any lifecycle.

use crate::bus::BusState;
use crate::metrics::BusMetrics;
use crate::processor::{MessageProcessor, ProcessorState};
use crate::router::SmartRouter;
use crate::security::SecurityManager;
use crate::storage::{DistributedStorageManager, StorageStatus};
use crate::util::SharedClock;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Component-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unavailable,
}

/// One component's health view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub details: serde_json::Value,
}

/// Composite health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub service_name: String,
    pub service_version: String,
    pub node_id: String,
    pub state: BusState,
    pub uptime_ms: u64,
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub timestamp_secs: f64,
}

/// Periodic health aggregator over the bus components.
pub struct HealthChecker {
    service_name: String,
    service_version: String,
    node_id: String,
    state: Arc<RwLock<BusState>>,
    processor: Arc<MessageProcessor>,
    router: Arc<SmartRouter>,
    storage: Arc<DistributedStorageManager>,
    security: Arc<SecurityManager>,
    metrics: Arc<BusMetrics>,
    clock: SharedClock,
    start_time_ms: Arc<RwLock<u64>>,
}

impl HealthChecker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_name: String,
        service_version: String,
        node_id: String,
        state: Arc<RwLock<BusState>>,
        processor: Arc<MessageProcessor>,
        router: Arc<SmartRouter>,
        storage: Arc<DistributedStorageManager>,
        security: Arc<SecurityManager>,
        metrics: Arc<BusMetrics>,
        clock: SharedClock,
        start_time_ms: Arc<RwLock<u64>>,
    ) -> Self {
        Self {
            service_name,
            service_version,
            node_id,
            state,
            processor,
            router,
            storage,
            security,
            metrics,
            clock,
            start_time_ms,
        }
    }

    /// Collate per-component status into a composite record. DEGRADED when
    /// any component is degraded but none unavailable; UNAVAILABLE when any
    /// component is unavailable.
    pub fn check(&self) -> HealthReport {
        let mut components = HashMap::new();
        components.insert("processor".to_string(), self.processor_health());
        components.insert("router".to_string(), self.router_health());
        components.insert("storage".to_string(), self.storage_health());
        components.insert("security".to_string(), self.security_health());
        components.insert("metrics".to_string(), self.metrics_health());

        let status = if components
            .values()
            .any(|c| c.status == ComponentStatus::Unavailable)
        {
            ComponentStatus::Unavailable
        } else if components
            .values()
            .any(|c| c.status == ComponentStatus::Degraded)
        {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };

        let now_ms = self.clock.now_ms();
        let started = *self.start_time_ms.read();
        HealthReport {
            service_name: self.service_name.clone(),
            service_version: self.service_version.clone(),
            node_id: self.node_id.clone(),
            state: *self.state.read(),
            uptime_ms: if started > 0 {
                now_ms.saturating_sub(started)
            } else {
                0
            },
            status,
            components,
            timestamp_secs: self.clock.now_secs_f64(),
        }
    }

    fn processor_health(&self) -> ComponentHealth {
        let stats = self.processor.stats();
        let status = match self.processor.state() {
            ProcessorState::Running => ComponentStatus::Healthy,
            ProcessorState::Starting | ProcessorState::Stopping => ComponentStatus::Degraded,
            ProcessorState::Stopped | ProcessorState::Error => ComponentStatus::Unavailable,
        };
        ComponentHealth {
            status,
            details: serde_json::to_value(&stats).unwrap_or_default(),
        }
    }

    fn router_health(&self) -> ComponentHealth {
        let stats = self.router.stats();
        let status = if stats.total_endpoints == 0 {
            // A router with no registered endpoints is idle, not broken.
            ComponentStatus::Healthy
        } else if stats.active_endpoints == 0 {
            ComponentStatus::Unavailable
        } else if stats.active_endpoints < stats.total_endpoints {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };
        ComponentHealth {
            status,
            details: serde_json::to_value(&stats).unwrap_or_default(),
        }
    }

    fn storage_health(&self) -> ComponentHealth {
        let status = match self.storage.status() {
            StorageStatus::Healthy => ComponentStatus::Healthy,
            StorageStatus::Degraded | StorageStatus::Maintenance => ComponentStatus::Degraded,
            StorageStatus::Unavailable => ComponentStatus::Unavailable,
        };
        let stats = self.storage.stats();
        ComponentHealth {
            status,
            details: serde_json::json!({
                "cluster": {
                    "total_brokers": stats.total_brokers,
                    "healthy_brokers": stats.healthy_brokers,
                    "total_topics": stats.total_topics,
                }
            }),
        }
    }

    fn security_health(&self) -> ComponentHealth {
        ComponentHealth {
            status: ComponentStatus::Healthy,
            details: serde_json::to_value(self.security.stats()).unwrap_or_default(),
        }
    }

    fn metrics_health(&self) -> ComponentHealth {
        ComponentHealth {
            status: ComponentStatus::Healthy,
            details: serde_json::to_value(self.metrics.summary()).unwrap_or_default(),
        }
    }
}
