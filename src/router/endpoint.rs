//! Route endpoint model.

use serde::{Deserialize, Serialize};

/// Endpoint operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Active,
    Inactive,
    Degraded,
    Maintenance,
}

/// Logical downstream target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEndpoint {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub weight: u32,
    pub max_connections: u32,
    pub current_connections: u32,
    pub status: EndpointStatus,
    /// Bounded health summary in [0, 1]
    pub health_score: f64,
    /// EMA of observed response time, milliseconds
    pub response_time_ms: f64,
    /// EMA of request failure rate in [0, 1]
    pub error_rate: f64,
    pub last_health_check_ms: u64,
}

impl RouteEndpoint {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            weight: 1,
            max_connections: 100,
            current_connections: 0,
            status: EndpointStatus::Active,
            health_score: 1.0,
            response_time_ms: 0.0,
            error_rate: 0.0,
            last_health_check_ms: 0,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// `current_connections / max_connections`
    pub fn load_factor(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        self.current_connections as f64 / self.max_connections as f64
    }

    /// Availability under the endpoint's own state. Circuit-breaker state is
    /// layered on top by the router.
    pub fn is_available(&self) -> bool {
        self.status == EndpointStatus::Active
            && self.health_score > 0.5
            && self.current_connections < self.max_connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_factor() {
        let mut ep = RouteEndpoint::new("e1", "primary", "10.0.0.1", 9000).with_max_connections(50);
        assert_eq!(ep.load_factor(), 0.0);
        ep.current_connections = 25;
        assert_eq!(ep.load_factor(), 0.5);
    }

    #[test]
    fn test_availability_gates() {
        let mut ep = RouteEndpoint::new("e1", "primary", "10.0.0.1", 9000).with_max_connections(2);
        assert!(ep.is_available());

        ep.health_score = 0.5;
        assert!(!ep.is_available());

        ep.health_score = 0.9;
        ep.current_connections = 2;
        assert!(!ep.is_available());

        ep.current_connections = 0;
        ep.status = EndpointStatus::Maintenance;
        assert!(!ep.is_available());
    }
}
