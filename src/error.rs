use thiserror::Error;

/// Crate-wide error taxonomy surfaced to bus callers.
#[derive(Error, Debug)]
pub enum BusError {
    // Configuration errors - fatal at init
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    // Lifecycle errors
    #[error("bus is not running (state: {0})")]
    NotRunning(String),

    #[error("bus is already running")]
    AlreadyRunning,

    #[error("bus is shutting down")]
    ShuttingDown,

    // Identity errors
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    // Validation errors
    #[error("payload too large: {size} bytes exceeds limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    // Capacity errors
    #[error("queue full for priority {0}")]
    QueueFull(String),

    #[error("no route available for topic {0}")]
    NoRoute(String),

    #[error("circuit breaker open for endpoint {0}")]
    BreakerOpen(String),

    // Substrate errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("insufficient brokers: {healthy} healthy, {required} required")]
    InsufficientBrokers { healthy: usize, required: usize },

    // Transient errors
    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    // Internal
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("submit failed: {0}")]
    SubmitFailed(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BusError {
    /// Service exit code for this error class: 1 for configuration problems
    /// at init, 2 for start failures, 3 for unrecoverable runtime errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            BusError::InvalidConfig(_) | BusError::MissingDependency(_) => 1,
            BusError::AlreadyRunning | BusError::NotRunning(_) => 2,
            _ => 3,
        }
    }

    /// Whether the processor may retry the failed operation locally.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::Storage(_)
                | BusError::Metadata(_)
                | BusError::Consistency(_)
                | BusError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BusError>;

// Error conversions for common error types

impl From<serde_json::Error> for BusError {
    fn from(e: serde_json::Error) -> Self {
        BusError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(BusError::InvalidConfig("bad".into()).exit_code(), 1);
        assert_eq!(BusError::AlreadyRunning.exit_code(), 2);
        assert_eq!(BusError::Storage("append".into()).exit_code(), 3);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BusError::Storage("transient".into()).is_retryable());
        assert!(BusError::Timeout("deadline".into()).is_retryable());
        assert!(!BusError::Forbidden("no write".into()).is_retryable());
        assert!(!BusError::QueueFull("HIGH".into()).is_retryable());
    }
}
