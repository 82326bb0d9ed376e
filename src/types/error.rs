//! Error types for fanout

/// Main error type for fanout operations
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    /// Broker connection or publish failure. Never fatal: the record or
    /// grant stays in its prior state and is retried by a later sweep.
    #[error("Broker unavailable: {0}")]
    Broker(String),

    /// Payload construction failed for a malformed or partial record.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FanoutError {
    /// Whether the failed operation is safe to retry later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Broker(_) | Self::Database(_))
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for FanoutError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for FanoutError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<mongodb::error::Error> for FanoutError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for FanoutError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for fanout operations
pub type Result<T> = std::result::Result<T, FanoutError>;
