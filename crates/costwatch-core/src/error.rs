//! Error types for costwatch

use thiserror::Error;

/// Result type alias using costwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for costwatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (invalid threshold, malformed filter, bad JSON mapping)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Billing data retrieval failed
    #[error("Retrieval error: {message}")]
    Retrieval {
        /// Description of the failure
        message: String,
        /// Whether retrying may succeed (timeouts, throttling)
        transient: bool,
    },

    /// Alert delivery failed
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// Config file layering error
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a retrieval error that is worth retrying
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Retrieval {
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a retrieval error that will not succeed on retry
    pub fn retrieval(msg: impl Into<String>) -> Self {
        Self::Retrieval {
            message: msg.into(),
            transient: false,
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the operation that produced this error may succeed if retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Retrieval { transient, .. } => *transient,
            Self::Delivery(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Delivery errors reported by a message sender
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Transport failure or a 5xx response
    #[error("HTTP error: {0}")]
    Http(String),

    /// HTTP 429 or a `ratelimited` API error
    #[error("Rate limited by chat API (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Seconds from the `Retry-After` header
        retry_after_secs: Option<u64>,
    },

    /// The API refused the request; retrying will not help
    #[error("Chat API rejected message: {0}")]
    Rejected(String),

    /// No response within the request timeout
    #[error("Timed out delivering message")]
    Timeout,
}

impl DeliveryError {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::RateLimited { .. } | Self::Timeout)
    }
}
