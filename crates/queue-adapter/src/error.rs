//! Error types for queue adapter operations.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type returned by every adapter operation
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl QueueError {
    /// Check if error is transient and the operation may succeed when repeated
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Broker(broker_error) => broker_error.is_transient(),
            Self::Envelope(_) => false,
            Self::Validation(_) => false,
            Self::Configuration(_) => false,
        }
    }
}

/// Failures reported by a broker client
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Queue '{queue}' could not be declared: {message}")]
    DeclareFailed { queue: String, message: String },

    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Queue '{queue}' is full ({max_size} messages)")]
    QueueFull { queue: String, max_size: usize },

    #[error("Consumer not found: {consumer_tag}")]
    ConsumerNotFound { consumer_tag: String },

    #[error("Unknown delivery tag: {delivery_tag}")]
    UnknownDeliveryTag { delivery_tag: u64 },

    #[error("Wait timed out after {duration:?}")]
    WaitTimeout { duration: Duration },

    #[error("Provider error ({provider}): {message}")]
    ProviderError { provider: String, message: String },
}

impl BrokerError {
    /// Check if this is the "nothing arrived yet" signal of the wait primitive
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } => true,
            Self::ChannelClosed => false,
            Self::DeclareFailed { .. } => false,
            Self::QueueNotFound { .. } => false,
            Self::QueueFull { .. } => true,
            Self::ConsumerNotFound { .. } => false,
            Self::UnknownDeliveryTag { .. } => false,
            Self::WaitTimeout { .. } => true,
            Self::ProviderError { .. } => true,
        }
    }
}

/// Errors while encoding or decoding a message envelope
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Structured body is not valid JSON: {0}")]
    StructuredText(#[from] serde_json::Error),

    #[error("Object body could not be encoded: {0}")]
    ObjectEncode(#[from] rmp_serde::encode::Error),

    #[error("Object body could not be decoded: {0}")]
    ObjectDecode(#[from] rmp_serde::decode::Error),

    #[error("Text body is not valid UTF-8")]
    InvalidUtf8,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Unsupported broker provider '{provider}': {message}")]
    UnsupportedProvider { provider: String, message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
