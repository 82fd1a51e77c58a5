//! Message types for broker operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated channel name, used both as the queue name and the routing key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelName(String);

impl ChannelName {
    /// Maximum length of a queue name in UTF-8 bytes
    pub const MAX_LEN: usize = 255;

    /// Create new channel name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "channel_name".to_string(),
            });
        }

        // Length is measured in bytes, not characters
        if name.len() > Self::MAX_LEN {
            return Err(ValidationError::OutOfRange {
                field: "channel_name".to_string(),
                message: format!("must be at most {} UTF-8 bytes", Self::MAX_LEN),
            });
        }

        if name.chars().any(|c| c.is_control()) {
            return Err(ValidationError::InvalidFormat {
                field: "channel_name".to_string(),
                message: "control characters are not allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get channel name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChannelName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<&str> for ChannelName {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

/// Broker-assigned identifier of a single delivery on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a consumer registration, valid within one channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerTag(String);

impl ConsumerTag {
    /// Create consumer tag from a broker-supplied string
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Generate a random consumer tag, as brokers do for an empty request
    pub fn generate() -> Self {
        Self(format!("ctag-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get consumer tag as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Broker Operation Options
// ============================================================================

/// Flags sent with a queue declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDeclareOptions {
    /// Only check that the queue exists, never create or modify it
    pub passive: bool,
    /// Queue survives a broker restart
    pub durable: bool,
    /// Queue is private to the declaring connection
    pub exclusive: bool,
    /// Queue is deleted once its last consumer unsubscribes
    pub auto_delete: bool,
}

impl QueueDeclareOptions {
    /// Flags used for every adapter queue: durable, shared and long-lived
    pub const fn durable() -> Self {
        Self {
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Persistence of a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Held in memory only (AMQP delivery-mode 1)
    #[default]
    Transient,
    /// Persisted to disk, survives a restart of a durable queue (delivery-mode 2)
    Persistent,
}

impl DeliveryMode {
    /// AMQP wire value of the delivery mode
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Transient => 1,
            Self::Persistent => 2,
        }
    }
}

/// Properties attached to a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishProperties {
    pub delivery_mode: DeliveryMode,
}

impl PublishProperties {
    /// Properties for a message that must survive a broker restart
    pub fn persistent() -> Self {
        Self {
            delivery_mode: DeliveryMode::Persistent,
        }
    }
}

/// Flags sent with a consumer registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsumeOptions {
    /// Do not deliver messages published on this connection
    pub no_local: bool,
    /// Broker treats messages as acknowledged once delivered
    pub no_ack: bool,
    /// Only this consumer may read from the queue
    pub exclusive: bool,
    /// Do not wait for the broker to confirm the registration
    pub no_wait: bool,
}

/// Name of the default exchange, which routes by queue name
pub const DEFAULT_EXCHANGE: &str = "";

// ============================================================================
// Delivery
// ============================================================================

/// A message delivered to a consumer, awaiting acknowledgement
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: DeliveryTag,
    pub consumer_tag: ConsumerTag,
    pub routing_key: String,
    pub redelivered: bool,
    pub delivery_mode: DeliveryMode,
    pub body: Bytes,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
