//! # Queue Adapter
//!
//! Named-queue messaging over a broker with typed values. A value is
//! published to a durable queue with a one-byte envelope tag that records
//! its kind, and is restored to the same kind when pulled.
//!
//! This library provides:
//! - Publishing structured, object, text and number values
//! - Single pulls with a bounded wait that acknowledge exactly one message
//! - Continuous pulls that acknowledge only what the handler accepts
//! - An in-memory broker and an AMQP 0-9-1 broker (feature `amqp`)
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all adapter operations
//! - [`envelope`] - Value types and the tagged payload codec
//! - [`message`] - Channel names, broker identifiers and options
//! - [`broker`] - Broker connection and channel traits
//! - [`providers`] - Broker implementations
//! - [`config`] - Broker and adapter configuration
//! - [`adapter`] - Adapter trait, implementation and factory

// Module declarations
pub mod adapter;
pub mod broker;
pub mod config;
pub mod envelope;
pub mod error;
pub mod message;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use adapter::{QueueAdapter, QueueAdapterFactory, StandardQueueAdapter, ValueHandler};
pub use broker::{BrokerChannel, BrokerConnection};
pub use config::{
    AdapterConfig, AmqpConfig, BrokerConfig, InMemoryConfig, ProviderType, QueueAdapterConfig,
};
pub use envelope::{EnvelopeTag, OpaqueObject, QueueValue};
pub use error::{BrokerError, ConfigurationError, EnvelopeError, QueueError, ValidationError};
pub use message::{ChannelName, ConsumerTag, Delivery, DeliveryMode, DeliveryTag};
pub use providers::InMemoryBroker;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
