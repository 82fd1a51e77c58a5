//! Broker implementations.
//!
//! This module contains concrete implementations of the `BrokerConnection`
//! and `BrokerChannel` traits for different brokers.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod memory;

#[cfg(feature = "amqp")]
pub use amqp::{AmqpChannel, AmqpConnection};
pub use memory::{InMemoryBroker, InMemoryChannel, InMemoryConnection};
