//! Broker client traits.
//!
//! The adapter never talks to a broker directly. It drives a
//! [`BrokerChannel`] obtained from an already-established
//! [`BrokerConnection`]. Implementations live in [`crate::providers`].

use crate::error::BrokerError;
use crate::message::{
    ChannelName, ConsumeOptions, ConsumerTag, Delivery, DeliveryTag, PublishProperties,
    QueueDeclareOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// An established connection to a broker
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a new channel on this connection
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// A channel on a broker connection.
///
/// A channel is owned by a single caller; implementations do not need to
/// support concurrent use beyond being `Send + Sync`.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a queue, creating it when absent
    async fn declare_queue(
        &self,
        queue: &ChannelName,
        options: QueueDeclareOptions,
    ) -> Result<(), BrokerError>;

    /// Publish a payload without waiting for a publisher confirm
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: PublishProperties,
    ) -> Result<(), BrokerError>;

    /// Limit unacknowledged deliveries per consumer created afterwards.
    /// Zero means unlimited.
    async fn set_qos(&self, prefetch_count: u16) -> Result<(), BrokerError>;

    /// Register a consumer on a queue. An empty tag asks the broker to generate one.
    async fn consume(
        &self,
        queue: &ChannelName,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<ConsumerTag, BrokerError>;

    /// Wait up to `timeout` for the next delivery to a consumer.
    ///
    /// Returns [`BrokerError::WaitTimeout`] when nothing arrives in time and
    /// [`BrokerError::ConsumerNotFound`] once the consumer is gone.
    async fn wait(
        &self,
        consumer_tag: &ConsumerTag,
        timeout: Duration,
    ) -> Result<Delivery, BrokerError>;

    /// Acknowledge a single delivery
    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), BrokerError>;

    /// Reject a single delivery. With `requeue` the message returns to the
    /// head of its queue marked redelivered, otherwise it is discarded.
    async fn reject(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError>;

    /// Cancel a consumer.
    ///
    /// Returns the deliveries the broker pushed to the consumer that were never
    /// handed out by [`BrokerChannel::wait`]. These, like every delivery the
    /// consumer has not acknowledged, stay outstanding on the channel until
    /// they are acked, rejected, or the channel closes.
    async fn cancel(&self, consumer_tag: &ConsumerTag) -> Result<Vec<Delivery>, BrokerError>;

    /// Check whether a consumer registration is still active
    async fn is_consuming(&self, consumer_tag: &ConsumerTag) -> bool;

    /// Close the channel; all its unacknowledged deliveries return to their queues
    async fn close(&self) -> Result<(), BrokerError>;

    /// Get provider name, for logging
    fn provider_name(&self) -> &'static str;
}
