//! Queue adapter trait and its broker-backed implementation.
//!
//! Every public operation first declares its queue (durable, shared,
//! long-lived) and then:
//!
//! - `put` publishes a tagged, persistent payload through the default exchange
//! - `pull_one` consumes with prefetch 1, cancels its consumer, acknowledges
//!   the first delivery and gives up after the configured budget (10 s by
//!   default)
//! - `pull` / `pull_until` hand every delivery to a handler and acknowledge
//!   only the ones the handler accepts
//!
//! Consumers registered by a pull are cancelled on every exit path. Deliveries
//! the broker pushed to a consumer that was never read are rejected with
//! requeue, so they go back to the head of the queue instead of staying
//! stranded on the channel.

use crate::broker::{BrokerChannel, BrokerConnection};
use crate::config::{AdapterConfig, BrokerConfig, InMemoryConfig, QueueAdapterConfig};
use crate::envelope::{self, QueueValue};
use crate::error::{BrokerError, QueueError};
use crate::message::{
    ChannelName, ConsumeOptions, ConsumerTag, Delivery, PublishProperties, QueueDeclareOptions,
    DEFAULT_EXCHANGE,
};
use crate::providers::{InMemoryBroker, InMemoryConnection};
use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "adapter_tests.rs"]
mod tests;

/// Prefetch used by `pull_one`, so at most one message is in flight
const PULL_ONE_PREFETCH: u16 = 1;

/// Receives decoded values from a continuous pull.
///
/// Returning `true` acknowledges the message; `false` leaves it
/// unacknowledged so the broker redelivers it later.
pub trait ValueHandler: Send {
    fn handle(&mut self, value: QueueValue) -> bool;
}

impl<F> ValueHandler for F
where
    F: FnMut(QueueValue) -> bool + Send,
{
    fn handle(&mut self, value: QueueValue) -> bool {
        self(value)
    }
}

/// Publish/consume interface over a named queue
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Publish a value to the queue named `channel`
    async fn put(&self, channel: &ChannelName, value: QueueValue) -> Result<(), QueueError>;

    /// Feed every message of the queue to `handler` until the consumer is
    /// cancelled or the connection drops
    async fn pull(
        &self,
        channel: &ChannelName,
        handler: &mut dyn ValueHandler,
    ) -> Result<(), QueueError>;

    /// Like [`QueueAdapter::pull`], but also stops when `shutdown` fires
    async fn pull_until(
        &self,
        channel: &ChannelName,
        handler: &mut dyn ValueHandler,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueError>;

    /// Take a single message, or [`QueueValue::Null`] when none arrives in time
    async fn pull_one(&self, channel: &ChannelName) -> Result<QueueValue, QueueError>;
}

// ============================================================================
// Single Pull State Machine
// ============================================================================

/// Progress of a `pull_one` call
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PullOneState {
    /// No delivery handled yet
    Waiting,
    /// First delivery decoded, consumer cancelled, delivery acknowledged
    Completed(QueueValue),
}

impl PullOneState {
    pub(crate) fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Apply a delivery.
    ///
    /// Only the first one is decoded and acknowledged, using its own delivery
    /// tag. The consumer is cancelled before the ack so the broker cannot push
    /// a replacement into it. Later deliveries are rejected with requeue.
    pub(crate) async fn on_delivery(
        self,
        channel: &dyn BrokerChannel,
        consumer: &ConsumerTag,
        delivery: Delivery,
    ) -> Result<Self, QueueError> {
        match self {
            Self::Waiting => {
                let value = envelope::decode(&delivery.body)?;
                release_consumer(channel, consumer).await;
                channel.ack(delivery.delivery_tag).await?;
                debug!(delivery_tag = %delivery.delivery_tag, "Single pull acknowledged delivery");
                Ok(Self::Completed(value))
            }
            completed @ Self::Completed(_) => {
                warn!(
                    delivery_tag = %delivery.delivery_tag,
                    "Returning delivery received after single pull completed"
                );
                channel.reject(delivery.delivery_tag, true).await?;
                Ok(completed)
            }
        }
    }

    pub(crate) fn into_value(self) -> QueueValue {
        match self {
            Self::Waiting => QueueValue::Null,
            Self::Completed(value) => value,
        }
    }
}

/// Cancel a consumer created by a pull and requeue whatever the broker pushed
/// to it that was never read. Failures are logged, not returned, so they never
/// mask the outcome of the pull itself.
async fn release_consumer(channel: &dyn BrokerChannel, consumer: &ConsumerTag) {
    let stranded = match channel.cancel(consumer).await {
        Ok(stranded) => stranded,
        Err(BrokerError::ConsumerNotFound { .. }) | Err(BrokerError::ChannelClosed) => {
            debug!(consumer_tag = %consumer, "Consumer already gone");
            return;
        }
        Err(e) => {
            warn!(consumer_tag = %consumer, error = %e, "Failed to cancel consumer");
            return;
        }
    };

    let requeued = stranded.len();
    // Newest first, so the head of the queue keeps its original order
    for delivery in stranded.into_iter().rev() {
        if let Err(e) = channel.reject(delivery.delivery_tag, true).await {
            warn!(
                consumer_tag = %consumer,
                delivery_tag = %delivery.delivery_tag,
                error = %e,
                "Failed to requeue unread delivery"
            );
        }
    }
    debug!(consumer_tag = %consumer, requeued, "Consumer cancelled");
}

// ============================================================================
// StandardQueueAdapter
// ============================================================================

/// Queue adapter driving one exclusively owned broker channel
pub struct StandardQueueAdapter {
    channel: Box<dyn BrokerChannel>,
    config: AdapterConfig,
    /// Set when the adapter created the connection itself
    _connection: Option<Box<dyn BrokerConnection>>,
}

impl StandardQueueAdapter {
    /// Create adapter with its own channel on an established connection
    pub async fn new(
        connection: &dyn BrokerConnection,
        config: AdapterConfig,
    ) -> Result<Self, QueueError> {
        let channel = connection.create_channel().await?;
        Ok(Self::from_channel(channel, config))
    }

    /// Create adapter that also keeps its connection alive
    pub async fn with_owned_connection(
        connection: Box<dyn BrokerConnection>,
        config: AdapterConfig,
    ) -> Result<Self, QueueError> {
        let channel = connection.create_channel().await?;
        Ok(Self {
            channel,
            config,
            _connection: Some(connection),
        })
    }

    /// Create adapter over an already opened channel
    pub fn from_channel(channel: Box<dyn BrokerChannel>, config: AdapterConfig) -> Self {
        Self {
            channel,
            config,
            _connection: None,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Close the owned channel, returning outstanding deliveries to their queues
    pub async fn close(&self) -> Result<(), QueueError> {
        self.channel.close().await?;
        Ok(())
    }

    async fn ensure_queue(&self, channel: &ChannelName) -> Result<(), QueueError> {
        self.channel
            .declare_queue(channel, QueueDeclareOptions::durable())
            .await?;
        debug!(channel = %channel, provider = self.channel.provider_name(), "Queue declared");
        Ok(())
    }

    async fn drive_pull_one(&self, consumer: &ConsumerTag) -> Result<QueueValue, QueueError> {
        let started = Instant::now();
        let budget = self.config.pull_one_timeout();
        let mut state = PullOneState::Waiting;

        while state.is_waiting() && self.channel.is_consuming(consumer).await {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                break;
            }
            let slice = self.config.pull_one_wait_slice().min(budget - elapsed);

            match self.channel.wait(consumer, slice).await {
                Ok(delivery) => {
                    state = state
                        .on_delivery(self.channel.as_ref(), consumer, delivery)
                        .await?
                }
                Err(e) if e.is_timeout() => continue,
                Err(BrokerError::ConsumerNotFound { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(state.into_value())
    }

    async fn drive_pull(
        &self,
        consumer: &ConsumerTag,
        handler: &mut dyn ValueHandler,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueError> {
        let slice = self.config.pull_wait_slice();

        loop {
            if shutdown.is_cancelled() || !self.channel.is_consuming(consumer).await {
                return Ok(());
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = self.channel.wait(consumer, slice) => result,
            };

            match result {
                Ok(delivery) => self.dispatch(delivery, handler).await?,
                Err(e) if e.is_timeout() => continue,
                Err(BrokerError::ConsumerNotFound { .. }) | Err(BrokerError::ChannelClosed) => {
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn dispatch(
        &self,
        delivery: Delivery,
        handler: &mut dyn ValueHandler,
    ) -> Result<(), QueueError> {
        let value = envelope::decode(&delivery.body)?;

        if handler.handle(value) {
            self.channel.ack(delivery.delivery_tag).await?;
            debug!(delivery_tag = %delivery.delivery_tag, "Delivery acknowledged");
        } else {
            warn!(
                delivery_tag = %delivery.delivery_tag,
                routing_key = %delivery.routing_key,
                "Handler declined delivery; leaving it unacknowledged"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl QueueAdapter for StandardQueueAdapter {
    async fn put(&self, channel: &ChannelName, value: QueueValue) -> Result<(), QueueError> {
        self.ensure_queue(channel).await?;

        let payload = envelope::encode(&value)?;
        let size = payload.len();
        self.channel
            .publish(
                DEFAULT_EXCHANGE,
                channel.as_str(),
                payload,
                PublishProperties::persistent(),
            )
            .await?;

        debug!(channel = %channel, size, "Message published");
        Ok(())
    }

    async fn pull(
        &self,
        channel: &ChannelName,
        handler: &mut dyn ValueHandler,
    ) -> Result<(), QueueError> {
        let never = CancellationToken::new();
        self.pull_until(channel, handler, &never).await
    }

    async fn pull_until(
        &self,
        channel: &ChannelName,
        handler: &mut dyn ValueHandler,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueError> {
        self.ensure_queue(channel).await?;
        // A previous single pull may have left prefetch 1 on the channel
        self.channel.set_qos(0).await?;
        let consumer = self
            .channel
            .consume(channel, "", ConsumeOptions::default())
            .await?;
        info!(channel = %channel, consumer_tag = %consumer, "Continuous pull started");

        let outcome = self.drive_pull(&consumer, handler, shutdown).await;
        release_consumer(self.channel.as_ref(), &consumer).await;

        match &outcome {
            Ok(()) => info!(channel = %channel, "Continuous pull stopped"),
            Err(e) => warn!(channel = %channel, error = %e, "Continuous pull failed"),
        }
        outcome
    }

    async fn pull_one(&self, channel: &ChannelName) -> Result<QueueValue, QueueError> {
        self.ensure_queue(channel).await?;
        self.channel.set_qos(PULL_ONE_PREFETCH).await?;
        let consumer = self
            .channel
            .consume(channel, "", ConsumeOptions::default())
            .await?;

        let outcome = self.drive_pull_one(&consumer).await;
        // No-op when the first delivery already released it
        release_consumer(self.channel.as_ref(), &consumer).await;

        if let Ok(value) = &outcome {
            debug!(channel = %channel, empty = value.is_null(), "Single pull finished");
        }
        outcome
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Factory for creating queue adapters from configuration
pub struct QueueAdapterFactory;

impl QueueAdapterFactory {
    /// Connect to the configured broker and create an adapter
    pub async fn create_adapter(
        config: QueueAdapterConfig,
    ) -> Result<StandardQueueAdapter, QueueError> {
        config.validate()?;

        let connection: Box<dyn BrokerConnection> = match &config.broker {
            BrokerConfig::InMemory(in_memory_config) => {
                Box::new(InMemoryBroker::new(in_memory_config.clone()).connect())
            }
            #[cfg(feature = "amqp")]
            BrokerConfig::Amqp(amqp_config) => Box::new(
                crate::providers::AmqpConnection::connect(amqp_config).await?,
            ),
            #[cfg(not(feature = "amqp"))]
            BrokerConfig::Amqp(_) => {
                return Err(QueueError::Configuration(
                    crate::error::ConfigurationError::UnsupportedProvider {
                        provider: "amqp".to_string(),
                        message: "built without the 'amqp' feature".to_string(),
                    },
                ));
            }
        };

        info!(provider = ?config.broker.provider_type(), "Creating queue adapter");
        StandardQueueAdapter::with_owned_connection(connection, config.adapter).await
    }

    /// Create adapter on a fresh in-memory broker, returning the broker for inspection
    pub async fn create_test_adapter() -> Result<(InMemoryBroker, StandardQueueAdapter), QueueError>
    {
        let broker = InMemoryBroker::new(InMemoryConfig::default());
        let connection: InMemoryConnection = broker.connect();
        let adapter =
            StandardQueueAdapter::with_owned_connection(Box::new(connection), AdapterConfig::default())
                .await?;
        Ok((broker, adapter))
    }
}
