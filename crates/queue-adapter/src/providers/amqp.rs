//! AMQP 0-9-1 broker implementation backed by `lapin`.
//!
//! Consumers are kept per channel as `lapin::Consumer` streams and read
//! with a timeout, so the adapter sees the same wait semantics as with the
//! in-memory broker:
//!
//! - an empty slice yields [`BrokerError::WaitTimeout`]
//! - a consumer stream that ends (cancelled by the broker or by the channel
//!   closing) yields [`BrokerError::ConsumerNotFound`]
//!
//! The broker pushes up to the prefetch count ahead of the reader. Cancelling
//! a consumer drains what is still buffered in its stream and hands it back
//! so the caller can reject it.

use crate::broker::{BrokerChannel, BrokerConnection};
use crate::config::AmqpConfig;
use crate::error::BrokerError;
use crate::message::{
    ChannelName, ConsumeOptions, ConsumerTag, Delivery, DeliveryMode, DeliveryTag,
    PublishProperties, QueueDeclareOptions,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, BasicRejectOptions, QueueDeclareOptions as LapinDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::{BasicProperties, Connection, ConnectionProperties, Consumer};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROVIDER: &str = "amqp";

/// Reply code sent when closing a channel normally
const REPLY_SUCCESS: u16 = 200;

/// How long a cancelled consumer's stream may stay silent while draining
const CANCEL_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

fn map_lapin_error(error: lapin::Error) -> BrokerError {
    match error {
        lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
            BrokerError::ChannelClosed
        }
        lapin::Error::IOError(io_error) => BrokerError::ConnectionFailed {
            message: io_error.to_string(),
        },
        other => BrokerError::ProviderError {
            provider: PROVIDER.to_string(),
            message: other.to_string(),
        },
    }
}

// ============================================================================
// AmqpConnection
// ============================================================================

/// Connection to an AMQP 0-9-1 broker
pub struct AmqpConnection {
    connection: Connection,
}

impl AmqpConnection {
    /// Connect to the broker at `config.uri`
    pub async fn connect(config: &AmqpConfig) -> Result<Self, BrokerError> {
        let mut properties = ConnectionProperties::default();
        if let Some(name) = &config.connection_name {
            properties.client_properties.insert(
                "connection_name".into(),
                AMQPValue::LongString(LongString::from(name.clone())),
            );
        }

        let connection = Connection::connect(&config.uri, properties)
            .await
            .map_err(|e| BrokerError::ConnectionFailed {
                message: e.to_string(),
            })?;

        info!(
            connection_name = config.connection_name.as_deref().unwrap_or(""),
            "Connected to AMQP broker"
        );
        Ok(Self { connection })
    }

    /// Close the connection and every channel on it
    pub async fn close(&self) -> Result<(), BrokerError> {
        self.connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(map_lapin_error)
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(map_lapin_error)?;
        debug!(channel_id = channel.id(), "AMQP channel opened");
        Ok(Box::new(AmqpChannel::new(channel)))
    }
}

// ============================================================================
// AmqpChannel
// ============================================================================

/// Channel on an [`AmqpConnection`]
pub struct AmqpChannel {
    channel: lapin::Channel,
    consumers: Mutex<HashMap<ConsumerTag, Consumer>>,
}

impl AmqpChannel {
    pub fn new(channel: lapin::Channel) -> Self {
        Self {
            channel,
            consumers: Mutex::new(HashMap::new()),
        }
    }

    fn convert_delivery(consumer_tag: &ConsumerTag, delivery: lapin::message::Delivery) -> Delivery {
        let delivery_mode = match delivery.properties.delivery_mode() {
            Some(2) => DeliveryMode::Persistent,
            _ => DeliveryMode::Transient,
        };

        Delivery {
            delivery_tag: DeliveryTag::new(delivery.delivery_tag),
            consumer_tag: consumer_tag.clone(),
            routing_key: delivery.routing_key.as_str().to_string(),
            redelivered: delivery.redelivered,
            delivery_mode,
            body: Bytes::from(delivery.data),
        }
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_queue(
        &self,
        queue: &ChannelName,
        options: QueueDeclareOptions,
    ) -> Result<(), BrokerError> {
        let lapin_options = LapinDeclareOptions {
            passive: options.passive,
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            nowait: false,
        };

        self.channel
            .queue_declare(queue.as_str(), lapin_options, FieldTable::default())
            .await
            .map_err(|e| match map_lapin_error(e) {
                BrokerError::ProviderError { message, .. } => BrokerError::DeclareFailed {
                    queue: queue.to_string(),
                    message,
                },
                other => other,
            })?;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: PublishProperties,
    ) -> Result<(), BrokerError> {
        let amqp_properties =
            BasicProperties::default().with_delivery_mode(properties.delivery_mode.as_u8());

        // Confirms are not enabled on this channel, so the returned handle is dropped
        self.channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                amqp_properties,
            )
            .await
            .map_err(map_lapin_error)?;
        Ok(())
    }

    async fn set_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(map_lapin_error)
    }

    async fn consume(
        &self,
        queue: &ChannelName,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<ConsumerTag, BrokerError> {
        let lapin_options = BasicConsumeOptions {
            no_local: options.no_local,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            nowait: options.no_wait,
        };

        let consumer = self
            .channel
            .basic_consume(
                queue.as_str(),
                consumer_tag,
                lapin_options,
                FieldTable::default(),
            )
            .await
            .map_err(map_lapin_error)?;

        let tag = ConsumerTag::new(consumer.tag().as_str());
        self.consumers.lock().await.insert(tag.clone(), consumer);
        debug!(queue = %queue, consumer_tag = %tag, "AMQP consumer registered");
        Ok(tag)
    }

    async fn wait(
        &self,
        consumer_tag: &ConsumerTag,
        timeout: Duration,
    ) -> Result<Delivery, BrokerError> {
        let mut consumers = self.consumers.lock().await;
        let Some(consumer) = consumers.get_mut(consumer_tag) else {
            return Err(BrokerError::ConsumerNotFound {
                consumer_tag: consumer_tag.to_string(),
            });
        };

        match tokio::time::timeout(timeout, consumer.next()).await {
            Err(_) => Err(BrokerError::WaitTimeout { duration: timeout }),
            Ok(Some(Ok(delivery))) => Ok(Self::convert_delivery(consumer_tag, delivery)),
            Ok(Some(Err(e))) => Err(map_lapin_error(e)),
            Ok(None) => {
                consumers.remove(consumer_tag);
                debug!(consumer_tag = %consumer_tag, "AMQP consumer stream ended");
                Err(BrokerError::ConsumerNotFound {
                    consumer_tag: consumer_tag.to_string(),
                })
            }
        }
    }

    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery_tag.value(), BasicAckOptions::default())
            .await
            .map_err(map_lapin_error)
    }

    async fn reject(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_reject(delivery_tag.value(), BasicRejectOptions { requeue })
            .await
            .map_err(map_lapin_error)
    }

    async fn cancel(&self, consumer_tag: &ConsumerTag) -> Result<Vec<Delivery>, BrokerError> {
        let Some(mut consumer) = self.consumers.lock().await.remove(consumer_tag) else {
            return Err(BrokerError::ConsumerNotFound {
                consumer_tag: consumer_tag.to_string(),
            });
        };

        self.channel
            .basic_cancel(consumer_tag.as_str(), BasicCancelOptions::default())
            .await
            .map_err(map_lapin_error)?;

        // Deliveries pushed before cancel-ok are still queued in the stream
        let mut stranded = Vec::new();
        loop {
            match tokio::time::timeout(CANCEL_DRAIN_TIMEOUT, consumer.next()).await {
                Ok(Some(Ok(delivery))) => {
                    stranded.push(Self::convert_delivery(consumer_tag, delivery));
                }
                Ok(Some(Err(e))) => {
                    warn!(consumer_tag = %consumer_tag, error = %e, "AMQP consumer failed while draining");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(consumer_tag = %consumer_tag, "AMQP consumer stream did not end after cancel");
                    break;
                }
            }
        }

        debug!(
            consumer_tag = %consumer_tag,
            stranded = stranded.len(),
            "AMQP consumer cancelled"
        );
        Ok(stranded)
    }

    async fn is_consuming(&self, consumer_tag: &ConsumerTag) -> bool {
        self.channel.status().connected()
            && self.consumers.lock().await.contains_key(consumer_tag)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.consumers.lock().await.clear();
        self.channel
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(map_lapin_error)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
