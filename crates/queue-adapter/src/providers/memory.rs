//! In-memory broker implementation for testing and development.
//!
//! This module provides an in-process broker that follows the AMQP 0-9-1
//! rules the adapter relies on:
//! - Queues are declared with fixed flags; re-declaring with other flags fails
//! - The default exchange routes a message to the queue named by its routing
//!   key, unroutable messages are dropped
//! - Delivery tags increase monotonically per channel
//! - Prefetch is taken from the channel when a consumer registers
//! - Ready messages are pushed to consumers as soon as prefetch allows, so a
//!   consumer may hold deliveries it has not read yet
//! - Unacknowledged deliveries return to the head of their queue, marked
//!   redelivered, when they are rejected with requeue or their channel closes
//!
//! This provider is intended for:
//! - Unit testing of adapter consumers
//! - Development without a running broker

use crate::broker::{BrokerChannel, BrokerConnection};
use crate::config::InMemoryConfig;
use crate::error::BrokerError;
use crate::message::{
    ChannelName, ConsumeOptions, ConsumerTag, Delivery, DeliveryMode, DeliveryTag,
    PublishProperties, QueueDeclareOptions, DEFAULT_EXCHANGE,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

const PROVIDER: &str = "in_memory";

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Broker state shared by every connection and channel
struct BrokerState {
    queues: HashMap<ChannelName, InMemoryQueue>,
    channels: HashMap<u64, ChannelState>,
    config: InMemoryConfig,
}

impl BrokerState {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            channels: HashMap::new(),
            config,
        }
    }

    fn open_channel(&mut self, channel_id: u64) -> Result<&mut ChannelState, BrokerError> {
        self.channels
            .get_mut(&channel_id)
            .ok_or(BrokerError::ChannelClosed)
    }

    /// Messages of a queue currently held by consumers
    fn unacked_for(&self, queue: &ChannelName) -> usize {
        self.channels
            .values()
            .flat_map(|channel| channel.unacked.values())
            .filter(|unacked| &unacked.queue == queue)
            .count()
    }

    fn consumers_for(&self, queue: &ChannelName) -> usize {
        self.channels
            .values()
            .flat_map(|channel| channel.consumers.values())
            .filter(|consumer| &consumer.queue == queue)
            .count()
    }

    /// Push one ready message to a consumer, if its prefetch allows
    fn push_to_consumer(&mut self, channel_id: u64, consumer_tag: &ConsumerTag) -> bool {
        let BrokerState {
            queues, channels, ..
        } = self;
        let Some(channel) = channels.get_mut(&channel_id) else {
            return false;
        };
        let Some(consumer) = channel.consumers.get(consumer_tag) else {
            return false;
        };

        let no_ack = consumer.options.no_ack;
        if consumer.prefetch > 0 && !no_ack {
            let outstanding = channel
                .unacked
                .values()
                .filter(|unacked| &unacked.consumer_tag == consumer_tag)
                .count();
            if outstanding >= usize::from(consumer.prefetch) {
                return false;
            }
        }

        let queue_name = consumer.queue.clone();
        let Some(message) = queues
            .get_mut(&queue_name)
            .and_then(|queue| queue.ready.pop_front())
        else {
            return false;
        };

        channel.next_delivery_tag += 1;
        let delivery_tag = DeliveryTag::new(channel.next_delivery_tag);

        let delivery = Delivery {
            delivery_tag,
            consumer_tag: consumer_tag.clone(),
            routing_key: message.routing_key.clone(),
            redelivered: message.redelivered,
            delivery_mode: message.delivery_mode,
            body: message.body.clone(),
        };

        if !no_ack {
            channel.unacked.insert(
                delivery_tag.value(),
                UnackedMessage {
                    queue: queue_name,
                    consumer_tag: consumer_tag.clone(),
                    message,
                },
            );
        }
        if let Some(consumer) = channel.consumers.get_mut(consumer_tag) {
            consumer.buffer.push_back(delivery);
        }
        true
    }

    /// Push ready messages to consumers, round-robin, until none can take more
    fn dispatch(&mut self) -> usize {
        let mut targets: Vec<(u64, ConsumerTag)> = self
            .channels
            .iter()
            .flat_map(|(id, channel)| channel.consumers.keys().map(move |tag| (*id, tag.clone())))
            .collect();
        targets.sort();

        let mut pushed = 0;
        loop {
            let before = pushed;
            for (channel_id, consumer_tag) in &targets {
                if self.push_to_consumer(*channel_id, consumer_tag) {
                    pushed += 1;
                }
            }
            if pushed == before {
                return pushed;
            }
        }
    }

    /// Take the oldest delivery pushed to a consumer
    fn take_delivery(
        &mut self,
        channel_id: u64,
        consumer_tag: &ConsumerTag,
    ) -> Result<Option<Delivery>, BrokerError> {
        let consumer = self
            .open_channel(channel_id)?
            .consumers
            .get_mut(consumer_tag)
            .ok_or_else(|| BrokerError::ConsumerNotFound {
                consumer_tag: consumer_tag.to_string(),
            })?;
        Ok(consumer.buffer.pop_front())
    }

    /// Close a channel and return its outstanding deliveries to their queues
    fn close_channel(&mut self, channel_id: u64) -> usize {
        let Some(channel) = self.channels.remove(&channel_id) else {
            return 0;
        };

        let requeued = channel.unacked.len();
        // Walk newest first so push_front restores the original order
        for (_, unacked) in channel.unacked.into_iter().rev() {
            if let Some(queue) = self.queues.get_mut(&unacked.queue) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        }
        self.dispatch();
        requeued
    }
}

/// Internal state for a single queue
struct InMemoryQueue {
    options: QueueDeclareOptions,
    /// Messages waiting for a consumer (FIFO order)
    ready: VecDeque<StoredMessage>,
}

/// A message stored in a queue
#[derive(Clone)]
struct StoredMessage {
    body: Bytes,
    routing_key: String,
    delivery_mode: DeliveryMode,
    redelivered: bool,
}

/// Per-channel state
struct ChannelState {
    connection_id: u64,
    prefetch: u16,
    next_delivery_tag: u64,
    consumers: HashMap<ConsumerTag, ConsumerState>,
    /// Outstanding deliveries keyed by delivery tag
    unacked: BTreeMap<u64, UnackedMessage>,
}

impl ChannelState {
    fn new(connection_id: u64) -> Self {
        Self {
            connection_id,
            prefetch: 0,
            next_delivery_tag: 0,
            consumers: HashMap::new(),
            unacked: BTreeMap::new(),
        }
    }
}

struct ConsumerState {
    queue: ChannelName,
    prefetch: u16,
    options: ConsumeOptions,
    /// Deliveries pushed to the consumer but not yet taken by `wait`
    buffer: VecDeque<Delivery>,
}

/// A delivered message awaiting acknowledgement
struct UnackedMessage {
    queue: ChannelName,
    consumer_tag: ConsumerTag,
    message: StoredMessage,
}

struct Shared {
    state: Mutex<BrokerState>,
    /// Signalled whenever a message may have become deliverable
    notify: Notify,
    next_id: AtomicU64,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
        self.state.lock().map_err(|_| BrokerError::ProviderError {
            provider: PROVIDER.to_string(),
            message: "broker state lock poisoned".to_string(),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-process broker shared by any number of connections
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Create new in-memory broker with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::new(config)),
                notify: Notify::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Open a connection to this broker
    pub fn connect(&self) -> InMemoryConnection {
        InMemoryConnection {
            shared: Arc::clone(&self.shared),
            connection_id: self.shared.next_id(),
        }
    }

    /// Check whether a queue has been declared
    pub fn queue_exists(&self, queue: &ChannelName) -> bool {
        self.shared
            .lock()
            .map(|state| state.queues.contains_key(queue))
            .unwrap_or(false)
    }

    /// Number of messages ready for delivery
    pub fn message_count(&self, queue: &ChannelName) -> usize {
        self.shared
            .lock()
            .ok()
            .and_then(|state| state.queues.get(queue).map(|q| q.ready.len()))
            .unwrap_or(0)
    }

    /// Number of delivered messages not yet acknowledged
    pub fn unacked_count(&self, queue: &ChannelName) -> usize {
        self.shared
            .lock()
            .map(|state| state.unacked_for(queue))
            .unwrap_or(0)
    }

    /// Number of active consumers on a queue
    pub fn consumer_count(&self, queue: &ChannelName) -> usize {
        self.shared
            .lock()
            .map(|state| state.consumers_for(queue))
            .unwrap_or(0)
    }

    /// Flags a queue was declared with
    pub fn queue_options(&self, queue: &ChannelName) -> Option<QueueDeclareOptions> {
        self.shared
            .lock()
            .ok()
            .and_then(|state| state.queues.get(queue).map(|q| q.options))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

// ============================================================================
// InMemoryConnection
// ============================================================================

/// Connection to an [`InMemoryBroker`]
pub struct InMemoryConnection {
    shared: Arc<Shared>,
    connection_id: u64,
}

impl InMemoryConnection {
    /// Open a new channel with its concrete type
    pub fn open_channel(&self) -> Result<InMemoryChannel, BrokerError> {
        let channel_id = self.shared.next_id();
        self.shared
            .lock()?
            .channels
            .insert(channel_id, ChannelState::new(self.connection_id));
        Ok(InMemoryChannel {
            shared: Arc::clone(&self.shared),
            channel_id,
        })
    }

    /// Close the connection and every channel opened on it
    pub fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.shared.lock()?;
        let channel_ids: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, channel)| channel.connection_id == self.connection_id)
            .map(|(id, _)| *id)
            .collect();

        let mut requeued = 0;
        for channel_id in channel_ids {
            requeued += state.close_channel(channel_id);
        }
        drop(state);

        debug!(
            connection_id = self.connection_id,
            requeued, "In-memory connection closed"
        );
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        Ok(Box::new(self.open_channel()?))
    }
}

// ============================================================================
// InMemoryChannel
// ============================================================================

/// Channel on an [`InMemoryConnection`]
pub struct InMemoryChannel {
    shared: Arc<Shared>,
    channel_id: u64,
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_queue(
        &self,
        queue: &ChannelName,
        options: QueueDeclareOptions,
    ) -> Result<(), BrokerError> {
        let mut state = self.shared.lock()?;
        state.open_channel(self.channel_id)?;

        let existing = state.queues.get(queue).map(|q| q.options);
        match existing {
            Some(existing) => {
                if options.passive {
                    return Ok(());
                }
                let same_flags = existing.durable == options.durable
                    && existing.exclusive == options.exclusive
                    && existing.auto_delete == options.auto_delete;
                if !same_flags {
                    return Err(BrokerError::DeclareFailed {
                        queue: queue.to_string(),
                        message: "queue exists with different flags".to_string(),
                    });
                }
                Ok(())
            }
            None if options.passive => Err(BrokerError::QueueNotFound {
                queue: queue.to_string(),
            }),
            None => {
                state.queues.insert(
                    queue.clone(),
                    InMemoryQueue {
                        options,
                        ready: VecDeque::new(),
                    },
                );
                debug!(queue = %queue, "In-memory queue created");
                Ok(())
            }
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Bytes,
        properties: PublishProperties,
    ) -> Result<(), BrokerError> {
        if exchange != DEFAULT_EXCHANGE {
            return Err(BrokerError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("no exchange '{}'", exchange),
            });
        }

        let mut state = self.shared.lock()?;
        state.open_channel(self.channel_id)?;

        let Ok(queue_name) = ChannelName::new(routing_key.to_string()) else {
            return Ok(());
        };
        if !state.queues.contains_key(&queue_name) {
            debug!(routing_key, "Dropping unroutable message");
            return Ok(());
        }

        let max_size = state.config.max_queue_size;
        let held = state.unacked_for(&queue_name);
        let Some(queue) = state.queues.get_mut(&queue_name) else {
            return Ok(());
        };
        if queue.ready.len() + held >= max_size {
            return Err(BrokerError::QueueFull {
                queue: queue_name.to_string(),
                max_size,
            });
        }

        queue.ready.push_back(StoredMessage {
            body: payload,
            routing_key: routing_key.to_string(),
            delivery_mode: properties.delivery_mode,
            redelivered: false,
        });
        state.dispatch();
        drop(state);

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn set_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        let mut state = self.shared.lock()?;
        state.open_channel(self.channel_id)?.prefetch = prefetch_count;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &ChannelName,
        consumer_tag: &str,
        options: ConsumeOptions,
    ) -> Result<ConsumerTag, BrokerError> {
        let mut state = self.shared.lock()?;
        state.open_channel(self.channel_id)?;

        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound {
                queue: queue.to_string(),
            });
        }

        let exclusive_held = state
            .channels
            .values()
            .flat_map(|channel| channel.consumers.values())
            .any(|consumer| &consumer.queue == queue && consumer.options.exclusive);
        if exclusive_held || (options.exclusive && state.consumers_for(queue) > 0) {
            return Err(BrokerError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("queue '{}' has an exclusive consumer", queue),
            });
        }

        let tag = if consumer_tag.is_empty() {
            ConsumerTag::generate()
        } else {
            ConsumerTag::new(consumer_tag)
        };

        let channel = state.open_channel(self.channel_id)?;
        if channel.consumers.contains_key(&tag) {
            return Err(BrokerError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("consumer tag '{}' already in use", tag),
            });
        }

        let prefetch = channel.prefetch;
        channel.consumers.insert(
            tag.clone(),
            ConsumerState {
                queue: queue.clone(),
                prefetch,
                options,
                buffer: VecDeque::new(),
            },
        );
        state.dispatch();
        drop(state);

        self.shared.notify.notify_waiters();
        Ok(tag)
    }

    async fn wait(
        &self,
        consumer_tag: &ConsumerTag,
        timeout: Duration,
    ) -> Result<Delivery, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let delivery = self
                .shared
                .lock()?
                .take_delivery(self.channel_id, consumer_tag)?;
            if let Some(delivery) = delivery {
                return Ok(delivery);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(BrokerError::WaitTimeout { duration: timeout });
            }
        }
    }

    async fn ack(&self, delivery_tag: DeliveryTag) -> Result<(), BrokerError> {
        let mut state = self.shared.lock()?;
        let channel = state.open_channel(self.channel_id)?;
        if channel.unacked.remove(&delivery_tag.value()).is_none() {
            return Err(BrokerError::UnknownDeliveryTag {
                delivery_tag: delivery_tag.value(),
            });
        }
        // Freed prefetch capacity lets the broker push more
        state.dispatch();
        drop(state);

        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn reject(&self, delivery_tag: DeliveryTag, requeue: bool) -> Result<(), BrokerError> {
        let mut state = self.shared.lock()?;
        let channel = state.open_channel(self.channel_id)?;
        let Some(unacked) = channel.unacked.remove(&delivery_tag.value()) else {
            return Err(BrokerError::UnknownDeliveryTag {
                delivery_tag: delivery_tag.value(),
            });
        };
        if let Some(consumer) = channel.consumers.get_mut(&unacked.consumer_tag) {
            consumer
                .buffer
                .retain(|delivery| delivery.delivery_tag != delivery_tag);
        }

        if requeue {
            if let Some(queue) = state.queues.get_mut(&unacked.queue) {
                let mut message = unacked.message;
                message.redelivered = true;
                queue.ready.push_front(message);
            }
        }
        state.dispatch();
        drop(state);

        debug!(
            delivery_tag = delivery_tag.value(),
            requeue, "In-memory delivery rejected"
        );
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &ConsumerTag) -> Result<Vec<Delivery>, BrokerError> {
        let mut state = self.shared.lock()?;
        let channel = state.open_channel(self.channel_id)?;
        let Some(consumer) = channel.consumers.remove(consumer_tag) else {
            return Err(BrokerError::ConsumerNotFound {
                consumer_tag: consumer_tag.to_string(),
            });
        };
        drop(state);

        self.shared.notify.notify_waiters();
        Ok(consumer.buffer.into_iter().collect())
    }

    async fn is_consuming(&self, consumer_tag: &ConsumerTag) -> bool {
        self.shared
            .lock()
            .map(|state| {
                state
                    .channels
                    .get(&self.channel_id)
                    .is_some_and(|channel| channel.consumers.contains_key(consumer_tag))
            })
            .unwrap_or(false)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let requeued = self.shared.lock()?.close_channel(self.channel_id);
        debug!(
            channel_id = self.channel_id,
            requeued, "In-memory channel closed"
        );
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}
