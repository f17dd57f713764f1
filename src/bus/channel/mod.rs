//! In-memory channel-based event bus for standalone mode.
//!
//! Uses tokio broadcast channels for pub/sub within a single process.
//! Ideal for local development and testing without external dependencies.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use super::{Delivery, Event, EventBus, EventHandler, Result};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// Configuration for channel event bus.
#[derive(Clone, Debug, Default)]
pub struct ChannelConfig {
    /// Topic filter for subscribers. `None` matches all topics.
    pub topics: Option<Vec<String>>,
}

impl ChannelConfig {
    /// Create config for publishing only.
    pub fn publisher() -> Self {
        Self { topics: None }
    }

    /// Create config for subscribing to specific topics.
    pub fn subscriber(topics: Vec<String>) -> Self {
        Self {
            topics: Some(topics),
        }
    }
}

/// Check if a topic matches a subscriber filter.
fn topic_matches(topic: &str, filter: &Option<Vec<String>>) -> bool {
    match filter {
        None => true,
        Some(topics) => topics.iter().any(|t| t == topic || t == "#"),
    }
}

/// In-memory event bus using tokio broadcast channels.
///
/// Deliveries are published to a broadcast channel and received by all
/// subscribers. Topic filtering is done on the subscriber side. Partition
/// is always 0 and offsets are a process-local counter, so handlers see
/// the same metadata shape as with a real broker.
pub struct ChannelEventBus {
    /// Broadcast sender for publishing deliveries.
    sender: broadcast::Sender<Arc<Delivery>>,
    /// Configuration including topic filter.
    config: ChannelConfig,
    /// Registered event handlers.
    handlers: Arc<RwLock<Vec<Box<dyn EventHandler>>>>,
    /// Flag indicating if consumer task is running.
    consuming: Arc<RwLock<bool>>,
    /// Process-local offset counter.
    next_offset: Arc<AtomicI64>,
}

impl ChannelEventBus {
    /// Create a new channel event bus.
    pub fn new(config: ChannelConfig) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);

        info!(topics = ?config.topics, "Channel event bus initialized");

        Self {
            sender,
            config,
            handlers: Arc::new(RwLock::new(Vec::new())),
            consuming: Arc::new(RwLock::new(false)),
            next_offset: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Create a publisher-only bus instance.
    pub fn publisher() -> Self {
        Self::new(ChannelConfig::publisher())
    }

    /// Create a subscriber bus for specific topics.
    pub fn subscriber(topics: Vec<String>) -> Self {
        Self::new(ChannelConfig::subscriber(topics))
    }

    /// Create a new bus that shares the same channel but has different config.
    ///
    /// Lets a publisher and a subscriber live in one process and still
    /// exchange deliveries, as with a shared broker.
    pub fn with_config(&self, config: ChannelConfig) -> Self {
        Self {
            sender: self.sender.clone(),
            config,
            handlers: Arc::new(RwLock::new(Vec::new())),
            consuming: Arc::new(RwLock::new(false)),
            next_offset: self.next_offset.clone(),
        }
    }
}

#[async_trait]
impl EventBus for ChannelEventBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(topic = %topic))]
    async fn publish(&self, topic: &str, event: Event) -> Result<()> {
        let key = if event.created_by.is_empty() {
            None
        } else {
            Some(event.created_by.clone())
        };

        let delivery = Arc::new(Delivery {
            event,
            topic: topic.to_string(),
            group_id: None,
            key,
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
            timestamp: Some(Utc::now()),
        });

        // Send to channel (ignore error if no receivers)
        match self.sender.send(delivery) {
            Ok(receiver_count) => {
                debug!(topic = %topic, receivers = receiver_count, "Published event to channel");
            }
            Err(_) => {
                // No receivers, that's okay for publish-only scenarios
                debug!(topic = %topic, "Published event (no receivers)");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, handler: Box<dyn EventHandler>) -> Result<()> {
        let count = {
            let mut handlers = self.handlers.write().await;
            handlers.push(handler);
            handlers.len()
        };

        info!(handler_count = count, "Handler subscribed to channel bus");

        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        // Check if already consuming
        {
            let mut consuming = self.consuming.write().await;
            if *consuming {
                return Ok(());
            }
            *consuming = true;
        }

        let mut receiver = self.sender.subscribe();
        let handlers = self.handlers.clone();
        let topics = self.config.topics.clone();

        // Spawn consumer task
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(delivery) => {
                        if !topic_matches(&delivery.topic, &topics) {
                            continue;
                        }

                        debug!(topic = %delivery.topic, offset = delivery.offset, "Received event via channel");

                        super::dispatch_to_handlers(&handlers, &delivery).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });

        info!(topics = ?self.config.topics, "Channel consumer started");

        Ok(())
    }
}
