//! Event bus for async delivery.
//!
//! This module contains:
//! - `Event`: the bus message envelope (JSON on the wire)
//! - `Delivery`: an event plus transport metadata, as seen by consumers
//! - `EventBus` trait: publish/subscribe interface
//! - `EventHandler` trait: for processing deliveries
//! - Bus configuration types
//! - Implementations: Kafka, in-process channel, Mock

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

// Implementation modules
#[cfg(feature = "channel")]
pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

// Re-exports
#[cfg(feature = "channel")]
pub use channel::{ChannelConfig, ChannelEventBus};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaEventBus, KafkaEventBusConfig};
pub use mock::MockEventBus;

/// Custom property keys recognized on events.
pub mod properties {
    /// Fact type discriminator property.
    pub const FACT_TYPE: &str = "factType";
    /// Fallback organization property.
    pub const ORGANIZATION: &str = "organization";
}

// ============================================================================
// Messages
// ============================================================================

/// Bus message envelope.
///
/// Wraps a serialized form payload plus routing metadata. Serialized as
/// JSON on the wire; producers outside this service use the same shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Serialized form payload (UTF-8 JSON).
    pub payload: String,
    /// Form identity carried by the payload.
    pub tag: Option<String>,
    /// Custom properties (see [`properties`]).
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// User who produced the event.
    pub created_by: String,
    pub created_at: Option<DateTime<Utc>>,
    pub organization: Option<String>,
    pub session_id: Option<Uuid>,
    pub unit: Option<String>,
}

impl Event {
    /// Look up a custom property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Set a custom property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// An event as delivered by the transport, with consumer-side metadata.
///
/// Owned by the bus; handlers receive a shared reference and only read it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: Event,
    /// Topic the event arrived on.
    pub topic: String,
    /// Consumer group that received it, when the backend has groups.
    pub group_id: Option<String>,
    /// Partitioning key, when the backend has keys.
    pub key: Option<String>,
    pub partition: i32,
    pub offset: i64,
    /// Broker-assigned timestamp.
    pub timestamp: Option<DateTime<Utc>>,
}

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Event codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Subscribe not supported for this bus type")]
    SubscribeNotSupported,
}

/// Handler for processing deliveries from the bus.
///
/// Handlers own their error handling: a returned error is logged by the
/// dispatch loop and never fails the subscription, so implementations that
/// must not lose their slot on the topic catch everything themselves.
pub trait EventHandler: Send + Sync {
    /// Process one delivery.
    fn handle(&self, delivery: Arc<Delivery>) -> BoxFuture<'static, Result<()>>;
}

/// Interface for event delivery.
///
/// Implementations:
/// - `KafkaEventBus`: Kafka via rdkafka (`kafka` feature)
/// - `ChannelEventBus`: in-process tokio broadcast (`channel` feature)
/// - `MockEventBus`: in-memory mock for testing
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// Fire-and-forget from the caller's perspective: the future resolves
    /// once the backend has accepted the event, without waiting for any
    /// downstream consumer.
    async fn publish(&self, topic: &str, event: Event) -> Result<()>;

    /// Register a handler for incoming deliveries.
    async fn subscribe(&self, handler: Box<dyn EventHandler>) -> Result<()>;

    /// Start the consume loop (call after subscribe).
    async fn start_consuming(&self) -> Result<()>;
}

/// Dispatch a delivery to all registered handlers.
///
/// Handler errors are logged, never propagated; a failing handler must not
/// starve its siblings or stall the consume loop.
pub(crate) async fn dispatch_to_handlers(
    handlers: &Arc<RwLock<Vec<Box<dyn EventHandler>>>>,
    delivery: &Arc<Delivery>,
) {
    let handlers_guard = handlers.read().await;
    for handler in handlers_guard.iter() {
        if let Err(e) = handler.handle(Arc::clone(delivery)).await {
            error!(error = %e, topic = %delivery.topic, "Handler failed");
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process channel messaging.
    #[default]
    Channel,
    /// Kafka messaging.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group ID.
    pub group_id: Option<String>,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: None,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Role for event bus initialization.
#[derive(Debug, Clone)]
pub enum BusRole {
    /// Publisher-only role (no consuming).
    Publisher,
    /// Subscriber role for specific topics.
    Subscriber {
        /// Consumer group name.
        group: String,
        /// Topics to subscribe to.
        topics: Vec<String>,
    },
}

/// Initialize an event bus based on configuration.
///
/// Requires the corresponding feature to be enabled:
/// - Channel: `--features channel` (included in default)
/// - Kafka: `--features kafka`
pub async fn init_event_bus(config: &MessagingConfig, role: BusRole) -> Result<Arc<dyn EventBus>> {
    match config.messaging_type {
        MessagingType::Channel => {
            #[cfg(feature = "channel")]
            {
                let bus = match role {
                    BusRole::Publisher => ChannelEventBus::publisher(),
                    BusRole::Subscriber { topics, .. } => ChannelEventBus::subscriber(topics),
                };
                info!(messaging_type = "channel", "Event bus initialized");
                Ok(Arc::new(bus))
            }

            #[cfg(not(feature = "channel"))]
            {
                Err(BusError::Connection(
                    "Channel support requires the 'channel' feature. Rebuild with --features channel"
                        .to_string(),
                ))
            }
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let kafka_config = match role {
                    BusRole::Publisher => {
                        KafkaEventBusConfig::publisher(&config.kafka.bootstrap_servers)
                    }
                    BusRole::Subscriber { group, topics } => KafkaEventBusConfig::subscriber(
                        &config.kafka.bootstrap_servers,
                        config.kafka.group_id.clone().unwrap_or(group),
                        topics,
                    ),
                };
                let kafka_config = apply_kafka_security(kafka_config, &config.kafka);

                let bus = KafkaEventBus::new(kafka_config).await?;
                info!(messaging_type = "kafka", "Event bus initialized");
                Ok(Arc::new(bus))
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err(BusError::Connection(
                    "Kafka support requires the 'kafka' feature. Rebuild with --features kafka"
                        .to_string(),
                ))
            }
        }
    }
}

#[cfg(feature = "kafka")]
fn apply_kafka_security(mut cfg: KafkaEventBusConfig, kafka_cfg: &KafkaConfig) -> KafkaEventBusConfig {
    if let (Some(user), Some(pass), Some(mechanism)) = (
        &kafka_cfg.sasl_username,
        &kafka_cfg.sasl_password,
        &kafka_cfg.sasl_mechanism,
    ) {
        cfg = cfg.with_sasl(user, pass, mechanism);
    }

    if let Some(ref protocol) = kafka_cfg.security_protocol {
        cfg = cfg.with_security_protocol(protocol);
    }

    if let Some(ref ca) = kafka_cfg.ssl_ca_location {
        cfg = cfg.with_ssl_ca(ca);
    }

    cfg
}
