//! Mock event bus implementation for testing.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{BusError, Event, EventBus, EventHandler, Result};

/// Mock event bus for testing.
///
/// Records published events per topic; subscription is not supported.
#[derive(Default)]
pub struct MockEventBus {
    published: RwLock<Vec<(String, Event)>>,
    fail_on_publish: RwLock<bool>,
}

impl MockEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<(String, Event)> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl EventBus for MockEventBus {
    async fn publish(&self, topic: &str, event: Event) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        self.published
            .write()
            .await
            .push((topic.to_string(), event));
        Ok(())
    }

    async fn subscribe(&self, _handler: Box<dyn EventHandler>) -> Result<()> {
        Err(BusError::SubscribeNotSupported)
    }

    async fn start_consuming(&self) -> Result<()> {
        Err(BusError::SubscribeNotSupported)
    }
}
