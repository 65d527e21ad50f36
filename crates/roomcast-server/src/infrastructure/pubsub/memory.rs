//! In-process pub/sub bridge.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::application::pubsub::{BridgeError, Payload, PubSub, Subscription, TopicTable};

/// Fans publishes out to subscriptions in the same process.
///
/// Every hub handed the same `MemoryPubSub` shares one broadcast domain, which
/// is how the integration tests run several "instances" side by side.
#[derive(Debug, Default)]
pub struct MemoryPubSub {
    table: Mutex<TopicTable>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        let payload: Payload = Arc::from(payload);
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .publish(topic, &payload);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BridgeError> {
        let (sub, _) = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe(topic);
        Ok(sub)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
