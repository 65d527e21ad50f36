//! The pub/sub bridge port.
//!
//! Rooms and the hub never talk to another instance directly.  They publish
//! [`roomcast_core::BridgeFrame`] payloads on a topic and subscribe to the
//! topics they care about; whatever implements [`PubSub`] carries the bytes
//! between instances.
//!
//! # Implementations
//!
//! - `infrastructure::pubsub::MemoryPubSub` – in-process fan-out.  Every hub
//!   built on the same instance shares one broadcast domain.
//! - `infrastructure::pubsub::RelayPubSub` – a WebSocket client for the
//!   `roomcast-relay` broker, for deployments with several processes.
//!
//! Both implementations keep their local subscriber lists in a
//! [`TopicTable`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// A payload as it travels through a subscription.  Shared, so fanning one
/// publish out to many subscribers does not copy it.
pub type Payload = Arc<[u8]>;

/// Errors raised by a pub/sub bridge.
///
/// Callers log these and carry on: a failed publish never prevents local
/// delivery.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge transport has shut down.
    #[error("pub/sub bridge is closed")]
    Closed,

    /// The transport failed to connect or to carry a frame.
    #[error("pub/sub transport error: {0}")]
    Transport(String),

    /// The transport only carries text and the payload was not UTF-8.
    #[error("pub/sub payload is not valid UTF-8")]
    NonUtf8Payload,
}

/// Port through which rooms and the hub reach their peers on other instances.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publishes `payload` to every current subscriber of `topic`, on every
    /// instance, including this one.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError>;

    /// Starts receiving payloads published on `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BridgeError>;
}

/// A lazy, unbounded sequence of payloads published on one topic.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Payload>,
}

impl Subscription {
    /// Returns the topic this subscription listens to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next payload.  Returns `None` once the transport has
    /// closed; no further payloads will arrive after that.
    pub async fn next(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}

// ── TopicTable ────────────────────────────────────────────────────────────────

/// Subscriber bookkeeping shared by the bridge adapters.
///
/// Each subscription owns the receiving end of an unbounded channel; the
/// table keeps the sending ends grouped by topic.  Dropped subscriptions are
/// pruned lazily, the next time their topic is published to.
#[derive(Debug, Default)]
pub struct TopicTable {
    topics: HashMap<String, Vec<mpsc::UnboundedSender<Payload>>>,
}

impl TopicTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber to `topic`.
    ///
    /// The returned flag is `true` when this is the first live subscriber,
    /// which is when a remote transport needs to subscribe upstream.
    pub fn subscribe(&mut self, topic: &str) -> (Subscription, bool) {
        let (tx, rx) = mpsc::unbounded_channel();
        let senders = self.topics.entry(topic.to_string()).or_default();
        senders.retain(|s| !s.is_closed());
        let first = senders.is_empty();
        senders.push(tx);
        (
            Subscription {
                topic: topic.to_string(),
                rx,
            },
            first,
        )
    }

    /// Delivers `payload` to every live subscriber of `topic` and returns how
    /// many received it.  A topic left without subscribers is forgotten.
    pub fn publish(&mut self, topic: &str, payload: &Payload) -> usize {
        let Some(senders) = self.topics.get_mut(topic) else {
            return 0;
        };
        senders.retain(|s| s.send(Arc::clone(payload)).is_ok());
        let delivered = senders.len();
        if delivered == 0 {
            self.topics.remove(topic);
        }
        delivered
    }

    /// Returns the number of live subscribers of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }

    /// Drops every subscriber.  Their subscriptions end after draining what
    /// was already delivered.
    pub fn clear(&mut self) {
        self.topics.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
