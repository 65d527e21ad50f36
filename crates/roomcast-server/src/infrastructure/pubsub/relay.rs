//! Pub/sub bridge over a `roomcast-relay` broker.
//!
//! One WebSocket connection to the broker carries every topic this instance
//! uses.  Two background tasks own the two directions:
//!
//! - the **writer** drains a channel of [`RelayFrame`]s and sends each as a
//!   JSON text frame,
//! - the **reader** receives `message` frames and fans their payloads out to
//!   local subscriptions through a [`TopicTable`].
//!
//! Upstream subscriptions are reference counted by the table: the broker is
//! told to `subscribe` when a topic gets its first local subscriber, and to
//! `unsubscribe` once a delivery finds no subscriber left.
//!
//! When the broker connection drops, every local subscription ends and later
//! publishes fail with [`BridgeError::Closed`].  Reconnection is left to the
//! process supervisor.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use roomcast_core::RelayFrame;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::application::pubsub::{BridgeError, Payload, PubSub, Subscription, TopicTable};

/// Client side of the relay broker protocol.
#[derive(Debug)]
pub struct RelayPubSub {
    outbound: mpsc::UnboundedSender<RelayFrame>,
    table: Arc<Mutex<TopicTable>>,
}

impl RelayPubSub {
    /// Connects to the broker at `url` (e.g. `ws://127.0.0.1:24900`) and
    /// starts the reader and writer tasks.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self, BridgeError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| BridgeError::Transport(format!("connecting to relay {url}: {e}")))?;
        info!("connected to relay broker at {url}");

        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<RelayFrame>();
        let table = Arc::new(Mutex::new(TopicTable::new()));

        // ── Writer ────────────────────────────────────────────────────────────
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("relay: failed to serialise {} frame: {e}", frame.topic());
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    warn!("relay: write failed, closing bridge: {e}");
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("relay writer stopped");
        });

        // ── Reader ────────────────────────────────────────────────────────────
        let reader_table = Arc::clone(&table);
        let unsubscribe_tx = outbound.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let text = match msg {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("relay: read failed: {e}");
                        break;
                    }
                };
                match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Message { topic, payload }) => {
                        let payload: Payload = Arc::from(payload.into_bytes());
                        // The unsubscribe is queued under the table lock so a
                        // concurrent first subscribe always queues after it.
                        let mut table =
                            reader_table.lock().unwrap_or_else(PoisonError::into_inner);
                        if table.publish(&topic, &payload) == 0 {
                            debug!("relay: no local subscribers left for {topic}");
                            let _ = unsubscribe_tx.send(RelayFrame::Unsubscribe { topic });
                        }
                        drop(table);
                    }
                    Ok(other) => debug!("relay: ignoring unexpected frame for {}", other.topic()),
                    Err(e) => warn!("relay: skipping malformed frame: {e}"),
                }
            }
            reader_table
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            warn!("relay broker connection closed; bridge subscriptions ended");
        });

        Ok(Self { outbound, table })
    }
}

#[async_trait]
impl PubSub for RelayPubSub {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        let payload = String::from_utf8(payload).map_err(|_| BridgeError::NonUtf8Payload)?;
        self.outbound
            .send(RelayFrame::Publish {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|_| BridgeError::Closed)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BridgeError> {
        if self.outbound.is_closed() {
            return Err(BridgeError::Closed);
        }
        let (sub, first) = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe(topic);
        if first {
            self.outbound
                .send(RelayFrame::Subscribe {
                    topic: topic.to_string(),
                })
                .map_err(|_| BridgeError::Closed)?;
        }
        Ok(sub)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
