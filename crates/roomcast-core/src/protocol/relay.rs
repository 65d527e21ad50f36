//! Wire protocol between a server's relay adapter and the relay broker.
//!
//! The relay broker is the process that implements the pub/sub bridge for
//! multi-process deployments.  Servers hold one WebSocket open to it and
//! exchange JSON text frames tagged by `"op"`:
//!
//! ```json
//! {"op":"subscribe","topic":"general"}
//! {"op":"publish","topic":"room:lobby","payload":"{...bridge frame...}"}
//! {"op":"message","topic":"room:lobby","payload":"{...bridge frame...}"}
//! ```
//!
//! `subscribe`, `unsubscribe` and `publish` travel server → broker;
//! `message` travels broker → server.  Payloads are carried as strings since
//! every bridge payload is JSON text.

use serde::{Deserialize, Serialize};

/// A frame on the server ↔ relay broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Start receiving `message` frames for `topic`.
    Subscribe {
        /// Topic name.
        topic: String,
    },
    /// Stop receiving `message` frames for `topic`.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },
    /// Fan `payload` out to every subscriber of `topic`.
    Publish {
        /// Topic name.
        topic: String,
        /// Opaque payload.
        payload: String,
    },
    /// A payload published on a topic this connection subscribed to.
    Message {
        /// Topic name.
        topic: String,
        /// Opaque payload.
        payload: String,
    },
}

impl RelayFrame {
    /// Returns the topic the frame refers to.
    pub fn topic(&self) -> &str {
        match self {
            RelayFrame::Subscribe { topic }
            | RelayFrame::Unsubscribe { topic }
            | RelayFrame::Publish { topic, .. }
            | RelayFrame::Message { topic, .. } => topic,
        }
    }
}
