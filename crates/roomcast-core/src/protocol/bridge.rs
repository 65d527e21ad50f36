//! Frames exchanged between instances over the pub/sub bridge.
//!
//! Two kinds of topic exist:
//!
//! - [`PRESENCE_TOPIC`], a single topic carrying `user-join`, `user-left`
//!   and `join-room-private` envelopes between hubs, and
//! - one topic per room name (see [`room_topic`]) carrying that room's
//!   broadcasts.  Public and private rooms use different prefixes, so a
//!   public room can never share a topic with a private room of the same
//!   name.
//!
//! Every payload is a JSON [`BridgeFrame`]: the envelope plus the
//! [`InstanceId`] of the instance that published it.  A room uses the origin
//! to skip its own broadcasts when they come back from the bridge, because it
//! already delivered them locally.  Hubs do not filter: a hub learns about
//! its *own* sessions' presence through the same loopback as everyone else's.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::codec::ProtocolError;
use crate::protocol::envelope::Envelope;

/// Topic shared by every hub for presence and private-room invitations.
pub const PRESENCE_TOPIC: &str = "general";

/// Prefix for per-room topics, keeping them apart from [`PRESENCE_TOPIC`]
/// (a public room may well be named "general").
const ROOM_TOPIC_PREFIX: &str = "room:";
const PRIVATE_ROOM_TOPIC_PREFIX: &str = "private:";

/// Returns the bridge topic for the room named `room_name`.
pub fn room_topic(room_name: &str, private: bool) -> String {
    let prefix = if private {
        PRIVATE_ROOM_TOPIC_PREFIX
    } else {
        ROOM_TOPIC_PREFIX
    };
    format!("{prefix}{room_name}")
}

/// Identifies one running server instance.  Generated at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    /// Generates a fresh random instance id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Payload of every bridge message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeFrame {
    /// Instance that published the frame.
    pub origin: InstanceId,
    /// The replicated envelope.
    pub envelope: Envelope,
}

impl BridgeFrame {
    /// Wraps `envelope` for publication by `origin`.
    pub fn new(origin: InstanceId, envelope: Envelope) -> Self {
        Self { origin, envelope }
    }

    /// Serializes the frame into bridge payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses bridge payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the payload is not a frame.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(payload)?)
    }
}
