//! # roomcast-core
//!
//! Shared library for roomcast containing the client wire protocol, the
//! cross-instance bridge frames, and the identity and room records every
//! other crate passes around.
//!
//! This crate is used by both the chat server and the pub/sub relay.
//! It has zero dependencies on async runtimes, sockets, or storage.
//!
//! # Architecture overview (for beginners)
//!
//! roomcast is a group-messaging fan-out engine: browsers hold a WebSocket
//! open to one of possibly many server instances, join named *rooms*, and
//! receive every message broadcast into the rooms they are members of.
//! Instances share no memory; they replicate presence and room traffic over
//! a publish/subscribe *bridge*.
//!
//! This crate (`roomcast-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – What travels over the wire.  The [`Envelope`] is the
//!   single JSON record exchanged with browsers; [`BridgeFrame`] wraps it for
//!   instance-to-instance traffic; [`RelayFrame`] is what the server speaks to
//!   the relay broker.
//!
//! - **`domain`** – Plain values with no behaviour beyond field access:
//!   [`Identity`] (who is talking) and [`RoomRecord`] (where they are talking).

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `roomcast_core::Envelope` instead of `roomcast_core::protocol::envelope::Envelope`.
pub use domain::identity::Identity;
pub use domain::room::{private_room_name, RoomRecord};
pub use protocol::bridge::{room_topic, BridgeFrame, InstanceId, PRESENCE_TOPIC};
pub use protocol::codec::{decode, decode_batch, encode, join_batch, ProtocolError};
pub use protocol::envelope::{Action, Envelope};
pub use protocol::relay::RelayFrame;
