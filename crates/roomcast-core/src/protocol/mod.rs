//! Protocol module containing the envelope, its codec, and the bridge and
//! relay frames that carry envelopes between instances.

pub mod bridge;
pub mod codec;
pub mod envelope;
pub mod relay;

pub use bridge::{room_topic, BridgeFrame, InstanceId, PRESENCE_TOPIC};
pub use codec::{decode, decode_batch, encode, join_batch, ProtocolError};
pub use envelope::{Action, Envelope};
pub use relay::RelayFrame;
