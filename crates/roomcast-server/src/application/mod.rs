//! Application layer for roomcast-server.
//!
//! The application layer holds the three actors that make up the fan-out
//! engine and the ports they depend on.  It knows *what* happens when a
//! browser joins a room or a peer instance reports presence, but delegates
//! *how* bytes move to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - [`session`]: per-connection dispatch and teardown
//! - [`room`]: per-room member set and broadcast fan-out
//! - [`hub`]: session registry, room registry, presence and the private-room
//!   handshake
//! - [`pubsub`] and [`directory`]: the traits infrastructure implements
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or reading frames (that is infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite)
//! - Config files

pub mod directory;
pub mod hub;
pub mod pubsub;
pub mod room;
pub mod session;

pub use directory::{DirectoryError, IdentityDirectory, RoomDirectory};
pub use hub::{Hub, HubDeps, HubHandle};
pub use pubsub::{BridgeError, PubSub, Subscription, TopicTable};
pub use room::{JoinOutcome, RoomHandle};
pub use session::{Session, SessionCommand, SessionHandle, SessionId, SessionMailbox};
