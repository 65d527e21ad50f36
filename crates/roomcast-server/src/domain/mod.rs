//! Domain layer for roomcast-server.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or async runtimes.  The wire vocabulary (envelopes, identities,
//! room records) lives one level further in, in `roomcast-core`, because the
//! relay broker needs it too.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures and policies
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - File I/O or environment variable reading

pub mod config;

pub use config::{BridgeSettings, RoomPolicy, RoomRetention, ServerConfig, SessionConfig};
