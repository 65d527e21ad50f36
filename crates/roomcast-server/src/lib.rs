//! roomcast-server library crate.
//!
//! This crate is the fan-out engine: it accepts browser WebSocket
//! connections, groups them into rooms, fans room messages out to members,
//! and keeps presence consistent across instances through a pub/sub bridge.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (JSON envelopes over WebSocket)
//!         ↕
//! [roomcast-server]
//!   ├── domain/           ServerConfig and policies
//!   ├── application/      Session, Room and Hub actors; PubSub and directory ports
//!   └── infrastructure/
//!         ├── ws_server/     accept loop and upgrade (tokio-tungstenite)
//!         ├── session_pump/  inbound and outbound pumps
//!         ├── pubsub/        in-process bridge, relay broker client
//!         ├── directory/     in-memory identity and room directories
//!         └── storage/       TOML config file
//!         ↕
//! other instances (via the pub/sub bridge)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain`, `roomcast-core` and Tokio channels;
//!   it reaches the outside world only through the `PubSub` and directory
//!   traits.
//! - `infrastructure` depends on all other layers plus sockets and files.
//!
//! # For beginners: why actors?
//!
//! Each room and the hub own their state exclusively and change it only in
//! response to messages on their inbox.  There are no locks around member
//! sets, and the order in which one room sees joins, leaves and broadcasts
//! is exactly the order they arrived in.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: the session, room and hub actors.
pub mod application;

/// Infrastructure layer: WebSocket server, pumps, bridge adapters, storage.
pub mod infrastructure;
