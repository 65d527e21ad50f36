//! Infrastructure layer for roomcast-server.
//!
//! The infrastructure layer handles all I/O: accepting WebSocket connections
//! from browsers, pumping frames in and out of each session, talking to the
//! pub/sub bridge, and reading the config file.
//!
//! # Responsibilities
//!
//! - Binding a TCP listener and performing the WebSocket upgrade
//! - Running the inbound and outbound pumps of every session
//! - Implementing the `PubSub` port (in-process and relay broker)
//! - Implementing the directory ports in memory
//! - Loading and saving the TOML config file
//!
//! # What does NOT belong here?
//!
//! - Room membership, presence or routing rules (that is the application
//!   layer)
//! - Envelope definitions (that is `roomcast-core`)

pub mod directory;
pub mod pubsub;
pub mod session_pump;
pub mod storage;
pub mod ws_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use session_pump::run_session;
pub use ws_server::{run_server, serve, ServerContext};
