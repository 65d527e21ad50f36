//! roomcast-relay library crate.
//!
//! The relay is the pub/sub bridge for deployments with more than one
//! `roomcast-server` process.  Servers connect over WebSocket, subscribe to
//! topics, and publish payloads; the relay fans every payload out to all
//! current subscribers of its topic.
//!
//! ```text
//! roomcast-server A ─┐                 ┌─ roomcast-server A
//! roomcast-server B ─┼─ publish ──► relay ── message ──┼─ roomcast-server B
//! roomcast-server C ─┘                 └─ roomcast-server C
//! ```
//!
//! The relay keeps no history.  A server that connects late only sees what
//! is published after it subscribed.

/// The broker actor that owns the subscription table.
pub mod broker;

/// Accept loop and per-connection pumps.
pub mod server;

pub use broker::{Broker, BrokerHandle, ConnId};
pub use server::{parse_frame, run_relay, serve, RelayError};
