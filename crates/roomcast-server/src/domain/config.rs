//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is built from the TOML file and CLI arguments in `main.rs` (see
//! `infrastructure::storage::config`) or from [`ServerConfig::default`] in
//! tests.
//!
//! # Design rationale
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! variable reads inside the domain) lets tests spin up several hubs with
//! different settings in one process.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// All runtime configuration for one server instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// The address and port the WebSocket server binds to.
    pub ws_bind_addr: SocketAddr,

    /// Per-connection limits and timers.
    pub session: SessionConfig,

    /// Room lifecycle and relaying policy.
    pub rooms: RoomPolicy,

    /// Which pub/sub bridge connects this instance to its peers.
    pub bridge: BridgeSettings,
}

impl Default for ServerConfig {
    /// | Field          | Default                          |
    /// |----------------|----------------------------------|
    /// | ws_bind_addr   | `0.0.0.0:8080`                   |
    /// | session        | [`SessionConfig::default`]       |
    /// | rooms          | [`RoomPolicy::default`]          |
    /// | bridge         | in-process memory bridge         |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            session: SessionConfig::default(),
            rooms: RoomPolicy::default(),
            bridge: BridgeSettings::Memory,
        }
    }
}

/// Per-connection limits and timers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Largest inbound WebSocket message accepted, in bytes.  Larger
    /// messages are a transport error and close the session.
    pub max_message_size: usize,

    /// Idle-read deadline.  Refreshed by every inbound frame, including the
    /// peer's pong replies to our pings.
    pub pong_wait: Duration,

    /// Interval between keepalive pings.  Must be shorter than `pong_wait`
    /// so a healthy peer always answers before the deadline.
    pub ping_period: Duration,

    /// Upper bound on a single socket write.
    pub write_wait: Duration,

    /// Capacity of the outbound queue.  Delivering to a full queue marks the
    /// session degraded and disconnects it.
    pub send_queue_capacity: usize,
}

impl SessionConfig {
    /// Returns a copy with `pong_wait` replaced and `ping_period` set to
    /// nine tenths of it.
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            max_message_size: 10_000,
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(10),
            send_queue_capacity: 256,
        }
    }
}

/// What happens to a room once its last member leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoomRetention {
    /// Rooms live for the life of the process once created.
    #[default]
    Forever,
    /// Public rooms are retired when empty; private rooms are kept.
    ReapEmptyPublic,
}

/// Room lifecycle and relaying policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomPolicy {
    /// Retention of empty rooms.
    pub retention: RoomRetention,

    /// Whether private rooms mirror their broadcasts onto the bridge.
    ///
    /// The two members of a private room may be attached to different
    /// instances; without relaying they could not hear each other.
    pub relay_private_rooms: bool,
}

impl Default for RoomPolicy {
    fn default() -> Self {
        Self {
            retention: RoomRetention::Forever,
            relay_private_rooms: true,
        }
    }
}

/// Pub/sub bridge selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeSettings {
    /// In-process bridge: a single instance, or several hubs in one process.
    Memory,
    /// A `roomcast-relay` broker reachable at `url` (e.g. `ws://10.0.0.2:24900`).
    Relay {
        /// WebSocket URL of the broker.
        url: String,
    },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
