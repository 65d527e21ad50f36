//! roomcast server: entry point.
//!
//! This binary accepts WebSocket connections from browsers, groups them into
//! rooms, and fans room messages out to every member.  Several instances can
//! serve the same users when they share a relay broker (`roomcast-relay`).
//!
//! # Usage
//!
//! ```text
//! roomcast-server [OPTIONS]
//!
//! Options:
//!   --config    <PATH>   TOML config file [default: roomcast.toml]
//!   --bind      <IP>     Override [server].bind_address
//!   --port      <PORT>   Override [server].port
//!   --relay-url <URL>    Use the relay broker at URL as the bridge
//!   --log-level <LEVEL>  Override [server].log_level
//! ```
//!
//! # Environment variable overrides
//!
//! Every flag can also come from the environment.  CLI args take precedence
//! when both are present, and both take precedence over the config file.
//!
//! | Variable              | Flag          |
//! |-----------------------|---------------|
//! | `ROOMCAST_CONFIG`     | `--config`    |
//! | `ROOMCAST_BIND`       | `--bind`      |
//! | `ROOMCAST_PORT`       | `--port`      |
//! | `ROOMCAST_RELAY_URL`  | `--relay-url` |
//! | `ROOMCAST_LOG_LEVEL`  | `--log-level` |
//!
//! `RUST_LOG`, when set, wins over every log level setting.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomcast_core::InstanceId;
use roomcast_server::application::hub::{Hub, HubDeps};
use roomcast_server::application::pubsub::PubSub;
use roomcast_server::domain::BridgeSettings;
use roomcast_server::infrastructure::directory::MemoryRoomDirectory;
use roomcast_server::infrastructure::pubsub::{MemoryPubSub, RelayPubSub};
use roomcast_server::infrastructure::storage::{load_config, BridgeSection, FileConfig};
use roomcast_server::infrastructure::{run_server, ServerContext};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// roomcast WebSocket fan-out server.
#[derive(Debug, Parser)]
#[command(
    name = "roomcast-server",
    about = "Real-time room messaging server with cross-instance presence",
    version
)]
struct Cli {
    /// Path of the TOML config file.  A missing file means all defaults.
    #[arg(long, default_value = "roomcast.toml", env = "ROOMCAST_CONFIG")]
    config: PathBuf,

    /// IP address to bind the WebSocket listener to.
    #[arg(long, env = "ROOMCAST_BIND")]
    bind: Option<String>,

    /// TCP port for browser WebSocket connections.
    #[arg(long, env = "ROOMCAST_PORT")]
    port: Option<u16>,

    /// URL of a roomcast-relay broker, e.g. `ws://10.0.0.2:24900`.
    ///
    /// Without it (and without `[bridge] kind = "relay"` in the file) the
    /// bridge is in-process and presence stays within this instance.
    #[arg(long, env = "ROOMCAST_RELAY_URL")]
    relay_url: Option<String>,

    /// `tracing` log level.
    #[arg(long, env = "ROOMCAST_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Applies the CLI overrides on top of the file config.
    fn apply(&self, mut file: FileConfig) -> FileConfig {
        if let Some(bind) = &self.bind {
            file.server.bind_address = bind.clone();
        }
        if let Some(port) = self.port {
            file.server.port = port;
        }
        if let Some(url) = &self.relay_url {
            file.bridge = BridgeSection::Relay { url: url.clone() };
        }
        if let Some(level) = &self.log_level {
            file.server.log_level = level.clone();
        }
        file
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and the config file is loaded; the CLI
///    overrides the file.
/// 2. `tracing_subscriber` is initialised.  `RUST_LOG` wins; otherwise the
///    configured log level is used.
/// 3. The bridge is built: in-process, or a connection to the relay broker.
/// 4. The hub is spawned.  It seeds presence from the `[[users]]` directory.
/// 5. A Ctrl+C handler clears a shared `AtomicBool`.
/// 6. [`run_server`] accepts browsers until the flag is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_config(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let file = cli.apply(file);

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&file.server.log_level)),
        )
        .init();

    let config = file
        .to_server_config()
        .context("invalid server configuration")?;
    let identities = Arc::new(
        file.identity_directory()
            .context("loading [[users]] into the identity directory")?,
    );

    // ── Bridge ────────────────────────────────────────────────────────────────
    let pubsub: Arc<dyn PubSub> = match &config.bridge {
        BridgeSettings::Memory => {
            info!("using the in-process bridge; presence is local to this instance");
            Arc::new(MemoryPubSub::new())
        }
        BridgeSettings::Relay { url } => Arc::new(
            RelayPubSub::connect(url)
                .await
                .with_context(|| format!("connecting to relay broker at {url}"))?,
        ),
    };

    let instance = InstanceId::generate();
    info!(
        "roomcast instance {instance} starting: ws={}, users={}",
        config.ws_bind_addr,
        identities.len()
    );

    let hub = Hub::spawn(HubDeps {
        instance,
        pubsub,
        identities: identities.clone(),
        rooms: Arc::new(MemoryRoomDirectory::new()),
        policy: config.rooms,
    })
    .await;

    // ── Graceful shutdown flag ────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ──────────────────────────────────────────────────────
    let ctx = ServerContext {
        hub,
        identities,
        session: config.session.clone(),
    };
    run_server(&config, ctx, running).await?;

    info!("roomcast instance {instance} stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
