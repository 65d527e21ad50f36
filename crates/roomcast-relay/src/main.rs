//! roomcast relay broker: entry point.
//!
//! # Usage
//!
//! ```text
//! roomcast-relay [OPTIONS]
//!
//! Options:
//!   --bind <IP>    Address to listen on [default: 0.0.0.0]
//!   --port <PORT>  Port to listen on [default: 24900]
//! ```
//!
//! Both flags can also come from `ROOMCAST_RELAY_BIND` and
//! `ROOMCAST_RELAY_PORT`.  The log level follows `RUST_LOG` (default
//! `info`).

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use roomcast_relay::{run_relay, Broker};

/// Topic broker that bridges roomcast-server instances.
#[derive(Debug, Parser)]
#[command(
    name = "roomcast-relay",
    about = "Pub/sub relay between roomcast-server instances",
    version
)]
struct Cli {
    /// IP address to listen on.
    #[arg(long, default_value = "0.0.0.0", env = "ROOMCAST_RELAY_BIND")]
    bind: String,

    /// TCP port servers connect to (`ws://host:PORT`).
    #[arg(long, default_value_t = 24900, env = "ROOMCAST_RELAY_PORT")]
    port: u16,
}

impl Cli {
    fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid relay bind address: '{}:{}'", self.bind, self.port))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let bind_addr = cli.bind_addr()?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    run_relay(bind_addr, Broker::spawn(), running).await?;
    info!("relay broker stopped");
    Ok(())
}
