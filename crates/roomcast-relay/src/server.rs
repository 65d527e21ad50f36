//! WebSocket front end of the broker.
//!
//! Each server instance holds one WebSocket open to the broker.  Per
//! connection there are two halves:
//!
//! 1. The **reader** (the connection's own task) parses relay frames and
//!    forwards `subscribe`, `unsubscribe` and `publish` to the broker.
//! 2. The **writer** (spawned) drains the connection's outbox into text
//!    frames.
//!
//! A malformed frame is logged and skipped; the connection stays up.  When
//! either half ends, the connection is detached and all of its
//! subscriptions are dropped.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use roomcast_core::RelayFrame;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerHandle, ConnId};

/// Why an inbound frame was rejected.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed relay frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// `message` frames only flow broker → server.
    #[error("servers may not send '{0}' frames")]
    UnexpectedOp(&'static str),
}

/// Parses one inbound text frame.
///
/// # Errors
///
/// Returns [`RelayError::Malformed`] for anything that is not a relay frame,
/// and [`RelayError::UnexpectedOp`] for a `message` frame.
pub fn parse_frame(text: &str) -> Result<RelayFrame, RelayError> {
    match serde_json::from_str(text)? {
        RelayFrame::Message { .. } => Err(RelayError::UnexpectedOp("message")),
        frame => Ok(frame),
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Binds `bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound.
pub async fn run_relay(
    bind_addr: SocketAddr,
    broker: BrokerHandle,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {bind_addr}"))?;
    info!("relay broker listening on {bind_addr}");
    serve(listener, broker, running).await;
    Ok(())
}

/// Accepts server connections on an already-bound listener.
pub async fn serve(listener: TcpListener, broker: BrokerHandle, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                let broker = broker.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, broker).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
    info!("shutdown flag set; relay stopped accepting");
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, broker: BrokerHandle) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {peer_addr} failed: {e}");
            return;
        }
    };
    let Some((conn, mut outbox)) = broker.attach().await else {
        error!("{peer_addr}: broker is not running");
        return;
    };
    info!("{peer_addr}: attached as {conn}");

    let (mut sink, mut source) = ws.split();
    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if let Err(e) = sink.send(WsMessage::Text(text.to_string())).await {
                debug!("{conn}: write failed: {e}");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => dispatch(&broker, conn, &text),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("{conn}: read failed: {e}");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    broker.detach(conn);
    writer.abort();
    info!("{peer_addr}: {conn} disconnected");
}

fn dispatch(broker: &BrokerHandle, conn: ConnId, text: &str) {
    match parse_frame(text) {
        Ok(RelayFrame::Subscribe { topic }) => broker.subscribe(conn, topic),
        Ok(RelayFrame::Unsubscribe { topic }) => broker.unsubscribe(conn, topic),
        Ok(RelayFrame::Publish { topic, payload }) => broker.publish(topic, payload),
        Ok(RelayFrame::Message { .. }) => {}
        Err(e) => warn!("{conn}: skipping frame: {e}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
