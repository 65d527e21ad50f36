//! The two pumps that connect a WebSocket to a [`Session`].
//!
//! Every attached browser gets two Tokio tasks:
//!
//! 1. **Inbound pump** (runs on the connection's own task): reads frames,
//!    refreshes the read deadline, decodes and dispatches envelopes, and
//!    executes commands the hub sends to the session.  It ends on a read
//!    error, an expired deadline, a Close frame or a shutdown signal, and
//!    then tears the session down.
//! 2. **Outbound pump** (spawned): drains the bounded outbound queue,
//!    coalescing whatever is already queued into one text frame, and sends a
//!    keepalive ping every `ping_period`.  Each write is bounded by
//!    `write_wait`.  A write failure signals shutdown, which ends the inbound
//!    pump too.
//!
//! # Keepalive (for beginners)
//!
//! The server pings; the browser answers with a pong.  Any inbound frame,
//! pongs included, pushes the read deadline `pong_wait` into the future.
//! `ping_period` is shorter than `pong_wait`, so a healthy browser never hits
//! the deadline while a vanished one is dropped within `pong_wait`.
//!
//! The pumps are generic over the byte stream, so the integration tests run
//! them over `tokio::io::duplex` pipes instead of TCP sockets.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use roomcast_core::{join_batch, Identity};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::application::hub::HubHandle;
use crate::application::session::{Session, SessionCommand, SessionHandle};
use crate::domain::config::SessionConfig;

type WsSink<S> = SplitSink<WebSocketStream<S>, WsMessage>;
type WsSource<S> = SplitStream<WebSocketStream<S>>;

/// Runs a session over an established WebSocket until it disconnects.
///
/// Registers with the hub, runs the inbound pump on the calling task, then
/// tears the session down and waits for the outbound pump to finish.
pub async fn run_session<S>(
    ws: WebSocketStream<S>,
    identity: Identity,
    hub: HubHandle,
    config: SessionConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (handle, mailbox) = SessionHandle::new(identity, config.send_queue_capacity);
    let (sink, source) = ws.split();
    info!(
        "session {} attached for {}",
        handle.id(),
        handle.identity()
    );

    let writer = tokio::spawn(write_pump(
        sink,
        mailbox.outbound,
        Arc::clone(&handle),
        config.clone(),
    ));

    hub.register(Arc::clone(&handle));
    let mut session = Session::new(handle, hub);
    read_pump(source, &mut session, mailbox.control, &config).await;
    session.teardown().await;

    if let Err(e) = writer.await {
        warn!("session {}: outbound pump panicked: {e}", session.handle().id());
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

async fn read_pump<S>(
    mut source: WsSource<S>,
    session: &mut Session,
    mut control: mpsc::UnboundedReceiver<SessionCommand>,
    config: &SessionConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = session.handle().id();
    let mut shutdown = session.handle().shutdown_signal();
    let deadline = sleep(config.pong_wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            frame = source.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                        debug!("session {id}: connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("session {id}: read error: {e}");
                        break;
                    }
                };
                deadline.as_mut().reset(Instant::now() + config.pong_wait);
                match msg {
                    WsMessage::Text(text) => session.handle_text(&text).await,
                    WsMessage::Binary(_) => {
                        warn!("session {id}: unexpected binary frame (ignored)");
                    }
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                    WsMessage::Close(_) => {
                        debug!("session {id}: Close frame received");
                        break;
                    }
                }
            }
            () = &mut deadline => {
                info!("session {id}: no frame within {:?}; disconnecting", config.pong_wait);
                break;
            }
            Some(cmd) = control.recv() => session.execute(cmd).await,
            () = stopped(&mut shutdown) => {
                debug!("session {id}: shutdown signalled");
                break;
            }
        }
    }
}

// ── Outbound ──────────────────────────────────────────────────────────────────

async fn write_pump<S>(
    mut sink: WsSink<S>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    handle: Arc<SessionHandle>,
    config: SessionConfig,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let id = handle.id();
    let mut shutdown: watch::Receiver<bool> = handle.shutdown_signal();
    let mut ticker = interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        tokio::select! {
            item = outbound.recv() => {
                let Some(first) = item else { break };
                let mut batch = vec![first];
                while let Ok(next) = outbound.try_recv() {
                    batch.push(next);
                }
                let frame = join_batch(&batch);
                if let Err(e) = write(&mut sink, WsMessage::Text(frame), &config).await {
                    debug!("session {id}: write failed: {e}");
                    break;
                }
            }
            // Not reset by data writes: only the browser's pongs move its
            // read deadline, and a listen-only browser sends nothing else.
            _ = ticker.tick() => {
                if let Err(e) = write(&mut sink, WsMessage::Ping(Vec::new()), &config).await {
                    debug!("session {id}: keepalive ping failed: {e}");
                    break;
                }
            }
            () = stopped(&mut shutdown) => {
                let _ = write(&mut sink, WsMessage::Close(None), &config).await;
                break;
            }
        }
    }

    handle.signal_shutdown();
    debug!("session {id}: outbound pump stopped");
}

/// Resolves once shutdown has been signalled, including before the call.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sends one message, giving up after `write_wait`.
async fn write<S>(sink: &mut WsSink<S>, msg: WsMessage, config: &SessionConfig) -> Result<(), WsError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(config.write_wait, sink.send(msg)).await {
        Ok(result) => result,
        Err(_) => Err(WsError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write deadline exceeded",
        ))),
    }
}
