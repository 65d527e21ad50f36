//! WebSocket server: accept loop and per-connection upgrade.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from browsers.
//! 3. Upgrading each connection to a WebSocket, capturing the `user` query
//!    parameter from the upgrade request (`ws://host:8080/ws?user=<id>`).
//! 4. Resolving that parameter to an [`Identity`] through the identity
//!    directory, by id first and then by username.
//! 5. Handing the connection to [`run_session`].
//! 6. Gracefully shutting down when the `running` flag is cleared.
//!
//! Token verification is expected to happen in front of this service (a
//! reverse proxy or gateway); by the time a connection reaches the accept
//! loop, the `user` parameter is trusted.  Unknown users are closed with a
//! policy-violation close frame.
//!
//! # Scalability
//!
//! Each connection runs in its own Tokio task.  The accept loop never blocks
//! on a session: it accepts, spawns, and goes back to accepting.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::SinkExt;
use roomcast_core::Identity;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        protocol::{frame::coding::CloseCode, CloseFrame, WebSocketConfig},
        Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::directory::IdentityDirectory;
use crate::application::hub::HubHandle;
use crate::domain::config::{ServerConfig, SessionConfig};
use crate::infrastructure::session_pump::run_session;

/// What every connection task needs.
#[derive(Clone)]
pub struct ServerContext {
    pub hub: HubHandle,
    pub identities: Arc<dyn IdentityDirectory>,
    pub session: SessionConfig,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Runs the main WebSocket accept loop until `running` is set to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(
    config: &ServerConfig,
    ctx: ServerContext,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.ws_bind_addr)
        .await
        .with_context(|| {
            format!(
                "failed to bind WebSocket listener on {}",
                config.ws_bind_addr
            )
        })?;

    info!("roomcast listening on {}", config.ws_bind_addr);
    serve(listener, ctx, running).await;
    Ok(())
}

/// Accepts connections on an already-bound listener until `running` is
/// cleared.
pub async fn serve(listener: TcpListener, ctx: ServerContext, running: Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short timeout lets the loop notice the shutdown flag even when
        // nobody is connecting.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new connection from {peer_addr}");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, ctx).await;
                });
            }
            Ok(Err(e)) => error!("accept error: {e}"),
            Err(_) => {}
        }
    }
}

// ── Per-connection handler ────────────────────────────────────────────────────

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: ServerContext) {
    let mut user: Option<String> = None;
    let capture_user = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match user_param(req.uri().query()) {
            Some(value) => {
                user = Some(value);
                Ok(resp)
            }
            None => {
                let mut refusal = ErrorResponse::new(Some("missing user parameter".to_string()));
                *refusal.status_mut() = StatusCode::UNAUTHORIZED;
                Err(refusal)
            }
        }
    };

    let ws_config = websocket_config(&ctx.session);
    let mut ws = match accept_hdr_async_with_config(stream, capture_user, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {peer_addr} failed: {e}");
            return;
        }
    };

    let Some(user) = user else {
        return;
    };

    let identity = match resolve_identity(ctx.identities.as_ref(), &user) {
        Some(identity) => identity,
        None => {
            warn!("{peer_addr}: unknown user '{user}'; closing");
            let close = CloseFrame {
                code: CloseCode::Policy,
                reason: "unknown user".into(),
            };
            let _ = ws.send(WsMessage::Close(Some(close))).await;
            return;
        }
    };

    info!("{peer_addr}: WebSocket session established for {identity}");
    run_session(ws, identity, ctx.hub, ctx.session).await;
    info!("{peer_addr}: session closed");
}

/// Builds the tungstenite limits for a session.
pub fn websocket_config(session: &SessionConfig) -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(session.max_message_size),
        max_frame_size: Some(session.max_message_size),
        ..WebSocketConfig::default()
    }
}

/// Resolves the `user` parameter: an identity id, or failing that a
/// username.  Directory errors are logged and treated as "unknown".
pub fn resolve_identity(directory: &dyn IdentityDirectory, user: &str) -> Option<Identity> {
    let by_id = directory.lookup_by_id(user).unwrap_or_else(|e| {
        warn!("identity lookup for '{user}' failed: {e}");
        None
    });
    by_id.or_else(|| {
        directory.lookup_by_username(user).unwrap_or_else(|e| {
            warn!("username lookup for '{user}' failed: {e}");
            None
        })
    })
}

/// Extracts the `user` value from a query string such as `a=1&user=u1`.
fn user_param(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "user")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::directory::{DirectoryError, MockIdentityDirectory};
    use mockall::predicate::eq;

    #[test]
    fn test_user_param_found_among_other_params() {
        assert_eq!(user_param(Some("room=1&user=u42")), Some("u42".to_string()));
    }

    #[test]
    fn test_user_param_missing() {
        assert_eq!(user_param(None), None);
        assert_eq!(user_param(Some("token=abc")), None);
    }

    #[test]
    fn test_user_param_empty_value_is_missing() {
        assert_eq!(user_param(Some("user=")), None);
    }

    #[test]
    fn test_websocket_config_applies_message_limit() {
        let cfg = websocket_config(&SessionConfig::default());
        assert_eq!(cfg.max_message_size, Some(10_000));
        assert_eq!(cfg.max_frame_size, Some(10_000));
    }

    #[test]
    fn test_resolve_identity_prefers_id() {
        // Arrange
        let mut dir = MockIdentityDirectory::new();
        dir.expect_lookup_by_id()
            .with(eq("u1"))
            .returning(|_| Ok(Some(Identity::new("u1", "Taro"))));
        dir.expect_lookup_by_username().never();

        // Act
        let identity = resolve_identity(&dir, "u1");

        // Assert
        assert_eq!(identity.unwrap().name, "Taro");
    }

    #[test]
    fn test_resolve_identity_falls_back_to_username() {
        let mut dir = MockIdentityDirectory::new();
        dir.expect_lookup_by_id().returning(|_| Ok(None));
        dir.expect_lookup_by_username()
            .with(eq("taro"))
            .returning(|_| Ok(Some(Identity::new("u1", "Taro"))));

        assert_eq!(resolve_identity(&dir, "taro").unwrap().id, "u1");
    }

    #[test]
    fn test_resolve_identity_directory_error_is_unknown() {
        let mut dir = MockIdentityDirectory::new();
        dir.expect_lookup_by_id()
            .returning(|_| Err(DirectoryError::Unavailable("down".into())));
        dir.expect_lookup_by_username().returning(|_| Ok(None));

        assert!(resolve_identity(&dir, "u1").is_none());
    }
}
