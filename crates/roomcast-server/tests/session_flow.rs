//! End-to-end tests for the session pumps, rooms and hubs.
//!
//! Each test runs real [`run_session`] tasks over in-memory duplex pipes, so
//! every byte goes through tokio-tungstenite framing exactly as it would on
//! a TCP socket.  Two hubs sharing one [`MemoryPubSub`] stand in for two
//! server instances.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use roomcast_core::{decode_batch, encode, Action, Envelope, Identity, InstanceId, RoomRecord};
use roomcast_server::application::hub::{Hub, HubDeps, HubHandle};
use roomcast_server::application::pubsub::PubSub;
use roomcast_server::domain::{RoomPolicy, SessionConfig};
use roomcast_server::infrastructure::directory::{
    DirectoryUser, MemoryIdentityDirectory, MemoryRoomDirectory,
};
use roomcast_server::infrastructure::pubsub::MemoryPubSub;
use roomcast_server::infrastructure::run_session;
use roomcast_server::infrastructure::ws_server::websocket_config;
use tokio::io::DuplexStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(3);

// ── Harness ───────────────────────────────────────────────────────────────────

fn taro() -> Identity {
    Identity::new("u1", "Taro")
}

fn jiro() -> Identity {
    Identity::new("u2", "Jiro")
}

fn saburo() -> Identity {
    Identity::new("u3", "Saburo")
}

fn directory() -> Arc<MemoryIdentityDirectory> {
    let users = [taro(), jiro(), saburo()].map(|identity| DirectoryUser {
        username: identity.name.to_lowercase(),
        identity,
        credential: String::new(),
    });
    Arc::new(MemoryIdentityDirectory::with_users(users).expect("unique usernames"))
}

async fn start_hub(pubsub: Arc<dyn PubSub>) -> HubHandle {
    Hub::spawn(HubDeps {
        instance: InstanceId::generate(),
        pubsub,
        identities: directory(),
        rooms: Arc::new(MemoryRoomDirectory::new()),
        policy: RoomPolicy::default(),
    })
    .await
}

/// A browser stand-in: the client half of a duplex WebSocket.
struct Browser {
    ws: WebSocketStream<DuplexStream>,
    pending: VecDeque<Envelope>,
}

impl Browser {
    async fn attach(hub: &HubHandle, identity: Identity, config: SessionConfig) -> Self {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server_ws =
            WebSocketStream::from_raw_socket(server_io, Role::Server, Some(websocket_config(&config)))
                .await;
        tokio::spawn(run_session(server_ws, identity, hub.clone(), config));
        let ws = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        Self {
            ws,
            pending: VecDeque::new(),
        }
    }

    async fn send(&mut self, envelope: &Envelope) {
        let text = encode(envelope).unwrap();
        self.ws.send(WsMessage::Text(text)).await.unwrap();
    }

    async fn join(&mut self, room: &str) -> RoomRecord {
        self.send(&Envelope {
            action: Action::JoinRoom,
            message: room.to_string(),
            ..Envelope::default()
        })
        .await;
        let joined = self
            .recv_until(|e| e.action == Action::RoomJoined)
            .await
            .expect("room-joined");
        joined.target.expect("room-joined carries the room")
    }

    async fn say(&mut self, room: &RoomRecord, text: &str) {
        self.send(&Envelope {
            action: Action::SendMessage,
            message: text.to_string(),
            target: Some(room.clone()),
            sender: None,
        })
        .await;
    }

    /// Next envelope from the server, or `None` on timeout or disconnect.
    async fn recv(&mut self) -> Option<Envelope> {
        loop {
            if let Some(envelope) = self.pending.pop_front() {
                return Some(envelope);
            }
            let frame = timeout(WAIT, self.ws.next()).await.ok()??;
            match frame.ok()? {
                WsMessage::Text(text) => {
                    for envelope in decode_batch(&text) {
                        self.pending.push_back(envelope.expect("server sends valid envelopes"));
                    }
                }
                WsMessage::Close(_) => return None,
                _ => {}
            }
        }
    }

    async fn recv_until(&mut self, pred: impl Fn(&Envelope) -> bool) -> Option<Envelope> {
        while let Some(envelope) = self.recv().await {
            if pred(&envelope) {
                return Some(envelope);
            }
        }
        None
    }

    /// Collects everything that arrives within `window`.
    async fn drain_for(&mut self, window: Duration) -> Vec<Envelope> {
        let mut seen: Vec<Envelope> = self.pending.drain(..).collect();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(Ok(frame))) = tokio::time::timeout_at(deadline, self.ws.next()).await {
            if let WsMessage::Text(text) = frame {
                seen.extend(decode_batch(&text).into_iter().filter_map(Result::ok));
            }
        }
        seen
    }

    /// Waits until the server side has announced this browser's own
    /// presence, which happens after registration.
    async fn await_own_presence(&mut self, me: &Identity) {
        let own = self
            .recv_until(|e| {
                e.action == Action::UserJoined && e.sender.as_ref() == Some(me)
            })
            .await;
        assert!(own.is_some(), "{me} never saw its own user-join");
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..60 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

// ── Public rooms ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_second_joiner_is_welcomed_and_chat_reaches_both() {
    // Arrange
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;

    // Act
    let general = t.join("general").await;
    let seen_by_jiro = j.join("general").await;

    // Assert: same room, welcome goes to Taro only
    assert_eq!(seen_by_jiro.id, general.id);
    let welcome = t
        .recv_until(|e| e.action == Action::SendMessage)
        .await
        .expect("welcome");
    assert_eq!(welcome.message, "Jiro joined the room");
    assert!(welcome.sender.is_none());

    // Act: Jiro talks
    j.say(&general, "hello").await;

    // Assert: both receive it, attributed to Jiro, Jiro sees no welcome
    let at_taro = t.recv_until(|e| e.action == Action::SendMessage).await.unwrap();
    let at_jiro = j.recv_until(|e| e.action == Action::SendMessage).await.unwrap();
    for chat in [&at_taro, &at_jiro] {
        assert_eq!(chat.message, "hello");
        assert_eq!(chat.sender, Some(jiro()));
        assert_eq!(chat.target.as_ref().map(|r| r.id), Some(general.id));
    }
}

#[tokio::test]
async fn test_same_room_name_resolves_to_one_room() {
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;

    let first = t.join("lobby").await;
    let second = j.join("lobby").await;

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, RoomRecord::new("lobby", false).id);
    assert!(!first.private);
}

#[tokio::test]
async fn test_chat_reaches_members_only() {
    // Arrange: Taro in "a", Jiro elsewhere
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;
    let a = t.join("a").await;
    j.join("b").await;

    // Act
    t.say(&a, "only for a").await;

    // Assert
    let echo = t.recv_until(|e| e.action == Action::SendMessage).await.unwrap();
    assert_eq!(echo.message, "only for a");
    let at_jiro = j.drain_for(Duration::from_millis(300)).await;
    assert!(at_jiro.iter().all(|e| e.action != Action::SendMessage));
}

#[tokio::test]
async fn test_chat_to_unjoined_room_is_dropped() {
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;
    let room = t.join("closed-club").await;

    // Jiro knows the room record but never joined it
    j.say(&room, "let me in").await;

    let at_taro = t.drain_for(Duration::from_millis(300)).await;
    assert!(at_taro.iter().all(|e| e.message != "let me in"));
}

#[tokio::test]
async fn test_undecodable_frame_keeps_session_alive() {
    // Arrange
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;

    // Act
    t.ws.send(WsMessage::Text("{not json".to_string())).await.unwrap();
    let room = t.join("after-garbage").await;

    // Assert
    assert_eq!(room.name, "after-garbage");
}

#[tokio::test]
async fn test_leave_room_stops_delivery() {
    // Arrange
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;
    let room = t.join("tea").await;
    j.join("tea").await;

    // Act
    j.send(&Envelope {
        action: Action::LeaveRoom,
        message: room.id.to_string(),
        ..Envelope::default()
    })
    .await;
    let handle = hub.find_room_by_id(room.id).await.expect("room is running");
    eventually(|| {
        let handle = handle.clone();
        async move { handle.members().await.map(|m| m.len()) == Some(1) }
    })
    .await;
    t.say(&room, "still here?").await;

    // Assert
    let at_jiro = j.drain_for(Duration::from_millis(300)).await;
    assert!(at_jiro.iter().all(|e| e.message != "still here?"));
}

// ── Presence ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_new_session_gets_presence_snapshot() {
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;

    let mut announced = Vec::new();
    for _ in 0..3 {
        let e = t.recv_until(|e| e.action == Action::UserJoined).await.unwrap();
        announced.push(e.sender.unwrap().id);
    }
    announced.sort();

    assert_eq!(announced, ["u1", "u2", "u3"]);
}

#[tokio::test]
async fn test_disconnect_removes_session_everywhere() {
    // Arrange
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;
    t.await_own_presence(&taro()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;
    j.await_own_presence(&jiro()).await;
    let room = t.join("tea").await;
    j.join("tea").await;

    // Act: Jiro's browser goes away
    drop(j);

    // Assert: Taro hears user-left, hub and room forget Jiro
    let left = t.recv_until(|e| e.action == Action::UserLeft).await.unwrap();
    assert_eq!(left.sender, Some(jiro()));
    eventually(|| {
        let hub = hub.clone();
        async move { hub.sessions().await.len() == 1 }
    })
    .await;
    let handle = hub.find_room_by_id(room.id).await.unwrap();
    assert_eq!(handle.members().await.map(|m| m.len()), Some(1));
}

#[tokio::test]
async fn test_oversize_message_closes_session() {
    // Arrange
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let config = SessionConfig {
        max_message_size: 512,
        ..SessionConfig::default()
    };
    let mut t = Browser::attach(&hub, taro(), config).await;
    t.await_own_presence(&taro()).await;

    // Act
    let _ = t.ws.send(WsMessage::Text("x".repeat(4096))).await;

    // Assert: the server drops the connection and unregisters
    assert!(t.recv_until(|_| false).await.is_none());
    eventually(|| {
        let hub = hub.clone();
        async move { hub.sessions().await.is_empty() }
    })
    .await;
}

// ── Keepalive ─────────────────────────────────────────────────────────────────

fn short_keepalive() -> SessionConfig {
    SessionConfig::default().with_pong_wait(Duration::from_millis(300))
}

/// Reads raw frames for `window`, returning how many were pings.  Reading is
/// what lets the client flush its automatic pongs.
async fn count_pings(ws: &mut WebSocketStream<DuplexStream>, window: Duration) -> usize {
    let deadline = tokio::time::Instant::now() + window;
    let mut pings = 0;
    while let Ok(Some(Ok(frame))) = tokio::time::timeout_at(deadline, ws.next()).await {
        if matches!(frame, WsMessage::Ping(_)) {
            pings += 1;
        }
    }
    pings
}

#[tokio::test]
async fn test_silent_client_is_disconnected_after_pong_wait() {
    // Arrange
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let _t = Browser::attach(&hub, taro(), short_keepalive()).await;
    eventually(|| {
        let hub = hub.clone();
        async move { hub.sessions().await.len() == 1 }
    })
    .await;

    // Act: the browser never reads, so it never answers a ping

    // Assert
    eventually(|| {
        let hub = hub.clone();
        async move { hub.sessions().await.is_empty() }
    })
    .await;
}

#[tokio::test]
async fn test_server_pings_every_ping_period() {
    // Arrange
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), short_keepalive()).await;

    // Act: ping_period is 270ms
    let pings = count_pings(&mut t.ws, Duration::from_millis(1200)).await;

    // Assert
    assert!(pings >= 3, "only {pings} pings in 1.2s");
}

#[tokio::test]
async fn test_answering_pings_keeps_session_alive() {
    // Arrange
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), short_keepalive()).await;

    // Act: several pong_waits pass with only pongs going upstream
    count_pings(&mut t.ws, Duration::from_millis(1500)).await;

    // Assert: still registered and still serving
    assert_eq!(hub.sessions().await.len(), 1);
    let room = t.join("tea").await;
    assert_eq!(room.name, "tea");
}

#[tokio::test]
async fn test_listen_only_client_is_pinged_during_steady_traffic() {
    // Arrange: Taro only listens while Jiro chats faster than ping_period
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), short_keepalive()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;
    let room = t.join("tea").await;
    j.join("tea").await;

    // Act
    let mut pings = 0;
    for i in 0..20 {
        j.say(&room, &format!("line {i}")).await;
        pings += count_pings(&mut t.ws, Duration::from_millis(50)).await;
    }

    // Assert: keepalive kept going, so Taro's deadline kept moving
    assert!(pings >= 2, "only {pings} pings during traffic");
    assert_eq!(hub.sessions().await.len(), 2);
}

// ── Private rooms across instances ────────────────────────────────────────────

#[tokio::test]
async fn test_private_room_pairs_sessions_on_two_instances() {
    // Arrange: Taro and Saburo on instance A, Jiro on instance B
    let bus: Arc<dyn PubSub> = Arc::new(MemoryPubSub::new());
    let hub_a = start_hub(Arc::clone(&bus)).await;
    let hub_b = start_hub(Arc::clone(&bus)).await;
    let mut t = Browser::attach(&hub_a, taro(), SessionConfig::default()).await;
    t.await_own_presence(&taro()).await;
    let mut s = Browser::attach(&hub_a, saburo(), SessionConfig::default()).await;
    s.await_own_presence(&saburo()).await;
    let mut j = Browser::attach(&hub_b, jiro(), SessionConfig::default()).await;
    j.await_own_presence(&jiro()).await;

    // Act: Taro asks for a private room with Jiro
    t.send(&Envelope {
        action: Action::JoinRoomPrivate,
        message: "u2".to_string(),
        ..Envelope::default()
    })
    .await;

    // Assert: Taro's ack names Jiro, Jiro's ack names Taro
    let at_taro = t.recv_until(|e| e.action == Action::RoomJoined).await.unwrap();
    let at_jiro = j.recv_until(|e| e.action == Action::RoomJoined).await.unwrap();
    let room = at_taro.target.clone().unwrap();
    assert_eq!(room.name, "u2u1");
    assert!(room.private);
    assert_eq!(at_taro.sender, Some(jiro()));
    assert_eq!(at_jiro.sender, Some(taro()));
    assert_eq!(at_jiro.target.as_ref().map(|r| r.id), Some(room.id));

    // Act: chat crosses the bridge
    j.say(&room, "psst").await;

    // Assert
    let chat = t
        .recv_until(|e| e.action == Action::SendMessage && e.message == "psst")
        .await;
    assert_eq!(chat.and_then(|c| c.sender), Some(jiro()));
    let at_saburo = s.drain_for(Duration::from_millis(300)).await;
    assert!(at_saburo
        .iter()
        .all(|e| e.action != Action::RoomJoined && e.message != "psst"));
}

#[tokio::test]
async fn test_uninvited_join_to_private_room_is_refused() {
    // Arrange: Taro pairs with Jiro on one instance
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;
    t.await_own_presence(&taro()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;
    j.await_own_presence(&jiro()).await;
    let mut s = Browser::attach(&hub, saburo(), SessionConfig::default()).await;
    t.send(&Envelope {
        action: Action::JoinRoomPrivate,
        message: "u2".to_string(),
        ..Envelope::default()
    })
    .await;
    j.recv_until(|e| e.action == Action::RoomJoined).await.unwrap();

    // Act: Saburo guesses the private room's name
    s.send(&Envelope {
        action: Action::JoinRoom,
        message: "u2u1".to_string(),
        ..Envelope::default()
    })
    .await;

    // Assert
    let at_saburo = s.drain_for(Duration::from_millis(300)).await;
    assert!(at_saburo.iter().all(|e| e.action != Action::RoomJoined));
}

#[tokio::test]
async fn test_private_pair_ignores_public_room_squatting_its_name() {
    // Arrange: Saburo opens a public room under the pair's name first
    let hub = start_hub(Arc::new(MemoryPubSub::new())).await;
    let mut t = Browser::attach(&hub, taro(), SessionConfig::default()).await;
    t.await_own_presence(&taro()).await;
    let mut j = Browser::attach(&hub, jiro(), SessionConfig::default()).await;
    j.await_own_presence(&jiro()).await;
    let mut s = Browser::attach(&hub, saburo(), SessionConfig::default()).await;
    s.await_own_presence(&saburo()).await;
    let squatted = s.join("u2u1").await;

    // Act
    t.send(&Envelope {
        action: Action::JoinRoomPrivate,
        message: "u2".to_string(),
        ..Envelope::default()
    })
    .await;
    let at_taro = t.recv_until(|e| e.action == Action::RoomJoined).await.unwrap();
    let at_jiro = j.recv_until(|e| e.action == Action::RoomJoined).await.unwrap();
    let private = at_taro.target.unwrap();
    j.say(&private, "secret").await;

    // Assert: a separate private room, and the secret stays in it
    assert!(private.private);
    assert!(!squatted.private);
    assert_ne!(private.id, squatted.id);
    assert_eq!(at_jiro.target.map(|r| r.id), Some(private.id));
    let chat = t
        .recv_until(|e| e.action == Action::SendMessage && e.message == "secret")
        .await;
    assert!(chat.is_some());
    let at_saburo = s.drain_for(Duration::from_millis(300)).await;
    assert!(at_saburo.iter().all(|e| e.message != "secret"));
}
