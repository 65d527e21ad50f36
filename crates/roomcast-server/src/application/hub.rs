//! Hub actor: the per-instance registry of sessions, rooms and presence.
//!
//! The hub owns three mutable sets, and nothing else touches them:
//!
//! - the sessions attached to this instance,
//! - the rooms running on this instance (by id and by name),
//! - the known identities, a multiset fed by `user-join` / `user-left`
//!   envelopes from every instance.
//!
//! # Presence (for beginners)
//!
//! When a session registers, the hub does not tell local sessions directly.
//! It publishes a `user-join` envelope on the presence topic and waits for
//! the bridge to hand it back, exactly like every other instance does.  That
//! single path keeps every instance's view of who is online the same,
//! eventually.  The presence listener is a separate task that forwards each
//! presence payload into the hub's inbox.  If the bridge refuses a publish,
//! the hub applies the envelope to itself so local sessions still see it.
//!
//! # Private rooms
//!
//! Private rooms have their own name table, separate from public rooms.
//! Session A pairing with B joins the room `concat(B.id, A.id)` and publishes
//! a `join-room-private` envelope on the presence topic.  Every hub that
//! hosts a session of B asks that session to join the same room, with A as
//! the inviter.  No instance ever calls another directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use roomcast_core::{
    encode, join_batch, Action, BridgeFrame, Envelope, Identity, InstanceId, RoomRecord,
    PRESENCE_TOPIC,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::directory::{IdentityDirectory, RoomDirectory};
use crate::application::pubsub::{Payload, PubSub, Subscription};
use crate::application::room::{Room, RoomContext, RoomHandle};
use crate::application::session::{SessionCommand, SessionHandle, SessionId};
use crate::domain::config::RoomPolicy;

/// Messages accepted by the hub loop.
#[derive(Debug)]
pub enum HubCommand {
    /// Attaches a session: publishes its `user-join` and sends it the
    /// presence snapshot.
    Register { session: Arc<SessionHandle> },
    /// Detaches a session and publishes its `user-left`.
    Unregister { session: SessionId },
    /// Looks a running room up by exact id.
    FindRoomById {
        id: Uuid,
        reply: oneshot::Sender<Option<RoomHandle>>,
    },
    /// Returns the room called `name`, starting it if needed.  `private`
    /// selects the invitation-only namespace.
    RoomForJoin {
        name: String,
        private: bool,
        reply: oneshot::Sender<RoomHandle>,
    },
    /// Looks a known identity up by id.
    FindIdentity {
        id: String,
        reply: oneshot::Sender<Option<Identity>>,
    },
    /// A payload received on the presence topic.
    Bridge { payload: Payload },
    /// Publishes an envelope on the presence topic.
    PublishPresence { envelope: Envelope },
    /// A reapable room has become empty.
    RoomIdle { id: Uuid },
    /// Returns the deduplicated list of known identities.
    Snapshot {
        reply: oneshot::Sender<Vec<Identity>>,
    },
    /// Returns the ids of the sessions attached to this instance.
    Sessions {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
}

// ── Handles ───────────────────────────────────────────────────────────────────

/// Cheap, cloneable handle to the hub.  The hub stops once every handle has
/// been dropped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
}

/// A handle that does not keep the hub alive.  Held by rooms and the presence
/// listener, which the hub itself owns.
#[derive(Debug, Clone)]
pub struct WeakHubHandle {
    tx: mpsc::WeakUnboundedSender<HubCommand>,
}

impl WeakHubHandle {
    pub fn upgrade(&self) -> Option<HubHandle> {
        self.tx.upgrade().map(|tx| HubHandle { tx })
    }
}

impl HubHandle {
    pub fn downgrade(&self) -> WeakHubHandle {
        WeakHubHandle {
            tx: self.tx.downgrade(),
        }
    }

    pub fn register(&self, session: Arc<SessionHandle>) {
        let _ = self.tx.send(HubCommand::Register { session });
    }

    pub fn unregister(&self, session: SessionId) {
        let _ = self.tx.send(HubCommand::Unregister { session });
    }

    pub async fn find_room_by_id(&self, id: Uuid) -> Option<RoomHandle> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(HubCommand::FindRoomById { id, reply }).ok()?;
        rx.await.ok().flatten()
    }

    /// Returns the room called `name`, creating it with the given privacy if
    /// it does not exist yet.  `None` only if the hub has stopped.
    pub async fn room_for_join(&self, name: &str, private: bool) -> Option<RoomHandle> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::RoomForJoin {
                name: name.to_string(),
                private,
                reply,
            })
            .ok()?;
        rx.await.ok()
    }

    pub async fn find_identity(&self, id: &str) -> Option<Identity> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HubCommand::FindIdentity {
                id: id.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    pub fn bridge(&self, payload: Payload) {
        let _ = self.tx.send(HubCommand::Bridge { payload });
    }

    pub fn publish_presence(&self, envelope: Envelope) {
        let _ = self.tx.send(HubCommand::PublishPresence { envelope });
    }

    pub fn room_idle(&self, id: Uuid) {
        let _ = self.tx.send(HubCommand::RoomIdle { id });
    }

    /// Returns the known identities, deduplicated by id.
    pub async fn snapshot(&self) -> Vec<Identity> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Snapshot { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Returns the sessions attached to this instance.
    pub async fn sessions(&self) -> Vec<SessionId> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Sessions { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }
}

// ── Hub loop ──────────────────────────────────────────────────────────────────

/// Collaborators injected into the hub.
#[derive(Clone)]
pub struct HubDeps {
    /// Tags every frame this instance publishes.
    pub instance: InstanceId,
    pub pubsub: Arc<dyn PubSub>,
    pub identities: Arc<dyn IdentityDirectory>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub policy: RoomPolicy,
}

/// State owned by the hub task.
pub struct Hub {
    deps: HubDeps,
    inbox: mpsc::UnboundedReceiver<HubCommand>,
    this: WeakHubHandle,
    sessions: HashMap<SessionId, Arc<SessionHandle>>,
    known: Vec<Identity>,
    rooms: HashMap<Uuid, RoomHandle>,
    room_names: HashMap<String, Uuid>,
    private_names: HashMap<String, Uuid>,
}

impl Hub {
    /// Seeds presence from the identity directory, subscribes to the
    /// presence topic and starts the hub loop.
    ///
    /// The subscription is in place before this returns, so the first
    /// registration's own `user-join` comes back to it.
    pub async fn spawn(deps: HubDeps) -> HubHandle {
        let (tx, inbox) = mpsc::unbounded_channel();
        let handle = HubHandle { tx };

        let known = match deps.identities.list_all() {
            Ok(identities) => identities,
            Err(e) => {
                warn!("hub: could not list identities, presence starts empty: {e}");
                Vec::new()
            }
        };

        match deps.pubsub.subscribe(PRESENCE_TOPIC).await {
            Ok(sub) => {
                tokio::spawn(listen_presence(sub, handle.downgrade()));
            }
            Err(e) => warn!("hub: presence subscribe failed, presence is local only: {e}"),
        }

        info!(
            "hub {} started with {} known identities",
            deps.instance,
            known.len()
        );

        let hub = Hub {
            deps,
            inbox,
            this: handle.downgrade(),
            sessions: HashMap::new(),
            known,
            rooms: HashMap::new(),
            room_names: HashMap::new(),
            private_names: HashMap::new(),
        };
        tokio::spawn(hub.run());
        handle
    }

    async fn run(mut self) {
        while let Some(cmd) = self.inbox.recv().await {
            self.apply(cmd).await;
        }
        info!("hub {} stopped", self.deps.instance);
    }

    async fn apply(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { session } => self.register(session).await,
            HubCommand::Unregister { session } => self.unregister(session).await,
            HubCommand::FindRoomById { id, reply } => {
                let _ = reply.send(self.live_room(id));
            }
            HubCommand::RoomForJoin {
                name,
                private,
                reply,
            } => {
                let room = self.room_for_join(&name, private);
                let _ = reply.send(room);
            }
            HubCommand::FindIdentity { id, reply } => {
                let _ = reply.send(self.known.iter().find(|k| k.id == id).cloned());
            }
            HubCommand::Bridge { payload } => self.on_presence(&payload),
            HubCommand::PublishPresence { envelope } => self.announce(envelope).await,
            HubCommand::RoomIdle { id } => self.retire_room(id).await,
            HubCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            HubCommand::Sessions { reply } => {
                let _ = reply.send(self.sessions.keys().copied().collect());
            }
        }
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    async fn register(&mut self, session: Arc<SessionHandle>) {
        let identity = session.identity().clone();
        if !self.known.iter().any(|k| k.id == identity.id) {
            warn!("hub: registering {identity}, which is not a known identity");
        }

        let joined = Envelope::user_joined(identity.clone());
        let published = self.publish_presence(joined.clone()).await;
        self.send_snapshot(&session);

        info!("hub: session {} registered for {identity}", session.id());
        self.sessions.insert(session.id(), session);
        if !published {
            self.apply_presence(joined);
        }
    }

    async fn unregister(&mut self, id: SessionId) {
        let Some(session) = self.sessions.remove(&id) else {
            return;
        };
        info!(
            "hub: session {id} unregistered for {}",
            session.identity()
        );
        self.announce(Envelope::user_left(session.identity().clone()))
            .await;
    }

    /// Sends the presence snapshot as a single queue item so a large
    /// directory cannot overflow the session's bounded queue.
    fn send_snapshot(&self, session: &SessionHandle) {
        let lines: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter_map(|identity| encode(&Envelope::user_joined(identity)).ok())
            .collect();
        if lines.is_empty() {
            return;
        }
        session.deliver(Arc::from(join_batch(&lines)));
    }

    fn snapshot(&self) -> Vec<Identity> {
        let mut seen = HashSet::new();
        self.known
            .iter()
            .filter(|identity| seen.insert(identity.id.as_str()))
            .cloned()
            .collect()
    }

    fn broadcast_local(&self, envelope: &Envelope) {
        let text: Arc<str> = match encode(envelope) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!("hub: failed to encode envelope: {e}");
                return;
            }
        };
        for session in self.sessions.values() {
            session.deliver(Arc::clone(&text));
        }
    }

    // ── Presence ──────────────────────────────────────────────────────────────

    /// Publishes `envelope` on the presence topic, or applies it locally if
    /// the bridge refuses it.
    async fn announce(&mut self, envelope: Envelope) {
        if !self.publish_presence(envelope.clone()).await {
            self.apply_presence(envelope);
        }
    }

    /// Returns `true` once the bridge accepted the envelope; its loopback
    /// will then apply it here like on every other instance.
    async fn publish_presence(&self, envelope: Envelope) -> bool {
        let action = envelope.action;
        let bytes = match BridgeFrame::new(self.deps.instance, envelope).to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("hub: failed to encode presence frame: {e}");
                return false;
            }
        };
        match self.deps.pubsub.publish(PRESENCE_TOPIC, bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "hub: publishing {} failed, applying locally: {e}",
                    action.as_str()
                );
                false
            }
        }
    }

    fn on_presence(&mut self, payload: &[u8]) {
        match BridgeFrame::from_bytes(payload) {
            Ok(frame) => self.apply_presence(frame.envelope),
            Err(e) => warn!("hub: skipping malformed presence payload: {e}"),
        }
    }

    fn apply_presence(&mut self, envelope: Envelope) {
        match envelope.action {
            Action::UserJoined => {
                let Some(identity) = envelope.sender.clone() else {
                    debug!("hub: user-join without sender");
                    return;
                };
                self.known.push(identity);
                self.broadcast_local(&envelope);
            }
            Action::UserLeft => {
                let Some(identity) = envelope.sender.as_ref() else {
                    debug!("hub: user-left without sender");
                    return;
                };
                if let Some(pos) = self.known.iter().position(|k| k.id == identity.id) {
                    self.known.swap_remove(pos);
                }
                self.broadcast_local(&envelope);
            }
            Action::JoinRoomPrivate => self.forward_private_invite(envelope),
            other => debug!("hub: ignoring presence action '{}'", other.as_str()),
        }
    }

    fn forward_private_invite(&self, envelope: Envelope) {
        let (Some(room), Some(inviter)) = (envelope.target, envelope.sender) else {
            debug!("hub: join-room-private without target or sender");
            return;
        };
        let invitee = envelope.message;
        for session in self
            .sessions
            .values()
            .filter(|s| s.identity().id == invitee)
        {
            debug!(
                "hub: inviting session {} into private room {}",
                session.id(),
                room.name
            );
            session.command(SessionCommand::JoinRoom {
                room: room.clone(),
                inviter: inviter.clone(),
            });
        }
    }

    // ── Rooms ─────────────────────────────────────────────────────────────────

    fn live_room(&self, id: Uuid) -> Option<RoomHandle> {
        self.rooms.get(&id).filter(|room| !room.is_closed()).cloned()
    }

    fn named_room(&self, name: &str, private: bool) -> Option<RoomHandle> {
        let names = if private {
            &self.private_names
        } else {
            &self.room_names
        };
        names.get(name).and_then(|id| self.live_room(*id))
    }

    /// Private rooms live in their own namespace and never go through the
    /// room directory, so a public room squatting the deterministic name of
    /// a pair never receives the pair's joins.
    fn room_for_join(&mut self, name: &str, private: bool) -> RoomHandle {
        if let Some(room) = self.named_room(name, private) {
            return room;
        }
        if private {
            return self.start_room(RoomRecord::new(name, true));
        }
        // An open join naming a live private room gets that room back and is
        // refused by the session.
        if let Some(room) = self.named_room(name, true) {
            return room;
        }

        let record = match self.deps.rooms.find_by_name(name) {
            Ok(Some(record)) if !record.private => {
                debug!("hub: starting room {name} from the room directory");
                record
            }
            Ok(Some(_)) => {
                warn!("hub: directory lists {name} as private; starting a public room instead");
                RoomRecord::new(name, false)
            }
            Ok(None) => {
                let record = RoomRecord::new(name, false);
                if let Err(e) = self.deps.rooms.create(&record) {
                    warn!("hub: could not store room {name}: {e}");
                }
                record
            }
            Err(e) => {
                warn!("hub: room directory lookup for {name} failed: {e}");
                RoomRecord::new(name, false)
            }
        };
        self.start_room(record)
    }

    fn start_room(&mut self, record: RoomRecord) -> RoomHandle {
        let ctx = RoomContext {
            instance: self.deps.instance,
            pubsub: Arc::clone(&self.deps.pubsub),
            policy: self.deps.policy,
            hub: Some(self.this.clone()),
        };
        let name = record.name.clone();
        let private = record.private;
        let room = Room::spawn(record, ctx);
        let names = if private {
            &mut self.private_names
        } else {
            &mut self.room_names
        };
        if let Some(stale) = names.insert(name, room.id()) {
            self.rooms.remove(&stale);
        }
        self.rooms.insert(room.id(), room.clone());
        room
    }

    async fn retire_room(&mut self, id: Uuid) {
        let Some(room) = self.rooms.get(&id).cloned() else {
            return;
        };
        if !room.retire().await {
            debug!("hub: room {} is busy again; keeping it", room.name());
            return;
        }
        info!("hub: retired empty room {}", room.name());
        self.rooms.remove(&id);
        let names = if room.is_private() {
            &mut self.private_names
        } else {
            &mut self.room_names
        };
        if names.get(room.name()) == Some(&id) {
            names.remove(room.name());
        }
    }
}

/// Forwards presence payloads into the hub's inbox until the subscription
/// ends or the hub stops.
async fn listen_presence(mut sub: Subscription, hub: WeakHubHandle) {
    while let Some(payload) = sub.next().await {
        let Some(hub) = hub.upgrade() else {
            break;
        };
        hub.bridge(payload);
    }
    debug!("presence listener on {} stopped", sub.topic());
}

// ── Tests ─────────────────────────────────────────────────────────────────────
