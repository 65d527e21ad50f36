//! Connection sessions: one per attached browser.
//!
//! A session is split in two:
//!
//! - [`SessionHandle`] is the shared, cheap-to-clone face of the session.
//!   Rooms and the hub hold it to push encoded envelopes into the bounded
//!   outbound queue and to hand commands to the session's own task.
//! - [`Session`] is the state owned by the inbound pump task: the set of
//!   rooms the session has joined and the dispatch logic for every inbound
//!   envelope.
//!
//! # Backpressure (for beginners)
//!
//! The outbound queue is a bounded `tokio::sync::mpsc` channel drained by the
//! outbound pump.  Producers (rooms, the hub) never wait on it: they call
//! [`SessionHandle::deliver`], which uses `try_send`.  If the queue is full
//! the browser is not keeping up, so the session is marked degraded and
//! asked to shut down instead of stalling a room loop for everyone else.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting → Registered → (Joined-to-N-rooms)* → Disconnecting → Gone
//! ```
//!
//! There is no resumption: a reconnecting browser gets a fresh session.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use roomcast_core::{decode, encode, private_room_name, Action, Envelope, Identity, RoomRecord};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::hub::HubHandle;
use crate::application::room::{JoinOutcome, RoomHandle};

/// Opaque per-connection identifier.  Two tabs of the same identity are two
/// sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Work the hub asks a session to perform on its own task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Join `room` on behalf of `inviter` (the private-room handshake).
    JoinRoom {
        /// The room to join; only its name is used for the lookup.
        room: RoomRecord,
        /// The identity that initiated the join.
        inviter: Identity,
    },
}

// ── SessionHandle ─────────────────────────────────────────────────────────────

/// Shared handle to a live session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    identity: Identity,
    outbound: mpsc::Sender<Arc<str>>,
    control: mpsc::UnboundedSender<SessionCommand>,
    shutdown: watch::Sender<bool>,
    degraded: AtomicBool,
    closed: AtomicBool,
}

/// The receiving ends that belong to the session's pumps.
#[derive(Debug)]
pub struct SessionMailbox {
    /// Drained by the outbound pump.
    pub outbound: mpsc::Receiver<Arc<str>>,
    /// Drained by the inbound pump.
    pub control: mpsc::UnboundedReceiver<SessionCommand>,
}

impl SessionHandle {
    /// Creates a handle for `identity` with an outbound queue of `capacity`
    /// items, plus the receivers for the session's pumps.
    pub fn new(identity: Identity, capacity: usize) -> (Arc<Self>, SessionMailbox) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let handle = Arc::new(Self {
            id: SessionId::generate(),
            identity,
            outbound: outbound_tx,
            control: control_tx,
            shutdown,
            degraded: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        (
            handle,
            SessionMailbox {
                outbound: outbound_rx,
                control: control_rx,
            },
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queues an encoded frame without waiting.
    ///
    /// Returns `true` if the frame was queued.  A full queue marks the
    /// session degraded and signals shutdown; a closed session drops the
    /// frame silently.
    pub fn deliver(&self, frame: Arc<str>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                if !self.degraded.swap(true, Ordering::AcqRel) {
                    warn!(
                        "session {} ({}): outbound queue full; disconnecting slow consumer",
                        self.id, self.identity.name
                    );
                }
                self.signal_shutdown();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Encodes `envelope` and queues it.  See [`deliver`](Self::deliver).
    pub fn deliver_envelope(&self, envelope: &Envelope) -> bool {
        match encode(envelope) {
            Ok(text) => self.deliver(Arc::from(text)),
            Err(e) => {
                warn!("session {}: failed to encode envelope: {e}", self.id);
                false
            }
        }
    }

    /// Hands a command to the session's inbound task.  Returns `false` if
    /// that task has already exited.
    pub fn command(&self, cmd: SessionCommand) -> bool {
        self.control.send(cmd).is_ok()
    }

    /// Asks both pumps to stop.
    pub fn signal_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns a receiver that observes [`signal_shutdown`](Self::signal_shutdown).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the session closed.  Returns `true` only for the first caller.
    fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Per-connection state owned by the inbound pump.
pub struct Session {
    handle: Arc<SessionHandle>,
    hub: HubHandle,
    rooms: HashMap<Uuid, RoomHandle>,
}

impl Session {
    pub fn new(handle: Arc<SessionHandle>, hub: HubHandle) -> Self {
        Self {
            handle,
            hub,
            rooms: HashMap::new(),
        }
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    /// Records of every room this session is currently a member of.
    pub fn joined_rooms(&self) -> Vec<RoomRecord> {
        self.rooms.values().map(|room| room.record().clone()).collect()
    }

    /// Decodes one inbound text frame and dispatches it.  Undecodable frames
    /// are logged and dropped; the session carries on.
    pub async fn handle_text(&mut self, text: &str) {
        match decode(text) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => warn!("session {}: dropping undecodable frame: {e}", self.handle.id()),
        }
    }

    /// Routes one inbound envelope.
    ///
    /// The sender field is always overwritten with this session's identity;
    /// whatever the browser claimed is ignored.
    pub async fn dispatch(&mut self, mut envelope: Envelope) {
        envelope.sender = Some(self.handle.identity().clone());
        match envelope.action {
            Action::SendMessage => self.send_message(envelope),
            Action::JoinRoom => {
                let name = envelope.message;
                self.join_room(&name, None).await;
            }
            Action::LeaveRoom => self.leave_room(&envelope.message),
            Action::JoinRoomPrivate => self.join_private(&envelope.message).await,
            other => debug!(
                "session {}: ignoring client action '{}'",
                self.handle.id(),
                other.as_str()
            ),
        }
    }

    /// Executes a hub-initiated command.
    pub async fn execute(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::JoinRoom { room, inviter } => {
                self.join_room(&room.name, Some(inviter)).await;
            }
        }
    }

    fn send_message(&mut self, mut envelope: Envelope) {
        let Some(target) = envelope.target.as_ref() else {
            debug!("session {}: send-message without target", self.handle.id());
            return;
        };
        let Some(room) = self.rooms.get(&target.id) else {
            debug!(
                "session {}: send-message to room {} it has not joined",
                self.handle.id(),
                target.id
            );
            return;
        };
        envelope.target = Some(room.record().clone());
        room.broadcast(envelope);
    }

    fn leave_room(&mut self, room_id: &str) {
        let Ok(id) = room_id.parse::<Uuid>() else {
            debug!("session {}: leave-room with invalid id '{room_id}'", self.handle.id());
            return;
        };
        if let Some(room) = self.rooms.remove(&id) {
            info!("session {}: left room {}", self.handle.id(), room.name());
            room.leave(self.handle.id());
        }
    }

    async fn join_private(&mut self, target_id: &str) {
        let Some(target) = self.hub.find_identity(target_id).await else {
            debug!(
                "session {}: join-room-private with unknown identity '{target_id}'",
                self.handle.id()
            );
            return;
        };
        let name = private_room_name(&target.id, &self.handle.identity().id);
        if let Some(room) = self.join_room(&name, Some(target.clone())).await {
            let invite = Envelope::private_invite(
                room.record().clone(),
                self.handle.identity().clone(),
                &target.id,
            );
            self.hub.publish_presence(invite);
        }
    }

    /// Joins (creating if needed) the room called `name`.
    ///
    /// `inviter` is `None` for a self-initiated join; private rooms only
    /// accept attributed joins.  Returns the room when the session is a
    /// member afterwards.
    pub async fn join_room(&mut self, name: &str, inviter: Option<Identity>) -> Option<RoomHandle> {
        let invited = inviter.is_some();
        let mut retried = false;
        loop {
            let room = self.hub.room_for_join(name, invited).await?;
            if !invited && room.is_private() {
                debug!(
                    "session {}: refusing uninvited join to private room {name}",
                    self.handle.id()
                );
                return None;
            }
            if self.rooms.contains_key(&room.id()) {
                return Some(room);
            }
            match room.join(Arc::clone(&self.handle), invited).await {
                JoinOutcome::Joined => {
                    info!("session {}: joined room {name}", self.handle.id());
                    self.rooms.insert(room.id(), room.clone());
                    self.handle
                        .deliver_envelope(&Envelope::room_joined(room.record().clone(), inviter));
                    return Some(room);
                }
                JoinOutcome::Refused => return None,
                JoinOutcome::Retired if !retried => {
                    debug!("session {}: room {name} retired mid-join; retrying", self.handle.id());
                    retried = true;
                }
                JoinOutcome::Retired => return None,
            }
        }
    }

    /// Unregisters from the hub, leaves every room and stops the pumps.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub async fn teardown(&mut self) {
        if !self.handle.mark_closed() {
            return;
        }
        self.hub.unregister(self.handle.id());
        for (_, room) in self.rooms.drain() {
            room.leave(self.handle.id());
        }
        self.handle.signal_shutdown();
        info!(
            "session {} ({}): torn down",
            self.handle.id(),
            self.handle.identity().name
        );
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
