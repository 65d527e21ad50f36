//! Room actor: owns the member set of one room and fans broadcasts out.
//!
//! Every room runs its own Tokio task.  All mutations of the member set
//! arrive as [`RoomCommand`]s on one inbox and are applied in arrival order,
//! so a join followed by a leave from the same session always ends with the
//! session outside the room.
//!
//! # Bridging
//!
//! A relayed room publishes every broadcast on its bridge topic
//! (`room:<name>`, or `private:<name>` for private rooms) after delivering
//! it locally, and subscribes to the same
//! topic.  Frames that come back carrying this instance's own origin are
//! dropped; frames from other instances are delivered to local members only
//! and never re-published.

use std::collections::HashMap;
use std::sync::Arc;

use roomcast_core::{encode, room_topic, BridgeFrame, Envelope, InstanceId, RoomRecord};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::hub::WeakHubHandle;
use crate::application::pubsub::{Payload, PubSub, Subscription};
use crate::application::session::{SessionHandle, SessionId};
use crate::domain::config::{RoomPolicy, RoomRetention};

/// Messages accepted by a room's loop.
#[derive(Debug)]
pub enum RoomCommand {
    /// Adds `session` to the room.  Replies `false` when refused.
    Join {
        session: Arc<SessionHandle>,
        invited: bool,
        reply: oneshot::Sender<bool>,
    },
    /// Removes the session.  No notice is sent.
    Leave { session: SessionId },
    /// Delivers `envelope` to every member and mirrors it on the bridge.
    Broadcast { envelope: Envelope },
    /// A bridge payload from another instance.
    Remote { payload: Payload },
    /// Lists the current members.
    Members {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
    /// Stops the room if it is still empty.  Replies whether it stopped.
    Retire { reply: oneshot::Sender<bool> },
}

/// Result of [`RoomHandle::join`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// The room is private and the join was not invited, or the session has
    /// already been torn down.
    Refused,
    /// The room stopped before handling the join.
    Retired,
}

/// Cheap, cloneable handle to a running room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    record: Arc<RoomRecord>,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn record(&self) -> &RoomRecord {
        &self.record
    }

    pub fn id(&self) -> Uuid {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn is_private(&self) -> bool {
        self.record.private
    }

    /// Returns `true` once the room's loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub async fn join(&self, session: Arc<SessionHandle>, invited: bool) -> JoinOutcome {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(RoomCommand::Join {
                session,
                invited,
                reply,
            })
            .is_err()
        {
            return JoinOutcome::Retired;
        }
        match rx.await {
            Ok(true) => JoinOutcome::Joined,
            Ok(false) => JoinOutcome::Refused,
            Err(_) => JoinOutcome::Retired,
        }
    }

    pub fn leave(&self, session: SessionId) {
        let _ = self.tx.send(RoomCommand::Leave { session });
    }

    pub fn broadcast(&self, envelope: Envelope) {
        let _ = self.tx.send(RoomCommand::Broadcast { envelope });
    }

    /// Returns the current members, or `None` if the room has stopped.
    pub async fn members(&self) -> Option<Vec<SessionId>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RoomCommand::Members { reply }).ok()?;
        rx.await.ok()
    }

    /// Asks the room to stop if empty.  Returns `true` if it stopped (or had
    /// already stopped).
    pub async fn retire(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RoomCommand::Retire { reply }).is_err() {
            return true;
        }
        rx.await.unwrap_or(true)
    }
}

// ── Room loop ─────────────────────────────────────────────────────────────────

/// Everything a room needs from its surroundings.
#[derive(Clone)]
pub struct RoomContext {
    pub instance: InstanceId,
    pub pubsub: Arc<dyn PubSub>,
    pub policy: RoomPolicy,
    /// Notified when a reapable room becomes empty.
    pub hub: Option<WeakHubHandle>,
}

/// State owned by a room's task.
pub struct Room {
    record: Arc<RoomRecord>,
    ctx: RoomContext,
    members: HashMap<SessionId, Arc<SessionHandle>>,
    inbox: mpsc::UnboundedReceiver<RoomCommand>,
    remote: Option<Subscription>,
    relayed: bool,
}

impl Room {
    /// Starts the loop for `record` and returns its handle.
    pub fn spawn(record: RoomRecord, ctx: RoomContext) -> RoomHandle {
        let (tx, inbox) = mpsc::unbounded_channel();
        let record = Arc::new(record);
        let relayed = !record.private || ctx.policy.relay_private_rooms;
        let room = Room {
            record: Arc::clone(&record),
            ctx,
            members: HashMap::new(),
            inbox,
            remote: None,
            relayed,
        };
        tokio::spawn(room.run());
        RoomHandle { record, tx }
    }

    async fn run(mut self) {
        if self.relayed {
            let topic = room_topic(&self.record.name, self.record.private);
            match self.ctx.pubsub.subscribe(&topic).await {
                Ok(sub) => self.remote = Some(sub),
                Err(e) => warn!(
                    "room {}: bridge subscribe failed, local delivery only: {e}",
                    self.record.name
                ),
            }
        }
        info!(
            "room {} ({}) started{}",
            self.record.name,
            self.record.id,
            if self.record.private { " [private]" } else { "" }
        );

        loop {
            tokio::select! {
                cmd = self.inbox.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.apply(cmd).await {
                        break;
                    }
                }
                payload = next_remote(&mut self.remote) => match payload {
                    Some(payload) => self.on_remote(&payload),
                    None => {
                        warn!("room {}: bridge subscription ended", self.record.name);
                        self.remote = None;
                    }
                },
            }
        }

        info!("room {} stopped", self.record.name);
    }

    /// Applies one command.  Returns `false` when the loop should stop.
    async fn apply(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Join {
                session,
                invited,
                reply,
            } => {
                let joined = self.join(session, invited).await;
                let _ = reply.send(joined);
            }
            RoomCommand::Leave { session } => self.leave(session),
            RoomCommand::Broadcast { envelope } => self.broadcast(&envelope).await,
            RoomCommand::Remote { payload } => self.on_remote(&payload),
            RoomCommand::Members { reply } => {
                let _ = reply.send(self.members.keys().copied().collect());
            }
            RoomCommand::Retire { reply } => {
                let empty = self.members.is_empty();
                let _ = reply.send(empty);
                if empty {
                    return false;
                }
            }
        }
        true
    }

    async fn join(&mut self, session: Arc<SessionHandle>, invited: bool) -> bool {
        if self.record.private && !invited {
            debug!("room {}: uninvited join refused", self.record.name);
            return false;
        }
        if session.is_closed() {
            return false;
        }
        if self.members.contains_key(&session.id()) {
            return true;
        }
        if !self.record.private {
            let welcome = Envelope::welcome((*self.record).clone(), &session.identity().name);
            self.broadcast(&welcome).await;
        }
        debug!(
            "room {}: session {} joined ({} members)",
            self.record.name,
            session.id(),
            self.members.len() + 1
        );
        self.members.insert(session.id(), session);
        true
    }

    fn leave(&mut self, session: SessionId) {
        if self.members.remove(&session).is_none() {
            return;
        }
        debug!(
            "room {}: session {session} left ({} members)",
            self.record.name,
            self.members.len()
        );
        self.report_if_idle();
    }

    async fn broadcast(&mut self, envelope: &Envelope) {
        self.deliver_local(envelope);
        if !self.relayed {
            return;
        }
        let frame = BridgeFrame::new(self.ctx.instance, envelope.clone());
        let bytes = match frame.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("room {}: failed to encode bridge frame: {e}", self.record.name);
                return;
            }
        };
        if let Err(e) = self
            .ctx
            .pubsub
            .publish(&room_topic(&self.record.name, self.record.private), bytes)
            .await
        {
            warn!("room {}: bridge publish failed: {e}", self.record.name);
        }
    }

    fn on_remote(&mut self, payload: &[u8]) {
        match BridgeFrame::from_bytes(payload) {
            Ok(frame) if frame.origin == self.ctx.instance => {}
            Ok(frame) => self.deliver_local(&frame.envelope),
            Err(e) => warn!("room {}: dropping malformed bridge frame: {e}", self.record.name),
        }
    }

    /// Queues `envelope` for every member.  Members whose queue overflowed
    /// are dropped from the room on the spot.
    fn deliver_local(&mut self, envelope: &Envelope) {
        let text: Arc<str> = match encode(envelope) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!("room {}: failed to encode envelope: {e}", self.record.name);
                return;
            }
        };
        let before = self.members.len();
        self.members
            .retain(|_, member| member.deliver(Arc::clone(&text)) || !member.is_degraded());
        if self.members.len() != before {
            self.report_if_idle();
        }
    }

    fn report_if_idle(&self) {
        if !self.members.is_empty()
            || self.record.private
            || self.ctx.policy.retention != RoomRetention::ReapEmptyPublic
        {
            return;
        }
        if let Some(hub) = self.ctx.hub.as_ref().and_then(WeakHubHandle::upgrade) {
            hub.room_idle(self.record.id);
        }
    }
}

async fn next_remote(remote: &mut Option<Subscription>) -> Option<Payload> {
    match remote {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
