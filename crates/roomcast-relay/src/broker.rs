//! The broker actor: topic subscriptions and fan-out.
//!
//! One task owns the whole subscription table.  Connection tasks talk to it
//! through a [`BrokerHandle`]; the broker answers by pushing pre-serialised
//! `message` frames into each connection's outbound queue.
//!
//! # Delivery rules
//!
//! - A publish reaches every connection subscribed to the topic, the
//!   publisher included.  Servers filter their own frames by origin.
//! - A publish to a topic nobody subscribed to is dropped.
//! - Frames from one publisher on one topic reach each subscriber in publish
//!   order.  Nothing is persisted or replayed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use roomcast_core::RelayFrame;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Identifies one server connection to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound queue of one connection: serialised relay frames.
pub type Outbox = mpsc::UnboundedReceiver<Arc<str>>;

#[derive(Debug)]
enum BrokerCommand {
    Attach {
        tx: mpsc::UnboundedSender<Arc<str>>,
        reply: oneshot::Sender<ConnId>,
    },
    Detach {
        conn: ConnId,
    },
    Subscribe {
        conn: ConnId,
        topic: String,
    },
    Unsubscribe {
        conn: ConnId,
        topic: String,
    },
    Publish {
        topic: String,
        payload: String,
    },
    Subscribers {
        topic: String,
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the broker task.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerCommand>,
}

impl BrokerHandle {
    /// Registers a new connection and returns its id and outbound queue.
    /// `None` only if the broker has stopped.
    pub async fn attach(&self) -> Option<(ConnId, Outbox)> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(BrokerCommand::Attach { tx: out_tx, reply })
            .ok()?;
        let conn = rx.await.ok()?;
        Some((conn, out_rx))
    }

    /// Drops every subscription of `conn`.
    pub fn detach(&self, conn: ConnId) {
        let _ = self.tx.send(BrokerCommand::Detach { conn });
    }

    pub fn subscribe(&self, conn: ConnId, topic: String) {
        let _ = self.tx.send(BrokerCommand::Subscribe { conn, topic });
    }

    pub fn unsubscribe(&self, conn: ConnId, topic: String) {
        let _ = self.tx.send(BrokerCommand::Unsubscribe { conn, topic });
    }

    pub fn publish(&self, topic: String, payload: String) {
        let _ = self.tx.send(BrokerCommand::Publish { topic, payload });
    }

    /// Number of connections subscribed to `topic`.
    pub async fn subscribers(&self, topic: &str) -> usize {
        let (reply, rx) = oneshot::channel();
        let cmd = BrokerCommand::Subscribers {
            topic: topic.to_string(),
            reply,
        };
        if self.tx.send(cmd).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// State owned by the broker task.
#[derive(Default)]
pub struct Broker {
    next_conn: u64,
    conns: HashMap<ConnId, mpsc::UnboundedSender<Arc<str>>>,
    topics: HashMap<String, HashSet<ConnId>>,
}

impl Broker {
    /// Starts the broker task.  It runs until every handle is dropped.
    pub fn spawn() -> BrokerHandle {
        let (tx, mut inbox) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut broker = Broker::default();
            while let Some(cmd) = inbox.recv().await {
                broker.handle(cmd);
            }
            debug!("broker stopped");
        });
        BrokerHandle { tx }
    }

    fn handle(&mut self, cmd: BrokerCommand) {
        match cmd {
            BrokerCommand::Attach { tx, reply } => {
                let conn = ConnId(self.next_conn);
                self.next_conn += 1;
                self.conns.insert(conn, tx);
                info!("{conn} attached ({} connections)", self.conns.len());
                let _ = reply.send(conn);
            }
            BrokerCommand::Detach { conn } => self.detach(conn),
            BrokerCommand::Subscribe { conn, topic } => {
                if !self.conns.contains_key(&conn) {
                    return;
                }
                debug!("{conn} subscribed to {topic}");
                self.topics.entry(topic).or_default().insert(conn);
            }
            BrokerCommand::Unsubscribe { conn, topic } => {
                debug!("{conn} unsubscribed from {topic}");
                self.remove_subscriber(&topic, conn);
            }
            BrokerCommand::Publish { topic, payload } => self.publish(topic, payload),
            BrokerCommand::Subscribers { topic, reply } => {
                let _ = reply.send(self.topics.get(&topic).map_or(0, HashSet::len));
            }
        }
    }

    fn publish(&mut self, topic: String, payload: String) {
        let Some(subscribers) = self.topics.get(&topic) else {
            debug!("dropping publish to {topic}: no subscribers");
            return;
        };

        let frame = RelayFrame::Message {
            topic: topic.clone(),
            payload,
        };
        let text: Arc<str> = match serde_json::to_string(&frame) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!("failed to serialise message for {topic}: {e}");
                return;
            }
        };

        let gone: Vec<ConnId> = subscribers
            .iter()
            .filter(|conn| {
                self.conns
                    .get(*conn)
                    .map_or(true, |tx| tx.send(Arc::clone(&text)).is_err())
            })
            .copied()
            .collect();
        for conn in gone {
            self.detach(conn);
        }
    }

    fn detach(&mut self, conn: ConnId) {
        if self.conns.remove(&conn).is_none() {
            return;
        }
        let topics: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, subs)| subs.contains(&conn))
            .map(|(topic, _)| topic.clone())
            .collect();
        for topic in topics {
            self.remove_subscriber(&topic, conn);
        }
        info!("{conn} detached ({} connections)", self.conns.len());
    }

    fn remove_subscriber(&mut self, topic: &str, conn: ConnId) {
        if let Some(subs) = self.topics.get_mut(topic) {
            subs.remove(&conn);
            if subs.is_empty() {
                self.topics.remove(topic);
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
