//! In-process relay.
//!
//! Plays the central server: authorizes connections, keeps one operation
//! log per room, replays the backlog a client is missing and fans incoming
//! operations out to the other connections of the room.

use super::{Connection, Connector};
use crate::config::Config;
use crate::crdt::{Operation, ReplicaId};
use crate::error::TransportError;
use crate::external::{Authorizer, MembershipResolver, MetadataStore};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::replica::{Replica, SeedOutcome};
use crate::sync::OperationLog;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PRESENCE_CAPACITY: usize = 64;
const SEED_REPLICA: &str = "relay";

struct Room {
    log: OperationLog,
    peers: HashMap<u64, mpsc::UnboundedSender<Bytes>>,
    presence: broadcast::Sender<Bytes>,
}

impl Room {
    fn new(log: OperationLog) -> Self {
        let (presence, _) = broadcast::channel(PRESENCE_CAPACITY);
        Self {
            log,
            peers: HashMap::new(),
            presence,
        }
    }

    fn send_to_others(&self, from: u64, frame: &Bytes) {
        for (id, peer) in &self.peers {
            if *id != from {
                let _ = peer.send(frame.clone());
            }
        }
    }

    fn send_to_all(&self, frame: &Bytes) {
        for peer in self.peers.values() {
            let _ = peer.send(frame.clone());
        }
    }
}

struct RelayState {
    online: bool,
    /// Cancelled to drop every open connection
    generation: CancellationToken,
    rooms: HashMap<String, Room>,
    next_connection: u64,
}

#[derive(Clone)]
pub struct MemoryRelay {
    authorizer: Arc<dyn Authorizer>,
    membership: Arc<dyn MembershipResolver>,
    metadata: Option<Arc<dyn MetadataStore>>,
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new(authorizer: Arc<dyn Authorizer>, membership: Arc<dyn MembershipResolver>) -> Self {
        Self {
            authorizer,
            membership,
            metadata: None,
            state: Arc::new(Mutex::new(RelayState {
                online: true,
                generation: CancellationToken::new(),
                rooms: HashMap::new(),
                next_connection: 1,
            })),
        }
    }

    /// Seed new rooms from, and relay title changes to, `metadata`.
    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Going offline drops every open connection and refuses new ones.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state.lock();
        if state.online && !online {
            info!("relay going offline");
            state.generation.cancel();
            state.generation = CancellationToken::new();
        }
        state.online = online;
    }

    /// Copy of a room's log.
    pub fn room_log(&self, room: &str) -> Option<OperationLog> {
        self.state.lock().rooms.get(room).map(|r| r.log.clone())
    }

    pub fn connection_count(&self, room: &str) -> usize {
        self.state.lock().rooms.get(room).map_or(0, |r| r.peers.len())
    }

    async fn ensure_room(&self, room: &str) -> Result<(), TransportError> {
        if self.state.lock().rooms.contains_key(room) {
            return Ok(());
        }

        let mut log = OperationLog::new();
        let initial = match &self.metadata {
            Some(metadata) => metadata.initial_content(room).await,
            None => None,
        };
        if let Some(markup) = initial {
            let mut seeder = Replica::with_config(ReplicaId::from(SEED_REPLICA), Config::default())
                .map_err(|e| TransportError::Unavailable(e.to_string()))?;
            match seeder.seed(&markup) {
                Ok(SeedOutcome::Seeded { operations }) => {
                    info!(%room, operations, "seeded room from initial content");
                    log = seeder.log().clone();
                }
                Ok(SeedOutcome::Fallback { .. }) => {}
                Err(e) => warn!(%room, error = %e, "could not seed room"),
            }
        }

        self.state
            .lock()
            .rooms
            .entry(room.to_string())
            .or_insert_with(|| Room::new(log));
        Ok(())
    }

    async fn serve(
        self,
        room: String,
        connection: u64,
        to_client: mpsc::UnboundedSender<Bytes>,
        mut from_client: mpsc::UnboundedReceiver<Bytes>,
        cancel: CancellationToken,
    ) {
        let mut greeted = false;
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = from_client.recv() => frame,
            };
            let Some(frame) = frame else { break };

            let message: ClientMessage = match protocol::decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    error!(%room, connection, error = %e, "malformed frame, closing connection");
                    break;
                }
            };

            match message {
                ClientMessage::Hello { replica, known } => {
                    let backlog = self
                        .state
                        .lock()
                        .rooms
                        .get(&room)
                        .map(|r| r.log.missing_from(&known))
                        .unwrap_or_default();
                    debug!(%room, %replica, backlog = backlog.len(), "replaying backlog");
                    if !reply(&to_client, &ServerMessage::Backlog { ops: backlog }) {
                        break;
                    }
                    greeted = true;
                }
                ClientMessage::Ops { batch, ops } if greeted => {
                    self.relay_ops(&room, connection, ops);
                    if !reply(&to_client, &ServerMessage::Ack { batch }) {
                        break;
                    }
                }
                ClientMessage::Rename { title } if greeted => {
                    if let Some(metadata) = &self.metadata {
                        if let Err(e) = metadata.set_title(&room, &title).await {
                            warn!(%room, error = %e, "could not store title");
                            continue;
                        }
                    }
                    if let Ok(frame) = protocol::encode(&ServerMessage::TitleChanged { title }) {
                        if let Some(r) = self.state.lock().rooms.get(&room) {
                            r.send_to_all(&frame);
                        }
                    }
                }
                _ => {
                    error!(%room, connection, "message before hello, closing connection");
                    let _ = reply(
                        &to_client,
                        &ServerMessage::Error {
                            reason: "expected hello".into(),
                        },
                    );
                    break;
                }
            }
        }

        if let Some(r) = self.state.lock().rooms.get_mut(&room) {
            r.peers.remove(&connection);
        }
        debug!(%room, connection, "connection closed");
    }

    /// Append new operations to the room log and forward them.
    fn relay_ops(&self, room: &str, from: u64, ops: Vec<Operation>) {
        let mut state = self.state.lock();
        let Some(r) = state.rooms.get_mut(room) else {
            return;
        };
        let fresh: Vec<Operation> = ops.into_iter().filter(|op| r.log.append(op.clone())).collect();
        if fresh.is_empty() {
            return;
        }
        debug!(%room, count = fresh.len(), "relaying operations");
        match protocol::encode(&ServerMessage::Ops { ops: fresh }) {
            Ok(frame) => r.send_to_others(from, &frame),
            Err(e) => error!(%room, error = %e, "could not encode operations"),
        }
    }
}

fn reply(to_client: &mpsc::UnboundedSender<Bytes>, message: &ServerMessage) -> bool {
    match protocol::encode(message) {
        Ok(frame) => to_client.send(frame).is_ok(),
        Err(e) => {
            error!(error = %e, "could not encode reply");
            false
        }
    }
}

#[async_trait]
impl Connector for MemoryRelay {
    async fn connect(&self, room: &str, token: &str) -> Result<Connection, TransportError> {
        if !self.state.lock().online {
            return Err(TransportError::Unavailable("relay offline".into()));
        }

        let user = self.authorizer.authorize(room, token).await?;
        let members = self.membership.members(room).await?;
        if !members.contains(&user) {
            warn!(%room, %user, "rejected connection from non-member");
            return Err(TransportError::AccessDenied(format!("{} is not a member of {}", user, room)));
        }
        self.ensure_room(room).await?;

        let (to_client, frames_in) = mpsc::unbounded_channel();
        let (frames_out, from_client) = mpsc::unbounded_channel();
        let (connection, presence, cancel) = {
            let mut state = self.state.lock();
            if !state.online {
                return Err(TransportError::Unavailable("relay offline".into()));
            }
            let connection = state.next_connection;
            state.next_connection += 1;
            let cancel = state.generation.child_token();
            let r = state
                .rooms
                .get_mut(room)
                .ok_or_else(|| TransportError::Unavailable(format!("room {} vanished", room)))?;
            r.peers.insert(connection, to_client.clone());
            (connection, r.presence.clone(), cancel)
        };

        info!(%room, %user, connection, "connection accepted");
        tokio::spawn(
            self.clone()
                .serve(room.to_string(), connection, to_client, from_client, cancel),
        );

        Ok(Connection {
            user,
            frames_out,
            frames_in,
            presence_in: presence.subscribe(),
            presence_out: presence,
        })
    }
}
