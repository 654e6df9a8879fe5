//! Session actor.
//!
//! One tokio task owns the [`Replica`] and everything attached to it.
//! Local commands, relay frames, presence frames, the flush ticker and the
//! reconnect timer are all served from a single `select!` loop, so the
//! replica never needs a lock.

use super::{Connection, Connector, SessionError};
use crate::awareness::{Awareness, AwarenessRecord, AwarenessUpdate, Identity};
use crate::config::Config;
use crate::document::Selection;
use crate::error::TransportError;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::replica::Replica;
use crate::sync::{ConnectionStatus, SyncSession};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type EditFn = Box<dyn FnOnce(&mut Replica) + Send>;

enum Command {
    Edit(EditFn),
    Flush {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SetCursor(Option<Selection>),
    Peers {
        reply: oneshot::Sender<Vec<AwarenessRecord>>,
    },
    Rename {
        title: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Shutdown {
        reply: oneshot::Sender<Replica>,
    },
}

/// Handle to a running sync session.
///
/// Cheap to clone; every clone talks to the same actor. Edits are applied
/// locally right away and reach the relay on the next flush.
#[derive(Clone)]
pub struct CollabSession {
    tx: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    title: watch::Receiver<Option<String>>,
    cancel: CancellationToken,
}

impl CollabSession {
    /// Start syncing `replica` with `room`. Must be called inside a tokio
    /// runtime. Connection happens in the background; watch
    /// [`CollabSession::status`] to follow it.
    pub fn spawn(
        replica: Replica,
        connector: Arc<dyn Connector>,
        room: impl Into<String>,
        token: impl Into<String>,
        identity: Identity,
    ) -> Self {
        let config = replica.config().clone();
        let awareness = Awareness::new(replica.id().clone(), identity, &config.awareness);
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);
        let (title_tx, title) = watch::channel(None);
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            replica,
            awareness,
            session: SyncSession::new(),
            connector,
            room: room.into(),
            token: token.into(),
            config,
            status_tx,
            title_tx,
            frames_out: None,
            frames_in: None,
            presence_out: None,
            presence_in: None,
            attempt: 0,
            retry_at: None,
            cancel: cancel.clone(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            status,
            title,
            cancel,
        }
    }

    /// Run `f` against the replica inside the actor.
    pub async fn edit<F, T>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut Replica) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Edit(Box::new(move |replica| {
                let _ = reply.send(f(replica));
            })))
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    pub async fn read<F, T>(&self, f: F) -> Result<T, SessionError>
    where
        F: FnOnce(&Replica) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.edit(move |replica| f(replica)).await
    }

    /// Send queued operations now instead of waiting for the next tick.
    pub async fn flush(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Flush { reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    pub fn set_cursor(&self, cursor: Option<Selection>) -> Result<(), SessionError> {
        self.tx
            .send(Command::SetCursor(cursor))
            .map_err(|_| SessionError::Shutdown)
    }

    /// Presence records of the other participants.
    pub async fn peers(&self) -> Result<Vec<AwarenessRecord>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Peers { reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Rename the document. The title is relayed to every participant but
    /// never enters the operation log.
    pub async fn rename(&self, title: impl Into<String>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Rename {
                title: title.into(),
                reply,
            })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.title.borrow().clone()
    }

    pub fn watch_title(&self) -> watch::Receiver<Option<String>> {
        self.title.clone()
    }

    /// Stop the session and take the replica back. Operations the relay
    /// has not acknowledged are back in the replica's outbox.
    pub async fn shutdown(self) -> Result<Replica, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Stop the session without waiting, dropping the replica.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

struct SessionActor {
    replica: Replica,
    awareness: Awareness,
    session: SyncSession,
    connector: Arc<dyn Connector>,
    room: String,
    token: String,
    config: Config,
    status_tx: watch::Sender<ConnectionStatus>,
    title_tx: watch::Sender<Option<String>>,
    frames_out: Option<mpsc::UnboundedSender<Bytes>>,
    frames_in: Option<mpsc::UnboundedReceiver<Bytes>>,
    presence_out: Option<broadcast::Sender<Bytes>>,
    presence_in: Option<broadcast::Receiver<Bytes>>,
    /// Failed connection attempts since the last success
    attempt: u32,
    retry_at: Option<Instant>,
    cancel: CancellationToken,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut ticker = tokio::time::interval(self.config.transport.flush_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();
        self.retry_at = Some(Instant::now());

        let mut shutdown = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    None => break,
                    Some(Command::Shutdown { reply }) => {
                        shutdown = Some(reply);
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },
                frame = next_frame(&mut self.frames_in) => self.handle_frame(frame),
                update = next_presence(&mut self.presence_in) => self.handle_presence(update),
                _ = ticker.tick() => self.tick(),
                _ = retry(self.retry_at) => self.connect().await,
            }
        }

        self.flush();
        if self.presence_out.is_some() {
            let leave = self.awareness.leave();
            self.send_presence(&leave);
        }
        self.drop_link();
        self.session.disconnected();
        let _ = self.status_tx.send(self.session.status());

        let unacked = self.session.drain_unacked();
        self.replica.requeue(unacked);
        debug!(room = %self.room, outbox = self.replica.outbox_len(), "session stopped");
        if let Some(reply) = shutdown {
            let _ = reply.send(self.replica);
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Edit(f) => {
                f(&mut self.replica);
                self.session.enqueue(self.replica.take_outbox());
            }
            Command::Flush { reply } => {
                let result = if self.session.status().is_terminal() {
                    Err(SessionError::AccessDenied)
                } else {
                    self.flush();
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::SetCursor(cursor) => {
                if let Some(update) = self.awareness.set_cursor(cursor, std::time::Instant::now()) {
                    self.send_presence(&update);
                }
            }
            Command::Peers { reply } => {
                let peers = self.awareness.peers().into_iter().cloned().collect();
                let _ = reply.send(peers);
            }
            Command::Rename { title, reply } => {
                let result = if self.session.status().is_terminal() {
                    Err(SessionError::AccessDenied)
                } else {
                    self.send(&ClientMessage::Rename { title });
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn handle_frame(&mut self, frame: Option<Bytes>) {
        let Some(frame) = frame else {
            self.link_lost("relay closed the connection");
            return;
        };
        let message: ServerMessage = match protocol::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                error!(room = %self.room, error = %e, "malformed frame from relay");
                self.link_lost("protocol error");
                return;
            }
        };

        match message {
            ServerMessage::Backlog { ops } => {
                let applied = self.replica.receive_batch(ops);
                info!(room = %self.room, applied, "backlog replayed");
                self.flush();
            }
            ServerMessage::Ops { ops } => {
                self.replica.receive_batch(ops);
            }
            ServerMessage::Ack { batch } => self.session.on_ack(batch),
            ServerMessage::TitleChanged { title } => {
                debug!(room = %self.room, %title, "title changed");
                self.title_tx.send_replace(Some(title));
            }
            ServerMessage::Error { reason } => {
                error!(room = %self.room, %reason, "relay reported a protocol error");
                self.link_lost("protocol error");
            }
        }
    }

    fn handle_presence(&mut self, update: Option<Bytes>) {
        let Some(frame) = update else { return };
        match protocol::decode::<AwarenessUpdate>(&frame) {
            Ok(update) => {
                self.awareness.apply_update(update, std::time::Instant::now());
            }
            Err(e) => debug!(error = %e, "ignoring malformed presence frame"),
        }
    }

    fn tick(&mut self) {
        self.session.enqueue(self.replica.take_outbox());
        self.flush();

        let now = std::time::Instant::now();
        if self.presence_out.is_some() {
            if let Some(update) = self.awareness.flush(now) {
                self.send_presence(&update);
            }
            if let Some(update) = self.awareness.heartbeat(now) {
                self.send_presence(&update);
            }
        }
        let stale = self.awareness.remove_stale(now);
        if !stale.is_empty() {
            debug!(room = %self.room, count = stale.len(), "dropped silent peers");
        }
    }

    /// Send every queued operation the relay has not seen on this link.
    fn flush(&mut self) {
        self.session.enqueue(self.replica.take_outbox());
        while let Some((batch, ops)) = self.session.next_batch(self.config.transport.max_batch) {
            debug!(room = %self.room, batch, count = ops.len(), "sending operations");
            if !self.send(&ClientMessage::Ops { batch, ops }) {
                return;
            }
        }
    }

    fn send(&mut self, message: &ClientMessage) -> bool {
        let Some(out) = &self.frames_out else {
            return false;
        };
        let sent = match protocol::encode(message) {
            Ok(frame) => out.send(frame).is_ok(),
            Err(e) => {
                error!(room = %self.room, error = %e, "could not encode message");
                return false;
            }
        };
        if !sent {
            self.link_lost("send failed");
        }
        sent
    }

    fn send_presence(&self, update: &AwarenessUpdate) {
        let Some(out) = &self.presence_out else { return };
        if let Ok(frame) = protocol::encode(update) {
            // No receivers is fine: presence is best effort.
            let _ = out.send(frame);
        }
    }

    async fn connect(&mut self) {
        self.retry_at = None;
        if self.session.status().is_terminal() {
            return;
        }
        self.session.connecting();
        let _ = self.status_tx.send(self.session.status());
        info!(room = %self.room, attempt = self.attempt, "connecting");

        let timeout = self.config.transport.connect_timeout();
        let attempt = tokio::time::timeout(timeout, self.connector.connect(&self.room, &self.token));
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = attempt => result.unwrap_or(Err(TransportError::Timeout(timeout))),
        };

        match result {
            Ok(connection) => self.install(connection),
            Err(e) if e.is_fatal() => {
                warn!(room = %self.room, error = %e, "access denied, giving up");
                self.session.access_denied();
                let _ = self.status_tx.send(self.session.status());
            }
            Err(e) => {
                warn!(room = %self.room, error = %e, "connection failed");
                self.schedule_retry();
            }
        }
    }

    fn install(&mut self, connection: Connection) {
        info!(room = %self.room, user = %connection.user, "connected");
        self.frames_out = Some(connection.frames_out);
        self.frames_in = Some(connection.frames_in);
        self.presence_out = Some(connection.presence_out);
        self.presence_in = Some(connection.presence_in);

        let hello = ClientMessage::Hello {
            replica: self.replica.id().clone(),
            known: self.replica.version().clone(),
        };
        if !self.send(&hello) {
            return;
        }
        self.attempt = 0;
        self.session.connected();
        let _ = self.status_tx.send(self.session.status());

        let join = self.awareness.join(std::time::Instant::now());
        self.send_presence(&join);
    }

    fn link_lost(&mut self, reason: &str) {
        if self.frames_out.is_none() && self.frames_in.is_none() {
            return;
        }
        info!(room = %self.room, reason, "connection lost");
        self.drop_link();
        self.session.connection_lost();
        let _ = self.status_tx.send(self.session.status());
        self.schedule_retry();
    }

    fn drop_link(&mut self) {
        self.frames_out = None;
        self.frames_in = None;
        self.presence_out = None;
        self.presence_in = None;
    }

    fn schedule_retry(&mut self) {
        let delay = self.config.transport.reconnect_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        debug!(room = %self.room, ?delay, "reconnect scheduled");
        self.retry_at = Some(Instant::now() + delay);
    }
}

async fn next_frame(frames: &mut Option<mpsc::UnboundedReceiver<Bytes>>) -> Option<Bytes> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Next presence frame. Lagging skips ahead; a closed channel goes quiet.
async fn next_presence(presence: &mut Option<broadcast::Receiver<Bytes>>) -> Option<Bytes> {
    let Some(rx) = presence else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(frame) => return Some(frame),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "presence receiver lagged"),
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}

async fn retry(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
