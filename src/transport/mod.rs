//! Async sync driver.
//!
//! ```text
//!   CollabSession (Send+Sync)   mpsc     SessionActor (tokio task)
//!   ┌─────────────────────┐  ───────▶  ┌───────────────────────────────┐
//!   │ .edit(|replica| ..) │            │ Replica + Awareness           │
//!   │ .flush()            │  ◀───────  │ SyncSession (unacked queue)   │
//!   │ .set_cursor()       │  oneshot   │ Connection to the relay       │
//!   └─────────────────────┘            │ flush ticker, reconnect timer │
//!            ▲                         └───────────────────────────────┘
//!            └──── watch: ConnectionStatus, title
//! ```
//!
//! A [`Connector`] opens [`Connection`]s to a relay. [`MemoryRelay`] is an
//! in-process relay used by tests and demos.

mod client;
mod relay;

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

pub use client::CollabSession;
pub use relay::MemoryRelay;

/// Errors returned by [`CollabSession`] handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session shut down")]
    Shutdown,
    #[error("access denied")]
    AccessDenied,
}

/// An open link to a relay room.
///
/// Document frames are reliable and ordered. The presence channel is
/// lossy: a receiver that falls behind skips ahead instead of blocking
/// senders.
#[derive(Debug)]
pub struct Connection {
    /// User the relay authorized this connection as
    pub user: String,
    pub frames_out: mpsc::UnboundedSender<Bytes>,
    pub frames_in: mpsc::UnboundedReceiver<Bytes>,
    pub presence_out: broadcast::Sender<Bytes>,
    pub presence_in: broadcast::Receiver<Bytes>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `room`. Authorization happens here, so an
    /// [`TransportError::AccessDenied`] is final for this token.
    async fn connect(&self, room: &str, token: &str) -> Result<Connection, TransportError>;
}
