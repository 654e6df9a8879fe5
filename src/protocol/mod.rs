//! Sync protocol messages.
//!
//! A client opens a connection, sends [`ClientMessage::Hello`] with the
//! version vector it already holds and receives the relay's backlog of
//! operations it is missing. After that both sides stream operations;
//! the relay acknowledges each client batch once it is durable.
//!
//! Presence updates do not use these messages: they travel on a separate
//! best-effort channel as encoded [`crate::awareness::AwarenessUpdate`]s.

pub mod codec;

use crate::crdt::{Operation, ReplicaId};
use crate::sync::VectorClock;
use serde::{Deserialize, Serialize};

pub use codec::{decode, encode, FrameDecoder, MAX_FRAME_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on every connection
    Hello { replica: ReplicaId, known: VectorClock },
    /// Local operations in causal order
    Ops { batch: u64, ops: Vec<Operation> },
    /// Document title change, relayed but never part of the log
    Rename { title: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Everything the relay holds that the client's Hello did not cover
    Backlog { ops: Vec<Operation> },
    /// Operations from other replicas
    Ops { ops: Vec<Operation> },
    Ack { batch: u64 },
    TitleChanged { title: String },
    /// Protocol violation; the relay closes the connection after sending it
    Error { reason: String },
}
