//! Error types.
//!
//! Merging never fails: conflicting concurrent edits are resolved, not
//! reported. Errors come from invalid local intents, from collaborators at
//! the edge (auth, transport) and from malformed input.

use crate::crdt::{NodeType, UnitId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("position {offset} out of bounds (length: {len})")]
    PositionOutOfBounds { offset: usize, len: usize },

    #[error("range {start}..{end} out of bounds (length: {len})")]
    RangeOutOfBounds { start: usize, end: usize, len: usize },

    #[error("unknown or deleted unit: {0}")]
    UnknownUnit(UnitId),

    #[error("{0} is not a container that accepts content")]
    NotAContainer(String),

    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("schema violation: {0}")]
    Schema(#[from] SchemaError),

    #[error("document already has content; seeding only happens once")]
    AlreadySeeded,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Violations of the closed node/mark/attribute registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown attribute `{0}`")]
    UnknownAttribute(String),

    #[error("attribute `{key}` does not apply to {target}")]
    AttributeNotAllowed { key: String, target: String },

    #[error("invalid value `{value}` for `{key}`")]
    InvalidValue { key: String, value: String },

    #[error("{node_type} does not support {command}")]
    CommandNotSupported { node_type: NodeType, command: &'static str },

    #[error("duplicate registry entry `{0}`")]
    Duplicate(String),

    #[error("registry has no entry for `{0}`")]
    Missing(String),
}

/// Malformed initial content.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed markup at byte {position}: {reason}")]
pub struct SeedError {
    pub position: usize,
    pub reason: String,
}

/// Failures surfaced by the sync transport to the application.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("connection closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Access denial is terminal for a session; everything else is retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::AccessDenied(_))
    }
}
