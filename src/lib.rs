//! DocSync Core - Collaborative rich-text sync engine
//!
//! The replicated core of a real-time collaborative document editor.
//! It implements:
//! - Fugue sequence CRDT per container, with delete-wins tombstones
//! - ID-anchored inline marks and last-writer-wins attributes
//! - Causal delivery with vector clocks and an append-only operation log
//! - Per-replica undo/redo that never reverts other participants' edits
//! - Presence/awareness on a separate best-effort channel
//! - A length-prefixed JSON sync protocol and a tokio sync driver
//!
//! # Examples
//!
//! ```rust
//! use docsync_core::{Position, Replica};
//!
//! let mut replica = Replica::new("client-1").unwrap();
//! replica.insert_text(&Position::root(0), "Hello World").unwrap();
//! assert_eq!(replica.text(), "Hello World");
//! ```

pub mod awareness;
pub mod config;
pub mod crdt;
pub mod document;
pub mod error;
pub mod external;
pub mod protocol;
pub mod replica;
pub mod sync;
pub mod undo;

#[cfg(feature = "transport")]
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use crdt::{OpId, Operation, ParentRef, ReplicaId, UnitId};
pub use document::{Anchor, DocumentSnapshot, Position, Selection, TextRange};
pub use error::{Result, SyncError};
pub use replica::{Replica, SeedOutcome};
pub use sync::{ConnectionStatus, SyncHealth, VectorClock};

#[cfg(feature = "transport")]
pub use transport::{CollabSession, MemoryRelay};
