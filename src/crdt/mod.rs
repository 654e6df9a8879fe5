//! CRDT core: identifiers, operations and the merge engine.
//!
//! This module contains the replicated data types behind a document:
//!
//! - **Sequence:** Fugue tree ordering the units of each container
//! - **LWW Register:** per-key attributes and node types
//! - **Mark Layer:** ID-anchored inline formatting
//! - **Engine:** deterministic fold of operations into all of the above
//!
//! # References
//!
//! - "Fugue: A CRDT for Collaborative Text Editing" (arXiv:2305.00583)
//! - "Peritext: A CRDT for Collaborative Rich Text Editing" (Litt et al.)

pub mod clock;
pub mod engine;
pub mod id;
pub mod marks;
pub mod op;
pub mod register;
pub mod sequence;
pub mod unit;

pub use clock::LamportClock;
pub use engine::{Engine, Item};
pub use id::{OpId, ParentRef, ReplicaId, UnitId};
pub use marks::{MarkLayer, MarkSpan};
pub use op::{OpKind, Operation};
pub use register::LwwRegister;
pub use sequence::Sequence;
pub use unit::{AttrValue, MarkType, MarkValue, NodeState, NodeType, Unit, UnitContent};
