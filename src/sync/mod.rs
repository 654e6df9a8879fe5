//! Causality tracking, the operation log and sync session state.

pub mod causality;
pub mod log;
pub mod session;
pub mod vector_clock;

pub use causality::{CausalityTracker, Dot, SyncHealth};
pub use log::OperationLog;
pub use session::{ConnectionStatus, SyncSession};
pub use vector_clock::VectorClock;
