//! Presence and awareness.
//!
//! Unlike document operations, presence is ephemeral:
//! - never persisted or written to the operation log
//! - replaced whole, ordered by a per-replica counter instead of causality
//! - carried on its own best-effort channel, so a slow presence consumer
//!   never holds up document sync
//!
//! Peers that stop refreshing their record are dropped after a timeout.

mod clock;
mod identity;
mod state;

pub use clock::PresenceClock;
pub use identity::{filter_mentions, user_color, Identity};
pub use state::{Awareness, AwarenessRecord, AwarenessUpdate, Presence};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AwarenessConfig;
    use crate::crdt::ReplicaId;

    #[test]
    fn test_awareness_creation() {
        let awareness = Awareness::new(
            ReplicaId::from("client-1"),
            Identity::new("u1", "Ada"),
            &AwarenessConfig::default(),
        );
        assert_eq!(awareness.replica().as_str(), "client-1");
        assert_eq!(awareness.client_count(), 0);
        assert!(awareness.identity().color.starts_with("hsl("));
    }
}
