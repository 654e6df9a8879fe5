//! Presence state of every connected replica.
//!
//! Records are ephemeral: they are never written to the operation log and
//! live only as long as their owner keeps refreshing them. The local record
//! is re-broadcast on every cursor change (at most once per throttle
//! window) and on a heartbeat; remote records expire after the timeout.

use super::clock::PresenceClock;
use super::identity::Identity;
use crate::config::AwarenessConfig;
use crate::crdt::ReplicaId;
use crate::document::Selection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What a replica shares about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub identity: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Selection>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwarenessRecord {
    pub replica: ReplicaId,
    pub presence: Presence,
    pub clock: u64,
    /// Local receive time, for expiry
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// Broadcast unit of the presence channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessUpdate {
    pub replica: ReplicaId,
    /// `None` when the replica left
    pub presence: Option<Presence>,
    pub clock: u64,
}

#[derive(Debug)]
pub struct Awareness {
    replica: ReplicaId,
    identity: Identity,
    records: HashMap<ReplicaId, AwarenessRecord>,
    clock: PresenceClock,
    timeout: Duration,
    heartbeat: Duration,
    throttle: Duration,
    last_broadcast: Option<Instant>,
    /// A cursor change is waiting out the throttle window
    pending: bool,
}

impl Awareness {
    pub fn new(replica: ReplicaId, identity: Identity, config: &AwarenessConfig) -> Self {
        Self {
            replica,
            identity,
            records: HashMap::new(),
            clock: PresenceClock::new(),
            timeout: config.timeout(),
            heartbeat: config.heartbeat(),
            throttle: config.throttle(),
            last_broadcast: None,
            pending: false,
        }
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn records(&self) -> impl Iterator<Item = &AwarenessRecord> {
        self.records.values()
    }

    pub fn get(&self, replica: &ReplicaId) -> Option<&AwarenessRecord> {
        self.records.get(replica)
    }

    pub fn local(&self) -> Option<&AwarenessRecord> {
        self.records.get(&self.replica)
    }

    /// Every record but our own, ordered by replica.
    pub fn peers(&self) -> Vec<&AwarenessRecord> {
        let mut peers: Vec<_> = self
            .records
            .values()
            .filter(|r| r.replica != self.replica)
            .collect();
        peers.sort_by(|a, b| a.replica.cmp(&b.replica));
        peers
    }

    pub fn client_count(&self) -> usize {
        self.records.len()
    }

    pub fn other_client_count(&self) -> usize {
        self.records.len() - usize::from(self.records.contains_key(&self.replica))
    }

    /// Announce ourselves. Returns the update to broadcast.
    pub fn join(&mut self, now: Instant) -> AwarenessUpdate {
        let cursor = self.local().and_then(|r| r.presence.cursor.clone());
        self.publish(cursor, now)
    }

    /// Move the local cursor. Returns an update unless the throttle window
    /// is still open, in which case the change waits for
    /// [`Awareness::flush`].
    pub fn set_cursor(&mut self, cursor: Option<Selection>, now: Instant) -> Option<AwarenessUpdate> {
        let throttled = self
            .last_broadcast
            .is_some_and(|last| now.saturating_duration_since(last) < self.throttle);
        if throttled {
            if let Some(local) = self.records.get_mut(&self.replica) {
                local.presence.cursor = cursor;
                local.presence.updated_at = Utc::now();
            }
            self.pending = true;
            return None;
        }
        Some(self.publish(cursor, now))
    }

    /// Broadcast a throttled cursor change once its window closed.
    pub fn flush(&mut self, now: Instant) -> Option<AwarenessUpdate> {
        if !self.pending {
            return None;
        }
        let open = self
            .last_broadcast
            .is_some_and(|last| now.saturating_duration_since(last) < self.throttle);
        if open {
            return None;
        }
        let cursor = self.local().and_then(|r| r.presence.cursor.clone());
        Some(self.publish(cursor, now))
    }

    /// Re-broadcast the local record if nothing was sent for a heartbeat.
    pub fn heartbeat(&mut self, now: Instant) -> Option<AwarenessUpdate> {
        let due = self
            .last_broadcast
            .is_some_and(|last| now.saturating_duration_since(last) >= self.heartbeat);
        if !due || self.local().is_none() {
            return None;
        }
        let cursor = self.local().and_then(|r| r.presence.cursor.clone());
        Some(self.publish(cursor, now))
    }

    fn publish(&mut self, cursor: Option<Selection>, now: Instant) -> AwarenessUpdate {
        let clock = self.clock.next();
        let presence = Presence {
            identity: self.identity.clone(),
            cursor,
            updated_at: Utc::now(),
        };
        self.records.insert(
            self.replica.clone(),
            AwarenessRecord {
                replica: self.replica.clone(),
                presence: presence.clone(),
                clock,
                last_seen: Some(now),
            },
        );
        self.last_broadcast = Some(now);
        self.pending = false;
        AwarenessUpdate {
            replica: self.replica.clone(),
            presence: Some(presence),
            clock,
        }
    }

    /// Apply a remote update. Returns whether the visible state changed.
    pub fn apply_update(&mut self, update: AwarenessUpdate, now: Instant) -> bool {
        if update.replica == self.replica {
            return false;
        }
        self.clock.observe(update.clock);

        match update.presence {
            Some(presence) => {
                let newer = self
                    .records
                    .get(&update.replica)
                    .map_or(true, |existing| update.clock > existing.clock);
                if newer {
                    self.records.insert(
                        update.replica.clone(),
                        AwarenessRecord {
                            replica: update.replica,
                            presence,
                            clock: update.clock,
                            last_seen: Some(now),
                        },
                    );
                }
                newer
            }
            None => self.records.remove(&update.replica).is_some(),
        }
    }

    /// Drop peers that went silent for longer than the timeout.
    pub fn remove_stale(&mut self, now: Instant) -> Vec<ReplicaId> {
        let mut removed = Vec::new();
        let timeout = self.timeout;
        let local = self.replica.clone();
        self.records.retain(|replica, record| {
            let stale = *replica != local
                && record
                    .last_seen
                    .is_some_and(|seen| now.saturating_duration_since(seen) > timeout);
            if stale {
                removed.push(replica.clone());
            }
            !stale
        });
        removed.sort();
        removed
    }

    /// Forget the local record. Returns the update announcing departure.
    pub fn leave(&mut self) -> AwarenessUpdate {
        self.records.remove(&self.replica);
        self.pending = false;
        AwarenessUpdate {
            replica: self.replica.clone(),
            presence: None,
            clock: self.clock.next(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ParentRef;
    use crate::document::Anchor;

    fn awareness(id: &str) -> Awareness {
        Awareness::new(
            ReplicaId::from(id),
            Identity::new(id, id.to_uppercase()),
            &AwarenessConfig::default(),
        )
    }

    fn cursor() -> Option<Selection> {
        Some(Selection::collapsed(Anchor {
            parent: ParentRef::Root,
            after: None,
        }))
    }

    #[test]
    fn test_join_and_apply() {
        let now = Instant::now();
        let mut alice = awareness("alice");
        let mut bob = awareness("bob");

        let update = alice.join(now);
        assert_eq!(update.clock, 1);
        assert!(bob.apply_update(update.clone(), now));
        assert!(!bob.apply_update(update, now));
        assert_eq!(bob.other_client_count(), 1);
        assert_eq!(bob.peers()[0].presence.identity.name, "ALICE");
    }

    #[test]
    fn test_cursor_updates_are_throttled() {
        let now = Instant::now();
        let mut alice = awareness("alice");
        alice.join(now);

        assert!(alice.set_cursor(cursor(), now + Duration::from_millis(5)).is_none());
        assert!(alice.flush(now + Duration::from_millis(10)).is_none());
        let update = alice.flush(now + Duration::from_millis(20)).unwrap();
        assert_eq!(update.presence.unwrap().cursor, cursor());
        assert!(alice.flush(now + Duration::from_millis(40)).is_none());
        assert!(alice.set_cursor(None, now + Duration::from_millis(100)).is_some());
    }

    #[test]
    fn test_heartbeat_and_timeout() {
        let now = Instant::now();
        let mut alice = awareness("alice");
        let mut bob = awareness("bob");
        bob.join(now);
        bob.apply_update(alice.join(now), now);

        assert!(alice.heartbeat(now + Duration::from_secs(5)).is_none());
        assert!(alice.heartbeat(now + Duration::from_secs(10)).is_some());

        let removed = bob.remove_stale(now + Duration::from_secs(31));
        assert_eq!(removed, vec![ReplicaId::from("alice")]);
        assert!(bob.local().is_some());
    }

    #[test]
    fn test_clock_stays_ahead_of_remote() {
        let now = Instant::now();
        let mut alice = awareness("alice");
        let mut bob = awareness("bob");
        let mut update = bob.join(now);
        update.clock = 100;
        alice.apply_update(update, now);
        assert!(alice.join(now).clock > 100);
    }

    #[test]
    fn test_leave_removes_record() {
        let now = Instant::now();
        let mut alice = awareness("alice");
        let mut bob = awareness("bob");
        bob.apply_update(alice.join(now), now);
        assert!(bob.apply_update(alice.leave(), now));
        assert_eq!(bob.other_client_count(), 0);
        assert!(alice.local().is_none());
    }
}
