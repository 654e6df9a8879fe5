//! Presence clock.
//!
//! Presence records are replaced whole, so a single counter per replica
//! orders them: a record wins over another from the same replica when its
//! clock is higher. Observing remote clocks keeps the local counter ahead of
//! everything seen, which keeps a rejoining replica from being ignored.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PresenceClock {
    value: AtomicU64,
}

impl PresenceClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the new value.
    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Never move backwards past a remote value.
    pub fn observe(&self, remote: u64) {
        self.value.fetch_max(remote, Ordering::SeqCst);
    }
}

impl Clone for PresenceClock {
    fn clone(&self) -> Self {
        Self {
            value: AtomicU64::new(self.current()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_is_monotonic() {
        let clock = PresenceClock::new();
        assert_eq!(clock.next(), 1);
        assert_eq!(clock.next(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn test_observe_only_raises() {
        let clock = PresenceClock::new();
        clock.observe(7);
        clock.observe(3);
        assert_eq!(clock.current(), 7);
        assert_eq!(clock.next(), 8);
    }
}
