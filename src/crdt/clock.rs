use serde::{Deserialize, Serialize};

/// Lamport timestamp for causality tracking
///
/// Each replica ticks its clock once per local operation and folds in the
/// timestamp of every remote operation it applies, so an operation always
/// carries a timestamp greater than everything it causally depends on.
///
/// # Example
///
/// ```rust
/// use docsync_core::crdt::LamportClock;
///
/// let mut clock = LamportClock::new();
/// assert_eq!(clock.tick(), 1);
///
/// clock.update(5); // remote operation applied
/// assert_eq!(clock.tick(), 6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LamportClock {
    value: u64,
}

impl LamportClock {
    /// Create a new Lamport clock starting at 0
    pub fn new() -> Self {
        Self { value: 0 }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Increment clock and return new value (for local operations)
    pub fn tick(&mut self) -> u64 {
        self.value += 1;
        self.value
    }

    /// Sets clock to max(local, remote)
    pub fn update(&mut self, remote: u64) {
        self.value = self.value.max(remote);
    }
}
