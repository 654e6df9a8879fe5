//! Runtime configuration.
//!
//! Every field has a default, so a partial JSON document (or none at all)
//! yields a usable configuration.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub awareness: AwarenessConfig,
    pub transport: TransportConfig,
    pub undo: UndoConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.transport.flush_interval_ms == 0 {
            return Err(SyncError::Config("transport.flush_interval_ms must be positive".into()));
        }
        if self.transport.reconnect_initial_ms > self.transport.reconnect_max_ms {
            return Err(SyncError::Config(
                "transport.reconnect_initial_ms exceeds reconnect_max_ms".into(),
            ));
        }
        if self.undo.max_depth == 0 {
            return Err(SyncError::Config("undo.max_depth must be positive".into()));
        }
        Ok(())
    }
}

/// Presence channel timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwarenessConfig {
    /// Peers silent for longer than this are dropped
    pub timeout_ms: u64,
    /// Re-broadcast local state at least this often
    pub heartbeat_ms: u64,
    /// Minimum spacing between cursor broadcasts
    pub throttle_ms: u64,
}

impl Default for AwarenessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            heartbeat_ms: 10_000,
            throttle_ms: 16,
        }
    }
}

impl AwarenessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Interval of the flush scheduler
    pub flush_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// First reconnect delay; doubles per failed attempt
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    /// Maximum operations per outgoing batch
    pub max_batch: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 100,
            connect_timeout_ms: 10_000,
            reconnect_initial_ms: 250,
            reconnect_max_ms: 5_000,
            max_batch: 512,
        }
    }
}

impl TransportConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Backoff before reconnect attempt number `attempt` (0-based).
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let ms = self
            .reconnect_initial_ms
            .saturating_mul(factor)
            .min(self.reconnect_max_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Consecutive intents closer together than this share one undo step.
    /// Zero makes every intent its own step.
    pub capture_timeout_ms: u64,
    /// Oldest undo steps are dropped beyond this depth
    pub max_depth: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 0,
            max_depth: 100,
        }
    }
}

impl UndoConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}
