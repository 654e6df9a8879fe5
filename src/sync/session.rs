//! Transport-independent sync session state.
//!
//! Tracks the connection status and the queue of local operations that have
//! not been acknowledged by the relay yet. Nothing leaves the queue until it
//! is acknowledged, so a dropped connection never loses an operation: on the
//! next connection everything still queued is sent again, and duplicates are
//! absorbed by idempotent apply on the other side.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                              │   ▲               │
//!                         fail │   │ retry    lost │
//!                              ▼   │               ▼
//!                           Reconnecting ◀─────────┘
//!
//! any ──auth rejected──▶ AccessDenied (terminal)
//! ```

use crate::crdt::Operation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Token rejected or not a member of the room. Never retried.
    AccessDenied,
}

impl ConnectionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionStatus::AccessDenied)
    }
}

#[derive(Debug, Clone)]
pub struct SyncSession {
    status: ConnectionStatus,
    /// Unacknowledged local operations, oldest first
    queue: VecDeque<Operation>,
    /// How many queue entries were sent on the current connection
    sent: usize,
    /// Batch id → number of operations in the batch
    in_flight: BTreeMap<u64, usize>,
    next_batch: u64,
    ever_connected: bool,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            queue: VecDeque::new(),
            sent: 0,
            in_flight: BTreeMap::new(),
            next_batch: 1,
            ever_connected: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Queue local operations for sending.
    pub fn enqueue(&mut self, ops: impl IntoIterator<Item = Operation>) {
        self.queue.extend(ops);
    }

    pub fn unacked(&self) -> usize {
        self.queue.len()
    }

    /// Next batch of unsent operations, at most `max` long.
    pub fn next_batch(&mut self, max: usize) -> Option<(u64, Vec<Operation>)> {
        if self.status != ConnectionStatus::Connected || self.sent >= self.queue.len() {
            return None;
        }
        let end = (self.sent + max.max(1)).min(self.queue.len());
        let ops: Vec<Operation> = self.queue.range(self.sent..end).cloned().collect();
        let batch = self.next_batch;
        self.next_batch += 1;
        self.in_flight.insert(batch, ops.len());
        self.sent = end;
        Some((batch, ops))
    }

    /// The relay acknowledged `batch`. Batches are acknowledged in order, so
    /// everything up to and including it leaves the queue.
    pub fn on_ack(&mut self, batch: u64) {
        let acked: Vec<u64> = self.in_flight.range(..=batch).map(|(b, _)| *b).collect();
        for b in acked {
            if let Some(count) = self.in_flight.remove(&b) {
                let count = count.min(self.queue.len());
                self.queue.drain(..count);
                self.sent = self.sent.saturating_sub(count);
            }
        }
    }

    pub fn connecting(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if self.ever_connected {
            ConnectionStatus::Reconnecting
        } else {
            ConnectionStatus::Connecting
        };
    }

    /// A new connection is up: everything unacknowledged will be resent.
    pub fn connected(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ConnectionStatus::Connected;
        self.ever_connected = true;
        self.sent = 0;
        self.in_flight.clear();
    }

    pub fn connection_lost(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ConnectionStatus::Reconnecting;
        self.sent = 0;
        self.in_flight.clear();
    }

    pub fn access_denied(&mut self) {
        self.status = ConnectionStatus::AccessDenied;
        self.sent = 0;
        self.in_flight.clear();
    }

    pub fn disconnected(&mut self) {
        if !self.status.is_terminal() {
            self.status = ConnectionStatus::Disconnected;
        }
        self.sent = 0;
        self.in_flight.clear();
    }

    /// Hand back every unacknowledged operation, oldest first.
    pub fn drain_unacked(&mut self) -> Vec<Operation> {
        self.sent = 0;
        self.in_flight.clear();
        self.queue.drain(..).collect()
    }
}
