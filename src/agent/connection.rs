//! Per-connection credit bookkeeping.
//!
//! An agent grants credits; every command sent spends one. Commands issued
//! while the agent has no credits wait in a FIFO queue and go out as soon as
//! credits arrive.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Active,
    Disconnecting,
    ShuttingDown,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Active => "ACTIVE",
            ConnectionStatus::Disconnecting => "DISCONNECTING",
            ConnectionStatus::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

/// A command waiting for credit, already rendered as a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queued {
    pub id: Uuid,
    pub frame: String,
}

#[derive(Debug)]
pub struct AgentConnection {
    pub connection_id: String,
    pub vessel_engine_id: Uuid,
    pub credits: i64,
    pub inflight: HashSet<Uuid>,
    pub queue: VecDeque<Queued>,
    pub status: ConnectionStatus,
    pub last_ping_at: Instant,
}

impl AgentConnection {
    pub fn new(connection_id: String, vessel_engine_id: Uuid) -> Self {
        Self {
            connection_id,
            vessel_engine_id,
            credits: 0,
            inflight: HashSet::new(),
            queue: VecDeque::new(),
            status: ConnectionStatus::Connecting,
            last_ping_at: Instant::now(),
        }
    }

    /// Adds an agent-supplied delta, saturating at the `i64` bounds.
    pub fn add_credits(&mut self, delta: i64) {
        self.credits = self.credits.saturating_add(delta);
    }

    pub fn enqueue(&mut self, queued: Queued) {
        self.queue.push_back(queued);
    }

    /// Pops queued commands while credit lasts, marking each in flight.
    ///
    /// # Returns
    /// The frames to write, in queue order.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while self.credits > 0 {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            self.credits -= 1;
            self.inflight.insert(next.id);
            frames.push(next.frame);
        }
        frames
    }

    /// Clears an in-flight command; false when it was not in flight here.
    pub fn complete(&mut self, id: Uuid) -> bool {
        self.inflight.remove(&id)
    }

    /// Forgets a command whose requester stopped waiting, whether it is
    /// still queued or already in flight.
    pub fn abandon(&mut self, id: Uuid) -> bool {
        let queued = self.queue.len();
        self.queue.retain(|q| q.id != id);
        self.inflight.remove(&id) || self.queue.len() != queued
    }

    pub fn touch(&mut self) {
        self.last_ping_at = Instant::now();
    }
}
