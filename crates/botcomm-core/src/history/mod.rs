//! Bounded, time-ordered log of dispatched envelopes.
//!
//! The log keeps the most recent `capacity` entries and evicts the oldest
//! first (FIFO, regardless of priority). A trailing window of it is
//! serialized as the persisted snapshot.

use std::collections::VecDeque;

use botcomm_types::message::Envelope;

/// Store key holding the persisted history snapshot.
pub const HISTORY_KEY: &str = "protocol_history";

#[derive(Debug)]
pub struct MessageHistory {
    entries: VecDeque<Envelope>,
    capacity: usize,
}

impl MessageHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append an entry, evicting from the front once over capacity.
    pub fn push(&mut self, envelope: Envelope) {
        self.entries.push_back(envelope);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Envelope> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Replace the contents with restored entries, keeping the newest ones
    /// if they exceed capacity.
    pub fn restore(&mut self, entries: Vec<Envelope>) {
        self.entries = entries.into();
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serialize the last `n` entries as a JSON array.
    pub fn snapshot_json(&self, n: usize) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.recent(n))
    }
}

/// Parse a persisted snapshot back into envelopes.
pub fn parse_snapshot(raw: &str) -> Result<Vec<Envelope>, serde_json::Error> {
    serde_json::from_str(raw)
}
