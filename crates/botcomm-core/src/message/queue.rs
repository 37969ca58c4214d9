//! Pending-message buffer between `send` and the drain task.

use std::collections::VecDeque;

use botcomm_types::message::Envelope;

/// Buffer of envelopes awaiting routing.
///
/// Strict FIFO by default. With `priority_ordering` enabled, `pop` returns
/// the oldest envelope of the most urgent priority present.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: VecDeque<Envelope>,
    priority_ordering: bool,
}

impl MessageQueue {
    pub fn new(priority_ordering: bool) -> Self {
        Self {
            items: VecDeque::new(),
            priority_ordering,
        }
    }

    pub fn push(&mut self, envelope: Envelope) {
        self.items.push_back(envelope);
    }

    pub fn pop(&mut self) -> Option<Envelope> {
        if !self.priority_ordering {
            return self.items.pop_front();
        }

        // min_by_key keeps the first of equal keys, preserving FIFO per priority
        let index = self
            .items
            .iter()
            .enumerate()
            .min_by_key(|(_, env)| env.priority.rank())
            .map(|(i, _)| i)?;
        self.items.remove(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every queued envelope, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.items.len();
        self.items.clear();
        discarded
    }
}
