use std::collections::VecDeque;

use value_model::Value;

use crate::program::EventId;

/// One queued event with its payload.
///
/// The sequence number records arrival order, so an event pulled out for
/// inspection can be put back without overtaking anything that arrived before
/// it.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub event: EventId,
    pub payload: Value,
    seq: u64,
}

/// Bounded FIFO of events with per-event live counts.
///
/// Bounds themselves are enforced by the enqueue path on the owning machine,
/// which has the declarations in hand; the queue only tracks the numbers those
/// checks consult. Items stay sorted by arrival: `push_back` stamps a
/// monotonic sequence number and `reinsert` restores a dequeued item to its
/// arrival position.
#[derive(Debug)]
pub(crate) struct EventQueue {
    items: VecDeque<Envelope>,
    counts: Vec<u32>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new(event_kinds: usize) -> Self {
        Self {
            items: VecDeque::new(),
            counts: vec![0; event_kinds],
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn count(&self, event: EventId) -> u32 {
        self.counts[event.index()]
    }

    pub fn push_back(&mut self, event: EventId, payload: Value) {
        self.counts[event.index()] += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(Envelope {
            event,
            payload,
            seq,
        });
    }

    /// Puts a previously dequeued event back at its arrival position: behind
    /// everything still queued that arrived before it, ahead of everything
    /// that arrived after it.
    pub fn reinsert(&mut self, envelope: Envelope) {
        self.counts[envelope.event.index()] += 1;
        let position = self.items.partition_point(|item| item.seq < envelope.seq);
        self.items.insert(position, envelope);
    }

    /// Removes and returns the first event satisfying `matches`, leaving
    /// everything before it in place.
    pub fn dequeue_first<F: Fn(EventId) -> bool>(&mut self, matches: F) -> Option<Envelope> {
        let position = self.items.iter().position(|item| matches(item.event))?;
        let envelope = self.items.remove(position)?;
        self.counts[envelope.event.index()] -= 1;
        Some(envelope)
    }

    /// Releases every queued payload.
    pub fn drain(&mut self) {
        self.items.clear();
        self.counts.fill(0);
    }
}
