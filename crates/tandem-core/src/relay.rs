//! Transient event relay.
//!
//! Trigger events are queued by the holder and flushed whole on the next
//! tick. Nothing is coalesced: three events enqueued within one tick arrive
//! as three events, in enqueue order. A dropped flush is not retried.

use tandem_proto::{ObjectId, TriggerEvent};

/// Outbound trigger events grouped by source object.
#[derive(Debug, Clone, Default)]
pub struct TriggerQueue {
    batches: Vec<(ObjectId, Vec<TriggerEvent>)>,
}

impl TriggerQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event for `object`.
    pub fn enqueue(&mut self, object: ObjectId, event: TriggerEvent) {
        match self.batches.iter_mut().find(|(source, _)| *source == object) {
            Some((_, events)) => events.push(event),
            None => self.batches.push((object, vec![event])),
        }
    }

    /// Total queued events.
    pub fn len(&self) -> usize {
        self.batches.iter().map(|(_, events)| events.len()).sum()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Remove and return everything, one batch per object in first-enqueue
    /// order.
    pub fn drain(&mut self) -> Vec<(ObjectId, Vec<TriggerEvent>)> {
        std::mem::take(&mut self.batches)
    }

    /// Remove and return the events queued for `object`.
    pub fn take(&mut self, object: ObjectId) -> Vec<TriggerEvent> {
        match self.batches.iter().position(|(source, _)| *source == object) {
            Some(index) => self.batches.remove(index).1,
            None => Vec::new(),
        }
    }

    /// Drop the events queued for `object`, returning how many were lost.
    pub fn discard(&mut self, object: ObjectId) -> usize {
        let before = self.len();
        self.batches.retain(|(source, _)| *source != object);
        before - self.len()
    }

    /// Drop everything, returning how many events were lost.
    pub fn clear(&mut self) -> usize {
        let lost = self.len();
        self.batches.clear();
        lost
    }
}
