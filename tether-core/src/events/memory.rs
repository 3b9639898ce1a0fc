//! In-memory RuntimeEventBus implementation
//!
//! MemoryEventBus stores events in a Vec for replay and uses a broadcast
//! channel for live subscribers.

use std::sync::RwLock;

use tokio::sync::broadcast;

use super::RuntimeEvent;
use super::bus::{EventSeq, RuntimeEventBus};

/// In-memory implementation of RuntimeEventBus
pub struct MemoryEventBus {
    /// Stored events with sequence numbers; the lock also orders publishes
    events: RwLock<Vec<(EventSeq, RuntimeEvent)>>,
    /// Broadcast channel for live subscribers
    tx: broadcast::Sender<(EventSeq, RuntimeEvent)>,
}

impl MemoryEventBus {
    /// Create a new MemoryEventBus with the given broadcast channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            events: RwLock::new(Vec::new()),
            tx,
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl RuntimeEventBus for MemoryEventBus {
    fn publish(&self, event: RuntimeEvent) -> EventSeq {
        tracing::trace!(kind = event.kind(), unit = ?event.unit_id(), "Runtime event");
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        let seq = events.len() as EventSeq;
        events.push((seq, event.clone()));

        // Broadcast to live subscribers (ignore if no receivers)
        let _ = self.tx.send((seq, event));

        seq
    }

    fn subscribe(&self) -> broadcast::Receiver<(EventSeq, RuntimeEvent)> {
        self.tx.subscribe()
    }

    fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, RuntimeEvent)> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    fn unit_events(&self, unit_id: &str) -> Vec<(EventSeq, RuntimeEvent)> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, event)| event.unit_id() == Some(unit_id))
            .cloned()
            .collect()
    }

    fn current_seq(&self) -> EventSeq {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len() as EventSeq
    }
}
