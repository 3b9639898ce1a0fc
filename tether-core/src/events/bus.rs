//! RuntimeEventBus trait definition
//!
//! Late joiners (the CLI's `units` listing, tests) replay the log from a
//! sequence number; live listeners subscribe to the broadcast stream.

use tokio::sync::broadcast;

use super::RuntimeEvent;

/// Sequence number for events (monotonically increasing)
pub type EventSeq = u64;

/// Event bus for runtime lifecycle events
///
/// Publishing is synchronous: the manager publishes from inside dispose
/// cascades, which never suspend.
pub trait RuntimeEventBus: Send + Sync {
    /// Publish an event, returns its sequence number
    fn publish(&self, event: RuntimeEvent) -> EventSeq;

    /// Subscribe to all events from now (live stream)
    fn subscribe(&self) -> broadcast::Receiver<(EventSeq, RuntimeEvent)>;

    /// Get all events starting from a sequence number (for replay)
    fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, RuntimeEvent)>;

    /// Get all events about one unit
    fn unit_events(&self, unit_id: &str) -> Vec<(EventSeq, RuntimeEvent)>;

    /// Current sequence number (high water mark)
    fn current_seq(&self) -> EventSeq;
}
