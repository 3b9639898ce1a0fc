//! Event-handler registry boundary
//!
//! Matching events against handlers belongs to the bus. The runtime only
//! needs to register a unit's handlers and revoke them again, atomically per
//! registration, when the unit is disabled or disposed.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tether_plugin_api::HandlerId;

/// The bus side of handler registration
pub trait HandlerRegistry: Send + Sync {
    /// Register handler `name` for `event_type` on behalf of `unit`
    fn register(&self, unit: &str, event_type: &str, name: &str) -> HandlerId;

    /// Revoke a registration. Unknown ids are ignored.
    fn revoke(&self, id: HandlerId);
}

/// A handler registered by a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredHandler {
    /// Id of the unit that owns this handler
    pub unit: String,
    pub event_type: String,
    pub name: String,
}

/// In-process handler registry
#[derive(Debug, Default)]
pub struct MemoryHandlerRegistry {
    handlers: Mutex<BTreeMap<HandlerId, RegisteredHandler>>,
    next_id: AtomicU64,
}

impl MemoryHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handlers subscribed to `event_type`, in registration order
    pub fn handlers_for(&self, event_type: &str) -> Vec<(HandlerId, RegisteredHandler)> {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers
            .iter()
            .filter(|(_, h)| h.event_type == event_type)
            .map(|(id, h)| (*id, h.clone()))
            .collect()
    }

    /// Handlers owned by `unit`
    pub fn unit_handlers(&self, unit: &str) -> Vec<RegisteredHandler> {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.values().filter(|h| h.unit == unit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HandlerRegistry for MemoryHandlerRegistry {
    fn register(&self, unit: &str, event_type: &str, name: &str) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.insert(
            id,
            RegisteredHandler {
                unit: unit.to_string(),
                event_type: event_type.to_string(),
                name: name.to_string(),
            },
        );
        tracing::trace!(unit = %unit, event_type = %event_type, handler = %name, %id, "Handler registered");
        id
    }

    fn revoke(&self, id: HandlerId) {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if handlers.remove(&id).is_some() {
            tracing::trace!(%id, "Handler revoked");
        }
    }
}
