//! Runtime event definitions

use serde::{Deserialize, Serialize};

/// Lifecycle events published by the plugin manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A unit body ran to completion
    Loaded { id: String },

    /// A unit failed to load; the batch it belonged to carries on
    LoadFailed { id: String, error: String },

    /// A deferred body ran
    Applied { id: String },

    /// The runtime refused an operation on a unit
    Rejected { id: String, error: String },

    /// A unit was disposed and removed from the registry
    Unloaded { id: String },

    /// A unit went back to available
    Enabled { id: String },

    /// A unit had its registrations withdrawn
    Disabled { id: String },

    /// The supervisor entered the serving phase
    Ready,

    /// The supervisor started tearing everything down
    Cleanup,

    /// Cleanup finished
    Stopped,
}

impl RuntimeEvent {
    /// Unit the event is about, if any
    pub fn unit_id(&self) -> Option<&str> {
        match self {
            RuntimeEvent::Loaded { id }
            | RuntimeEvent::LoadFailed { id, .. }
            | RuntimeEvent::Applied { id }
            | RuntimeEvent::Rejected { id, .. }
            | RuntimeEvent::Unloaded { id }
            | RuntimeEvent::Enabled { id }
            | RuntimeEvent::Disabled { id } => Some(id),
            RuntimeEvent::Ready | RuntimeEvent::Cleanup | RuntimeEvent::Stopped => None,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeEvent::Loaded { .. } => "loaded",
            RuntimeEvent::LoadFailed { .. } => "load_failed",
            RuntimeEvent::Applied { .. } => "applied",
            RuntimeEvent::Rejected { .. } => "rejected",
            RuntimeEvent::Unloaded { .. } => "unloaded",
            RuntimeEvent::Enabled { .. } => "enabled",
            RuntimeEvent::Disabled { .. } => "disabled",
            RuntimeEvent::Ready => "ready",
            RuntimeEvent::Cleanup => "cleanup",
            RuntimeEvent::Stopped => "stopped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_event_serialization_roundtrip() {
        let event = RuntimeEvent::LoadFailed {
            id: "weather".to_string(),
            error: "missing city".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"load_failed""#));
        let parsed: RuntimeEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn unit_id_extraction() {
        let event = RuntimeEvent::Loaded {
            id: "echo#2".to_string(),
        };
        assert_eq!(event.unit_id(), Some("echo#2"));
        assert_eq!(RuntimeEvent::Ready.unit_id(), None);
    }

    #[test]
    fn kind_names() {
        assert_eq!(RuntimeEvent::Cleanup.kind(), "cleanup");
        assert_eq!(
            RuntimeEvent::Disabled { id: "a".into() }.kind(),
            "disabled"
        );
    }
}
