//! Unit lifecycle states and supervisor phases

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::RuntimeError;

/// State of a loaded unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Loaded; the deferred body has not run yet
    PendingApply,
    /// Live
    Available,
    /// Registrations withdrawn, may be enabled again
    Disabled,
    /// Terminal
    Disposed,
}

impl UnitState {
    /// Whether moving to `to` is legal
    pub fn can_transition(self, to: UnitState) -> bool {
        use UnitState::*;
        match (self, to) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            (PendingApply, Available) | (PendingApply, Disabled) => true,
            (Available, Disabled) | (Disabled, Available) | (Disabled, PendingApply) => true,
            (from, to) => from == to,
        }
    }

    /// Move to `to`, rejecting illegal transitions
    pub fn transition(&mut self, to: UnitState) -> Result<(), RuntimeError> {
        if !self.can_transition(to) {
            return Err(RuntimeError::InvalidTransition {
                from: *self,
                to,
            });
        }
        *self = to;
        Ok(())
    }

    pub fn is_live(self) -> bool {
        matches!(self, UnitState::PendingApply | UnitState::Available)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitState::PendingApply => "pending-apply",
            UnitState::Available => "available",
            UnitState::Disabled => "disabled",
            UnitState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// Phase of the supervisor driving the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Loading configured units
    Preparing,
    /// Units applied, services running
    Serving,
    /// Tearing everything down
    Cleanup,
    /// Cleanup finished
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_disabled_round_trip() {
        let mut state = UnitState::Available;
        state.transition(UnitState::Disabled).unwrap();
        state.transition(UnitState::Available).unwrap();
        assert_eq!(state, UnitState::Available);
    }

    #[test]
    fn test_same_state_is_allowed() {
        let mut state = UnitState::Disabled;
        assert!(state.transition(UnitState::Disabled).is_ok());
    }

    #[test]
    fn test_disposed_is_terminal() {
        let mut state = UnitState::Disposed;
        let err = state.transition(UnitState::Available).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InvalidTransition {
                from: UnitState::Disposed,
                to: UnitState::Available
            }
        ));
        assert!(!UnitState::Disposed.can_transition(UnitState::Disposed));
    }

    #[test]
    fn test_any_live_state_can_be_disposed() {
        for state in [
            UnitState::PendingApply,
            UnitState::Available,
            UnitState::Disabled,
        ] {
            assert!(state.can_transition(UnitState::Disposed));
        }
    }

    #[test]
    fn test_available_cannot_go_back_to_pending() {
        assert!(!UnitState::Available.can_transition(UnitState::PendingApply));
    }

    #[test]
    fn test_is_live() {
        assert!(UnitState::PendingApply.is_live());
        assert!(UnitState::Available.is_live());
        assert!(!UnitState::Disabled.is_live());
        assert!(!UnitState::Disposed.is_live());
    }

    #[test]
    fn test_display() {
        assert_eq!(UnitState::PendingApply.to_string(), "pending-apply");
        assert_eq!(UnitState::Disposed.to_string(), "disposed");
    }
}
