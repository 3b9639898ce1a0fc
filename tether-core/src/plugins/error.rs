//! Plugin runtime error types

use thiserror::Error;
use tether_plugin_api::PluginError;

use super::state::UnitState;

/// Errors that can occur in the plugin runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No unit with this id is loaded
    #[error("Unit '{id}' not found")]
    NotFound { id: String },

    /// The catalog has no factory for this path
    #[error("No unit named '{path}' in the catalog")]
    NotInCatalog { path: String },

    /// The unit body failed or panicked
    #[error("Unit '{id}' failed to load: {source}")]
    LoadFailed {
        id: String,
        #[source]
        source: PluginError,
    },

    /// The deferred body failed or panicked
    #[error("Unit '{id}' failed to apply: {source}")]
    ApplyFailed {
        id: String,
        #[source]
        source: PluginError,
    },

    /// A static unit was asked to do something it may not
    #[error("Static unit '{id}' cannot {action}")]
    StaticViolation { id: String, action: String },

    /// A reusable unit was asked to own a service
    #[error("Reusable unit '{id}' cannot own service '{service}'")]
    ReusableViolation { id: String, service: String },

    /// Illegal lifecycle transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: UnitState, to: UnitState },

    /// The orchestrator could not run a service
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// The hot-reload watcher could not watch a path
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Operation not allowed in the current phase
    #[error("Runtime is stopped")]
    Stopped,

    /// Error surfaced by a unit-facing call
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl RuntimeError {
    /// Whether the error means the unit simply does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NotInCatalog { .. })
            || matches!(self, Self::Plugin(e) if e.is_not_found())
    }
}

impl From<RuntimeError> for PluginError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound { id } => PluginError::NotFound { name: id },
            RuntimeError::NotInCatalog { path } => PluginError::NotFound { name: path },
            RuntimeError::StaticViolation { id, action } => {
                PluginError::StaticViolation { unit: id, action }
            }
            RuntimeError::ReusableViolation { id, service } => {
                PluginError::ReusableViolation { unit: id, service }
            }
            RuntimeError::Plugin(inner) => inner,
            other => PluginError::Custom(other.to_string()),
        }
    }
}
