//! Error types for unit authors

use thiserror::Error;

/// Errors that units and the host return across the plugin API
#[derive(Error, Debug)]
pub enum PluginError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Custom error with message
    #[error("{0}")]
    Custom(String),

    /// A referenced unit could not be resolved
    #[error("Unit '{name}' not found")]
    NotFound { name: String },

    /// A static unit tried to do something only live units may do
    #[error("Static unit '{unit}' cannot {action}")]
    StaticViolation { unit: String, action: String },

    /// A reusable unit tried to own an exclusive resource
    #[error("Reusable unit '{unit}' cannot own service '{service}'")]
    ReusableViolation { unit: String, service: String },

    /// The unit was disposed while the call was in flight
    #[error("Unit '{0}' is disposed")]
    Disposed(String),

    /// Two services with the same id on one unit
    #[error("Duplicate service: {0}")]
    DuplicateService(String),

    /// A kept value exists under the key with another type
    #[error("Kept value '{key}' has a different type")]
    TypeMismatch { key: String },

    /// Metadata failed validation
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
}

impl PluginError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a not-found error for a unit name
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Whether this error means the referenced unit does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
