//! Unit identity, metadata and handle types

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::PluginError;

/// Separates a unit path from a reusable-instance key: `echo#2`
pub const INSTANCE_SEPARATOR: char = '#';

/// Exported surface of a unit, handed to units that `require` it
pub type Exports = Arc<dyn Any + Send + Sync>;

/// Strip the instance suffix from a unit id.
///
/// ```
/// use tether_plugin_api::unit_path;
///
/// assert_eq!(unit_path("echo#2"), "echo");
/// assert_eq!(unit_path("weather"), "weather");
/// ```
pub fn unit_path(id: &str) -> &str {
    match id.split_once(INSTANCE_SEPARATOR) {
        Some((path, _)) => path,
        None => id,
    }
}

/// Instance key of a reusable unit id, if any
pub fn instance_key(id: &str) -> Option<&str> {
    id.split_once(INSTANCE_SEPARATOR)
        .map(|(_, key)| key)
        .filter(|key| !key.is_empty())
}

/// Metadata a unit declares about itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginMetadata {
    /// Human-readable unit name
    pub name: String,
    /// Unit version (semver)
    pub version: String,
    /// Authors
    #[serde(default)]
    pub authors: Vec<String>,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON schema of the unit's config table
    #[serde(default)]
    pub config_schema: Option<serde_json::Value>,
    /// Service ids that must be ready before the unit is applied
    #[serde(default)]
    pub depend_services: Vec<String>,
    /// Static units exist for side effects only and never hold handlers
    #[serde(default)]
    pub is_static: bool,
    /// Reusable units may be instantiated several times under one path
    #[serde(default)]
    pub is_reusable: bool,
}

impl PluginMetadata {
    /// Metadata with a name and default version
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder: set the version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Builder: add an author
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    /// Builder: set the description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set the config schema
    pub fn config_schema(mut self, schema: serde_json::Value) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// Builder: declare a service this unit waits for
    pub fn depends_on_service(mut self, service: impl Into<String>) -> Self {
        self.depend_services.push(service.into());
        self
    }

    /// Builder: mark the unit static
    pub fn static_unit(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Builder: mark the unit reusable
    pub fn reusable(mut self) -> Self {
        self.is_reusable = true;
        self
    }

    /// Check required fields before the host accepts the metadata
    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::InvalidMetadata("name is empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(PluginError::InvalidMetadata(format!(
                "'{}' has an empty version",
                self.name
            )));
        }
        if self.is_static && self.is_reusable {
            return Err(PluginError::InvalidMetadata(format!(
                "'{}' cannot be both static and reusable",
                self.name
            )));
        }
        if let Some(schema) = &self.config_schema
            && !schema.is_object()
        {
            return Err(PluginError::InvalidMetadata(format!(
                "'{}' config schema must be a JSON object",
                self.name
            )));
        }
        Ok(())
    }
}

impl Default for PluginMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "0.0.1".to_string(),
            authors: Vec::new(),
            description: String::new(),
            config_schema: None,
            depend_services: Vec::new(),
            is_static: false,
            is_reusable: false,
        }
    }
}

/// A resolved reference to another unit
#[derive(Clone)]
pub struct UnitRef {
    id: String,
    exports: Option<Exports>,
}

impl UnitRef {
    pub fn new(id: impl Into<String>, exports: Option<Exports>) -> Self {
        Self {
            id: id.into(),
            exports,
        }
    }

    /// Id of the referenced unit
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Downcast the exported surface
    pub fn exports<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.exports.clone().and_then(|e| e.downcast::<T>().ok())
    }

    /// Whether the unit exported anything at all
    pub fn has_exports(&self) -> bool {
        self.exports.is_some()
    }
}

impl fmt::Debug for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRef")
            .field("id", &self.id)
            .field("has_exports", &self.exports.is_some())
            .finish()
    }
}

/// Identifier of one handler registration on the event bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A live handler registration scoped to the owning unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: HandlerId,
    pub event_type: String,
    pub name: String,
}

/// How a wait on a named resource ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The resource was assigned
    Ready,
    /// The resource was withdrawn while waiting
    Withdrawn,
}
