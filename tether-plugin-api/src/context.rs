//! UnitContext - a unit's interface to the host runtime

use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::PluginError;
use crate::service::Service;
use crate::types::{Exports, Subscription, UnitRef, WaitOutcome, instance_key, unit_path};

/// Callback run once when the owning unit is torn down
pub type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Value held in the kept-variable store
pub type Kept = Arc<dyn Any + Send + Sync>;

/// Produces a kept value the first time a key is requested
pub type KeepInit = Box<dyn FnOnce() -> Kept + Send>;

/// Runs when a kept value is dropped from the store
pub type KeepDisposer = Box<dyn FnOnce(Kept) + Send>;

/// Future returned by [`UnitHost::wait_for`]
pub type WaitFuture = Pin<Box<dyn Future<Output = WaitOutcome> + Send + 'static>>;

/// Default load priority when a unit's config does not set `$priority`
pub const DEFAULT_PRIORITY: i64 = 16;

// ─── Host Trait ──────────────────────────────────────────────────────

/// The runtime side of a [`UnitContext`].
///
/// Every call carries the id of the unit it is made on behalf of, so the
/// runtime can attribute registrations without inspecting the call stack.
/// The concrete implementation lives in `tether-core`.
pub trait UnitHost: Send + Sync {
    /// Resolve `name` for `requester`, recording the dependency edge.
    ///
    /// `Ok(None)` means `name` is not a unit; the caller falls back to
    /// whatever ordinary lookup it has.
    fn resolve(&self, requester: &str, name: &str) -> Result<Option<UnitRef>, PluginError>;

    /// Declare `name` as a sub-unit of `owner`, materialized on first use
    fn declare_subunit(&self, owner: &str, name: &str) -> Result<(), PluginError>;

    /// Load `name` now as a sub-unit of `owner`
    fn load_subunit(
        &self,
        owner: &str,
        name: &str,
        config: PluginConfig,
    ) -> Result<UnitRef, PluginError>;

    /// Publish the unit's exported surface
    fn export(&self, unit: &str, exports: Exports) -> Result<(), PluginError>;

    /// Register a long-lived service under the unit
    fn add_service(&self, unit: &str, service: Arc<dyn Service>) -> Result<(), PluginError>;

    /// Register a callback for the unit's teardown
    fn on_dispose(&self, unit: &str, callback: DisposeCallback) -> Result<(), PluginError>;

    /// Register an event handler scoped to the unit's lifetime
    fn register_handler(
        &self,
        unit: &str,
        event_type: &str,
        name: &str,
    ) -> Result<Subscription, PluginError>;

    /// Fetch or create a value that survives reloads of the same unit id
    fn keep(
        &self,
        unit: &str,
        key: &str,
        init: KeepInit,
        disposer: Option<KeepDisposer>,
    ) -> Result<Kept, PluginError>;

    /// Ask the hot-reload watcher to reload the unit when `path` changes
    fn watch_path(&self, unit: &str, path: PathBuf) -> Result<(), PluginError>;

    /// Wait until the named resource is assigned
    fn wait_for(&self, resource: &str) -> WaitFuture;
}

// ─── Configuration ───────────────────────────────────────────────────

/// Host-level settings read from `$`-prefixed keys of a unit's config table
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigMeta {
    /// `$disable`: load the unit disabled
    pub disable: bool,
    /// `$priority`: lower loads first
    pub priority: i64,
    /// `$static`: force the unit static
    pub is_static: bool,
    /// `$optional`: a load failure is expected and not worth a warning
    pub optional: bool,
}

impl Default for ConfigMeta {
    fn default() -> Self {
        Self {
            disable: false,
            priority: DEFAULT_PRIORITY,
            is_static: false,
            optional: false,
        }
    }
}

/// Configuration snapshot handed to a unit at load time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginConfig {
    values: BTreeMap<String, toml::Value>,
    meta: ConfigMeta,
}

impl PluginConfig {
    /// Create a new empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from a TOML table, splitting out `$` meta keys
    pub fn from_table(table: toml::Table) -> Result<Self, PluginError> {
        let mut config = Self::new();
        for (key, value) in table {
            match key.strip_prefix('$') {
                Some(meta_key) => config.apply_meta(meta_key, value)?,
                None => {
                    config.values.insert(key, value);
                }
            }
        }
        Ok(config)
    }

    fn apply_meta(&mut self, key: &str, value: toml::Value) -> Result<(), PluginError> {
        let expect_bool = |value: &toml::Value| {
            value
                .as_bool()
                .ok_or_else(|| PluginError::config(format!("`${key}` must be a boolean")))
        };
        match key {
            "disable" => self.meta.disable = expect_bool(&value)?,
            "static" => self.meta.is_static = expect_bool(&value)?,
            "optional" => self.meta.optional = expect_bool(&value)?,
            "priority" => {
                self.meta.priority = value
                    .as_integer()
                    .ok_or_else(|| PluginError::config("`$priority` must be an integer"))?;
            }
            other => {
                tracing::warn!(key = %other, "Ignoring unknown config meta key");
            }
        }
        Ok(())
    }

    /// Host-level meta settings
    pub fn meta(&self) -> &ConfigMeta {
        &self.meta
    }

    /// Mutable access to the meta settings
    pub fn meta_mut(&mut self) -> &mut ConfigMeta {
        &mut self.meta
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(|v| v.clone().try_into().ok())
    }

    /// Set a configuration value
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), PluginError> {
        let toml_value =
            toml::Value::try_from(value).map_err(|e| PluginError::Serialization(e.to_string()))?;
        self.values.insert(key.to_string(), toml_value);
        Ok(())
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Whether the unit-visible part is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Unit-visible keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

// ─── Context ─────────────────────────────────────────────────────────

/// A unit's interface to the runtime.
///
/// Passed to [`crate::Plugin::on_load`] and [`crate::Plugin::on_apply`].
/// The context is cheap to clone, so services and handlers may keep one and
/// keep acting on behalf of their unit.
#[derive(Clone)]
pub struct UnitContext {
    unit_id: String,
    config: PluginConfig,
    host: Arc<dyn UnitHost>,
}

impl UnitContext {
    /// Create a context for `unit_id` backed by `host`
    pub fn new(unit_id: impl Into<String>, config: PluginConfig, host: Arc<dyn UnitHost>) -> Self {
        Self {
            unit_id: unit_id.into(),
            config,
            host,
        }
    }

    /// The unit's id
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    /// The unit's path (id minus instance suffix)
    pub fn path(&self) -> &str {
        unit_path(&self.unit_id)
    }

    /// Instance key when the unit is a reusable instance
    pub fn instance_key(&self) -> Option<&str> {
        instance_key(&self.unit_id)
    }

    /// The configuration snapshot the unit was loaded with
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Read a configuration value
    ///
    /// # Example
    /// ```ignore
    /// let city: Option<String> = ctx.config_get("city");
    /// ```
    pub fn config_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config.get(key)
    }

    // ─── Cross-unit references ───────────────────────────────────────

    /// Resolve another unit, loading it if needed.
    ///
    /// Returns `Ok(None)` if `name` is not a unit at all.
    pub fn resolve(&self, name: &str) -> Result<Option<UnitRef>, PluginError> {
        self.host.resolve(&self.unit_id, name)
    }

    /// Resolve another unit, failing with [`PluginError::NotFound`] if it is
    /// not a unit.
    pub fn require(&self, name: &str) -> Result<UnitRef, PluginError> {
        self.resolve(name)?
            .ok_or_else(|| PluginError::not_found(name))
    }

    /// Resolve another unit and downcast its exports
    pub fn require_exports<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, PluginError> {
        self.require(name)?.exports::<T>().ok_or_else(|| {
            PluginError::custom(format!("unit '{name}' does not export the requested type"))
        })
    }

    /// Declare a sub-unit; it is loaded the first time this unit requires it
    pub fn declare_subunit(&self, name: &str) -> Result<(), PluginError> {
        self.host.declare_subunit(&self.unit_id, name)
    }

    /// Load a sub-unit now with its own config
    pub fn load_subunit(&self, name: &str, config: PluginConfig) -> Result<UnitRef, PluginError> {
        self.host.load_subunit(&self.unit_id, name, config)
    }

    /// Publish this unit's exported surface
    pub fn export<T: Any + Send + Sync>(&self, value: T) -> Result<(), PluginError> {
        self.host.export(&self.unit_id, Arc::new(value))
    }

    // ─── Registrations ───────────────────────────────────────────────

    /// Register a long-lived service owned by this unit
    pub fn service(&self, service: Arc<dyn Service>) -> Result<(), PluginError> {
        self.host.add_service(&self.unit_id, service)
    }

    /// Run `callback` once when this unit is torn down
    pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) -> Result<(), PluginError> {
        self.host.on_dispose(&self.unit_id, Box::new(callback))
    }

    /// Register an event handler; revoked when the unit is disabled or disposed
    pub fn dispatch(&self, event_type: &str, name: &str) -> Result<Subscription, PluginError> {
        self.host.register_handler(&self.unit_id, event_type, name)
    }

    /// Fetch a value kept across reloads of this unit, creating it with
    /// `init` on first use. `disposer` runs when the unit is finally disposed.
    pub fn keep<T, F>(
        &self,
        key: &str,
        init: F,
        disposer: Option<Box<dyn FnOnce(Arc<T>) + Send>>,
    ) -> Result<Arc<T>, PluginError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T + Send + 'static,
    {
        let init: KeepInit = Box::new(move || Arc::new(init()) as Kept);
        let disposer = disposer.map(|dispose| {
            Box::new(move |kept: Kept| {
                if let Ok(value) = kept.downcast::<T>() {
                    dispose(value);
                }
            }) as KeepDisposer
        });
        self.host
            .keep(&self.unit_id, key, init, disposer)?
            .downcast::<T>()
            .map_err(|_| PluginError::TypeMismatch {
                key: key.to_string(),
            })
    }

    /// Reload this unit when `path` changes on disk
    pub fn watch_path(&self, path: impl Into<PathBuf>) -> Result<(), PluginError> {
        self.host.watch_path(&self.unit_id, path.into())
    }

    /// Wait until the named service is ready
    pub fn wait_for(&self, resource: &str) -> WaitFuture {
        self.host.wait_for(resource)
    }

    // ─── Logging ─────────────────────────────────────────────────────

    /// Log an info message (automatically tagged with the unit id)
    pub fn log_info(&self, message: &str) {
        tracing::info!(unit = %self.unit_id, "{}", message);
    }

    /// Log a warning message
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(unit = %self.unit_id, "{}", message);
    }

    /// Log an error message
    pub fn log_error(&self, message: &str) {
        tracing::error!(unit = %self.unit_id, "{}", message);
    }

    /// Log a debug message
    pub fn log_debug(&self, message: &str) {
        tracing::debug!(unit = %self.unit_id, "{}", message);
    }
}
