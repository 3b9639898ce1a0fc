//! Plugin catalog - the factories units are materialized from
//!
//! Units are compiled into the host. The catalog maps a unit *path* to a
//! factory; reusable instances (`echo#2`) are built from the factory of their
//! path. A catalog miss is the runtime's "not found".

use std::collections::BTreeMap;
use std::sync::Arc;

use tether_plugin_api::{Plugin, PluginError, PluginMetadata, UnitContext, unit_path};

use super::error::RuntimeError;

/// Builds a fresh unit instance
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// A unit body given as a closure
pub type UnitBody = Arc<dyn Fn(&mut UnitContext) -> Result<(), PluginError> + Send + Sync>;

/// Registry of unit factories by path
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit type under `name`
    pub fn register<P>(&mut self, name: &str) -> &mut Self
    where
        P: Plugin + Default + 'static,
    {
        self.register_factory(name, || Box::new(P::default()))
    }

    /// Register a factory under `name`
    pub fn register_factory<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(name.to_string(), Arc::new(factory))
            .is_some()
        {
            tracing::warn!(unit = %name, "Replacing catalog entry");
        }
        self
    }

    /// Register a closure-bodied unit
    pub fn register_fn(&mut self, name: &str, plugin: FnPlugin) -> &mut Self {
        self.register_factory(name, move || Box::new(plugin.clone()))
    }

    /// Whether a factory exists for the path of `id`
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(unit_path(id))
    }

    /// Build a new instance for unit `id`
    pub fn instantiate(&self, id: &str) -> Result<Box<dyn Plugin>, RuntimeError> {
        let path = unit_path(id);
        let factory = self
            .factories
            .get(path)
            .ok_or_else(|| RuntimeError::NotInCatalog {
                path: path.to_string(),
            })?;
        Ok(factory())
    }

    /// Registered paths, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// A unit whose bodies are closures.
///
/// Handy for small built-in units and for tests:
///
/// ```ignore
/// catalog.register_fn(
///     "greeter",
///     FnPlugin::new(PluginMetadata::new("greeter"), |ctx| {
///         ctx.dispatch("message", "greet")?;
///         Ok(())
///     }),
/// );
/// ```
#[derive(Clone)]
pub struct FnPlugin {
    metadata: PluginMetadata,
    load: UnitBody,
    apply: Option<UnitBody>,
}

impl FnPlugin {
    pub fn new<F>(metadata: PluginMetadata, load: F) -> Self
    where
        F: Fn(&mut UnitContext) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        Self {
            metadata,
            load: Arc::new(load),
            apply: None,
        }
    }

    /// Builder: add a deferred body run once the host is serving
    pub fn with_apply<F>(mut self, apply: F) -> Self
    where
        F: Fn(&mut UnitContext) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        self.apply = Some(Arc::new(apply));
        self
    }
}

impl Plugin for FnPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    fn on_load(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError> {
        (self.load)(ctx)
    }

    fn has_deferred_apply(&self) -> bool {
        self.apply.is_some()
    }

    fn on_apply(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError> {
        match &self.apply {
            Some(apply) => apply(ctx),
            None => Ok(()),
        }
    }
}
