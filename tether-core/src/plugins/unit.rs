//! Unit - the runtime record of one loaded plugin

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tether_plugin_api::{
    DisposeCallback, Exports, Plugin, PluginConfig, PluginError, PluginMetadata, Service,
    Subscription,
    UnitContext, UnitRef, instance_key, unit_path,
};

use super::error::RuntimeError;
use super::state::UnitState;

/// A loaded unit and everything it owns
pub struct Unit {
    id: String,
    path: String,
    instance_key: Option<String>,
    state: UnitState,
    is_static: bool,
    is_reusable: bool,
    /// Disabled on purpose (config `$disable` or an explicit user request);
    /// cascading enables skip such units.
    user_disabled: bool,
    /// Loaded on request (config batch or an explicit `load`) rather than
    /// materialized by the resolver; such units are retried when a
    /// dependency they lost comes back.
    requested: bool,
    /// Rule broken while the body ran; fails the load even if swallowed
    violation: Option<PluginError>,
    has_deferred_apply: bool,
    applied: bool,
    config: PluginConfig,
    metadata: Option<PluginMetadata>,
    /// Taken out while one of its bodies runs with the registry unlocked
    instance: Option<Box<dyn Plugin>>,
    context: UnitContext,
    exports: Option<Exports>,
    services: BTreeMap<String, Arc<dyn Service>>,
    subunits: BTreeSet<String>,
    declared_subunits: BTreeSet<String>,
    parent: Option<String>,
    dispose_callbacks: Vec<DisposeCallback>,
    handlers: Vec<Subscription>,
    /// Registrations revoked by `disable`, restored by `enable`
    suspended_handlers: Vec<(String, String)>,
    watch_paths: Vec<PathBuf>,
}

/// Everything a unit owned at the moment it was disposed
pub(crate) struct Remains {
    pub services: Vec<Arc<dyn Service>>,
    pub callbacks: Vec<DisposeCallback>,
    pub handlers: Vec<Subscription>,
    pub subunits: Vec<String>,
    pub instance: Option<Box<dyn Plugin>>,
}

impl Unit {
    pub(crate) fn new(
        id: impl Into<String>,
        config: PluginConfig,
        instance: Box<dyn Plugin>,
        context: UnitContext,
        parent: Option<String>,
    ) -> Self {
        let id = id.into();
        let metadata = instance.metadata();
        let is_static = metadata.is_static || config.meta().is_static;
        let user_disabled = config.meta().disable;
        Self {
            path: unit_path(&id).to_string(),
            instance_key: instance_key(&id).map(str::to_string),
            id,
            state: UnitState::PendingApply,
            is_static,
            is_reusable: metadata.is_reusable,
            user_disabled,
            requested: false,
            violation: None,
            has_deferred_apply: instance.has_deferred_apply(),
            applied: false,
            config,
            metadata: Some(metadata),
            instance: Some(instance),
            context,
            exports: None,
            services: BTreeMap::new(),
            subunits: BTreeSet::new(),
            declared_subunits: BTreeSet::new(),
            parent,
            dispose_callbacks: Vec::new(),
            handlers: Vec::new(),
            suspended_handlers: Vec::new(),
            watch_paths: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn instance_key(&self) -> Option<&str> {
        self.instance_key.as_deref()
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn is_reusable(&self) -> bool {
        self.is_reusable
    }

    pub fn is_user_disabled(&self) -> bool {
        self.user_disabled
    }

    pub fn is_requested(&self) -> bool {
        self.requested
    }

    pub fn is_disposed(&self) -> bool {
        self.state == UnitState::Disposed
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn metadata(&self) -> Option<&PluginMetadata> {
        self.metadata.as_ref()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn subunits(&self) -> impl Iterator<Item = &str> {
        self.subunits.iter().map(String::as_str)
    }

    pub fn service_ids(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn handlers(&self) -> &[Subscription] {
        &self.handlers
    }

    pub fn watch_paths(&self) -> &[PathBuf] {
        &self.watch_paths
    }

    /// Reference handed to units that resolve this one
    pub fn unit_ref(&self) -> UnitRef {
        UnitRef::new(self.id.clone(), self.exports.clone())
    }

    pub(crate) fn context(&self) -> UnitContext {
        self.context.clone()
    }

    pub(crate) fn set_state(&mut self, to: UnitState) -> Result<(), RuntimeError> {
        self.state.transition(to)
    }

    pub(crate) fn set_user_disabled(&mut self, value: bool) {
        self.user_disabled = value;
    }

    pub(crate) fn set_requested(&mut self, value: bool) {
        self.requested = value;
    }

    pub(crate) fn record_violation(&mut self, error: PluginError) {
        self.violation.get_or_insert(error);
    }

    pub(crate) fn take_violation(&mut self) -> Option<PluginError> {
        self.violation.take()
    }

    /// Whether the deferred body still has to run
    pub(crate) fn needs_apply(&self) -> bool {
        self.has_deferred_apply && !self.applied
    }

    pub(crate) fn mark_applied(&mut self) {
        self.applied = true;
    }

    /// State to return to when enabled
    pub(crate) fn enabled_state(&self) -> UnitState {
        if self.needs_apply() {
            UnitState::PendingApply
        } else {
            UnitState::Available
        }
    }

    pub(crate) fn take_instance(&mut self) -> Option<Box<dyn Plugin>> {
        self.instance.take()
    }

    pub(crate) fn restore_instance(&mut self, instance: Box<dyn Plugin>) {
        self.instance = Some(instance);
    }

    pub(crate) fn set_exports(&mut self, exports: Exports) {
        self.exports = Some(exports);
    }

    pub(crate) fn add_service(&mut self, service: Arc<dyn Service>) -> Result<(), RuntimeError> {
        let service_id = service.id().to_string();
        if self.is_reusable {
            return Err(RuntimeError::ReusableViolation {
                id: self.id.clone(),
                service: service_id,
            });
        }
        if self.services.contains_key(&service_id) {
            return Err(PluginError::DuplicateService(service_id).into());
        }
        self.services.insert(service_id, service);
        Ok(())
    }

    pub(crate) fn services(&self) -> Vec<Arc<dyn Service>> {
        self.services.values().cloned().collect()
    }

    pub(crate) fn add_subunit(&mut self, id: &str) {
        self.subunits.insert(id.to_string());
    }

    pub(crate) fn remove_subunit(&mut self, id: &str) {
        self.subunits.remove(id);
    }

    pub(crate) fn declare_subunit(&mut self, name: &str) {
        self.declared_subunits.insert(name.to_string());
    }

    pub(crate) fn has_declared_subunit(&self, name: &str) -> bool {
        self.declared_subunits.contains(name)
    }

    pub(crate) fn add_dispose_callback(&mut self, callback: DisposeCallback) {
        self.dispose_callbacks.push(callback);
    }

    pub(crate) fn add_handler(&mut self, subscription: Subscription) {
        self.handlers.push(subscription);
    }

    /// Move live registrations aside for a later `enable`
    pub(crate) fn suspend_handlers(&mut self) -> Vec<Subscription> {
        let handlers = std::mem::take(&mut self.handlers);
        self.suspended_handlers.extend(
            handlers
                .iter()
                .map(|h| (h.event_type.clone(), h.name.clone())),
        );
        handlers
    }

    pub(crate) fn take_suspended_handlers(&mut self) -> Vec<(String, String)> {
        std::mem::take(&mut self.suspended_handlers)
    }

    pub(crate) fn add_watch_path(&mut self, path: PathBuf) {
        if !self.watch_paths.contains(&path) {
            self.watch_paths.push(path);
        }
    }

    /// Mark the unit disposed and hand over everything it owns
    pub(crate) fn take_remains(&mut self) -> Remains {
        self.state = UnitState::Disposed;
        self.suspended_handlers.clear();
        self.declared_subunits.clear();
        self.exports = None;
        Remains {
            services: std::mem::take(&mut self.services).into_values().collect(),
            callbacks: std::mem::take(&mut self.dispose_callbacks),
            handlers: std::mem::take(&mut self.handlers),
            subunits: std::mem::take(&mut self.subunits).into_iter().collect(),
            instance: self.instance.take(),
        }
    }

    /// Snapshot for listings
    pub fn info(&self) -> UnitInfo {
        UnitInfo {
            id: self.id.clone(),
            path: self.path.clone(),
            state: self.state,
            is_static: self.is_static,
            is_reusable: self.is_reusable,
            user_disabled: self.user_disabled,
            requested: self.requested,
            metadata: self.metadata.clone(),
            services: self.services.keys().cloned().collect(),
            subunits: self.subunits.iter().cloned().collect(),
            handlers: self.handlers.len(),
        }
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("is_static", &self.is_static)
            .field("is_reusable", &self.is_reusable)
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("subunits", &self.subunits)
            .finish_non_exhaustive()
    }
}

/// Information about a loaded unit
#[derive(Debug, Clone, Serialize)]
pub struct UnitInfo {
    pub id: String,
    pub path: String,
    pub state: UnitState,
    pub is_static: bool,
    pub is_reusable: bool,
    pub user_disabled: bool,
    pub requested: bool,
    pub metadata: Option<PluginMetadata>,
    pub services: Vec<String>,
    pub subunits: Vec<String>,
    pub handlers: usize,
}
