//! PluginManager - owns the unit registry and drives the runtime phases
//!
//! All registry and graph mutations happen under one `std::sync::Mutex`,
//! held only for short sections that never suspend. Unit bodies, dispose
//! callbacks and orchestrator calls run with the lock released so a body can
//! `require` other units, which re-enters the manager.

use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use tether_plugin_api::{
    PluginConfig, PluginError, Service, UnitHost, UnitRef, WaitOutcome, instance_key, unit_path,
};
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::catalog::PluginCatalog;
use super::error::RuntimeError;
use super::graph::DependencyGraph;
use super::handlers::{HandlerRegistry, MemoryHandlerRegistry};
use super::host::RuntimeHost;
use super::keep::KeepStore;
use super::state::{Phase, UnitState};
use super::unit::{Unit, UnitInfo};
use super::waiter::WaitRegistry;
use super::watcher::WatchRequest;
use crate::config::{ConfigReload, ConfigStore, HostConfig};
use crate::events::{MemoryEventBus, RuntimeEvent, RuntimeEventBus};
use crate::orchestrator::{LocalOrchestrator, Orchestrator, OrchestratorPhase, Teardown};

/// How a unit came to be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Config batch, config reload or an explicit `load`
    Requested,
    /// Materialized by the resolver for another unit
    Resolved,
    /// Sub-unit of the given owner
    Subunit(String),
}

/// Why a unit is being disposed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisposeReason {
    /// Explicit unload or cascade from one
    Unload,
    /// The id is about to be loaded again; kept values survive
    Reload,
    /// The unit's own body failed
    Failed,
    /// Supervisor cleanup; no dependents are walked
    Cleanup,
}

impl DisposeReason {
    fn cascades(self) -> bool {
        self != DisposeReason::Cleanup
    }

    fn refuses_static(self) -> bool {
        matches!(self, DisposeReason::Unload | DisposeReason::Reload)
    }

    /// Reason used for dependents and sub-units
    fn cascaded(self) -> DisposeReason {
        match self {
            DisposeReason::Reload => DisposeReason::Reload,
            DisposeReason::Cleanup => DisposeReason::Cleanup,
            DisposeReason::Unload | DisposeReason::Failed => DisposeReason::Unload,
        }
    }
}

/// A requested unit that lost a dependency, retried once when it returns
#[derive(Debug, Clone)]
struct Dangling {
    id: String,
    config: PluginConfig,
}

/// Everything guarded by the registry lock
pub(crate) struct Registry {
    pub(crate) units: HashMap<String, Unit>,
    /// Ids in load order
    pub(crate) order: Vec<String>,
    pub(crate) graph: DependencyGraph,
    /// Sub-unit name -> owner id
    pub(crate) owned_by: HashMap<String, String>,
    /// Dependency path -> units to retry when it loads again
    dangling: HashMap<String, Vec<Dangling>>,
    pub(crate) phase: Phase,
}

impl Registry {
    fn new() -> Self {
        Self {
            units: HashMap::new(),
            order: Vec::new(),
            graph: DependencyGraph::new(),
            owned_by: HashMap::new(),
            dangling: HashMap::new(),
            phase: Phase::Preparing,
        }
    }

    /// Record `requester -> name` unless it is an owner reaching its sub-unit
    pub(crate) fn record_edge(&mut self, requester: &str, name: &str) {
        if !self.units.contains_key(requester) {
            return;
        }
        let owned = self.units.get(name).and_then(Unit::parent) == Some(requester);
        if !owned && self.graph.add_edge(requester, name) {
            tracing::trace!(requester = %requester, target = %name, "Dependency recorded");
        }
    }

    fn is_dangling(&self, path: &str, id: &str) -> bool {
        self.dangling
            .get(path)
            .is_some_and(|entries| entries.iter().any(|d| d.id == id))
    }

    fn add_dangling(&mut self, path: &str, id: &str, config: PluginConfig) {
        let entries = self.dangling.entry(path.to_string()).or_default();
        if !entries.iter().any(|d| d.id == id) {
            entries.push(Dangling {
                id: id.to_string(),
                config,
            });
        }
    }
}

/// Outcome of loading the configured units
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Keys disabled with `~`
    pub skipped: Vec<String>,
}

pub(crate) struct Shared {
    pub(crate) registry: Mutex<Registry>,
    pub(crate) catalog: PluginCatalog,
    pub(crate) config: Arc<ConfigStore>,
    pub(crate) waiters: WaitRegistry,
    pub(crate) keeps: KeepStore,
    pub(crate) events: Arc<dyn RuntimeEventBus>,
    pub(crate) handlers: Arc<dyn HandlerRegistry>,
    pub(crate) orchestrator: Arc<dyn Orchestrator>,
    pub(crate) host: Arc<dyn UnitHost>,
    /// Withdrawn service tasks, awaited during cleanup
    teardown: Mutex<Teardown>,
    pub(crate) watch_tx: Mutex<Option<mpsc::UnboundedSender<WatchRequest>>>,
}

/// Builder for [`PluginManager`]
pub struct PluginManagerBuilder {
    catalog: PluginCatalog,
    config: Option<Arc<ConfigStore>>,
    events: Option<Arc<dyn RuntimeEventBus>>,
    handlers: Option<Arc<dyn HandlerRegistry>>,
    orchestrator: Option<Arc<dyn Orchestrator>>,
}

impl PluginManagerBuilder {
    pub fn config(mut self, config: Arc<ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn events(mut self, events: Arc<dyn RuntimeEventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn handlers(mut self, handlers: Arc<dyn HandlerRegistry>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    pub fn orchestrator(mut self, orchestrator: Arc<dyn Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn build(self) -> PluginManager {
        let config = self
            .config
            .unwrap_or_else(|| Arc::new(ConfigStore::new(HostConfig::default())));
        let events = self
            .events
            .unwrap_or_else(|| Arc::new(MemoryEventBus::default()));
        let handlers = self
            .handlers
            .unwrap_or_else(|| Arc::new(MemoryHandlerRegistry::new()));
        let orchestrator = self
            .orchestrator
            .unwrap_or_else(|| Arc::new(LocalOrchestrator::new()));

        let shared = Arc::new_cyclic(|weak| Shared {
            registry: Mutex::new(Registry::new()),
            catalog: self.catalog,
            config,
            waiters: WaitRegistry::new(),
            keeps: KeepStore::new(),
            events,
            handlers,
            orchestrator,
            host: Arc::new(RuntimeHost::new(weak.clone())),
            teardown: Mutex::new(Teardown::new()),
            watch_tx: Mutex::new(None),
        });
        PluginManager { shared }
    }
}

/// The plugin runtime.
///
/// Cheap to clone; every clone drives the same registry.
#[derive(Clone)]
pub struct PluginManager {
    pub(crate) shared: Arc<Shared>,
}

impl PluginManager {
    /// Manager with in-memory collaborators and an empty config
    pub fn new(catalog: PluginCatalog) -> Self {
        Self::builder(catalog).build()
    }

    pub fn builder(catalog: PluginCatalog) -> PluginManagerBuilder {
        PluginManagerBuilder {
            catalog,
            config: None,
            events: None,
            handlers: None,
            orchestrator: None,
        }
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn publish(&self, event: RuntimeEvent) {
        self.shared.events.publish(event);
    }

    fn defer_teardown(&self, teardown: Teardown) {
        if teardown.is_empty() {
            return;
        }
        self.shared
            .teardown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(teardown);
    }

    // ─── Queries ─────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.registry().phase
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.registry().units.contains_key(id)
    }

    pub fn state(&self, id: &str) -> Option<UnitState> {
        self.registry().units.get(id).map(Unit::state)
    }

    pub fn get(&self, id: &str) -> Option<UnitInfo> {
        self.registry().units.get(id).map(Unit::info)
    }

    /// Reference to a loaded unit and its exports
    pub fn unit_ref(&self, id: &str) -> Option<UnitRef> {
        self.registry().units.get(id).map(Unit::unit_ref)
    }

    /// Loaded units in load order
    pub fn units(&self) -> Vec<UnitInfo> {
        let registry = self.registry();
        registry
            .order
            .iter()
            .filter_map(|id| registry.units.get(id))
            .map(Unit::info)
            .collect()
    }

    /// Ids of units that reference `path`
    pub fn referents(&self, path: &str) -> Vec<String> {
        self.registry().graph.referents(path)
    }

    /// Names units at `path` reference
    pub fn references(&self, path: &str) -> Vec<String> {
        self.registry().graph.references(path)
    }

    /// Units waiting for `path` to load again
    pub fn dangling(&self, path: &str) -> Vec<String> {
        self.registry()
            .dangling
            .get(unit_path(path))
            .map(|entries| entries.iter().map(|d| d.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Files units asked to be reloaded on
    pub fn watch_paths(&self) -> Vec<WatchRequest> {
        let registry = self.registry();
        registry
            .order
            .iter()
            .filter_map(|id| registry.units.get(id))
            .flat_map(|unit| {
                unit.watch_paths().iter().map(|path| WatchRequest {
                    unit: unit.id().to_string(),
                    path: path.clone(),
                })
            })
            .collect()
    }

    pub fn events(&self) -> Arc<dyn RuntimeEventBus> {
        self.shared.events.clone()
    }

    pub fn config(&self) -> Arc<ConfigStore> {
        self.shared.config.clone()
    }

    pub fn waiters(&self) -> &WaitRegistry {
        &self.shared.waiters
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.shared.catalog
    }

    // ─── Loading ─────────────────────────────────────────────────────

    /// Load `id` with its configured table (or an empty config).
    ///
    /// Loading an id that is already present reloads it.
    pub fn load(&self, id: &str) -> Result<UnitRef, RuntimeError> {
        let config = self.shared.config.plugin(id).unwrap_or_default();
        self.load_unit(id, config, Origin::Requested)
    }

    /// Load `id` with an explicit config
    pub fn load_with(&self, id: &str, config: PluginConfig) -> Result<UnitRef, RuntimeError> {
        self.load_unit(id, config, Origin::Requested)
    }

    /// Dispose and load `id` again, with its configured table if it has one
    pub fn reload(&self, id: &str) -> Result<UnitRef, RuntimeError> {
        let current = self
            .registry()
            .units
            .get(id)
            .map(|unit| (unit.config().clone(), unit.is_requested(), unit.parent().map(str::to_string)));
        let Some((current, requested, parent)) = current else {
            return Err(RuntimeError::NotFound { id: id.to_string() });
        };
        let config = self.shared.config.plugin(id).unwrap_or(current);
        let origin = match parent {
            Some(owner) => Origin::Subunit(owner),
            None if requested => Origin::Requested,
            None => Origin::Resolved,
        };
        self.load_unit(id, config, origin)
    }

    pub(crate) fn load_unit(
        &self,
        id: &str,
        config: PluginConfig,
        origin: Origin,
    ) -> Result<UnitRef, RuntimeError> {
        let existing = {
            let registry = self.registry();
            if matches!(registry.phase, Phase::Cleanup | Phase::Stopped) {
                return Err(RuntimeError::Stopped);
            }
            registry
                .units
                .get(id)
                .map(|unit| (unit.is_static(), unit.is_requested()))
        };

        let mut requested = origin == Origin::Requested;
        if let Some((is_static, was_requested)) = existing {
            if is_static {
                let err = RuntimeError::StaticViolation {
                    id: id.to_string(),
                    action: "be reloaded".to_string(),
                };
                self.reject(id, &err);
                return Err(err);
            }
            tracing::info!(unit = %id, "Reloading unit");
            let teardown = self.dispose_unit(id, DisposeReason::Reload, None)?;
            self.defer_teardown(teardown);
            requested |= was_requested;
        }

        let optional = config.meta().optional;
        let instance = match self.shared.catalog.instantiate(id) {
            Ok(instance) => instance,
            Err(e) => {
                self.report_load_failure(id, optional, &e);
                return Err(e);
            }
        };

        let metadata = instance.metadata();
        let invalid = metadata.validate().err().or_else(|| {
            (instance_key(id).is_some() && !metadata.is_reusable).then(|| {
                PluginError::InvalidMetadata(format!(
                    "'{}' is not reusable and cannot be instantiated as '{id}'",
                    unit_path(id)
                ))
            })
        });
        if let Some(source) = invalid {
            let err = RuntimeError::LoadFailed {
                id: id.to_string(),
                source,
            };
            self.report_load_failure(id, optional, &err);
            return Err(err);
        }

        let context = tether_plugin_api::UnitContext::new(id, config, self.shared.host.clone());
        let parent = match &origin {
            Origin::Subunit(owner) => Some(owner.clone()),
            _ => None,
        };
        let mut unit = Unit::new(
            id,
            context.config().clone(),
            instance,
            context.clone(),
            parent.clone(),
        );
        unit.set_requested(requested);
        let Some(mut instance) = unit.take_instance() else {
            return Err(PluginError::Disposed(id.to_string()).into());
        };

        {
            let mut registry = self.registry();
            if let Some(owner) = &parent {
                if let Some(owner_unit) = registry.units.get_mut(owner) {
                    owner_unit.add_subunit(id);
                }
                registry.owned_by.insert(id.to_string(), owner.clone());
            }
            registry.units.insert(id.to_string(), unit);
            registry.order.push(id.to_string());
        }

        tracing::debug!(unit = %id, version = %metadata.version, "Running unit body");
        let mut ctx = context;
        let result = run_body(id, "on_load", || instance.on_load(&mut ctx));

        let (outcome, orphan) = {
            let mut registry = self.registry();
            match registry.units.get_mut(id) {
                Some(unit) if !unit.is_disposed() => {
                    unit.restore_instance(instance);
                    let outcome = match unit.take_violation() {
                        Some(violation) => Err(violation),
                        None => result,
                    };
                    (outcome, None)
                }
                _ => {
                    let source = result.err().unwrap_or_else(|| PluginError::Disposed(id.to_string()));
                    (Err(source), Some(instance))
                }
            }
        };

        if let Some(mut orphan) = orphan {
            // Disposed while its body ran; the record is already gone
            if let Err(e) = run_body(id, "on_unload", || orphan.on_unload()) {
                tracing::warn!(unit = %id, error = %e, "Unit on_unload returned error");
            }
        }

        if let Err(source) = outcome {
            let err = match source {
                PluginError::StaticViolation { unit, action } => {
                    RuntimeError::StaticViolation { id: unit, action }
                }
                source => RuntimeError::LoadFailed {
                    id: id.to_string(),
                    source,
                },
            };
            match self.dispose_unit(id, DisposeReason::Failed, None) {
                Ok(teardown) => self.defer_teardown(teardown),
                Err(e) => tracing::warn!(unit = %id, error = %e, "Failed to dispose broken unit"),
            }
            self.report_load_failure(id, optional, &err);
            return Err(err);
        }

        let (unit_ref, user_disabled, needs_apply, depend_services, phase) = {
            let mut registry = self.registry();
            let phase = registry.phase;
            let Some(unit) = registry.units.get_mut(id) else {
                return Err(PluginError::Disposed(id.to_string()).into());
            };
            if !unit.needs_apply() {
                unit.set_state(UnitState::Available)?;
            }
            let depend_services = unit
                .metadata()
                .map(|m| m.depend_services.clone())
                .unwrap_or_default();
            (
                unit.unit_ref(),
                unit.is_user_disabled(),
                unit.needs_apply(),
                depend_services,
                phase,
            )
        };

        tracing::info!(unit = %id, version = %metadata.version, "Unit loaded");
        self.publish(RuntimeEvent::Loaded { id: id.to_string() });

        if user_disabled {
            let teardown = self.disable_unit(id, true)?;
            self.defer_teardown(teardown);
        } else if phase == Phase::Serving && needs_apply {
            self.schedule_apply(id, depend_services);
        }

        self.retry_dangling(unit_path(id));
        Ok(unit_ref)
    }

    fn report_load_failure(&self, id: &str, optional: bool, err: &RuntimeError) {
        if optional {
            tracing::debug!(unit = %id, error = %err, "Optional unit failed to load");
        } else {
            tracing::error!(unit = %id, error = %err, "Unit failed to load");
        }
        self.publish(RuntimeEvent::LoadFailed {
            id: id.to_string(),
            error: err.to_string(),
        });
    }

    fn reject(&self, id: &str, err: &RuntimeError) {
        tracing::warn!(unit = %id, error = %err, "Operation rejected");
        self.publish(RuntimeEvent::Rejected {
            id: id.to_string(),
            error: err.to_string(),
        });
    }

    /// Retry, once, the units that lost `path`
    fn retry_dangling(&self, path: &str) {
        let Some(entries) = self.registry().dangling.remove(path) else {
            return;
        };
        for Dangling { id, config } in entries {
            tracing::info!(unit = %id, dependency = %path, "Retrying unit after dependency returned");
            if let Err(e) = self.load_unit(&id, config, Origin::Requested) {
                tracing::debug!(unit = %id, error = %e, "Retry failed");
                self.shared.keeps.clear(&id);
            }
        }
    }

    /// Load every configured unit in `$priority` order.
    ///
    /// Failures are reported as events and the batch carries on.
    pub fn load_configured(&self) -> LoadReport {
        let config = self.shared.config.snapshot();
        let mut report = LoadReport {
            skipped: config.disabled_keys().map(str::to_string).collect(),
            ..Default::default()
        };
        for key in config.load_order() {
            let already = {
                let mut registry = self.registry();
                registry.units.get_mut(&key).map(|unit| unit.set_requested(true))
            };
            if already.is_some() {
                report.loaded.push(key);
                continue;
            }
            let unit_config = config.plugin(&key).cloned().unwrap_or_default();
            match self.load_unit(&key, unit_config, Origin::Requested) {
                Ok(_) => report.loaded.push(key),
                Err(e) => report.failed.push((key, e.to_string())),
            }
        }
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Configured units loaded"
        );
        report
    }

    // ─── Deferred bodies ─────────────────────────────────────────────

    /// Apply now if every service dependency is ready, otherwise once they are
    fn schedule_apply(&self, id: &str, depend_services: Vec<String>) {
        let waiting: Vec<String> = depend_services
            .into_iter()
            .filter(|service| !self.shared.waiters.is_ready(service))
            .collect();
        if waiting.is_empty() {
            if let Err(e) = self.apply_unit(id) {
                tracing::debug!(unit = %id, error = %e, "Apply failed");
            }
            return;
        }

        let Ok(runtime) = RuntimeHandle::try_current() else {
            tracing::warn!(unit = %id, "No runtime to wait for service dependencies on");
            return;
        };
        tracing::debug!(unit = %id, services = ?waiting, "Waiting for service dependencies");
        let waits: Vec<_> = waiting
            .iter()
            .map(|service| self.shared.waiters.wait_for(service))
            .collect();
        let manager = self.clone();
        let id = id.to_string();
        runtime.spawn(async move {
            for wait in waits {
                if wait.await == WaitOutcome::Withdrawn {
                    tracing::debug!(unit = %id, "Service dependency withdrawn, not applying");
                    return;
                }
            }
            if let Err(e) = manager.apply_unit(&id) {
                tracing::debug!(unit = %id, error = %e, "Apply failed");
            }
        });
    }

    /// Run the deferred body of `id`
    pub(crate) fn apply_unit(&self, id: &str) -> Result<(), RuntimeError> {
        let taken = {
            let mut registry = self.registry();
            let Some(unit) = registry.units.get_mut(id) else {
                return Ok(());
            };
            if !unit.needs_apply() || unit.state() != UnitState::PendingApply {
                return Ok(());
            }
            unit.take_instance().map(|instance| (instance, unit.context()))
        };
        let Some((mut instance, mut ctx)) = taken else {
            return Ok(());
        };

        tracing::debug!(unit = %id, "Applying unit");
        let result = run_body(id, "on_apply", || instance.on_apply(&mut ctx));

        let (outcome, orphan) = {
            let mut registry = self.registry();
            match registry.units.get_mut(id) {
                Some(unit) if !unit.is_disposed() => {
                    unit.restore_instance(instance);
                    let outcome = match unit.take_violation() {
                        Some(violation) => Err(violation),
                        None => result,
                    };
                    if outcome.is_ok() {
                        unit.mark_applied();
                        if unit.state() == UnitState::PendingApply {
                            unit.set_state(UnitState::Available)?;
                        }
                    }
                    (outcome, None)
                }
                _ => (Ok(()), Some(instance)),
            }
        };

        if let Some(mut orphan) = orphan {
            if let Err(e) = run_body(id, "on_unload", || orphan.on_unload()) {
                tracing::warn!(unit = %id, error = %e, "Unit on_unload returned error");
            }
            return Ok(());
        }

        match outcome {
            Ok(()) => {
                tracing::info!(unit = %id, "Unit applied");
                self.publish(RuntimeEvent::Applied { id: id.to_string() });
                Ok(())
            }
            Err(source) => {
                let err = RuntimeError::ApplyFailed {
                    id: id.to_string(),
                    source,
                };
                match self.dispose_unit(id, DisposeReason::Failed, None) {
                    Ok(teardown) => self.defer_teardown(teardown),
                    Err(e) => tracing::warn!(unit = %id, error = %e, "Failed to dispose broken unit"),
                }
                self.report_load_failure(id, false, &err);
                Err(err)
            }
        }
    }

    // ─── Disposal ────────────────────────────────────────────────────

    /// Dispose `id` for good.
    ///
    /// Outside cleanup, units that reference its path are disposed too; the
    /// ones that were requested directly are retried once the path loads
    /// again. Static units refuse unless `is_cleanup`. Disposing a unit that
    /// is not loaded is a no-op.
    pub fn dispose(&self, id: &str, is_cleanup: bool) -> Result<Teardown, RuntimeError> {
        let reason = if is_cleanup {
            DisposeReason::Cleanup
        } else {
            DisposeReason::Unload
        };
        self.dispose_unit(id, reason, None).inspect_err(|err| {
            self.reject(id, err);
        })
    }

    /// Dispose `id` outside cleanup
    pub fn unload(&self, id: &str) -> Result<Teardown, RuntimeError> {
        self.dispose(id, false)
    }

    /// `root` is the path of the unit whose disposal started the cascade;
    /// `None` for the unit itself.
    fn dispose_unit(
        &self,
        id: &str,
        reason: DisposeReason,
        root: Option<&str>,
    ) -> Result<Teardown, RuntimeError> {
        let path = unit_path(id).to_string();
        let (remains, referents, path_shared, keep_values) = {
            let mut registry = self.registry();
            let Some(unit) = registry.units.get_mut(id) else {
                return Ok(Teardown::new());
            };
            if unit.is_disposed() {
                return Ok(Teardown::new());
            }
            if unit.is_static() && reason.refuses_static() && root.is_none() {
                return Err(RuntimeError::StaticViolation {
                    id: id.to_string(),
                    action: "be disposed outside cleanup".to_string(),
                });
            }
            let remains = unit.take_remains();
            let parent = unit.parent().map(str::to_string);

            registry.units.remove(id);
            registry.order.retain(|other| other != id);
            if let Some(parent) = parent
                && let Some(owner) = registry.units.get_mut(&parent)
            {
                owner.remove_subunit(id);
            }
            if reason != DisposeReason::Reload {
                registry.owned_by.retain(|_, owner| owner != id);
            }

            let path_shared = registry.units.keys().any(|other| unit_path(other) == path);
            let referents = if reason.cascades() && !path_shared {
                registry.graph.referents(&path)
            } else {
                Vec::new()
            };
            // Only a unit that is coming back holds on to its kept values
            let keep_values = reason == DisposeReason::Reload
                && root.is_none_or(|root| registry.is_dangling(root, id));
            (remains, referents, path_shared, keep_values)
        };

        tracing::debug!(unit = %id, ?reason, "Disposing unit");

        let mut teardown = self.withdraw_services(&remains.services);

        for subscription in &remains.handlers {
            self.shared.handlers.revoke(subscription.id);
        }

        for callback in remains.callbacks {
            if let Err(e) = run_body(id, "dispose callback", || {
                callback();
                Ok(())
            }) {
                tracing::warn!(unit = %id, error = %e, "Dispose callback failed");
            }
        }

        if let Some(mut instance) = remains.instance
            && let Err(e) = run_body(id, "on_unload", || instance.on_unload())
        {
            tracing::warn!(unit = %id, error = %e, "Unit on_unload returned error");
        }

        if !keep_values {
            self.shared.keeps.clear(id);
        }

        let bucket = root.unwrap_or(&path);
        for subunit in remains.subunits {
            match self.dispose_unit(&subunit, reason.cascaded(), Some(bucket)) {
                Ok(more) => teardown.extend(more),
                Err(e) => tracing::warn!(unit = %subunit, error = %e, "Failed to dispose sub-unit"),
            }
        }

        for referent in referents {
            if referent == id {
                continue;
            }
            {
                let mut registry = self.registry();
                let requested = registry
                    .units
                    .get(&referent)
                    .filter(|unit| unit.is_requested() && !unit.is_disposed())
                    .map(|unit| unit.config().clone());
                if let Some(config) = requested {
                    registry.add_dangling(bucket, &referent, config);
                }
            }
            match self.dispose_unit(&referent, reason.cascaded(), Some(bucket)) {
                Ok(more) => teardown.extend(more),
                Err(e) => tracing::warn!(unit = %referent, error = %e, "Failed to dispose dependent"),
            }
        }

        if !path_shared {
            self.registry().graph.remove_outgoing(&path);
        }

        if reason != DisposeReason::Failed {
            tracing::info!(unit = %id, "Unit unloaded");
            self.publish(RuntimeEvent::Unloaded { id: id.to_string() });
        }
        Ok(teardown)
    }

    // ─── Enable / disable ────────────────────────────────────────────

    /// Withdraw `id`'s services and handlers, cascading to its sub-units and
    /// dependents. Idempotent.
    pub fn disable(&self, id: &str) -> Result<Teardown, RuntimeError> {
        self.disable_unit(id, true)
    }

    fn disable_unit(&self, id: &str, user: bool) -> Result<Teardown, RuntimeError> {
        let (subscriptions, services, cascade) = {
            let mut registry = self.registry();
            let referents = registry.graph.referents(unit_path(id));
            let unit = registry
                .units
                .get_mut(id)
                .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })?;
            if user {
                unit.set_user_disabled(true);
            }
            if unit.state() == UnitState::Disabled || unit.is_disposed() {
                return Ok(Teardown::new());
            }
            unit.set_state(UnitState::Disabled)?;
            let subscriptions = unit.suspend_handlers();
            let services = unit.services();
            let mut cascade: Vec<String> = unit.subunits().map(str::to_string).collect();
            cascade.extend(referents);
            (subscriptions, services, cascade)
        };

        for subscription in &subscriptions {
            self.shared.handlers.revoke(subscription.id);
        }
        let mut teardown = self.withdraw_services(&services);

        for other in cascade {
            if other == id {
                continue;
            }
            match self.disable_unit(&other, false) {
                Ok(more) => teardown.extend(more),
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(unit = %other, error = %e, "Failed to disable dependent"),
            }
        }

        tracing::info!(unit = %id, "Unit disabled");
        self.publish(RuntimeEvent::Disabled { id: id.to_string() });
        Ok(teardown)
    }

    /// Bring `id` back, re-registering its handlers and services, and enable
    /// sub-units and dependents that were not disabled on purpose. Idempotent.
    pub fn enable(&self, id: &str) -> Result<(), RuntimeError> {
        self.enable_unit(id, true)
    }

    fn enable_unit(&self, id: &str, user: bool) -> Result<(), RuntimeError> {
        let (handlers, services, cascade, phase, apply) = {
            let mut registry = self.registry();
            let phase = registry.phase;
            let referents = registry.graph.referents(unit_path(id));
            let unit = registry
                .units
                .get_mut(id)
                .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })?;
            if user {
                unit.set_user_disabled(false);
            } else if unit.is_user_disabled() {
                return Ok(());
            }
            if unit.state() != UnitState::Disabled {
                return Ok(());
            }
            let next = unit.enabled_state();
            unit.set_state(next)?;
            let apply = unit.needs_apply().then(|| {
                unit.metadata()
                    .map(|m| m.depend_services.clone())
                    .unwrap_or_default()
            });
            let mut cascade: Vec<String> = unit.subunits().map(str::to_string).collect();
            cascade.extend(referents);
            (
                unit.take_suspended_handlers(),
                unit.services(),
                cascade,
                phase,
                apply,
            )
        };

        for (event_type, name) in handlers {
            if let Err(e) = self.register_handler_for(id, &event_type, &name) {
                tracing::warn!(unit = %id, error = %e, "Failed to restore handler");
            }
        }

        if phase == Phase::Serving {
            self.start_services(&services);
            if let Some(depend_services) = apply {
                self.schedule_apply(id, depend_services);
            }
        }

        for other in cascade {
            if other == id {
                continue;
            }
            match self.enable_unit(&other, false) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(unit = %other, error = %e, "Failed to enable dependent"),
            }
        }

        tracing::info!(unit = %id, "Unit enabled");
        self.publish(RuntimeEvent::Enabled { id: id.to_string() });
        Ok(())
    }

    // ─── Services ────────────────────────────────────────────────────

    pub(crate) fn start_services(&self, services: &[Arc<dyn Service>]) {
        for service in services {
            match self.shared.orchestrator.add_component(service.clone()) {
                Ok(()) => self.shared.waiters.assign(service.id()),
                Err(e) => {
                    tracing::error!(service = %service.id(), error = %e, "Failed to start service")
                }
            }
        }
    }

    fn withdraw_services(&self, services: &[Arc<dyn Service>]) -> Teardown {
        let mut teardown = Teardown::new();
        for service in services {
            self.shared.waiters.clear(service.id());
            if let Some(handle) = self.shared.orchestrator.remove_component(service.id()) {
                teardown.push(handle);
            }
        }
        teardown
    }

    // ─── Phases ──────────────────────────────────────────────────────

    /// Enter the serving phase: apply deferred bodies, start services, wait
    /// for the orchestrator, then publish `Ready`.
    pub async fn serve(&self) {
        let (pending, services) = {
            let mut registry = self.registry();
            if registry.phase != Phase::Preparing {
                return;
            }
            registry.phase = Phase::Serving;
            let mut pending = Vec::new();
            let mut services = Vec::new();
            for id in &registry.order {
                let Some(unit) = registry.units.get(id) else {
                    continue;
                };
                if unit.state() == UnitState::Disabled {
                    continue;
                }
                services.extend(unit.services());
                if unit.needs_apply() {
                    let depend_services = unit
                        .metadata()
                        .map(|m| m.depend_services.clone())
                        .unwrap_or_default();
                    pending.push((id.clone(), depend_services));
                }
            }
            (pending, services)
        };

        for (id, depend_services) in pending {
            self.schedule_apply(&id, depend_services);
        }
        self.start_services(&services);
        self.shared
            .orchestrator
            .wait_for_phase(OrchestratorPhase::Prepared)
            .await;

        tracing::info!("Runtime ready");
        self.publish(RuntimeEvent::Ready);
    }

    /// Dispose every unit in reverse load order and stop all services
    pub async fn cleanup(&self) {
        let order: Vec<String> = {
            let mut registry = self.registry();
            if matches!(registry.phase, Phase::Cleanup | Phase::Stopped) {
                return;
            }
            registry.phase = Phase::Cleanup;
            registry
                .order
                .iter()
                .rev()
                .filter(|id| registry.units.get(*id).is_some_and(|u| u.parent().is_none()))
                .cloned()
                .collect()
        };

        tracing::info!(units = order.len(), "Runtime cleanup");
        self.publish(RuntimeEvent::Cleanup);

        let mut teardown = Teardown::new();
        for id in order {
            match self.dispose_unit(&id, DisposeReason::Cleanup, None) {
                Ok(more) => teardown.extend(more),
                Err(e) => tracing::warn!(unit = %id, error = %e, "Failed to dispose unit"),
            }
        }

        self.shared.waiters.clear_all();
        // Dependents still waiting on a dependency that never returned
        self.shared.keeps.clear_all();
        self.shared.orchestrator.shutdown();
        teardown.extend(std::mem::take(
            &mut *self
                .shared
                .teardown
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        ));
        teardown.wait().await;
        self.shared
            .orchestrator
            .wait_for_phase(OrchestratorPhase::Finished)
            .await;

        {
            let mut registry = self.registry();
            registry.phase = Phase::Stopped;
            registry.graph.clear();
            registry.dangling.clear();
        }
        tracing::info!("Runtime stopped");
        self.publish(RuntimeEvent::Stopped);
    }

    /// Load the configured units, serve until `shutdown` fires, then clean up
    pub async fn run(&self, shutdown: CancellationToken) -> LoadReport {
        let report = self.load_configured();
        self.serve().await;

        let listener = self.spawn_config_listener(shutdown.child_token());
        shutdown.cancelled().await;
        tracing::info!("Shutdown requested");
        if let Err(e) = listener.await {
            tracing::warn!(error = %e, "Config listener ended abnormally");
        }

        self.cleanup().await;
        report
    }

    // ─── Config changes ──────────────────────────────────────────────

    /// Apply one config change to the loaded units
    pub fn handle_config_change(&self, change: &ConfigReload) {
        match change {
            ConfigReload::Basic { key, .. } => {
                tracing::debug!(key = %key, "Basic config changed");
            }
            ConfigReload::Plugin {
                key,
                value: Some(config),
            } => {
                let current = self.registry().units.get(key).map(|u| u.config().clone());
                let result = match current {
                    Some(current) if &current == config => return,
                    Some(_) => {
                        tracing::info!(unit = %key, "Config changed, reloading unit");
                        self.load_unit(key, config.clone(), Origin::Requested)
                    }
                    None => {
                        tracing::info!(unit = %key, "Unit added to config");
                        self.load_unit(key, config.clone(), Origin::Requested)
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(unit = %key, error = %e, "Config-driven load failed");
                }
            }
            ConfigReload::Plugin { key, value: None } => {
                if !self.is_loaded(key) {
                    return;
                }
                tracing::info!(unit = %key, "Unit removed from config");
                match self.dispose(key, false) {
                    Ok(teardown) => self.defer_teardown(teardown),
                    Err(e) => tracing::debug!(unit = %key, error = %e, "Config-driven unload failed"),
                }
            }
        }
    }

    /// Follow the config store until `shutdown` fires
    pub fn spawn_config_listener(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.shared.config.subscribe();
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(change) => manager.handle_config_change(&change),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!(missed, "Config listener lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Receive watch registrations made from now on
    pub(crate) fn subscribe_watch_requests(&self) -> mpsc::UnboundedReceiver<WatchRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.watch_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }
}

/// Run a unit body with panic isolation
pub(crate) fn run_body<F>(id: &str, stage: &str, body: F) -> Result<(), PluginError>
where
    F: FnOnce() -> Result<(), PluginError>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(unit = %id, stage, panic = %message, "Unit panicked");
            Err(PluginError::custom(format!("panicked in {stage}: {message}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("PluginManager")
            .field("phase", &registry.phase)
            .field("units", &registry.order)
            .finish_non_exhaustive()
    }
}
