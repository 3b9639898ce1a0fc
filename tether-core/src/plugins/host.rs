//! RuntimeHost - the manager side of every `UnitContext`
//!
//! Contexts outlive nothing: they hold a weak reference to the runtime, so a
//! service that keeps its context after the manager is dropped gets
//! `PluginError::Disposed` instead of keeping the registry alive.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tether_plugin_api::{
    DisposeCallback, Exports, KeepDisposer, KeepInit, Kept, PluginConfig, PluginError, Service,
    Subscription, UnitHost, UnitRef, WaitFuture, WaitOutcome,
};

use super::manager::{Origin, PluginManager, Shared};
use super::state::{Phase, UnitState};
use super::watcher::WatchRequest;

const RUNTIME: &str = "runtime";

pub(crate) struct RuntimeHost {
    shared: Weak<Shared>,
}

impl RuntimeHost {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    fn manager(&self) -> Result<PluginManager, PluginError> {
        self.shared
            .upgrade()
            .map(|shared| PluginManager { shared })
            .ok_or_else(|| PluginError::Disposed(RUNTIME.to_string()))
    }
}

impl PluginManager {
    /// Register a handler on the bus and attach it to `id`.
    ///
    /// Static units may not own handlers: the attempt is recorded on the unit
    /// and fails its load even if the body ignores the error.
    pub(crate) fn register_handler_for(
        &self,
        id: &str,
        event_type: &str,
        name: &str,
    ) -> Result<Subscription, PluginError> {
        {
            let mut registry = self.registry();
            let unit = registry
                .units
                .get_mut(id)
                .ok_or_else(|| PluginError::Disposed(id.to_string()))?;
            if unit.is_static() {
                let violation = || PluginError::StaticViolation {
                    unit: id.to_string(),
                    action: format!("register handler '{name}' for '{event_type}'"),
                };
                tracing::warn!(unit = %id, event_type = %event_type, handler = %name, "Static unit tried to register a handler");
                unit.record_violation(violation());
                return Err(violation());
            }
        }

        let handler_id = self.shared.handlers.register(id, event_type, name);
        let subscription = Subscription {
            id: handler_id,
            event_type: event_type.to_string(),
            name: name.to_string(),
        };

        let attached = {
            let mut registry = self.registry();
            match registry.units.get_mut(id) {
                Some(unit) if !unit.is_disposed() => {
                    unit.add_handler(subscription.clone());
                    true
                }
                _ => false,
            }
        };
        if !attached {
            self.shared.handlers.revoke(handler_id);
            return Err(PluginError::Disposed(id.to_string()));
        }
        Ok(subscription)
    }
}

impl UnitHost for RuntimeHost {
    fn resolve(&self, requester: &str, name: &str) -> Result<Option<UnitRef>, PluginError> {
        Ok(self.manager()?.resolve_for(requester, name)?)
    }

    fn declare_subunit(&self, owner: &str, name: &str) -> Result<(), PluginError> {
        let manager = self.manager()?;
        let mut registry = manager.registry();
        let unit = registry
            .units
            .get_mut(owner)
            .ok_or_else(|| PluginError::Disposed(owner.to_string()))?;
        unit.declare_subunit(name);
        registry
            .owned_by
            .insert(name.to_string(), owner.to_string());
        tracing::debug!(unit = %owner, subunit = %name, "Sub-unit declared");
        Ok(())
    }

    fn load_subunit(
        &self,
        owner: &str,
        name: &str,
        config: PluginConfig,
    ) -> Result<UnitRef, PluginError> {
        let manager = self.manager()?;
        if !manager.is_loaded(owner) {
            return Err(PluginError::Disposed(owner.to_string()));
        }
        Ok(manager.load_unit(name, config, Origin::Subunit(owner.to_string()))?)
    }

    fn export(&self, unit: &str, exports: Exports) -> Result<(), PluginError> {
        let manager = self.manager()?;
        let mut registry = manager.registry();
        registry
            .units
            .get_mut(unit)
            .ok_or_else(|| PluginError::Disposed(unit.to_string()))?
            .set_exports(exports);
        Ok(())
    }

    fn add_service(&self, unit: &str, service: Arc<dyn Service>) -> Result<(), PluginError> {
        let manager = self.manager()?;
        let start = {
            let mut registry = manager.registry();
            let serving = registry.phase == Phase::Serving;
            let entry = registry
                .units
                .get_mut(unit)
                .ok_or_else(|| PluginError::Disposed(unit.to_string()))?;
            entry.add_service(service.clone())?;
            serving && entry.state() != UnitState::Disabled
        };
        tracing::debug!(unit = %unit, service = %service.id(), "Service registered");
        if start {
            manager.start_services(&[service]);
        }
        Ok(())
    }

    fn on_dispose(&self, unit: &str, callback: DisposeCallback) -> Result<(), PluginError> {
        let manager = self.manager()?;
        let mut registry = manager.registry();
        registry
            .units
            .get_mut(unit)
            .ok_or_else(|| PluginError::Disposed(unit.to_string()))?
            .add_dispose_callback(callback);
        Ok(())
    }

    fn register_handler(
        &self,
        unit: &str,
        event_type: &str,
        name: &str,
    ) -> Result<Subscription, PluginError> {
        self.manager()?.register_handler_for(unit, event_type, name)
    }

    fn keep(
        &self,
        unit: &str,
        key: &str,
        init: KeepInit,
        disposer: Option<KeepDisposer>,
    ) -> Result<Kept, PluginError> {
        let manager = self.manager()?;
        if !manager.is_loaded(unit) {
            return Err(PluginError::Disposed(unit.to_string()));
        }
        Ok(manager.shared.keeps.get_or_init(unit, key, init, disposer))
    }

    fn watch_path(&self, unit: &str, path: PathBuf) -> Result<(), PluginError> {
        let manager = self.manager()?;
        {
            let mut registry = manager.registry();
            registry
                .units
                .get_mut(unit)
                .ok_or_else(|| PluginError::Disposed(unit.to_string()))?
                .add_watch_path(path.clone());
        }
        let tx = manager
            .shared
            .watch_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(tx) = tx {
            let request = WatchRequest {
                unit: unit.to_string(),
                path,
            };
            if tx.send(request).is_err() {
                tracing::debug!(unit = %unit, "Watcher is gone, path not watched");
            }
        }
        Ok(())
    }

    fn wait_for(&self, resource: &str) -> WaitFuture {
        match self.shared.upgrade() {
            Some(shared) => Box::pin(shared.waiters.wait_for(resource)),
            None => Box::pin(async { WaitOutcome::Withdrawn }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::catalog::{FnPlugin, PluginCatalog};
    use crate::plugins::error::RuntimeError;
    use crate::plugins::testing::TestService;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_plugin_api::PluginMetadata;

    #[test]
    fn test_static_handler_fails_load_even_if_swallowed() {
        let mut catalog = PluginCatalog::new();
        catalog.register_fn(
            "settings",
            FnPlugin::new(PluginMetadata::new("settings").static_unit(), |ctx| {
                let _ = ctx.dispatch("message", "sneaky");
                Ok(())
            }),
        );
        let manager = PluginManager::new(catalog);

        let err = manager.load("settings").unwrap_err();
        assert!(matches!(err, RuntimeError::StaticViolation { .. }));
        assert!(!manager.is_loaded("settings"));
    }

    #[test]
    fn test_reusable_service_is_rejected_synchronously() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = seen.clone();
        let mut catalog = PluginCatalog::new();
        catalog.register_fn(
            "echo",
            FnPlugin::new(PluginMetadata::new("echo").reusable(), move |ctx| {
                let err = ctx
                    .service(Arc::new(TestService::new("poller")))
                    .unwrap_err();
                assert!(matches!(err, PluginError::ReusableViolation { .. }));
                sink.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        let manager = PluginManager::new(catalog);

        manager.load("echo#1").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(manager.get("echo#1").unwrap().services.is_empty());
    }

    #[test]
    fn test_context_after_dispose_is_rejected() {
        let kept = Arc::new(std::sync::Mutex::new(None));
        let sink = kept.clone();
        let mut catalog = PluginCatalog::new();
        catalog.register_fn(
            "feeds",
            FnPlugin::new(PluginMetadata::new("feeds"), move |ctx| {
                *sink.lock().unwrap() = Some(ctx.clone());
                Ok(())
            }),
        );
        let manager = PluginManager::new(catalog);
        manager.load("feeds").unwrap();
        manager.unload("feeds").unwrap().detach();

        let ctx = kept.lock().unwrap().take().unwrap();
        assert!(matches!(
            ctx.on_dispose(|| {}),
            Err(PluginError::Disposed(_))
        ));
    }

    #[test]
    fn test_context_after_manager_dropped() {
        let kept = Arc::new(std::sync::Mutex::new(None));
        let sink = kept.clone();
        let mut catalog = PluginCatalog::new();
        catalog.register_fn(
            "feeds",
            FnPlugin::new(PluginMetadata::new("feeds"), move |ctx| {
                *sink.lock().unwrap() = Some(ctx.clone());
                Ok(())
            }),
        );
        let manager = PluginManager::new(catalog);
        manager.load("feeds").unwrap();
        drop(manager);

        let ctx = kept.lock().unwrap().take().unwrap();
        assert!(matches!(ctx.resolve("feeds"), Err(PluginError::Disposed(_))));
    }

    #[tokio::test]
    async fn test_wait_for_after_manager_dropped_is_withdrawn() {
        let host = RuntimeHost::new(Weak::new());
        assert_eq!(host.wait_for("http").await, WaitOutcome::Withdrawn);
    }
}
