//! Unit lifecycle tests for PluginManager
//!
//! These tests drive the manager through its public API only:
//! - reload disposes the previous instance exactly once
//! - disposal cascades to dependents, requested dependents come back
//! - disable/enable cascade and are idempotent
//! - static and reusable units keep their restrictions

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tether_core::{
    ConfigStore, FnPlugin, HostConfig, PluginCatalog, PluginManager, RuntimeError, UnitState,
};
use tether_plugin_api::{PluginError, PluginMetadata};

fn meta(name: &str) -> PluginMetadata {
    PluginMetadata::new(name)
}

fn plain(catalog: &mut PluginCatalog, name: &str) {
    catalog.register_fn(name, FnPlugin::new(meta(name), |_| Ok(())));
}

fn requires(catalog: &mut PluginCatalog, name: &str, dependency: &'static str) {
    catalog.register_fn(
        name,
        FnPlugin::new(meta(name), move |ctx| {
            ctx.require(dependency)?;
            Ok(())
        }),
    );
}

fn event_kinds(manager: &PluginManager) -> Vec<String> {
    manager
        .events()
        .events_from(0)
        .into_iter()
        .map(|(_, event)| match event.unit_id() {
            Some(id) => format!("{}:{id}", event.kind()),
            None => event.kind().to_string(),
        })
        .collect()
}

#[test]
fn loading_twice_keeps_one_instance_and_disposes_the_first() {
    let loads = Arc::new(AtomicUsize::new(0));
    let disposed = Arc::new(AtomicUsize::new(0));

    let mut catalog = PluginCatalog::new();
    catalog.register_fn("a", {
        let loads = loads.clone();
        let disposed = disposed.clone();
        FnPlugin::new(meta("a"), move |ctx| {
            loads.fetch_add(1, Ordering::SeqCst);
            let disposed = disposed.clone();
            ctx.on_dispose(move || {
                disposed.fetch_add(1, Ordering::SeqCst);
            })
        })
    });
    let manager = PluginManager::new(catalog);

    manager.load("a").unwrap();
    manager.load("a").unwrap();

    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert_eq!(manager.units().len(), 1);
    assert_eq!(manager.state("a"), Some(UnitState::Available));
}

#[test]
fn dispose_callbacks_run_in_registration_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut catalog = PluginCatalog::new();
    catalog.register_fn("a", {
        let order = order.clone();
        FnPlugin::new(meta("a"), move |ctx| {
            for step in 1..=3 {
                let order = order.clone();
                ctx.on_dispose(move || order.lock().unwrap().push(step))?;
            }
            Ok(())
        })
    });
    let manager = PluginManager::new(catalog);

    manager.load("a").unwrap();
    manager.unload("a").unwrap().detach();
    manager.unload("a").unwrap().detach();

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn disposing_a_dependency_disposes_its_dependents() {
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "b");
    requires(&mut catalog, "a", "b");
    let manager = PluginManager::new(catalog);

    manager.load("b").unwrap();
    manager.load("a").unwrap();
    assert_eq!(manager.referents("b"), vec!["a".to_string()]);

    manager.unload("b").unwrap().detach();
    assert!(!manager.is_loaded("b"));
    assert!(!manager.is_loaded("a"));
    assert_eq!(manager.dangling("b"), vec!["a".to_string()]);

    // a was requested, so it is retried once b is back
    manager.load("b").unwrap();
    assert_eq!(manager.state("a"), Some(UnitState::Available));
    assert_eq!(manager.referents("b"), vec!["a".to_string()]);
    assert!(manager.dangling("b").is_empty());
}

#[test]
fn only_requested_dependents_are_retried() {
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "b");
    requires(&mut catalog, "a", "b");
    requires(&mut catalog, "c", "a");
    let manager = PluginManager::new(catalog);

    // a and b are materialized for c
    manager.load("c").unwrap();
    assert!(!manager.get("a").unwrap().requested);

    manager.unload("b").unwrap().detach();
    assert!(manager.units().is_empty());
    assert_eq!(manager.dangling("b"), vec!["c".to_string()]);

    manager.load("b").unwrap();
    assert!(manager.is_loaded("c"));
    assert!(manager.is_loaded("a"));
    assert_eq!(manager.referents("a"), vec!["c".to_string()]);
}

#[test]
fn failed_retry_is_dropped() {
    let allow = Arc::new(AtomicUsize::new(1));
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "b");
    catalog.register_fn("a", {
        let allow = allow.clone();
        FnPlugin::new(meta("a"), move |ctx| {
            ctx.require("b")?;
            if allow.load(Ordering::SeqCst) == 0 {
                return Err(PluginError::custom("not today"));
            }
            Ok(())
        })
    });
    let manager = PluginManager::new(catalog);

    manager.load("a").unwrap();
    manager.unload("b").unwrap().detach();
    allow.store(0, Ordering::SeqCst);

    manager.load("b").unwrap();
    assert!(!manager.is_loaded("a"));
    assert!(manager.dangling("b").is_empty());

    // Not retried a second time
    allow.store(1, Ordering::SeqCst);
    manager.reload("b").unwrap();
    assert!(!manager.is_loaded("a"));
}

#[test]
fn configured_pair_scenario() {
    let config = HostConfig::parse(
        r#"
        [plugins.A]
        [plugins.B]
        "#,
    )
    .unwrap();
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "A");
    requires(&mut catalog, "B", "A");
    let manager = PluginManager::builder(catalog)
        .config(Arc::new(ConfigStore::new(config)))
        .build();

    let report = manager.load_configured();
    assert_eq!(report.loaded, vec!["A".to_string(), "B".to_string()]);
    assert_eq!(manager.referents("A"), vec!["B".to_string()]);

    manager.dispose("A", false).unwrap().detach();
    assert!(!manager.is_loaded("B"));

    manager.load("A").unwrap();
    manager.load("B").unwrap();
    assert_eq!(manager.state("A"), Some(UnitState::Available));
    assert_eq!(manager.state("B"), Some(UnitState::Available));
    assert_eq!(manager.referents("A"), vec!["B".to_string()]);
}

#[test]
fn disable_cascades_and_is_idempotent() {
    let mut catalog = PluginCatalog::new();
    catalog.register_fn(
        "owner",
        FnPlugin::new(meta("owner"), |ctx| {
            ctx.declare_subunit("owner.child")?;
            ctx.require("owner.child")?;
            Ok(())
        }),
    );
    plain(&mut catalog, "owner.child");
    requires(&mut catalog, "user", "owner");
    let manager = PluginManager::new(catalog);
    manager.load("user").unwrap();

    manager.disable("owner").unwrap().detach();
    for id in ["owner", "owner.child", "user"] {
        assert_eq!(manager.state(id), Some(UnitState::Disabled), "{id}");
    }
    let disabled_events = |m: &PluginManager| {
        event_kinds(m)
            .iter()
            .filter(|k| k.starts_with("disabled:"))
            .count()
    };
    assert_eq!(disabled_events(&manager), 3);

    manager.disable("owner").unwrap().detach();
    assert_eq!(disabled_events(&manager), 3);

    manager.enable("owner").unwrap();
    manager.enable("owner").unwrap();
    for id in ["owner", "owner.child", "user"] {
        assert_eq!(manager.state(id), Some(UnitState::Available), "{id}");
    }
}

#[test]
fn enable_skips_units_disabled_on_purpose() {
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "b");
    requires(&mut catalog, "a", "b");
    let manager = PluginManager::new(catalog);
    manager.load("a").unwrap();

    manager.disable("a").unwrap().detach();
    manager.disable("b").unwrap().detach();
    manager.enable("b").unwrap();

    assert_eq!(manager.state("b"), Some(UnitState::Available));
    assert_eq!(manager.state("a"), Some(UnitState::Disabled));
    assert!(manager.get("a").unwrap().user_disabled);
}

#[test]
fn disable_flag_in_config_loads_disabled() {
    let config = HostConfig::parse(
        r#"
        [plugins.quiet]
        "$disable" = true
        "#,
    )
    .unwrap();
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "quiet");
    let manager = PluginManager::builder(catalog)
        .config(Arc::new(ConfigStore::new(config)))
        .build();

    manager.load_configured();
    assert_eq!(manager.state("quiet"), Some(UnitState::Disabled));
    assert!(manager.get("quiet").unwrap().user_disabled);
}

#[test]
fn static_unit_registering_a_handler_is_rejected() {
    let mut catalog = PluginCatalog::new();
    catalog.register_fn(
        "settings",
        FnPlugin::new(meta("settings").static_unit(), |ctx| {
            ctx.dispatch("message", "reply")?;
            Ok(())
        }),
    );
    let manager = PluginManager::new(catalog);

    let err = manager.load("settings").unwrap_err();
    assert!(matches!(err, RuntimeError::StaticViolation { .. }));
    assert!(!manager.is_loaded("settings"));
    assert!(event_kinds(&manager).contains(&"load_failed:settings".to_string()));
}

#[tokio::test]
async fn static_unit_refuses_unload_outside_cleanup() {
    let mut catalog = PluginCatalog::new();
    catalog.register_fn(
        "settings",
        FnPlugin::new(meta("settings").static_unit(), |_| Ok(())),
    );
    let manager = PluginManager::new(catalog);
    manager.load("settings").unwrap();

    let err = manager.unload("settings").unwrap_err();
    assert!(matches!(err, RuntimeError::StaticViolation { .. }));
    assert!(manager.reload("settings").is_err());
    assert!(manager.is_loaded("settings"));
    assert!(event_kinds(&manager).contains(&"rejected:settings".to_string()));

    manager.cleanup().await;
    assert!(!manager.is_loaded("settings"));
}

#[test]
fn config_static_flag_makes_unit_static() {
    let mut config = HostConfig::default();
    let mut unit = tether_plugin_api::PluginConfig::new();
    unit.meta_mut().is_static = true;
    config.set_plugin("frozen", unit);

    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "frozen");
    let manager = PluginManager::builder(catalog)
        .config(Arc::new(ConfigStore::new(config)))
        .build();

    manager.load_configured();
    assert!(manager.get("frozen").unwrap().is_static);
    assert!(manager.unload("frozen").is_err());
}

#[test]
fn instance_ids_require_reusable_units() {
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "solo");
    catalog.register_fn(
        "echo",
        FnPlugin::new(meta("echo").reusable(), |_| Ok(())),
    );
    let manager = PluginManager::new(catalog);

    assert!(manager.load("solo#1").is_err());
    manager.load("echo#1").unwrap();
    manager.load("echo#2").unwrap();
    assert_eq!(manager.get("echo#2").unwrap().path, "echo");
}

#[test]
fn instances_share_a_dependency_bucket() {
    let mut catalog = PluginCatalog::new();
    catalog.register_fn(
        "echo",
        FnPlugin::new(meta("echo").reusable(), |_| Ok(())),
    );
    requires(&mut catalog, "listener", "echo#1");
    let manager = PluginManager::new(catalog);

    manager.load("echo#1").unwrap();
    manager.load("echo#2").unwrap();
    manager.load("listener").unwrap();
    assert_eq!(manager.referents("echo"), vec!["listener".to_string()]);

    // Another instance still lives at the path, so nothing cascades
    manager.unload("echo#2").unwrap().detach();
    assert!(manager.is_loaded("listener"));
}

#[test]
fn kept_values_survive_reload_only() {
    let released = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(AtomicUsize::new(0));
    let mut catalog = PluginCatalog::new();
    catalog.register_fn("counter", {
        let released = released.clone();
        let seen = seen.clone();
        FnPlugin::new(meta("counter"), move |ctx| {
            let released = released.clone();
            let count = ctx.keep(
                "count",
                || AtomicUsize::new(0),
                Some(Box::new(move |_: Arc<AtomicUsize>| {
                    released.fetch_add(1, Ordering::SeqCst);
                })),
            )?;
            seen.store(count.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
            Ok(())
        })
    });
    let manager = PluginManager::new(catalog);

    manager.load("counter").unwrap();
    manager.reload("counter").unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(released.load(Ordering::SeqCst), 0);

    manager.unload("counter").unwrap().detach();
    assert_eq!(released.load(Ordering::SeqCst), 1);

    manager.load("counter").unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

/// `lib` requires `a` and keeps a value, counting disposer runs in `released`
fn keeping_lib(catalog: &mut PluginCatalog, released: &Arc<AtomicUsize>) {
    catalog.register_fn("lib", {
        let released = released.clone();
        FnPlugin::new(meta("lib"), move |ctx| {
            ctx.require("a")?;
            let released = released.clone();
            ctx.keep(
                "cache",
                || AtomicUsize::new(0),
                Some(Box::new(move |_: Arc<AtomicUsize>| {
                    released.fetch_add(1, Ordering::SeqCst);
                })),
            )?;
            Ok(())
        })
    });
}

#[tokio::test]
async fn reload_releases_kept_values_of_dependents_that_do_not_return() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "a");
    keeping_lib(&mut catalog, &released);
    requires(&mut catalog, "top", "lib");
    let manager = PluginManager::new(catalog);

    manager.load("top").unwrap();
    manager.unload("top").unwrap().detach();
    assert!(manager.is_loaded("lib"));

    // lib was only resolved for top, so it is not retried
    manager.load("a").unwrap();
    assert!(!manager.is_loaded("lib"));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    manager.cleanup().await;
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn requested_dependent_keeps_values_across_dependency_reload() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "a");
    keeping_lib(&mut catalog, &released);
    let manager = PluginManager::new(catalog);

    manager.load("lib").unwrap();
    manager.load("a").unwrap();
    assert_eq!(manager.state("lib"), Some(UnitState::Available));
    assert_eq!(released.load(Ordering::SeqCst), 0);

    manager.cleanup().await;
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleanup_releases_values_of_dependents_still_waiting() {
    let released = Arc::new(AtomicUsize::new(0));
    let broken = Arc::new(AtomicUsize::new(0));
    let mut catalog = PluginCatalog::new();
    catalog.register_fn("a", {
        let broken = broken.clone();
        FnPlugin::new(meta("a"), move |_| {
            if broken.load(Ordering::SeqCst) == 1 {
                return Err(PluginError::custom("gone"));
            }
            Ok(())
        })
    });
    keeping_lib(&mut catalog, &released);
    let manager = PluginManager::new(catalog);

    manager.load("lib").unwrap();
    broken.store(1, Ordering::SeqCst);
    assert!(manager.load("a").is_err());
    assert_eq!(manager.dangling("a"), vec!["lib".to_string()]);
    assert_eq!(released.load(Ordering::SeqCst), 0);

    manager.cleanup().await;
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn reloading_a_dependency_brings_requested_dependents_back() {
    let disposed = Arc::new(AtomicUsize::new(0));
    let mut catalog = PluginCatalog::new();
    plain(&mut catalog, "a");
    catalog.register_fn("b", {
        let disposed = disposed.clone();
        FnPlugin::new(meta("b"), move |ctx| {
            ctx.require("a")?;
            let disposed = disposed.clone();
            ctx.on_dispose(move || {
                disposed.fetch_add(1, Ordering::SeqCst);
            })
        })
    });
    let manager = PluginManager::new(catalog);

    manager.load("a").unwrap();
    manager.load("b").unwrap();
    assert_eq!(manager.referents("a"), vec!["b".to_string()]);

    manager.load("a").unwrap();

    assert_eq!(manager.state("a"), Some(UnitState::Available));
    assert_eq!(manager.state("b"), Some(UnitState::Available));
    assert_eq!(manager.referents("a"), vec!["b".to_string()]);
    assert!(manager.dangling("a").is_empty());
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert_eq!(
        event_kinds(&manager),
        vec![
            "loaded:a",
            "loaded:b",
            "unloaded:b",
            "unloaded:a",
            "loaded:a",
            "loaded:b",
        ]
    );
}

#[test]
fn panicking_body_is_isolated() {
    let mut catalog = PluginCatalog::new();
    catalog.register_fn(
        "boom",
        FnPlugin::new(meta("boom"), |_| panic!("kaboom")),
    );
    plain(&mut catalog, "fine");
    let manager = PluginManager::new(catalog);

    let err = manager.load("boom").unwrap_err();
    assert!(matches!(err, RuntimeError::LoadFailed { .. }));
    assert!(err.to_string().contains("kaboom"));
    assert!(!manager.is_loaded("boom"));

    manager.load("fine").unwrap();
    assert_eq!(
        event_kinds(&manager),
        vec!["load_failed:boom".to_string(), "loaded:fine".to_string()]
    );
}

#[test]
fn failed_reload_leaves_id_absent() {
    let fail = Arc::new(AtomicUsize::new(0));
    let mut catalog = PluginCatalog::new();
    catalog.register_fn("flaky", {
        let fail = fail.clone();
        FnPlugin::new(meta("flaky"), move |_| {
            if fail.load(Ordering::SeqCst) == 1 {
                return Err(PluginError::config("broken config"));
            }
            Ok(())
        })
    });
    let manager = PluginManager::new(catalog);

    manager.load("flaky").unwrap();
    fail.store(1, Ordering::SeqCst);
    assert!(manager.reload("flaky").is_err());
    assert!(!manager.is_loaded("flaky"));
    assert_eq!(
        event_kinds(&manager),
        vec![
            "loaded:flaky".to_string(),
            "unloaded:flaky".to_string(),
            "load_failed:flaky".to_string(),
        ]
    );
}

#[test]
fn unknown_unit_is_reported() {
    let manager = PluginManager::new(PluginCatalog::new());
    let err = manager.load("ghost").unwrap_err();
    assert!(err.is_not_found());
    assert!(manager.unload("ghost").is_ok());
    assert!(manager.disable("ghost").unwrap_err().is_not_found());
}
