//! Units compiled into the `tether` binary

mod echo;
mod greeter;
mod settings;
mod storage;
mod ticker;

use tether_core::PluginCatalog;

/// Catalog of every built-in unit
pub fn catalog() -> PluginCatalog {
    let mut catalog = PluginCatalog::new();
    catalog
        .register::<echo::Echo>("echo")
        .register::<greeter::Greeter>("greeter")
        .register::<settings::Settings>("settings")
        .register::<storage::StorageUnit>("storage")
        .register::<ticker::TickerUnit>("ticker");
    catalog
}

#[cfg(test)]
mod tests {
    use super::storage::Storage;
    use super::*;
    use tether_core::{PluginManager, UnitState};

    #[test]
    fn test_catalog_names() {
        let catalog = catalog();
        assert_eq!(
            catalog.names().collect::<Vec<_>>(),
            vec!["echo", "greeter", "settings", "storage", "ticker"]
        );
    }

    #[test]
    fn test_greeter_pulls_in_storage() {
        let manager = PluginManager::new(catalog());
        manager.load("greeter").unwrap();

        assert_eq!(manager.state("storage"), Some(UnitState::Available));
        assert_eq!(manager.referents("storage"), vec!["greeter".to_string()]);
    }

    #[test]
    fn test_storage_survives_reload() {
        let manager = PluginManager::new(catalog());
        manager.load("greeter").unwrap();
        manager.reload("storage").unwrap();

        // greeter was requested, so it came back once storage did
        assert!(manager.is_loaded("greeter"));
        let storage = manager
            .unit_ref("storage")
            .and_then(|unit| unit.exports::<Storage>())
            .unwrap();
        assert_eq!(storage.get("greeter.loads").as_deref(), Some("2"));
    }

    #[test]
    fn test_echo_instances() {
        let manager = PluginManager::new(catalog());
        manager.load("echo#general").unwrap();
        manager.load("echo#random").unwrap();
        assert_eq!(manager.units().len(), 2);
    }

    #[tokio::test]
    async fn test_ticker_runs_while_serving() {
        let manager = PluginManager::new(catalog());
        manager.load("ticker").unwrap();
        manager.serve().await;
        assert!(manager.waiters().is_ready("ticker"));
        manager.cleanup().await;
        assert!(!manager.waiters().is_ready("ticker"));
    }
}
