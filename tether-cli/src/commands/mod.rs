pub mod check;
pub mod config;
pub mod run;
pub mod units;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tether_core::{ConfigStore, PluginManager};

use crate::builtins;

/// Open the config store at `path`; a missing file gives the defaults
pub(crate) fn open_config(path: &Path) -> Result<Arc<ConfigStore>> {
    let store = ConfigStore::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Manager over the built-in catalog and the given config
pub(crate) fn build_manager(config: Arc<ConfigStore>) -> PluginManager {
    PluginManager::builder(builtins::catalog())
        .config(config)
        .build()
}
