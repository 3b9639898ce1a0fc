//! Live configuration with change broadcast

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tether_plugin_api::PluginConfig;
use tokio::sync::broadcast;

use super::types::{BasicConfig, ConfigError, HostConfig};

/// One changed key, published after the store was updated
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigReload {
    /// A `[basic]` key changed; `None` means it was removed
    Basic {
        key: String,
        value: Option<toml::Value>,
    },
    /// A `[plugins.<key>]` table changed; `None` means it was removed
    Plugin {
        key: String,
        value: Option<PluginConfig>,
    },
}

impl ConfigReload {
    pub fn key(&self) -> &str {
        match self {
            ConfigReload::Basic { key, .. } | ConfigReload::Plugin { key, .. } => key,
        }
    }
}

/// Owner of the live [`HostConfig`]
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<HostConfig>,
    path: Option<PathBuf>,
    tx: broadcast::Sender<ConfigReload>,
}

impl ConfigStore {
    /// Store backed by an in-memory config
    pub fn new(config: HostConfig) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            current: RwLock::new(config),
            path: None,
            tx,
        }
    }

    /// Store backed by a file; a missing file yields the defaults
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = HostConfig::from_path(&path)?;
        tracing::debug!(path = %path.display(), "Config loaded");
        let mut store = Self::new(config);
        store.path = Some(path);
        Ok(store)
    }

    /// File this store reloads from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the current config
    pub fn snapshot(&self) -> HostConfig {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn basic(&self) -> BasicConfig {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .basic
            .clone()
    }

    /// Config of the unit configured under `key`
    pub fn plugin(&self, key: &str) -> Option<PluginConfig> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .plugin(key)
            .cloned()
    }

    pub fn contains_plugin(&self, key: &str) -> bool {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_plugin(key)
    }

    /// Whether `key` was disabled with the `~` prefix
    pub fn is_disabled(&self, key: &str) -> bool {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_disabled(key)
    }

    /// Configured unit keys in load order
    pub fn load_order(&self) -> Vec<String> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .load_order()
    }

    /// Subscribe to changes made from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigReload> {
        self.tx.subscribe()
    }

    /// Replace the config, broadcasting one [`ConfigReload`] per changed key.
    ///
    /// Basic keys are announced before plugin keys.
    pub fn update(&self, next: HostConfig) -> Vec<ConfigReload> {
        let changes = {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            let changes = diff(&current, &next);
            *current = next;
            changes
        };
        for change in &changes {
            tracing::debug!(key = %change.key(), "Config changed");
            let _ = self.tx.send(change.clone());
        }
        changes
    }

    /// Set or remove a single unit's config
    pub fn set_plugin(&self, key: &str, config: Option<PluginConfig>) -> Vec<ConfigReload> {
        let mut next = self.snapshot();
        match config {
            Some(config) => next.set_plugin(key, config),
            None => {
                next.remove_plugin(key);
            }
        }
        self.update(next)
    }

    /// Re-read the backing file and apply it
    pub fn reload_file(&self) -> Result<Vec<ConfigReload>, ConfigError> {
        let path = self.path.as_deref().ok_or(ConfigError::NoFile)?;
        let next = HostConfig::from_path(path)?;
        let changes = self.update(next);
        tracing::info!(path = %path.display(), changes = changes.len(), "Config reloaded");
        Ok(changes)
    }
}

fn diff(old: &HostConfig, new: &HostConfig) -> Vec<ConfigReload> {
    let mut changes = Vec::new();

    let old_basic = old.basic.entries();
    let new_basic = new.basic.entries();
    for (key, value) in &new_basic {
        if old_basic.get(key) != Some(value) {
            changes.push(ConfigReload::Basic {
                key: key.clone(),
                value: Some(value.clone()),
            });
        }
    }
    for key in old_basic.keys() {
        if !new_basic.contains_key(key) {
            changes.push(ConfigReload::Basic {
                key: key.clone(),
                value: None,
            });
        }
    }

    for (key, config) in new.plugins() {
        if old.plugin(key) != Some(config) {
            changes.push(ConfigReload::Plugin {
                key: key.clone(),
                value: Some(config.clone()),
            });
        }
    }
    for key in old.plugins().keys() {
        if !new.contains_plugin(key) {
            changes.push(ConfigReload::Plugin {
                key: key.clone(),
                value: None,
            });
        }
    }

    changes
}
