use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use tether_plugin_api::PluginConfig;

/// A plugin key starting with this is disabled and not loaded
pub const DISABLED_PREFIX: char = '~';

/// Default debounce for the hot-reload watcher
pub const DEFAULT_RELOAD_DEBOUNCE_MS: u64 = 300;

/// Errors reading or parsing configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config for '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("No config file to reload")]
    NoFile,
}

/// The `[basic]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Debounce for file-change driven reloads
    pub reload_debounce_ms: u64,

    /// Watch the config file and unit sources for changes
    pub watch: bool,

    /// Names resolved as units even when no config table names them
    pub unit_allowlist: Vec<String>,

    /// Host-specific settings units may read
    #[serde(flatten)]
    pub extra: toml::Table,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            reload_debounce_ms: DEFAULT_RELOAD_DEBOUNCE_MS,
            watch: false,
            unit_allowlist: Vec::new(),
            extra: toml::Table::new(),
        }
    }
}

impl BasicConfig {
    /// The table as flat key/value pairs, used for diffing
    pub(crate) fn entries(&self) -> BTreeMap<String, toml::Value> {
        match toml::Value::try_from(self) {
            Ok(toml::Value::Table(table)) => table.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Configuration as stored in TOML
#[derive(Debug, Default, Deserialize)]
struct RawHostConfig {
    #[serde(default)]
    basic: BasicConfig,

    #[serde(default)]
    plugins: toml::Table,
}

/// Parsed host configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostConfig {
    pub basic: BasicConfig,
    plugins: BTreeMap<String, PluginConfig>,
    disabled: BTreeSet<String>,
}

impl HostConfig {
    /// Parse a `tether.toml` document
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawHostConfig = toml::from_str(contents)?;
        let mut config = HostConfig {
            basic: raw.basic,
            ..Default::default()
        };
        for (key, value) in raw.plugins {
            if let Some(name) = key.strip_prefix(DISABLED_PREFIX) {
                config.disabled.insert(name.to_string());
                continue;
            }
            let table = match value {
                toml::Value::Table(table) => table,
                other => {
                    return Err(ConfigError::Invalid {
                        key,
                        message: format!("expected a table, found {}", other.type_str()),
                    });
                }
            };
            let plugin = PluginConfig::from_table(table).map_err(|e| ConfigError::Invalid {
                key: key.clone(),
                message: e.to_string(),
            })?;
            config.plugins.insert(key, plugin);
        }
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Config of the unit configured under `key`
    pub fn plugin(&self, key: &str) -> Option<&PluginConfig> {
        self.plugins.get(key)
    }

    /// Whether `key` names a configured, non-`~` unit
    pub fn contains_plugin(&self, key: &str) -> bool {
        self.plugins.contains_key(key)
    }

    /// Set or replace a unit's config
    pub fn set_plugin(&mut self, key: impl Into<String>, config: PluginConfig) {
        let key = key.into();
        self.disabled.remove(&key);
        self.plugins.insert(key, config);
    }

    /// Drop a unit's config
    pub fn remove_plugin(&mut self, key: &str) -> Option<PluginConfig> {
        self.plugins.remove(key)
    }

    /// Configured unit keys in load order: `$priority` ascending, then key
    pub fn load_order(&self) -> Vec<String> {
        let mut keys: Vec<(&String, i64)> = self
            .plugins
            .iter()
            .map(|(key, config)| (key, config.meta().priority))
            .collect();
        keys.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        keys.into_iter().map(|(key, _)| key.clone()).collect()
    }

    /// Whether `key` was disabled with the `~` prefix
    pub fn is_disabled(&self, key: &str) -> bool {
        self.disabled.contains(key)
    }

    /// Keys disabled with the `~` prefix
    pub fn disabled_keys(&self) -> impl Iterator<Item = &str> {
        self.disabled.iter().map(String::as_str)
    }

    pub(crate) fn plugins(&self) -> &BTreeMap<String, PluginConfig> {
        &self.plugins
    }
}
