//! storage - a shared key/value store other units require

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tether_plugin_api::{Plugin, PluginError, PluginMetadata, UnitContext};

/// Handle exported by the `storage` unit
#[derive(Debug, Clone, Default)]
pub struct Storage {
    values: Arc<Mutex<BTreeMap<String, String>>>,
}

impl Storage {
    pub fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.into());
    }

    /// Add `by` to the integer stored under `key`
    pub fn increment(&self, key: &str, by: u64) -> u64 {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let next = values
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + by;
        values.insert(key.to_string(), next.to_string());
        next
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[derive(Default)]
pub struct StorageUnit;

impl Plugin for StorageUnit {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("storage")
            .version("0.1.0")
            .description("In-memory key/value store shared between units")
    }

    fn on_load(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError> {
        // Values survive a reload of this unit
        let storage = ctx.keep("values", Storage::default, None)?;
        ctx.export(Storage::clone(&storage))?;
        ctx.log_debug(&format!("{} values kept", storage.len()));
        Ok(())
    }
}
