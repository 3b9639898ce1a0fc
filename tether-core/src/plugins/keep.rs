//! Kept-variable store
//!
//! Values survive a hot reload of the same unit id and are dropped (with
//! their disposer) when the unit is disposed for good.

use std::collections::HashMap;
use std::sync::Mutex;

use tether_plugin_api::{KeepDisposer, KeepInit, Kept};

struct Entry {
    value: Kept,
    disposer: Option<KeepDisposer>,
}

/// Per-unit keyed values
#[derive(Default)]
pub struct KeepStore {
    entries: Mutex<HashMap<String, HashMap<String, Entry>>>,
}

impl KeepStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get `key` for `unit`, creating it with `init` if absent.
    ///
    /// The disposer of the first call wins; later calls only read.
    pub fn get_or_init(
        &self,
        unit: &str,
        key: &str,
        init: KeepInit,
        disposer: Option<KeepDisposer>,
    ) -> Kept {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(unit.to_string())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: init(),
                disposer,
            })
            .value
            .clone()
    }

    /// Whether `unit` keeps anything under `key`
    pub fn contains(&self, unit: &str, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(unit).is_some_and(|keys| keys.contains_key(key))
    }

    /// Drop everything `unit` kept, running disposers outside the lock
    pub fn clear(&self, unit: &str) {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.remove(unit)
        };
        let Some(removed) = removed else {
            return;
        };
        dispose_entries(unit, removed);
    }

    /// Drop every unit's kept values
    pub fn clear_all(&self) {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *entries)
        };
        for (unit, keys) in removed {
            dispose_entries(&unit, keys);
        }
    }
}

fn dispose_entries(unit: &str, entries: HashMap<String, Entry>) {
    for (key, entry) in entries {
        if let Some(disposer) = entry.disposer {
            tracing::debug!(unit = %unit, key = %key, "Disposing kept value");
            disposer(entry.value);
        }
    }
}
